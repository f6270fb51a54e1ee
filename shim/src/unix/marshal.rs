//! The `char**` boundary.
//!
//! Everything above this module works with `Vec<String>`; only the
//! interposed entry points marshal to and from NUL-terminated C arrays, and
//! only here.

use std::ffi::{CStr, CString};

use libc::c_char;

/// Read one NUL-terminated string. Invalid UTF-8 is replaced, not rejected:
/// an exec must not fail over an unprintable byte in an argument.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
pub unsafe fn read_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// Read a NULL-terminated array of C strings. A null array reads as empty.
///
/// # Safety
/// `array` must be null or a valid NULL-terminated array of NUL-terminated
/// strings.
pub unsafe fn read_string_array(array: *const *const c_char) -> Vec<String> {
    let mut items = Vec::new();
    if array.is_null() {
        return items;
    }
    let mut cursor = array;
    while !(*cursor).is_null() {
        items.push(CStr::from_ptr(*cursor).to_string_lossy().into_owned());
        cursor = cursor.add(1);
    }
    items
}

/// Own the strings as C strings. Entries with interior NUL bytes cannot be
/// represented in an exec array and are dropped.
pub fn to_cstrings(items: Vec<String>) -> Vec<CString> {
    items
        .into_iter()
        .filter_map(|item| CString::new(item).ok())
        .collect()
}

/// The NULL-terminated pointer array backing `items`. The returned vector
/// borrows `items`; keep both alive across the call.
pub fn as_ptr_array(items: &[CString]) -> Vec<*const c_char> {
    let mut ptrs: Vec<*const c_char> = items.iter().map(|item| item.as_ptr()).collect();
    ptrs.push(std::ptr::null());
    ptrs
}

/// Same array with the mutability `posix_spawn` asks for. The strings are
/// never written through these pointers.
pub fn as_mut_ptr_array(items: &[CString]) -> Vec<*mut c_char> {
    let mut ptrs: Vec<*mut c_char> = items
        .iter()
        .map(|item| item.as_ptr() as *mut c_char)
        .collect();
    ptrs.push(std::ptr::null_mut());
    ptrs
}

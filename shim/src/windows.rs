//! Windows interception: detour the CreateProcess family inside the traced
//! process by patching the import address table of its main module.
//!
//! The detour rewrites the command line to route through the proxy, clears
//! the application name so the loader resolves the new first token, and
//! forwards every other parameter unchanged to the real API.

#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_void, CStr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use windows_sys::core::{PCSTR, PCWSTR, PSTR, PWSTR};
use windows_sys::Win32::Foundation::{BOOL, HMODULE};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::System::Diagnostics::Debug::{
    IMAGE_DIRECTORY_ENTRY_IMPORT, IMAGE_NT_HEADERS64,
};
use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
use windows_sys::Win32::System::Memory::{VirtualProtect, PAGE_PROTECTION_FLAGS, PAGE_READWRITE};
use windows_sys::Win32::System::SystemServices::{
    IMAGE_DOS_HEADER, IMAGE_IMPORT_BY_NAME, IMAGE_IMPORT_DESCRIPTOR, IMAGE_ORDINAL_FLAG64,
    IMAGE_THUNK_DATA64,
};
use windows_sys::Win32::System::Threading::{PROCESS_INFORMATION, STARTUPINFOA, STARTUPINFOW};

use chaperone_wire::{environ, IpcId};

use crate::{cmdline, scrub_environment};

struct Context {
    id: IpcId,
    proxy_path: String,
}

static CONTEXT: OnceLock<Option<Context>> = OnceLock::new();

static REAL_CREATE_PROCESS_A: AtomicUsize = AtomicUsize::new(0);
static REAL_CREATE_PROCESS_W: AtomicUsize = AtomicUsize::new(0);

#[ctor::ctor]
fn activate() {
    let id = std::env::var(environ::KEY_IPC_ID)
        .ok()
        .and_then(|value| value.parse::<IpcId>().ok());
    let proxy_path = std::env::var(environ::KEY_PROXY_PATH).ok();

    scrub_environment();

    let context = match (id, proxy_path) {
        (Some(id), Some(proxy_path)) if !is_current_exe(&proxy_path) => {
            Some(Context { id, proxy_path })
        }
        _ => None,
    };
    if context.is_some() {
        unsafe { install_detours() };
    }
    let _ = CONTEXT.set(context);
}

fn is_current_exe(candidate: &str) -> bool {
    match (std::env::current_exe(), std::fs::canonicalize(candidate)) {
        (Ok(own), Ok(other)) => own == other,
        _ => false,
    }
}

unsafe fn install_detours() {
    let module = GetModuleHandleW(std::ptr::null());
    if module == 0 {
        eprintln!("chaperone-shim: failed to resolve main module; cannot install interception");
        std::process::abort();
    }

    let patched_a = patch_iat(
        module,
        "kernel32.dll",
        "CreateProcessA",
        create_process_a_detour as usize,
    );
    if let Some(real) = patched_a {
        REAL_CREATE_PROCESS_A.store(real, Ordering::SeqCst);
    }

    let patched_w = patch_iat(
        module,
        "kernel32.dll",
        "CreateProcessW",
        create_process_w_detour as usize,
    );
    if let Some(real) = patched_w {
        REAL_CREATE_PROCESS_W.store(real, Ordering::SeqCst);
    }

    // A module that creates processes imports at least one of the pair;
    // neither being present is fine, both failing to patch is not
    // detectable here, so nothing further to check.
}

/// Swap one IAT slot of `module` and return the previous target.
unsafe fn patch_iat(
    module: HMODULE,
    import_module: &str,
    symbol: &str,
    replacement: usize,
) -> Option<usize> {
    let base = module as usize;
    let dos = &*(base as *const IMAGE_DOS_HEADER);
    if dos.e_magic != 0x5a4d {
        return None;
    }
    let nt = &*((base + dos.e_lfanew as usize) as *const IMAGE_NT_HEADERS64);
    if nt.Signature != 0x0000_4550 {
        return None;
    }

    let import_dir = nt.OptionalHeader.DataDirectory[IMAGE_DIRECTORY_ENTRY_IMPORT as usize];
    if import_dir.VirtualAddress == 0 {
        return None;
    }

    let mut descriptor = (base + import_dir.VirtualAddress as usize) as *const IMAGE_IMPORT_DESCRIPTOR;
    while (*descriptor).Name != 0 {
        let module_name = CStr::from_ptr(((base + (*descriptor).Name as usize) as *const u8).cast());
        if module_name
            .to_string_lossy()
            .eq_ignore_ascii_case(import_module)
        {
            let mut name_thunk = (base + (*descriptor).Anonymous.OriginalFirstThunk as usize)
                as *const IMAGE_THUNK_DATA64;
            let mut iat_thunk =
                (base + (*descriptor).FirstThunk as usize) as *mut IMAGE_THUNK_DATA64;

            while (*name_thunk).u1.AddressOfData != 0 {
                let data = (*name_thunk).u1.AddressOfData;
                if data & IMAGE_ORDINAL_FLAG64 == 0 {
                    let by_name = (base + data as usize) as *const IMAGE_IMPORT_BY_NAME;
                    let import_name = CStr::from_ptr((*by_name).Name.as_ptr().cast());
                    if import_name.to_bytes() == symbol.as_bytes() {
                        return swap_slot(&mut (*iat_thunk).u1.Function, replacement);
                    }
                }
                name_thunk = name_thunk.add(1);
                iat_thunk = iat_thunk.add(1);
            }
        }
        descriptor = descriptor.add(1);
    }
    None
}

unsafe fn swap_slot(slot: *mut u64, replacement: usize) -> Option<usize> {
    let mut previous_protect: PAGE_PROTECTION_FLAGS = 0;
    if VirtualProtect(
        slot as *const c_void,
        std::mem::size_of::<u64>(),
        PAGE_READWRITE,
        &mut previous_protect,
    ) == 0
    {
        return None;
    }
    let previous = *slot;
    *slot = replacement as u64;
    let mut ignored: PAGE_PROTECTION_FLAGS = 0;
    VirtualProtect(
        slot as *const c_void,
        std::mem::size_of::<u64>(),
        previous_protect,
        &mut ignored,
    );
    Some(previous as usize)
}

fn wide_to_string(ptr: PCWSTR) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let mut len = 0usize;
    unsafe {
        while *ptr.add(len) != 0 {
            len += 1;
        }
        Some(String::from_utf16_lossy(std::slice::from_raw_parts(
            ptr, len,
        )))
    }
}

fn narrow_to_string(ptr: PCSTR) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(
        unsafe { CStr::from_ptr(ptr.cast()) }
            .to_string_lossy()
            .into_owned(),
    )
}

type CreateProcessWFn = unsafe extern "system" fn(
    PCWSTR,
    PWSTR,
    *const SECURITY_ATTRIBUTES,
    *const SECURITY_ATTRIBUTES,
    BOOL,
    u32,
    *const c_void,
    PCWSTR,
    *const STARTUPINFOW,
    *mut PROCESS_INFORMATION,
) -> BOOL;

type CreateProcessAFn = unsafe extern "system" fn(
    PCSTR,
    PSTR,
    *const SECURITY_ATTRIBUTES,
    *const SECURITY_ATTRIBUTES,
    BOOL,
    u32,
    *const c_void,
    PCSTR,
    *const STARTUPINFOA,
    *mut PROCESS_INFORMATION,
) -> BOOL;

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn create_process_w_detour(
    application_name: PCWSTR,
    command_line: PWSTR,
    process_attributes: *const SECURITY_ATTRIBUTES,
    thread_attributes: *const SECURITY_ATTRIBUTES,
    inherit_handles: BOOL,
    creation_flags: u32,
    environment: *const c_void,
    current_directory: PCWSTR,
    startup_info: *const STARTUPINFOW,
    process_information: *mut PROCESS_INFORMATION,
) -> BOOL {
    let real: CreateProcessWFn =
        std::mem::transmute(REAL_CREATE_PROCESS_W.load(Ordering::SeqCst));

    let (Some(Some(ctx)), Some(line)) = (CONTEXT.get(), wide_to_string(command_line)) else {
        return real(
            application_name,
            command_line,
            process_attributes,
            thread_attributes,
            inherit_handles,
            creation_flags,
            environment,
            current_directory,
            startup_info,
            process_information,
        );
    };

    let app = wide_to_string(application_name);
    let rewritten = cmdline::rewrite(&ctx.proxy_path, ctx.id, app.as_deref(), &line);
    let mut wide: Vec<u16> = rewritten.encode_utf16().chain(std::iter::once(0)).collect();

    real(
        std::ptr::null(),
        wide.as_mut_ptr(),
        process_attributes,
        thread_attributes,
        inherit_handles,
        creation_flags,
        environment,
        current_directory,
        startup_info,
        process_information,
    )
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn create_process_a_detour(
    application_name: PCSTR,
    command_line: PSTR,
    process_attributes: *const SECURITY_ATTRIBUTES,
    thread_attributes: *const SECURITY_ATTRIBUTES,
    inherit_handles: BOOL,
    creation_flags: u32,
    environment: *const c_void,
    current_directory: PCSTR,
    startup_info: *const STARTUPINFOA,
    process_information: *mut PROCESS_INFORMATION,
) -> BOOL {
    let real: CreateProcessAFn =
        std::mem::transmute(REAL_CREATE_PROCESS_A.load(Ordering::SeqCst));

    let (Some(Some(ctx)), Some(line)) = (CONTEXT.get(), narrow_to_string(command_line)) else {
        return real(
            application_name,
            command_line,
            process_attributes,
            thread_attributes,
            inherit_handles,
            creation_flags,
            environment,
            current_directory,
            startup_info,
            process_information,
        );
    };

    let app = narrow_to_string(application_name);
    let rewritten = cmdline::rewrite(&ctx.proxy_path, ctx.id, app.as_deref(), &line);
    let mut narrow: Vec<u8> = rewritten.into_bytes();
    narrow.push(0);

    real(
        std::ptr::null(),
        narrow.as_mut_ptr(),
        process_attributes,
        thread_attributes,
        inherit_handles,
        creation_flags,
        environment,
        current_directory,
        startup_info,
        process_information,
    )
}

//! Marker bookkeeping in process environment blocks.
//!
//! The proxy *injects* interception state before launching a traced target:
//! the shim artifact is merged into the platform preload variable and two
//! marker entries carry the connection id and the proxy's own path. The shim
//! *strips* that state the moment it activates, so the traced program
//! observes the environment it would have had unmodified. Both directions
//! operate on plain `KEY=VALUE` sequences; marshaling to OS-native blocks
//! happens elsewhere.

use crate::model::IpcId;

/// Marker carrying the connection id assigned to the launching proxy.
pub const KEY_IPC_ID: &str = "CHAPERONE_IPC_ID";

/// Marker carrying the absolute path of the proxy executable, for the shim's
/// rewritten invocations further down the tree.
pub const KEY_PROXY_PATH: &str = "CHAPERONE_PROXY_PATH";

/// The loader variable the shim artifact rides in on.
///
/// Windows has no loader preload variable; there the entry is bookkeeping for
/// the detour payload's own chain, under a name of ours.
#[cfg(target_os = "macos")]
pub const KEY_PRELOAD: &str = "DYLD_INSERT_LIBRARIES";
#[cfg(all(unix, not(target_os = "macos")))]
pub const KEY_PRELOAD: &str = "LD_PRELOAD";
#[cfg(windows)]
pub const KEY_PRELOAD: &str = "CHAPERONE_PRELOAD";

#[cfg(unix)]
pub const PATH_LIST_SEPARATOR: char = ':';
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: char = ';';

/// File name of the shim artifact, used to recognize our own preload segment.
#[cfg(target_os = "macos")]
pub const SHIM_FILE_NAME: &str = "libchaperone_shim.dylib";
#[cfg(all(unix, not(target_os = "macos")))]
pub const SHIM_FILE_NAME: &str = "libchaperone_shim.so";
#[cfg(windows)]
pub const SHIM_FILE_NAME: &str = "chaperone_shim.dll";

/// Whether `entry` belongs to `key`, i.e. starts with exactly `key=`.
///
/// `FOOBAR=x` does not belong to `FOO`.
pub fn is_entry_of(entry: &str, key: &str) -> bool {
    entry.len() > key.len() && entry.as_bytes()[key.len()] == b'=' && entry.starts_with(key)
}

/// Value of `key` in `env`, if present.
pub fn get<'e>(env: &'e [String], key: &str) -> Option<&'e str> {
    env.iter()
        .find(|entry| is_entry_of(entry, key))
        .map(|entry| &entry[key.len() + 1..])
}

/// Add interception state to an environment about to launch a traced target.
///
/// An existing preload entry keeps its co-existing libraries: the shim path
/// is appended behind the platform separator rather than overwriting them.
pub fn inject(env: &mut Vec<String>, id: IpcId, proxy_path: &str, shim_path: &str) {
    let mut merged = false;
    for entry in env.iter_mut() {
        if is_entry_of(entry, KEY_PRELOAD) {
            entry.push(PATH_LIST_SEPARATOR);
            entry.push_str(shim_path);
            merged = true;
            break;
        }
    }
    if !merged {
        env.push(format!("{KEY_PRELOAD}={shim_path}"));
    }
    env.push(format!("{KEY_IPC_ID}={id}"));
    env.push(format!("{KEY_PROXY_PATH}={proxy_path}"));
}

/// Remove interception state, leaving every other entry untouched and in its
/// original relative order.
///
/// The preload variable loses exactly the shim's own segment; if that empties
/// it, the variable is dropped rather than left with an empty value.
/// Idempotent.
pub fn strip(env: &mut Vec<String>) {
    let mut kept = Vec::with_capacity(env.len());
    for entry in env.drain(..) {
        if is_entry_of(&entry, KEY_IPC_ID) || is_entry_of(&entry, KEY_PROXY_PATH) {
            continue;
        }
        if is_entry_of(&entry, KEY_PRELOAD) {
            let value = &entry[KEY_PRELOAD.len() + 1..];
            let remaining: Vec<&str> = value
                .split(PATH_LIST_SEPARATOR)
                .filter(|segment| !is_shim_segment(segment))
                .collect();
            if remaining.is_empty() {
                continue;
            }
            let mut rebuilt = String::with_capacity(entry.len());
            rebuilt.push_str(KEY_PRELOAD);
            rebuilt.push('=');
            for (i, segment) in remaining.iter().enumerate() {
                if i > 0 {
                    rebuilt.push(PATH_LIST_SEPARATOR);
                }
                rebuilt.push_str(segment);
            }
            kept.push(rebuilt);
            continue;
        }
        kept.push(entry);
    }
    *env = kept;
}

/// A preload segment is ours when its file name is the shim artifact.
fn is_shim_segment(segment: &str) -> bool {
    match segment.strip_suffix(SHIM_FILE_NAME) {
        Some(prefix) => prefix.is_empty() || prefix.ends_with('/') || prefix.ends_with('\\'),
        None => false,
    }
}

//! Well-known names and filesystem locations.

use std::path::{Path, PathBuf};

use chaperone_wire::environ::SHIM_FILE_NAME;

use crate::error::{Error, Result};
use crate::ipc::transport::Endpoint;

/// Overrides the IPC endpoint. The endpoint name is configuration, not
/// protocol; the session passes its choice down to the root proxy through
/// this variable.
pub const ENV_ENDPOINT: &str = "CHAPERONE_IPC_PATH";

/// Exit code of a proxy that failed for a reason it could not attribute to
/// the command it executed (EX_SOFTWARE).
pub const PROXY_FAILURE_CODE: i32 = 70;

#[cfg(windows)]
pub const PROXY_BIN_NAME: &str = "chaperone-proxy.exe";
#[cfg(not(windows))]
pub const PROXY_BIN_NAME: &str = "chaperone-proxy";

/// Runtime directory for sockets and logs.
/// Prefers XDG_RUNTIME_DIR (typically /run/user/<uid>/, mode 0700).
/// Falls back to the system temp directory if not set.
pub fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

/// Directory for chaperone's own state (proxy log, default socket).
pub fn state_dir() -> PathBuf {
    runtime_dir().join("chaperone")
}

#[cfg(unix)]
pub fn default_endpoint() -> Endpoint {
    state_dir().join("chaperone-ipc.sock")
}

#[cfg(windows)]
pub fn default_endpoint() -> Endpoint {
    r"\\.\pipe\chaperone-ipc".to_string()
}

/// The endpoint this process should use: the override if set, otherwise the
/// single well-known per-session name.
pub fn endpoint() -> Endpoint {
    match std::env::var(ENV_ENDPOINT) {
        Ok(path) if !path.is_empty() => path.into(),
        _ => default_endpoint(),
    }
}

/// Where the proxy writes its log. The proxy owns the traced program's
/// stdio, so it must never log there.
pub fn proxy_log_path() -> PathBuf {
    state_dir().join("chaperone-proxy.log")
}

/// The proxy binary, expected next to the current executable.
pub fn proxy_executable() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let path = exe
        .parent()
        .map(|dir| dir.join(PROXY_BIN_NAME))
        .unwrap_or_default();
    if !path.is_file() {
        return Err(Error::ProxyMissing { path });
    }
    Ok(path)
}

/// The shim artifact, expected next to the proxy executable. Interception
/// coverage is a correctness property, so a missing artifact is a hard error
/// rather than a fallback to untraced execution.
pub fn shim_artifact(proxy_exe: &Path) -> Result<PathBuf> {
    let path = proxy_exe
        .parent()
        .map(|dir| dir.join(SHIM_FILE_NAME))
        .unwrap_or_default();
    if !path.is_file() {
        return Err(Error::ShimMissing { path });
    }
    Ok(path)
}

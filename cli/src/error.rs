use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ipc error: {reason}")]
    Ipc { reason: String },

    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    #[error("invalid proxy invocation: {reason}")]
    InvalidInvocation { reason: String },

    #[error("error reported by shim: {message}")]
    Shim { message: String },

    #[error("shim library not found at {path}")]
    ShimMissing { path: PathBuf },

    #[error("proxy executable not found at {path}")]
    ProxyMissing { path: PathBuf },

    #[error("failed to spawn {executable}: {reason}")]
    Spawn { executable: String, reason: String },

    #[error("decision authority error: {reason}")]
    Authority { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] chaperone_wire::WireError),
}

pub type Result<T> = std::result::Result<T, Error>;

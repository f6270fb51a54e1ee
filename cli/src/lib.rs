//! Session, proxy, and IPC plumbing for chaperone.
//!
//! The session controller ([`session::Session`]) runs a command under a
//! single-shot relay (`chaperone-proxy`) and accepts one IPC connection per
//! intercepted process-creation call anywhere in the resulting tree. Each
//! connection is brokered to a decision authority ([`service::Service`]),
//! whose verdict the proxy carries out.

pub mod config;
pub mod error;
pub mod ipc;
pub mod proxy;
pub mod service;
pub mod session;

pub use error::{Error, Result};

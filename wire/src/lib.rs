//! Protocol layer shared by the chaperone session, the proxy, and the
//! injected shim.
//!
//! Everything in this crate is deliberately dependency-light: the shim links
//! it from inside arbitrary traced processes, so it must not drag a runtime
//! in. The `async` feature adds non-blocking decoding for the session and
//! proxy sides.

pub mod codec;
pub mod environ;
pub mod model;

pub use codec::{Decode, Encode, WireError};
pub use model::{Action, Command, IpcId, Request, ROOT_PARENT};

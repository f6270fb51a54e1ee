pub mod client;
pub mod server;
pub mod transport;

pub use client::Client;
pub use server::serve_connection;

//! Wire protocol for the trigger workflow host.
//!
//! Messages travel as JSON text frames over a persistent bidirectional
//! connection. Both directions share the same request/response envelope
//! ([`Frame`]); the method catalogues differ per direction. Client
//! originated methods are described by [`ClientMethod`] marker types,
//! server originated calls parse into the [`ServerCall`] enum.

mod client;
mod frame;
mod server;
mod types;

pub use client::*;
pub use frame::*;
pub use server::*;
pub use types::*;

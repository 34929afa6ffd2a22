//! Talk JSON-RPC 2.0 to language servers over their stdio.
//!
//! # Crate Structure
//!
//! - [`frame`]: Content-Length framing, envelopes, capture sink
//! - [`rpc`]: call correlation, dispatch loop, handshake (behind `rpc` feature)
//!
//! The `lspwire` binary (feature `cli`) spawns a server, performs the
//! handshake, and issues one request or notification.

/// Re-export frame types.
pub mod frame {
    pub use lspwire_frame::*;
}

/// Re-export connection types (requires `rpc` feature).
#[cfg(feature = "rpc")]
pub mod rpc {
    pub use lspwire_rpc::*;
}

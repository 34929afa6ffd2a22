//! JSON-RPC 2.0 call correlation over a framed byte stream.
//!
//! A [`Connection`] multiplexes concurrent calls onto one stream to a single
//! peer: each call registers a reply slot under a fresh id before its request
//! is written, and the dispatch loop driven by [`Connection::run`] hands every
//! response to the caller that owns its id. [`Handshake`] performs the
//! `initialize` / `initialized` exchange that gates ordinary traffic.
//!
//! ```no_run
//! # async fn demo() -> lspwire_rpc::Result<()> {
//! use lspwire_rpc::{Connection, ConnectionConfig, Handshake};
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! let mut child = tokio::process::Command::new("gopls")
//!     .stdin(std::process::Stdio::piped())
//!     .stdout(std::process::Stdio::piped())
//!     .spawn()
//!     .map_err(lspwire_frame::FrameError::Io)?;
//! let stdin = child.stdin.take().expect("piped");
//! let stdout = child.stdout.take().expect("piped");
//!
//! let conn = Connection::new(stdout, stdin, ConnectionConfig::default());
//! let cancel = CancellationToken::new();
//! tokio::spawn({
//!     let conn = conn.clone();
//!     let cancel = cancel.clone();
//!     async move { conn.run(cancel).await }
//! });
//!
//! Handshake::default().run(&conn, &cancel, json!({"capabilities": {}})).await?;
//! let symbols = conn
//!     .call(&cancel, "workspace/symbol", json!({"query": "main"}))
//!     .await?;
//! # let _ = symbols;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod handshake;
mod table;

pub use config::{ConnectionConfig, IdFormat};
pub use connection::Connection;
pub use dispatch::DispatchStats;
pub use error::{Result, RpcError};
pub use handshake::{
    is_retryable, shutdown, Handshake, HandshakeConfig, HandshakeOutcome, HandshakeState,
    RetryPolicy, EXIT, INITIALIZE, INITIALIZED, SHUTDOWN,
};

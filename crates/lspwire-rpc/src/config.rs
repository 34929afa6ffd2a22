use std::time::Duration;

use lspwire_frame::{FrameConfig, Id};

/// How request ids are rendered on the wire.
///
/// Ids always come from a per-connection counter starting at 1; some servers
/// echo string ids back, so both renderings are supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdFormat {
    /// `1`, `2`, `3`, ...
    #[default]
    Number,
    /// `"1"`, `"2"`, `"3"`, ...
    String,
}

impl IdFormat {
    pub fn make(self, n: i64) -> Id {
        match self {
            IdFormat::Number => Id::Number(n),
            IdFormat::String => Id::String(n.to_string()),
        }
    }
}

/// Configuration for a [`crate::Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Rendering of allocated request ids.
    pub id_format: IdFormat,
    /// Default deadline for `call`. `None` waits until a response, cancellation, or closure.
    pub call_timeout: Option<Duration>,
    /// Reject ordinary traffic until the initialize handshake completes.
    pub enforce_handshake: bool,
    /// Framing limits for both directions.
    pub frame: FrameConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            id_format: IdFormat::Number,
            call_timeout: None,
            enforce_handshake: true,
            frame: FrameConfig::default(),
        }
    }
}

/// Errors that can occur while framing or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header block ended without a `Content-Length` header.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// A header line could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// No header separator was found within the configured limit.
    #[error("header block too large ({size} bytes, max {max})")]
    HeaderTooLarge { size: usize, max: usize },

    /// The body exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The body is not a valid JSON-RPC 2.0 message.
    #[error("invalid message body: {0}")]
    InvalidBody(#[source] serde_json::Error),

    /// An outbound message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// An I/O error occurred while reading or writing messages.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether the error means the byte stream can no longer be trusted.
    ///
    /// Everything except a clean close is a protocol or I/O failure.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;

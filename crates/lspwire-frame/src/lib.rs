//! Content-Length framing for JSON-RPC 2.0 over byte streams.
//!
//! This is the bottom layer of lspwire. Every message on the wire is framed as
//! in the Language Server Protocol base protocol:
//! - ASCII header lines terminated by CRLF, with a mandatory `Content-Length`
//! - a blank line
//! - exactly `Content-Length` bytes of UTF-8 JSON
//!
//! The codec functions work on `BytesMut`; `LspCodec` and `CaptureWriter`
//! plug them into tokio streams and are behind the `async` feature.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod capture;
pub mod codec;
pub mod error;
pub mod message;

#[cfg(feature = "async")]
pub use async_codec::LspCodec;
#[cfg(feature = "async")]
pub use capture::CaptureWriter;
pub use capture::Transcript;
pub use codec::{
    decode_body, decode_message, encode_body, encode_message, FrameConfig, DEFAULT_MAX_HEADER,
    DEFAULT_MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use message::{
    Envelope, Id, Notification, Request, Response, ResponseError, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR, REQUEST_CANCELLED,
    SERVER_NOT_INITIALIZED, UNKNOWN_ERROR_CODE,
};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::message::Envelope;

/// Mandatory header carrying the body length in bytes.
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Optional header; accepted and ignored on input, never written.
pub const CONTENT_TYPE: &str = "Content-Type";

/// Blank line terminating the header block.
pub const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Default maximum body size: 64 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Default maximum header block size: 8 KiB.
pub const DEFAULT_MAX_HEADER: usize = 8 * 1024;

/// Configuration for the message codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes. Default: 64 MiB.
    pub max_payload_size: usize,
    /// Maximum header block size in bytes, separator excluded. Default: 8 KiB.
    pub max_header_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            max_header_size: DEFAULT_MAX_HEADER,
        }
    }
}

impl FrameConfig {
    /// A configuration without size limits, for decoding trusted local buffers.
    pub fn unbounded() -> Self {
        Self {
            max_payload_size: usize::MAX,
            max_header_size: usize::MAX,
        }
    }
}

/// Serialize an envelope and append it to `dst` in the wire format.
///
/// Wire format:
/// ```text
/// Content-Length: <n>\r\n
/// \r\n
/// <n bytes of UTF-8 JSON>
/// ```
pub fn encode_message(message: &Envelope, dst: &mut BytesMut) -> Result<()> {
    let body = serde_json::to_vec(message).map_err(FrameError::Encode)?;
    encode_body(&body, dst);
    Ok(())
}

/// Append an already-serialized body with its header block.
pub fn encode_body(body: &[u8], dst: &mut BytesMut) {
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
    dst.reserve(header.len() + body.len());
    dst.put_slice(header.as_bytes());
    dst.put_slice(body);
}

/// Decode one envelope from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
/// On success, consumes the message bytes from the buffer.
pub fn decode_message(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Envelope>> {
    let Some(body) = decode_body(src, config)? else {
        return Ok(None);
    };
    let message = serde_json::from_slice(&body).map_err(FrameError::InvalidBody)?;
    Ok(Some(message))
}

/// Split one raw body off the front of a buffer without parsing the JSON.
pub fn decode_body(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Bytes>> {
    let Some(header_len) = find_separator(src) else {
        if src.len() > config.max_header_size.saturating_add(HEADER_SEPARATOR.len()) {
            return Err(FrameError::HeaderTooLarge {
                size: src.len(),
                max: config.max_header_size,
            });
        }
        return Ok(None); // Need more data
    };

    if header_len > config.max_header_size {
        return Err(FrameError::HeaderTooLarge {
            size: header_len,
            max: config.max_header_size,
        });
    }

    let body_len = parse_content_length(&src[..header_len])?;
    if body_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: config.max_payload_size,
        });
    }

    let total = header_len + HEADER_SEPARATOR.len() + body_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None); // Need more data
    }

    src.advance(header_len + HEADER_SEPARATOR.len());
    Ok(Some(src.split_to(body_len).freeze()))
}

fn find_separator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_SEPARATOR.len())
        .position(|window| window == HEADER_SEPARATOR)
}

/// Parse the header block (without the trailing blank line).
fn parse_content_length(header: &[u8]) -> Result<usize> {
    if !header.is_ascii() {
        return Err(FrameError::InvalidHeader("header block is not ASCII".to_string()));
    }
    let text = std::str::from_utf8(header)
        .map_err(|_| FrameError::InvalidHeader("header block is not ASCII".to_string()))?;

    let mut length = None;
    for line in text.split("\r\n") {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::InvalidHeader(format!("malformed header line '{line}'")))?;
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
            let parsed: usize = value.parse().map_err(|_| {
                FrameError::InvalidHeader(format!("invalid {CONTENT_LENGTH} '{value}'"))
            })?;
            match length {
                Some(previous) if previous != parsed => {
                    return Err(FrameError::InvalidHeader(format!(
                        "conflicting {CONTENT_LENGTH} values {previous} and {parsed}"
                    )));
                }
                _ => length = Some(parsed),
            }
        } else if !name.eq_ignore_ascii_case(CONTENT_TYPE) {
            tracing::trace!(header = name, "ignoring unknown header");
        }
    }

    length.ok_or(FrameError::MissingContentLength)
}

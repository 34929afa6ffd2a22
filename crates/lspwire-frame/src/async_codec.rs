use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_message, encode_body, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::Envelope;

/// `tokio_util` codec for Content-Length framed JSON-RPC envelopes.
///
/// Use with `FramedRead` / `FramedWrite` over any `AsyncRead` / `AsyncWrite`.
#[derive(Debug, Clone, Default)]
pub struct LspCodec {
    config: FrameConfig,
}

impl LspCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for LspCodec {
    type Item = Envelope;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        decode_message(src, &self.config)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => {
                tracing::debug!(buffered = src.len(), "stream closed mid-message");
                Err(FrameError::ConnectionClosed)
            }
        }
    }
}

impl Encoder<Envelope> for LspCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_vec(&item).map_err(FrameError::Encode)?;
        if body.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: body.len(),
                max: self.config.max_payload_size,
            });
        }
        encode_body(&body, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::message::{Notification, Request, Response};

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(client, LspCodec::default());
        let mut stream = FramedRead::new(server, LspCodec::default());

        let messages = vec![
            Envelope::from(Request::new(1, "initialize", json!({"capabilities": {}}))),
            Envelope::from(Notification::new("initialized", json!({}))),
            Envelope::from(Response::success("x", json!(null))),
        ];
        for message in &messages {
            sink.send(message.clone()).await.unwrap();
        }
        drop(sink);

        for expected in messages {
            assert_eq!(stream.next().await.unwrap().unwrap(), expected);
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn small_duplex_buffer_forces_short_reads() {
        let (client, server) = tokio::io::duplex(7);
        let note = Envelope::from(Notification::new("log", json!({"text": "y".repeat(512)})));

        let writer = {
            let note = note.clone();
            tokio::spawn(async move {
                let mut sink = FramedWrite::new(client, LspCodec::default());
                sink.send(note).await.unwrap();
            })
        };

        let mut stream = FramedRead::new(server, LspCodec::default());
        assert_eq!(stream.next().await.unwrap().unwrap(), note);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn eof_mid_message_is_connection_closed() {
        let (mut client, server) = tokio::io::duplex(1024);
        client
            .write_all(b"Content-Length: 50\r\n\r\n{\"jsonrpc\"")
            .await
            .unwrap();
        drop(client);

        let mut stream = FramedRead::new(server, LspCodec::default());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn malformed_header_surfaces_as_error() {
        let (mut client, server) = tokio::io::duplex(1024);
        client
            .write_all(b"Content-Length: nope\r\n\r\n{}")
            .await
            .unwrap();

        let mut stream = FramedRead::new(server, LspCodec::default());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::InvalidHeader(_)));
    }

    #[test]
    fn encoder_enforces_payload_limit() {
        let mut codec = LspCodec::new(FrameConfig {
            max_payload_size: 8,
            ..FrameConfig::default()
        });
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Envelope::from(Notification::new("exit", json!(null))), &mut dst)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(dst.is_empty());
    }
}

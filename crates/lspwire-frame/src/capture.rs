//! Diagnostic capture of outbound traffic.
//!
//! [`CaptureWriter`] decorates the primary sink: every byte the inner sink
//! accepts is also appended to a shared [`Transcript`]. The code writing
//! messages sees a single sink and never knows capture is enabled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};

use crate::codec::{decode_body, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::Envelope;

/// Shared, cloneable record of captured wire bytes.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(any(feature = "async", test))]
    fn record(&self, bytes: &[u8]) {
        self.lock().extend_from_slice(bytes);
    }

    /// Copy of everything captured so far, headers included.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Split the captured bytes back into message bodies.
    ///
    /// A trailing partial message (a write still in flight) is left out.
    pub fn bodies(&self) -> Result<Vec<Bytes>> {
        let mut buf = BytesMut::from(self.snapshot().as_slice());
        let config = FrameConfig::unbounded();
        let mut bodies = Vec::new();
        while let Some(body) = decode_body(&mut buf, &config)? {
            bodies.push(body);
        }
        Ok(bodies)
    }

    /// Decode the captured bytes back into envelopes.
    pub fn messages(&self) -> Result<Vec<Envelope>> {
        self.bodies()?
            .iter()
            .map(|body| serde_json::from_slice(body).map_err(FrameError::InvalidBody))
            .collect()
    }
}

/// Write-side decorator that mirrors accepted bytes into a [`Transcript`].
#[cfg(feature = "async")]
#[derive(Debug)]
pub struct CaptureWriter<W> {
    inner: W,
    transcript: Transcript,
}

#[cfg(feature = "async")]
impl<W> CaptureWriter<W> {
    pub fn new(inner: W, transcript: Transcript) -> Self {
        Self { inner, transcript }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(feature = "async")]
mod async_impl {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::AsyncWrite;

    use super::CaptureWriter;

    impl<W: AsyncWrite + Unpin> AsyncWrite for CaptureWriter<W> {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let this = self.get_mut();
            match Pin::new(&mut this.inner).poll_write(cx, buf) {
                Poll::Ready(Ok(written)) => {
                    this.transcript.record(&buf[..written]);
                    Poll::Ready(Ok(written))
                }
                other => other,
            }
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_flush(cx)
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
        }
    }
}

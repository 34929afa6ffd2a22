use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::SinkExt;
use lspwire_frame::{Envelope, Id, LspCodec, Notification, Request};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::dispatch::dispatch;
use crate::error::{Result, RpcError};
use crate::handshake::{HandshakeState, INITIALIZE, INITIALIZED};
use crate::table::CorrelationTable;

type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// One JSON-RPC connection to a single peer.
///
/// Cheap to clone: every clone shares the same correlation table, writer, and
/// handshake state. Exactly one task should drive [`Connection::run`]; any
/// number of tasks may issue calls and notifications concurrently.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    table: Mutex<CorrelationTable>,
    writer: tokio::sync::Mutex<FramedWrite<BoxedWriter, LspCodec>>,
    reader: Mutex<Option<FramedRead<BoxedReader, LspCodec>>>,
    state: Mutex<HandshakeState>,
}

#[derive(Debug, Clone, Copy)]
enum Outbound {
    Call,
    Notify,
}

/// Point after which a call gives up, and the budget it was given.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    after: Duration,
}

/// Resolves with the call's budget once its deadline passes; never without one.
async fn expire(deadline: Option<Deadline>) -> Duration {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(deadline.at).await;
            deadline.after
        }
        None => std::future::pending::<Duration>().await,
    }
}

enum Sent {
    Written,
    Expired(Duration),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection {
    /// Wrap an already-connected pair of byte streams.
    ///
    /// `reader` carries bytes from the peer, `writer` carries bytes to it.
    pub fn new<R, W>(reader: R, writer: W, config: ConnectionConfig) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let reader: BoxedReader = Box::pin(reader);
        let writer: BoxedWriter = Box::pin(writer);
        let codec = LspCodec::new(config.frame.clone());

        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(CorrelationTable::default()),
                writer: tokio::sync::Mutex::new(FramedWrite::new(writer, codec.clone())),
                reader: Mutex::new(Some(FramedRead::new(reader, codec))),
                state: Mutex::new(HandshakeState::Uninitialized),
                config,
            }),
        }
    }

    /// Send a request and wait for its response.
    ///
    /// Uses [`ConnectionConfig::call_timeout`] as the deadline, if set. The
    /// deadline runs from the moment of the call and covers waiting to write
    /// as well as waiting for the reply.
    pub async fn call(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: impl Serialize,
    ) -> Result<Value> {
        self.call_inner(cancel, method, params, self.inner.config.call_timeout)
            .await
    }

    /// Like [`Connection::call`], with an explicit deadline.
    pub async fn call_with_timeout(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: impl Serialize,
        timeout: Duration,
    ) -> Result<Value> {
        self.call_inner(cancel, method, params, Some(timeout)).await
    }

    /// Typed convenience over [`Connection::call`].
    pub async fn request<P, R>(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: &P,
    ) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let value = self.call(cancel, method, params).await?;
        serde_json::from_value(value).map_err(|source| RpcError::Decoding {
            method: method.to_string(),
            source,
        })
    }

    /// Send a notification. Returns once the message is written.
    pub async fn notify(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: impl Serialize,
    ) -> Result<()> {
        let params = encode_params(method, params)?;
        self.ensure_open()?;
        self.check_gate(method, Outbound::Notify)?;

        tracing::debug!(method, "sending notification");
        self.send(cancel, Envelope::from(Notification::new(method, params)), None)
            .await
            .map(|_| ())
    }

    /// Drive the dispatch loop until the peer closes the stream, the stream
    /// fails, or `cancel` fires.
    ///
    /// On return every pending call resolves with
    /// [`RpcError::ConnectionClosed`] and the connection refuses new traffic.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let reader = lock(&self.inner.reader)
            .take()
            .ok_or(RpcError::AlreadyRunning)?;

        tracing::debug!("dispatch loop started");
        let (stats, result) = dispatch(reader, &self.inner.table, &cancel).await;
        let abandoned = self.lock_table().close();

        tracing::info!(
            responses = stats.responses,
            unmatched = stats.unmatched,
            inbound = stats.inbound,
            abandoned,
            "connection closed"
        );
        result
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.lock_table().len()
    }

    /// Whether the dispatch loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.lock_table().is_closed()
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        *lock(&self.inner.state)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Move from `from` to `to`; returns `false` if the state was not `from`.
    pub(crate) fn transition(&self, from: HandshakeState, to: HandshakeState) -> bool {
        let mut state = lock(&self.inner.state);
        if *state != from {
            return false;
        }
        tracing::debug!(%from, %to, "handshake state");
        *state = to;
        true
    }

    async fn call_inner(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: impl Serialize,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let deadline = timeout.map(|after| Deadline {
            at: Instant::now() + after,
            after,
        });
        let params = encode_params(method, params)?;
        self.ensure_open()?;
        self.check_gate(method, Outbound::Call)?;

        let (id, reply) = self
            .lock_table()
            .register(method, self.inner.config.id_format)?;

        tracing::debug!(method, %id, "sending request");
        let request = Envelope::from(Request::new(id.clone(), method, params));
        match self.send(cancel, request, deadline).await {
            Ok(Sent::Written) => {}
            Ok(Sent::Expired(after)) => {
                self.abandon(method, &id);
                return Err(RpcError::Timeout {
                    method: method.to_string(),
                    id,
                    after,
                });
            }
            Err(err) => {
                self.lock_table().remove(&id);
                return Err(err);
            }
        }

        tokio::select! {
            biased;
            reply = reply => match reply {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(RpcError::Remote {
                    method: method.to_string(),
                    id,
                    error,
                }),
                Err(_) => Err(RpcError::ConnectionClosed),
            },
            _ = cancel.cancelled() => {
                self.abandon(method, &id);
                Err(RpcError::Cancelled {
                    method: method.to_string(),
                    id: Some(id),
                })
            }
            after = expire(deadline) => {
                self.abandon(method, &id);
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    id,
                    after,
                })
            }
        }
    }

    /// Write one message.
    ///
    /// Waiting for the writer gives way to `cancel` and the deadline. A write
    /// in progress is never cancelled; if it is still stalled when the
    /// deadline passes, the stream may hold half a frame, so the connection
    /// is closed.
    async fn send(
        &self,
        cancel: &CancellationToken,
        message: Envelope,
        deadline: Option<Deadline>,
    ) -> Result<Sent> {
        let method = message.method().unwrap_or_default().to_string();
        let mut writer = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RpcError::Cancelled {
                    method,
                    id: message.id().cloned(),
                });
            }
            after = expire(deadline) => return Ok(Sent::Expired(after)),
            writer = self.inner.writer.lock() => writer,
        };

        // An earlier write may have stalled and closed the connection while we waited.
        self.ensure_open()?;

        tokio::select! {
            biased;
            sent = writer.send(message) => sent.map(|()| Sent::Written).map_err(RpcError::Frame),
            after = expire(deadline) => {
                let abandoned = self.lock_table().close();
                tracing::error!(
                    method = %method,
                    ?after,
                    abandoned,
                    "write stalled past deadline, closing connection"
                );
                Ok(Sent::Expired(after))
            }
        }
    }

    fn abandon(&self, method: &str, id: &Id) {
        if self.lock_table().remove(id) {
            tracing::debug!(method, %id, "call abandoned; a late response will be discarded");
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }
        Ok(())
    }

    fn check_gate(&self, method: &str, kind: Outbound) -> Result<()> {
        if !self.inner.config.enforce_handshake {
            return Ok(());
        }

        match self.state() {
            HandshakeState::Initialized => Ok(()),
            HandshakeState::Failed => Err(RpcError::HandshakeFailed(format!(
                "{method} rejected on a connection whose handshake failed"
            ))),
            _ => match (kind, method) {
                (Outbound::Call, INITIALIZE) | (Outbound::Notify, INITIALIZED) => Ok(()),
                _ => Err(RpcError::NotInitialized {
                    method: method.to_string(),
                }),
            },
        }
    }

    fn lock_table(&self) -> MutexGuard<'_, CorrelationTable> {
        lock(&self.inner.table)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .field("config", &self.inner.config)
            .finish()
    }
}

fn encode_params(method: &str, params: impl Serialize) -> Result<Value> {
    serde_json::to_value(params).map_err(|source| RpcError::Encoding {
        method: method.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn connection(config: ConnectionConfig) -> (Connection, tokio::io::DuplexStream) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (read, write) = tokio::io::split(local);
        (Connection::new(read, write, config), remote)
    }

    #[tokio::test]
    async fn encoding_failure_registers_nothing() {
        let (conn, _remote) = connection(ConnectionConfig::default());
        let mut params = HashMap::new();
        params.insert((1, 2), "tuple keys are not valid JSON object keys");

        let err = conn
            .call(&CancellationToken::new(), INITIALIZE, params)
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Encoding { ref method, .. } if method == INITIALIZE));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn gate_rejects_ordinary_traffic() {
        let (conn, _remote) = connection(ConnectionConfig::default());
        let cancel = CancellationToken::new();

        let err = conn
            .call(&cancel, "textDocument/hover", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::NotInitialized { .. }));

        let err = conn.notify(&cancel, "exit", json!(null)).await.unwrap_err();
        assert!(matches!(err, RpcError::NotInitialized { .. }));

        // `initialized` is the one notification allowed through.
        conn.notify(&cancel, INITIALIZED, json!({})).await.unwrap();
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn failed_handshake_blocks_everything() {
        let (conn, _remote) = connection(ConnectionConfig::default());
        assert!(conn.transition(HandshakeState::Uninitialized, HandshakeState::Failed));

        let err = conn
            .call(&CancellationToken::new(), INITIALIZE, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::HandshakeFailed(_)));
    }

    #[tokio::test]
    async fn gate_can_be_disabled() {
        let config = ConnectionConfig {
            enforce_handshake: false,
            ..ConnectionConfig::default()
        };
        let (conn, _remote) = connection(config);

        conn.notify(&CancellationToken::new(), "$/progress", json!({"token": 1}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn run_only_once() {
        let (conn, remote) = connection(ConnectionConfig::default());
        drop(remote);

        conn.run(CancellationToken::new()).await.unwrap();
        assert!(conn.is_closed());
        assert!(matches!(
            conn.run(CancellationToken::new()).await,
            Err(RpcError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn cancelled_token_rejects_before_writing() {
        let config = ConnectionConfig {
            enforce_handshake: false,
            ..ConnectionConfig::default()
        };
        let (conn, _remote) = connection(config);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = conn.call(&cancel, "slow", json!(null)).await.unwrap_err();
        assert!(matches!(err, RpcError::Cancelled { id: Some(_), .. }));
        assert_eq!(conn.pending_count(), 0);
    }

    #[test]
    fn transition_is_compare_and_set() {
        let (local, _remote) = tokio::io::duplex(64);
        let (read, write) = tokio::io::split(local);
        let conn = Connection::new(read, write, ConnectionConfig::default());

        assert!(conn.transition(HandshakeState::Uninitialized, HandshakeState::Initializing));
        assert!(!conn.transition(HandshakeState::Uninitialized, HandshakeState::Initializing));
        assert_eq!(conn.state(), HandshakeState::Initializing);
    }
}

use std::fmt;
use std::time::Duration;

use lspwire_frame::{INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR};
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::error::{Result, RpcError};

pub const INITIALIZE: &str = "initialize";
pub const INITIALIZED: &str = "initialized";
pub const SHUTDOWN: &str = "shutdown";
pub const EXIT: &str = "exit";

/// Where a connection stands in the initialize exchange.
///
/// `Initialized` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Uninitialized => "uninitialized",
            HandshakeState::Initializing => "initializing",
            HandshakeState::Initialized => "initialized",
            HandshakeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Bounded exponential backoff for `initialize` attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Zero behaves like one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2,
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the `failures`-th failed attempt (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(failures.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Configuration for [`Handshake`].
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub retry: RetryPolicy,
    /// Deadline for each `initialize` attempt. Default: 30 seconds.
    pub attempt_timeout: Option<Duration>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Result of a completed handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeOutcome {
    /// Raw `initialize` result (server capabilities and info).
    pub result: Value,
    /// Number of `initialize` attempts it took.
    pub attempts: u32,
}

/// Drives `initialize` / `initialized` on a connection.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    config: HandshakeConfig,
}

impl Handshake {
    pub fn new(config: HandshakeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Perform the handshake. The dispatch loop must already be running.
    ///
    /// On success the connection is `Initialized` and ordinary traffic is
    /// allowed. On any failure it is `Failed` for good.
    pub async fn run(
        &self,
        conn: &Connection,
        cancel: &CancellationToken,
        params: impl Serialize,
    ) -> Result<HandshakeOutcome> {
        let params = serde_json::to_value(params).map_err(|source| RpcError::Encoding {
            method: INITIALIZE.to_string(),
            source,
        })?;

        if !conn.transition(HandshakeState::Uninitialized, HandshakeState::Initializing) {
            return Err(RpcError::HandshakeFailed(format!(
                "handshake already attempted (state {})",
                conn.state()
            )));
        }

        let (result, attempts) = match self.initialize(conn, cancel, &params).await {
            Ok(done) => done,
            Err(err) => {
                conn.transition(HandshakeState::Initializing, HandshakeState::Failed);
                return Err(err);
            }
        };

        if let Err(err) = conn.notify(cancel, INITIALIZED, json!({})).await {
            conn.transition(HandshakeState::Initializing, HandshakeState::Failed);
            tracing::error!(error = %err, "initialized notification failed");
            return Err(RpcError::HandshakeFailed(format!(
                "{INITIALIZED} notification failed: {err}"
            )));
        }

        conn.transition(HandshakeState::Initializing, HandshakeState::Initialized);
        tracing::info!(attempts, "handshake complete");
        Ok(HandshakeOutcome { result, attempts })
    }

    async fn initialize(
        &self,
        conn: &Connection,
        cancel: &CancellationToken,
        params: &Value,
    ) -> Result<(Value, u32)> {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome = match self.config.attempt_timeout {
                Some(timeout) => conn.call_with_timeout(cancel, INITIALIZE, params, timeout).await,
                None => conn.call(cancel, INITIALIZE, params).await,
            };

            let err = match outcome {
                Ok(result) => return Ok((result, attempt)),
                Err(err) => err,
            };

            if attempt >= max_attempts || !is_retryable(&err) {
                tracing::error!(attempt, error = %err, "initialize failed");
                return Err(err);
            }

            let delay = policy.backoff(attempt);
            tracing::warn!(attempt, error = %err, ?delay, "initialize failed, retrying");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RpcError::Cancelled {
                        method: INITIALIZE.to_string(),
                        id: None,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Whether a failed `initialize` may succeed when sent again.
///
/// Remote errors and timeouts qualify, except remote codes that say the
/// request itself is wrong. Closure, framing, encoding, cancellation, and
/// gate errors never do.
pub fn is_retryable(err: &RpcError) -> bool {
    match err {
        RpcError::Timeout { .. } => true,
        RpcError::Remote { error, .. } => !matches!(
            error.code,
            PARSE_ERROR | INVALID_REQUEST | INVALID_PARAMS | METHOD_NOT_FOUND
        ),
        _ => false,
    }
}

/// Orderly close: `shutdown` request, then `exit` notification.
pub async fn shutdown(conn: &Connection, cancel: &CancellationToken) -> Result<()> {
    conn.call(cancel, SHUTDOWN, Value::Null).await?;
    conn.notify(cancel, EXIT, Value::Null).await
}

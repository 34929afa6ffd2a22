use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use lspwire_frame::{CaptureWriter, Transcript};
use lspwire_rpc::{
    shutdown, Connection, ConnectionConfig, Handshake, HandshakeConfig, HandshakeOutcome,
    HandshakeState, RetryPolicy,
};
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cmd::{parse_duration, ServerArgs};
use crate::exit::{io_error, rpc_error, CliError, CliResult, INTERNAL, USAGE};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Resolved form of [`ServerArgs`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub command: Vec<String>,
    pub root: PathBuf,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub verbose: bool,
}

impl SessionSettings {
    pub fn from_args(args: &ServerArgs) -> CliResult<Self> {
        if args.language_server.is_empty() {
            return Err(CliError::new(USAGE, "--language-server must name a program"));
        }

        let cwd = std::env::current_dir()
            .map_err(|err| io_error("failed to read current directory", err))?;
        let root = match &args.data {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => cwd.join(dir),
            None => cwd,
        };

        Ok(Self {
            command: args.language_server.clone(),
            root,
            timeout: parse_duration(&args.timeout)?,
            retry: RetryPolicy {
                max_attempts: args.retries,
                initial_backoff: parse_duration(&args.backoff)?,
                ..RetryPolicy::default()
            },
            verbose: args.verbose,
        })
    }
}

/// A spawned language server with a running connection to it.
pub struct Session {
    conn: Connection,
    child: Child,
    dispatch: JoinHandle<lspwire_rpc::Result<()>>,
    /// Cancels in-flight calls (ctrl-c).
    interrupt: CancellationToken,
    /// Stops the dispatch loop.
    stop: CancellationToken,
    transcript: Transcript,
    settings: SessionSettings,
}

impl Session {
    /// Spawn the server and start reading its stdout. Must run inside a tokio runtime.
    pub fn spawn(settings: SessionSettings) -> CliResult<Self> {
        let (program, rest) = settings
            .command
            .split_first()
            .ok_or_else(|| CliError::new(USAGE, "--language-server must name a program"))?;

        tracing::debug!(program = %program, args = ?rest, "starting language server");
        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| io_error(&format!("failed to start {program}"), err))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CliError::new(INTERNAL, "language server stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CliError::new(INTERNAL, "language server stdout unavailable"))?;

        let transcript = Transcript::new();
        let config = ConnectionConfig {
            call_timeout: Some(settings.timeout),
            ..ConnectionConfig::default()
        };
        let conn = Connection::new(stdout, CaptureWriter::new(stdin, transcript.clone()), config);

        let stop = CancellationToken::new();
        let dispatch = tokio::spawn({
            let conn = conn.clone();
            let stop = stop.clone();
            async move { conn.run(stop).await }
        });

        let interrupt = CancellationToken::new();
        tokio::spawn({
            let interrupt = interrupt.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted");
                    interrupt.cancel();
                }
            }
        });

        Ok(Self {
            conn,
            child,
            dispatch,
            interrupt,
            stop,
            transcript,
            settings,
        })
    }

    /// Perform the initialize handshake with the default client capabilities.
    pub async fn initialize(&self) -> CliResult<HandshakeOutcome> {
        let params = initialize_params(&self.settings.root)?;
        let handshake = Handshake::new(HandshakeConfig {
            retry: self.settings.retry.clone(),
            attempt_timeout: Some(self.settings.timeout),
        });
        let outcome = handshake
            .run(&self.conn, &self.interrupt, params)
            .await
            .map_err(|err| rpc_error("initialize failed", err))?;

        tracing::debug!(
            attempts = outcome.attempts,
            server = %outcome.result.get("serverInfo").unwrap_or(&serde_json::Value::Null),
            "server initialized"
        );
        Ok(outcome)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Token that ctrl-c cancels; pass it to every call.
    pub fn interrupt(&self) -> &CancellationToken {
        &self.interrupt
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Shut the server down (politely when the handshake completed) and reap it.
    pub async fn close(mut self) {
        let polite = self.conn.state() == HandshakeState::Initialized
            && !self.conn.is_closed()
            && !self.interrupt.is_cancelled();

        let clean = polite
            && match tokio::time::timeout(SHUTDOWN_GRACE, shutdown(&self.conn, &self.interrupt))
                .await
            {
                Ok(Ok(())) => true,
                Ok(Err(err)) => {
                    tracing::debug!(error = %err, "shutdown request failed");
                    false
                }
                Err(_) => {
                    tracing::debug!("shutdown request timed out");
                    false
                }
            };

        if !clean {
            let _ = self.child.start_kill();
        }

        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "language server exited"),
            Ok(Err(err)) => tracing::warn!(error = %err, "failed to reap language server"),
            Err(_) => {
                tracing::warn!("language server did not exit, killing it");
                let _ = self.child.kill().await;
            }
        }

        self.stop.cancel();
        match self.dispatch.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::debug!(error = %err, "connection ended with error"),
            Err(err) => tracing::warn!(error = %err, "dispatch task failed"),
        }
    }
}

/// Client capabilities sent with `initialize`. `root` must be absolute.
pub fn initialize_params(root: &Path) -> CliResult<Value> {
    let root_uri = Url::from_file_path(root).map_err(|()| {
        CliError::new(
            USAGE,
            format!("workspace root {} is not an absolute path", root.display()),
        )
    })?;

    Ok(json!({
        "processId": std::process::id(),
        "rootUri": root_uri.as_str(),
        "capabilities": {
            "textDocument": {
                "documentSymbol": {
                    "hierarchicalDocumentSymbolSupport": true
                }
            }
        },
        "extendedClientCapabilities": {
            "classFileContentsSupport": true
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_args(data: Option<&str>) -> ServerArgs {
        ServerArgs {
            language_server: vec!["gopls".to_string(), "serve".to_string()],
            data: data.map(PathBuf::from),
            verbose: true,
            timeout: "2s".to_string(),
            retries: 3,
            backoff: "10ms".to_string(),
        }
    }

    #[test]
    fn settings_resolve_durations_and_root() {
        let settings = SessionSettings::from_args(&server_args(Some("/srv/project"))).unwrap();

        assert_eq!(settings.command, vec!["gopls", "serve"]);
        assert_eq!(settings.root, PathBuf::from("/srv/project"));
        assert_eq!(settings.timeout, Duration::from_secs(2));
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.initial_backoff, Duration::from_millis(10));
        assert!(settings.verbose);
    }

    #[test]
    fn relative_root_is_made_absolute() {
        let settings = SessionSettings::from_args(&server_args(Some("sub/dir"))).unwrap();
        assert!(settings.root.is_absolute());
        assert!(settings.root.ends_with("sub/dir"));
    }

    #[test]
    fn bad_timeout_is_a_usage_error() {
        let mut args = server_args(None);
        args.timeout = "soon".to_string();
        let err = SessionSettings::from_args(&args).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[cfg(unix)]
    #[test]
    fn initialize_params_carry_root_and_capabilities() {
        let params = initialize_params(Path::new("/srv/project")).unwrap();

        assert_eq!(params["rootUri"], json!("file:///srv/project"));
        assert_eq!(
            params["capabilities"]["textDocument"]["documentSymbol"]
                ["hierarchicalDocumentSymbolSupport"],
            json!(true)
        );
        assert_eq!(
            params["extendedClientCapabilities"]["classFileContentsSupport"],
            json!(true)
        );
    }

    #[cfg(unix)]
    #[test]
    fn root_uri_is_percent_encoded() {
        let params = initialize_params(Path::new("/srv/my project/#1 100%")).unwrap();
        assert_eq!(
            params["rootUri"],
            json!("file:///srv/my%20project/%231%20100%25")
        );
    }

    #[test]
    fn relative_root_is_rejected() {
        let err = initialize_params(Path::new("sub/dir")).unwrap_err();
        assert_eq!(err.code, USAGE);
    }
}

use std::fmt;
use std::io;

use lspwire_frame::FrameError;
use lspwire_rpc::RpcError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const REMOTE_ERROR: i32 = 70;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;
pub const INTERRUPTED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::UnexpectedEof => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        FrameError::Encode(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    match err {
        RpcError::Frame(err) => frame_error(context, err),
        RpcError::Remote { .. } => CliError::new(REMOTE_ERROR, format!("{context}: {err}")),
        RpcError::Decoding { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        RpcError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        RpcError::Cancelled { .. } => CliError::new(INTERRUPTED, format!("{context}: {err}")),
        RpcError::ConnectionClosed | RpcError::HandshakeFailed(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lspwire_frame::{Id, ResponseError, METHOD_NOT_FOUND};

    use super::*;

    #[test]
    fn rpc_errors_map_to_exit_codes() {
        let remote = RpcError::Remote {
            method: "workspace/symbol".to_string(),
            id: Id::Number(2),
            error: ResponseError::new(METHOD_NOT_FOUND, "no such method"),
        };
        assert_eq!(rpc_error("call", remote).code, REMOTE_ERROR);

        let timeout = RpcError::Timeout {
            method: "initialize".to_string(),
            id: Id::Number(1),
            after: Duration::from_secs(1),
        };
        assert_eq!(rpc_error("call", timeout).code, TIMEOUT);

        assert_eq!(rpc_error("call", RpcError::ConnectionClosed).code, FAILURE);
        assert_eq!(
            rpc_error("call", RpcError::Frame(FrameError::MissingContentLength)).code,
            DATA_INVALID
        );
        assert_eq!(
            rpc_error(
                "call",
                RpcError::Cancelled {
                    method: "x".to_string(),
                    id: None
                }
            )
            .code,
            INTERRUPTED
        );
    }

    #[test]
    fn io_errors_keep_context() {
        let err = io_error(
            "failed to start gopls",
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert_eq!(err.code, FAILURE);
        assert!(err.message.starts_with("failed to start gopls: "));
    }
}

use clap::{Args, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod notify;
pub mod session;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a request to the language server and print its result.
    Call(CallArgs),
    /// Send a notification to the language server.
    Notify(NotifyArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Call(args) => call::run(args, format),
        Command::Notify(args) => notify::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// How to reach the language server and drive its session.
#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Language server command. Repeat to pass arguments: -s gopls -s serve.
    #[arg(
        short = 's',
        long = "language-server",
        value_name = "CMD",
        default_value = "gopls",
        allow_hyphen_values = true
    )]
    pub language_server: Vec<String>,
    /// Workspace root sent as rootUri. Default: current directory.
    #[arg(short = 'd', long = "data", value_name = "DIR")]
    pub data: Option<PathBuf>,
    /// Print every message sent to the server after the result.
    #[arg(short = 'v', long)]
    pub verbose: bool,
    /// Deadline for each request (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
    /// Maximum initialize attempts.
    #[arg(long, default_value_t = 5)]
    pub retries: u32,
    /// Delay before the first initialize retry; doubles on each retry.
    #[arg(long, default_value = "100ms")]
    pub backoff: String,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Method name, e.g. workspace/symbol.
    pub method: String,
    /// JSON params, e.g. '{"query": "*"}'.
    pub params: String,
    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// Method name, e.g. textDocument/didOpen.
    pub method: String,
    /// JSON params.
    pub params: String,
    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start async runtime", err))
}

fn parse_params(input: &str) -> CliResult<Value> {
    serde_json::from_str(input)
        .map_err(|err| CliError::new(USAGE, format!("params are not valid JSON: {err}")))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

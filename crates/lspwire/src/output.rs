use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use lspwire_frame::{Envelope, FrameError, Transcript};
use serde::Serialize;
use serde_json::Value;

use crate::exit::{frame_error, CliResult};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// One outbound message as listed in the transcript.
#[derive(Debug, Serialize, PartialEq)]
pub struct TranscriptEntry {
    pub index: usize,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub bytes: usize,
    pub message: Value,
}

pub fn print_result(method: &str, result: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(result).unwrap_or_else(|_| "null".to_string())
            );
        }
        OutputFormat::Pretty => {
            println!(
                "{}",
                serde_json::to_string_pretty(result).unwrap_or_else(|_| "null".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);
            match result {
                Value::Object(map) => {
                    table.set_header(vec!["KEY", "VALUE"]);
                    for (key, value) in map {
                        table.add_row(vec![key.clone(), cell(value)]);
                    }
                }
                Value::Array(items) => {
                    table.set_header(vec!["#", "VALUE"]);
                    for (index, value) in items.iter().enumerate() {
                        table.add_row(vec![index.to_string(), cell(value)]);
                    }
                }
                scalar => {
                    table.set_header(vec!["METHOD", "RESULT"]);
                    table.add_row(vec![method.to_string(), cell(scalar)]);
                }
            }
            println!("{table}");
        }
        OutputFormat::Raw => {
            print_raw(serde_json::to_string(result).unwrap_or_default().as_bytes());
        }
    }
}

pub fn print_notified(method: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({"method": method, "status": "sent"})),
        OutputFormat::Pretty => println!("sent notification {method}"),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["METHOD", "STATUS"])
                .add_row(vec![method, "sent"]);
            println!("{table}");
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_transcript(transcript: &Transcript, format: OutputFormat) -> CliResult<()> {
    if let OutputFormat::Raw = format {
        print_raw(&transcript.snapshot());
        return Ok(());
    }

    let entries = transcript_entries(transcript)?;
    match format {
        OutputFormat::Json => {
            for entry in &entries {
                println!(
                    "{}",
                    serde_json::to_string(entry).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Pretty => {
            println!("\nCalls");
            for entry in &entries {
                println!(
                    "--> {} {} {}({} bytes)",
                    entry.kind,
                    entry.method.as_deref().unwrap_or("-"),
                    entry
                        .id
                        .as_deref()
                        .map(|id| format!("id={id} "))
                        .unwrap_or_default(),
                    entry.bytes
                );
                println!(
                    "{}",
                    serde_json::to_string_pretty(&entry.message).unwrap_or_default()
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "KIND", "ID", "METHOD", "BYTES"]);
            for entry in &entries {
                table.add_row(vec![
                    entry.index.to_string(),
                    entry.kind.to_string(),
                    entry.id.clone().unwrap_or_default(),
                    entry.method.clone().unwrap_or_default(),
                    entry.bytes.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Raw => {}
    }
    Ok(())
}

pub fn transcript_entries(transcript: &Transcript) -> CliResult<Vec<TranscriptEntry>> {
    let bodies = transcript
        .bodies()
        .map_err(|err| frame_error("transcript unreadable", err))?;

    bodies
        .iter()
        .enumerate()
        .map(|(index, body)| {
            let envelope: Envelope = serde_json::from_slice(body)
                .map_err(|err| frame_error("transcript unreadable", FrameError::InvalidBody(err)))?;
            let message = serde_json::to_value(&envelope)
                .map_err(|err| frame_error("transcript unreadable", FrameError::Encode(err)))?;
            Ok(TranscriptEntry {
                index: index + 1,
                kind: envelope.kind(),
                id: envelope.id().map(ToString::to_string),
                method: envelope.method().map(str::to_string),
                bytes: body.len(),
                message,
            })
        })
        .collect()
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

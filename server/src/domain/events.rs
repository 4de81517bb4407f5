//! Streaming session events
//!
//! Every session emits `Started Output* (Exited | Error)`, or a lone `Error`
//! when the request is rejected before anything is spawned.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::ErrorInfo;

/// Server-to-client event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        operation_id: String,
        command_line: String,
        timestamp: DateTime<Utc>,
    },
    Output {
        data: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Exited {
        exit_code: i32,
        duration: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        code: String,
        message: String,
        remediation_hint: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl StreamEvent {
    pub fn started(operation_id: &str, command_line: &str) -> Self {
        StreamEvent::Started {
            operation_id: operation_id.to_string(),
            command_line: command_line.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Wrap decoded terminal output; see [`Utf8Decoder`] for raw chunks
    pub fn output(data: impl Into<String>) -> Self {
        StreamEvent::Output {
            data: data.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn exited(exit_code: i32, duration: Duration) -> Self {
        StreamEvent::Exited {
            exit_code,
            duration: format_duration(duration),
            timestamp: Utc::now(),
        }
    }

    pub fn error(info: ErrorInfo) -> Self {
        StreamEvent::Error {
            code: info.code,
            message: info.message,
            remediation_hint: info.remediation_hint,
            timestamp: Utc::now(),
        }
    }

    /// Whether this event ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Exited { .. } | StreamEvent::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Started { .. } => "started",
            StreamEvent::Output { .. } => "output",
            StreamEvent::Exited { .. } => "exited",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// Render a duration as `HH:MM:SS.mmm`
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

/// Incremental UTF-8 decoding across arbitrary chunk boundaries.
///
/// An incomplete trailing sequence is held back and completed by the next
/// chunk. Bytes that can never be valid become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, returning `None` when everything was held back
    pub fn decode(&mut self, chunk: &[u8]) -> Option<String> {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        (!text.is_empty()).then_some(text)
    }

    /// Flush a held-back partial sequence at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.carry);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Client-to-server message received after the initial request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Raw bytes for the child's input
    Input(Vec<u8>),
    Resize { cols: u16, rows: u16 },
    Cancel,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlFrame {
    Input { data: String },
    Resize { cols: u16, rows: u16 },
    Cancel,
}

impl ClientMessage {
    /// Interpret a text frame: a control object, or otherwise literal keystrokes
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<ControlFrame>(text) {
            Ok(ControlFrame::Input { data }) => ClientMessage::Input(data.into_bytes()),
            Ok(ControlFrame::Resize { cols, rows }) => ClientMessage::Resize { cols, rows },
            Ok(ControlFrame::Cancel) => ClientMessage::Cancel,
            Err(_) => ClientMessage::Input(text.as_bytes().to_vec()),
        }
    }
}

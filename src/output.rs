//! NDJSON output for the command-line client
//!
//! Every line written to stdout is one JSON object with an `"event"` field,
//! so scripts can consume `cadence listen` without parsing prose:
//!
//! ```json
//! {"event":"state","state":"ready","timestamp":1704700001000}
//! {"event":"push","channel":"progress","payload":{"done":4},"timestamp":1704700002000}
//! ```

use std::io::{self, Write};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

/// Events printed by the CLI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CliEvent {
    /// Connection state changed
    State { state: String, timestamp: i64 },

    /// Payload pushed on a channel
    Push {
        channel: String,
        payload: Value,
        timestamp: i64,
    },

    /// A call returned
    Result {
        method: String,
        result: Value,
        timestamp: i64,
    },

    /// Current connection and handshake details
    Status {
        state: String,
        token: Option<String>,
        settings: Value,
        established_at: Option<String>,
        timestamp: i64,
    },
}

impl CliEvent {
    pub fn state(state: impl ToString) -> Self {
        CliEvent::State {
            state: state.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn push(channel: impl Into<String>, payload: Value) -> Self {
        CliEvent::Push {
            channel: channel.into(),
            payload,
            timestamp: Self::now(),
        }
    }

    pub fn result(method: impl Into<String>, result: Value) -> Self {
        CliEvent::Result {
            method: method.into(),
            result,
            timestamp: Self::now(),
        }
    }

    /// Serialize to one NDJSON line (no trailing newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Write this event to stdout as one NDJSON line.
    pub fn emit(&self) {
        let json = match self.to_line() {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize CLI event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write CLI event to stdout: {}", e);
            return;
        }
        if let Err(e) = stdout.flush() {
            error!("Failed to flush stdout: {}", e);
        }
    }

    pub(crate) fn now() -> i64 {
        Utc::now().timestamp_millis()
    }
}

//! Wire messages on a session channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::buffer::{LogEntry, OutputStream};

/// Viewer to launcher.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Input {
        data: String,
    },
    Resize {
        #[serde(default = "default_cols")]
        cols: u16,
        #[serde(default = "default_rows")]
        rows: u16,
    },
    Ping,
    RequestHistory {
        #[serde(default)]
        since: Option<DateTime<Utc>>,
        #[serde(default)]
        until: Option<DateTime<Utc>>,
    },
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    25
}

/// Launcher to viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Output {
        data: String,
        stream: OutputStream,
        timestamp: DateTime<Utc>,
    },
    Status {
        message: String,
    },
    HistoryLogs {
        logs: Vec<LogEntry>,
    },
    Error {
        message: String,
    },
    Pong,
}

impl Outbound {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

impl From<&LogEntry> for Outbound {
    fn from(entry: &LogEntry) -> Self {
        Self::Output {
            data: entry.line.clone(),
            stream: entry.stream,
            timestamp: entry.timestamp,
        }
    }
}

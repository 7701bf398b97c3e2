//! Output lines produced by a running process

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single line of output from a process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputLine {
    /// When the line was read
    pub timestamp: DateTime<Utc>,
    /// Which stream the line came from
    pub source: LogSource,
    /// The line, without its trailing newline
    pub line: String,
}

impl OutputLine {
    /// Create a new output line stamped with the current time
    pub fn new(source: LogSource, line: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source,
            line: line.into(),
        }
    }
}

/// Source of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

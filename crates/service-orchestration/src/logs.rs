//! Bounded per-service log buffer with live subscriptions.

use async_channel::{Receiver, Sender};
use chrono::{DateTime, Utc};
use command_executor::{LogSource, OutputLine};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Where a log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Replica standard output
    Stdout,
    /// Replica standard error
    Stderr,
    /// Message from the orchestrator itself
    System,
}

impl From<LogSource> for LogKind {
    fn from(source: LogSource) -> Self {
        match source {
            LogSource::Stdout => LogKind::Stdout,
            LogSource::Stderr => LogKind::Stderr,
        }
    }
}

/// One line in a service log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the line was produced
    pub timestamp: DateTime<Utc>,
    /// Origin of the line
    pub kind: LogKind,
    /// Replica that produced the line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica: Option<String>,
    /// Line text
    pub line: String,
}

impl LogEntry {
    /// A line of replica output
    pub fn output(replica: &str, output: OutputLine) -> Self {
        Self {
            timestamp: output.timestamp,
            kind: output.source.into(),
            replica: Some(replica.to_string()),
            line: output.line,
        }
    }

    /// An orchestrator message
    pub fn system(replica: Option<&str>, line: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: LogKind::System,
            replica: replica.map(str::to_string),
            line: line.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.replica {
            Some(replica) => write!(f, "[{}] {}", replica, self.line),
            None => f.write_str(&self.line),
        }
    }
}

/// A subscription: the buffered lines at subscribe time plus every later line
pub struct LogSubscription {
    /// Lines buffered when the subscription was made, oldest first
    pub snapshot: Vec<LogEntry>,
    /// Lines appended afterwards
    pub receiver: Receiver<LogEntry>,
}

struct Inner {
    lines: VecDeque<LogEntry>,
    subscribers: Vec<Sender<LogEntry>>,
}

/// Ring buffer of the most recent log lines of one service.
///
/// Appending evicts the oldest line once the buffer is full and fans the new
/// line out to every live subscriber. Subscribers hold a bounded channel of the
/// same capacity; when one falls behind its oldest undelivered line is
/// replaced, so a slow reader never blocks the writer.
pub struct LogBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl LogBuffer {
    /// Create a buffer holding at most `capacity` lines
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                lines: VecDeque::with_capacity(capacity.min(1024)),
                subscribers: Vec::new(),
            }),
        }
    }

    /// Maximum number of retained lines
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained lines
    pub fn len(&self) -> usize {
        self.inner.lock().lines.len()
    }

    /// Whether no line is retained
    pub fn is_empty(&self) -> bool {
        self.inner.lock().lines.is_empty()
    }

    /// Append a line
    pub fn append(&self, entry: LogEntry) {
        let mut inner = self.inner.lock();
        if inner.lines.len() == self.capacity {
            inner.lines.pop_front();
        }
        // Closed receivers are dropped here
        inner
            .subscribers
            .retain(|tx| tx.force_send(entry.clone()).is_ok());
        inner.lines.push_back(entry);
    }

    /// Append an orchestrator message
    pub fn system(&self, replica: Option<&str>, line: impl Into<String>) {
        self.append(LogEntry::system(replica, line));
    }

    /// The last `n` lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let inner = self.inner.lock();
        let skip = inner.lines.len().saturating_sub(n);
        inner.lines.iter().skip(skip).cloned().collect()
    }

    /// Every retained line, oldest first
    pub fn lines(&self) -> Vec<LogEntry> {
        self.tail(self.capacity)
    }

    /// Subscribe to this buffer.
    ///
    /// The snapshot and the registration are taken under the same lock, so the
    /// snapshot followed by the receiver yields every line exactly once.
    pub fn subscribe(&self) -> LogSubscription {
        let (tx, rx) = async_channel::bounded(self.capacity);
        let mut inner = self.inner.lock();
        let snapshot = inner.lines.iter().cloned().collect();
        inner.subscribers.push(tx);
        LogSubscription {
            snapshot,
            receiver: rx,
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }
}

impl fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

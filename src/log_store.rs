use std::{collections::VecDeque, fmt::Display};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::transport::TransportKind;

/// How many entries are kept by default.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// The kind of a log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogKind {
    /// Received from a transport.
    Rx,

    /// Put on a transport.
    Tx,

    /// Something happened in the console.
    Sys,

    /// Something went wrong.
    Err,
}

impl Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogKind::Rx => write!(f, "RX"),
            LogKind::Tx => write!(f, "TX"),
            LogKind::Sys => write!(f, "SYS"),
            LogKind::Err => write!(f, "ERR"),
        }
    }
}

/// One line of the console transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Unique per entry.
    pub id: String,

    /// When the entry was created.
    pub timestamp: chrono::DateTime<chrono::Local>,

    /// See [`LogKind`].
    #[serde(rename = "type")]
    pub kind: LogKind,

    /// The data or message.
    pub content: String,

    /// Optional extra context, e.g. the action description of an auto-response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Set if a rule produced this entry.
    #[serde(default)]
    pub is_auto_response: bool,

    /// The transport involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,
}

impl LogEntry {
    /// A new entry stamped with the current time.
    pub fn new<S: Into<String>>(kind: LogKind, content: S) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            timestamp: chrono::Local::now(),
            kind,
            content: content.into(),
            description: None,
            is_auto_response: false,
            transport: None,
        }
    }

    /// A system entry.
    pub fn sys<S: Into<String>>(content: S) -> Self {
        Self::new(LogKind::Sys, content)
    }

    /// An error entry.
    pub fn err<S: Into<String>>(content: S) -> Self {
        Self::new(LogKind::Err, content)
    }

    /// Set the description.
    pub fn describe<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark as produced by a rule.
    pub fn auto_response(mut self) -> Self {
        self.is_auto_response = true;
        self
    }

    /// Tie the entry to a transport.
    pub fn on(mut self, transport: TransportKind) -> Self {
        self.transport = Some(transport);
        self
    }

    /// The time of day the way the views show it.
    pub fn time_of_day(&self) -> String {
        self.timestamp.format("%H:%M:%S%.3f").to_string()
    }
}

impl Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.time_of_day(), self.kind)?;
        if let Some(transport) = self.transport {
            write!(f, " {transport}")?;
        }
        if self.is_auto_response {
            write!(f, " (auto)")?;
        }
        write!(f, ": {}", self.content.trim_end())?;
        if let Some(description) = &self.description {
            write!(f, " -- {description}")?;
        }
        Ok(())
    }
}

/// Counts derived from the log.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogStats {
    /// Entries produced by rules.
    pub total_triggers: usize,

    /// Error entries.
    pub total_errors: usize,
}

/// A bounded transcript and broadcaster.
#[derive(Debug)]
pub struct LogStore {
    log: VecDeque<LogEntry>,
    capacity: usize,

    tx: broadcast::Sender<LogEntry>,
    #[allow(dead_code)]
    rx: broadcast::Receiver<LogEntry>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogStore {
    /// Create a new log store.
    /// It will keep at most `capacity` entries.
    /// It may be subscribed to to receive any entries appended after subscribing.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = broadcast::channel(1024);
        Self {
            tx,
            rx,
            log: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Subscribe to appended entries.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    /// Append an entry and broadcast it to any subscribers.
    pub fn append(&mut self, entry: LogEntry) {
        trace!(%entry, "Appending log entry");
        self.log.push_back(entry.clone());

        // The oldest entries are at the front.
        while self.log.len() > self.capacity {
            self.log.pop_front();
        }

        // We hold a receiver ourselves, so this only fails if that is gone.
        if let Err(e) = self.tx.send(entry) {
            debug!(?e, "Nobody to broadcast log entry to");
        }
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.log.clear();
    }

    /// The number of entries held.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.log.iter()
    }

    /// Copy out all entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.log.iter().cloned().collect()
    }

    /// Trigger and error totals over the held entries.
    pub fn stats(&self) -> LogStats {
        self.log.iter().fold(LogStats::default(), |mut stats, entry| {
            if entry.is_auto_response {
                stats.total_triggers += 1;
            }
            if entry.kind == LogKind::Err {
                stats.total_errors += 1;
            }
            stats
        })
    }
}

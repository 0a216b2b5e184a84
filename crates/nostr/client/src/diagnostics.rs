//! Bounded operator-facing diagnostic log.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub time: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Most-recent-first log that evicts its oldest entry when full.
///
/// Cheap to clone; clones share the same buffer.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    capacity: usize,
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    pub fn push(&self, level: LogLevel, message: impl Into<String>, source: Option<&str>) {
        if self.capacity == 0 {
            return;
        }

        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            time: Utc::now(),
            level,
            message: message.into(),
            source: source.map(str::to_string),
        };

        let mut entries = self.entries.lock();
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    pub fn info(&self, message: impl Into<String>, source: Option<&str>) {
        self.push(LogLevel::Info, message, source);
    }

    pub fn warn(&self, message: impl Into<String>, source: Option<&str>) {
        self.push(LogLevel::Warn, message, source);
    }

    pub fn error(&self, message: impl Into<String>, source: Option<&str>) {
        self.push(LogLevel::Error, message, source);
    }

    /// Newest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

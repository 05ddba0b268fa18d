//! Structured audit log of alert-level events
//!
//! Entries are kept in a bounded ring buffer for inspection and mirrored to
//! `tracing` under the `vigil::audit` target.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Alert,
    Acknowledge,
    Flapping,
    Notification,
    Freshness,
    Downtime,
    EventHandler,
    Dependency,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogCategory::Alert => "ALERT",
            LogCategory::Acknowledge => "ACKNOWLEDGE",
            LogCategory::Flapping => "FLAPPING",
            LogCategory::Notification => "NOTIFICATION",
            LogCategory::Freshness => "FRESHNESS",
            LogCategory::Downtime => "DOWNTIME",
            LogCategory::EventHandler => "EVENT HANDLER",
            LogCategory::Dependency => "DEPENDENCY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub category: LogCategory,
    /// `host` or `host/service`
    pub entity: String,
    pub message: String,
}

#[derive(Debug)]
pub struct AuditLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn emit(
        &mut self,
        timestamp: i64,
        category: LogCategory,
        entity: impl Into<String>,
        message: impl Into<String>,
    ) {
        let entry = LogEntry {
            timestamp,
            category,
            entity: entity.into(),
            message: message.into(),
        };
        tracing::info!(
            target: "vigil::audit",
            category = %entry.category,
            entity = %entry.entity,
            "{}",
            entry.message
        );

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Most recent entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn by_category(&self, category: LogCategory) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.category == category)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

//! Response log
//!
//! Timestamped record of traffic and surfaced errors, kept for display in a
//! console. The link appends to it; it never reads from it.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Line written to the controller
    Sent,
    /// Text received from the controller
    Received,
    /// Lifecycle information
    Info,
    /// Error surfaced to the owner
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, ">>"),
            Self::Received => write!(f, "<<"),
            Self::Info => write!(f, "INFO"),
            Self::Error => write!(f, "ERR"),
        }
    }
}

/// One timestamped log line
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// When the entry was recorded
    pub timestamp: DateTime<Local>,
    /// Entry kind
    pub level: LogLevel,
    /// Entry text
    pub text: String,
}

impl LogEntry {
    /// Create an entry stamped with the current local time
    pub fn new(level: LogLevel, text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            text: text.into(),
        }
    }

    /// Get formatted entry with timestamp
    pub fn formatted(&self) -> String {
        format!(
            "[{}] {} {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level,
            self.text
        )
    }
}

/// Sink for log entries
pub trait ResponseLog: Send + Sync {
    /// Record one entry
    fn append(&self, entry: LogEntry);
}

/// Bounded in-memory response log
///
/// Oldest entries are dropped once `capacity` is reached.
pub struct MemoryResponseLog {
    entries: RwLock<VecDeque<LogEntry>>,
    capacity: usize,
    evicted: AtomicU64,
}

impl MemoryResponseLog {
    /// Create a log holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            evicted: AtomicU64::new(0),
        }
    }

    /// Copy of all retained entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().iter().cloned().collect()
    }

    /// Retained entries of one level
    pub fn entries_with_level(&self, level: LogLevel) -> Vec<LogEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the log is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of entries dropped to stay within capacity
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for MemoryResponseLog {
    fn default() -> Self {
        Self::new(500)
    }
}

impl ResponseLog for MemoryResponseLog {
    fn append(&self, entry: LogEntry) {
        let mut entries = self.entries.write();
        while entries.len() >= self.capacity {
            if let Some(old) = entries.pop_front() {
                if self.evicted.fetch_add(1, Ordering::Relaxed) == 0 {
                    tracing::debug!(
                        "Response log full ({} entries), dropping oldest",
                        self.capacity
                    );
                }
                tracing::trace!("Evicted log entry: {}", old.text);
            }
        }
        entries.push_back(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let log = MemoryResponseLog::new(3);
        for i in 0..5 {
            log.append(LogEntry::new(LogLevel::Received, format!("line {}", i)));
        }
        let texts: Vec<String> = log.entries().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["line 2", "line 3", "line 4"]);
        assert_eq!(log.evicted(), 2);
    }

    #[test]
    fn test_filter_by_level() {
        let log = MemoryResponseLog::default();
        log.append(LogEntry::new(LogLevel::Sent, "G0 X0"));
        log.append(LogEntry::new(LogLevel::Error, "error:20"));
        assert_eq!(log.entries_with_level(LogLevel::Error).len(), 1);
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_formatted_entry() {
        let entry = LogEntry::new(LogLevel::Error, "error:22");
        let text = entry.formatted();
        assert!(text.starts_with('['));
        assert!(text.ends_with("ERR error:22"));
    }
}

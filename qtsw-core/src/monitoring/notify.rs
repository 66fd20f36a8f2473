//! Priority-tiered operator notifications.
//!
//! Emergencies (protective failure, orphan fill, quantity mismatch) must
//! reach an operator even if the event stream is never read. The default
//! sink logs through `tracing` and appends to a JSONL file; alternative
//! transports implement [`Notifier`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotifyPriority {
    Info,
    Emergency,
    Highest,
}

impl NotifyPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyPriority::Info => "INFO",
            NotifyPriority::Emergency => "EMERGENCY",
            NotifyPriority::Highest => "HIGHEST",
        }
    }
}

/// Persisted notification record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub timestamp_utc: DateTime<Utc>,
    pub priority: NotifyPriority,
    pub subject: String,
    pub body: String,
}

/// Notification sink.
pub trait Notifier: Send + Sync {
    fn notify(&self, priority: NotifyPriority, subject: &str, body: &str);
}

/// Default sink: tracing plus an optional JSONL append file.
pub struct LogNotifier {
    file: Option<Mutex<File>>,
}

impl LogNotifier {
    /// Notifier that only logs.
    pub fn stdout_only() -> Self {
        Self { file: None }
    }

    /// Notifier that also appends JSONL records to `path`.
    pub fn with_file(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, priority: NotifyPriority, subject: &str, body: &str) {
        match priority {
            NotifyPriority::Info => info!(subject, body, "notification"),
            NotifyPriority::Emergency => error!(subject, body, "EMERGENCY notification"),
            NotifyPriority::Highest => error!(subject, body, "HIGHEST-priority notification"),
        }

        if let Some(file) = &self.file {
            let record = Notification {
                timestamp_utc: Utc::now(),
                priority,
                subject: subject.to_string(),
                body: body.to_string(),
            };
            match serde_json::to_string(&record) {
                Ok(json) => {
                    let mut file = file.lock();
                    if let Err(err) = writeln!(file, "{}", json) {
                        warn!(%err, "failed to append notification record");
                    }
                }
                Err(err) => warn!(%err, "failed to serialize notification"),
            }
        }
    }
}

/// Capturing sink for tests.
#[derive(Default)]
pub struct MemoryNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn highest_count(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.priority == NotifyPriority::Highest)
            .count()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, priority: NotifyPriority, subject: &str, body: &str) {
        self.sent.lock().push(Notification {
            timestamp_utc: Utc::now(),
            priority,
            subject: subject.to_string(),
            body: body.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    #[test]
    fn test_priority_ordering() {
        assert!(NotifyPriority::Highest > NotifyPriority::Emergency);
        assert!(NotifyPriority::Emergency > NotifyPriority::Info);
    }

    #[test]
    fn test_file_notifier_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.jsonl");
        let notifier = LogNotifier::with_file(&path).unwrap();

        notifier.notify(NotifyPriority::Emergency, "protective failure", "flattened abc123");
        notifier.notify(NotifyPriority::Info, "round trip complete", "abc123");

        let file = std::fs::File::open(&path).unwrap();
        let lines: Vec<String> = std::io::BufReader::new(file)
            .lines()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(lines.len(), 2);
        let first: Notification = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first.priority, NotifyPriority::Emergency);
        assert_eq!(first.subject, "protective failure");
    }

    #[test]
    fn test_memory_notifier_captures() {
        let notifier = MemoryNotifier::new();
        notifier.notify(NotifyPriority::Highest, "untagged fill", "flattened MES");
        assert_eq!(notifier.highest_count(), 1);
    }
}

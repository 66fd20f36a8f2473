//! Structured execution event stream.
//!
//! Every significant decision emits one JSONL record with a fixed envelope
//! (`timestamp_utc`, `event_type`, `intent_id`, `instrument`, `payload`).
//! The file append runs on a dedicated writer thread behind a bounded
//! channel so emission never blocks the submission path; when the buffer
//! is full the event is dropped with an error log rather than stalling
//! the engine.

use chrono::{DateTime, Utc};
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

/// Buffer size for the writer channel. Bursts beyond this drop events.
const EVENT_BUFFER: usize = 4096;

/// Enumerated event types of the execution subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    OrderSubmitAttempt,
    OrderSubmitSuccess,
    OrderSubmitFail,
    OrderRejected,
    OrderCreatedStopmarket,
    OrderCreatedVerification,
    EntrySubmitPrecheck,
    ExecutionBlocked,
    ExecutionFilled,
    ExecutionPartialFill,
    ExecutionExitFill,
    IntentFillUpdate,
    IntentOverfillEmergency,
    QuantityMismatchEmergency,
    ProtectiveOrdersSubmitted,
    ProtectiveOrdersFailedFlattened,
    StopModifySuccess,
    KillSwitchActive,
    ExecutionJournalCorruption,
    OrphanFillCritical,
    SimAccountVerified,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderSubmitAttempt => "ORDER_SUBMIT_ATTEMPT",
            EventType::OrderSubmitSuccess => "ORDER_SUBMIT_SUCCESS",
            EventType::OrderSubmitFail => "ORDER_SUBMIT_FAIL",
            EventType::OrderRejected => "ORDER_REJECTED",
            EventType::OrderCreatedStopmarket => "ORDER_CREATED_STOPMARKET",
            EventType::OrderCreatedVerification => "ORDER_CREATED_VERIFICATION",
            EventType::EntrySubmitPrecheck => "ENTRY_SUBMIT_PRECHECK",
            EventType::ExecutionBlocked => "EXECUTION_BLOCKED",
            EventType::ExecutionFilled => "EXECUTION_FILLED",
            EventType::ExecutionPartialFill => "EXECUTION_PARTIAL_FILL",
            EventType::ExecutionExitFill => "EXECUTION_EXIT_FILL",
            EventType::IntentFillUpdate => "INTENT_FILL_UPDATE",
            EventType::IntentOverfillEmergency => "INTENT_OVERFILL_EMERGENCY",
            EventType::QuantityMismatchEmergency => "QUANTITY_MISMATCH_EMERGENCY",
            EventType::ProtectiveOrdersSubmitted => "PROTECTIVE_ORDERS_SUBMITTED",
            EventType::ProtectiveOrdersFailedFlattened => "PROTECTIVE_ORDERS_FAILED_FLATTENED",
            EventType::StopModifySuccess => "STOP_MODIFY_SUCCESS",
            EventType::KillSwitchActive => "KILL_SWITCH_ACTIVE",
            EventType::ExecutionJournalCorruption => "EXECUTION_JOURNAL_CORRUPTION",
            EventType::OrphanFillCritical => "ORPHAN_FILL_CRITICAL",
            EventType::SimAccountVerified => "SIM_ACCOUNT_VERIFIED",
        }
    }

    /// Whether the event marks a safety failure rather than normal flow.
    fn is_emergency(&self) -> bool {
        matches!(
            self,
            EventType::IntentOverfillEmergency
                | EventType::QuantityMismatchEmergency
                | EventType::ProtectiveOrdersFailedFlattened
                | EventType::ExecutionJournalCorruption
                | EventType::OrphanFillCritical
        )
    }

    fn is_warning(&self) -> bool {
        matches!(
            self,
            EventType::ExecutionBlocked
                | EventType::OrderSubmitFail
                | EventType::OrderRejected
                | EventType::KillSwitchActive
        )
    }
}

/// One record on the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecEvent {
    pub timestamp_utc: DateTime<Utc>,
    pub event_type: EventType,
    pub intent_id: String,
    pub instrument: String,
    pub payload: Value,
}

impl ExecEvent {
    pub fn new(event_type: EventType, intent_id: &str, instrument: &str, payload: Value) -> Self {
        Self {
            timestamp_utc: Utc::now(),
            event_type,
            intent_id: intent_id.to_string(),
            instrument: instrument.to_string(),
            payload,
        }
    }
}

/// JSONL event sink shared by every component.
pub struct EventLog {
    sender: Option<Sender<ExecEvent>>,
    handle: Option<thread::JoinHandle<()>>,
    memory: Option<Arc<Mutex<Vec<ExecEvent>>>>,
}

impl EventLog {
    /// File-backed log with a dedicated append thread.
    pub fn to_file(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let (sender, receiver) = bounded(EVENT_BUFFER);
        let handle = thread::Builder::new()
            .name("qtsw-events".to_string())
            .spawn(move || Self::writer_loop(path, receiver))?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            memory: None,
        })
    }

    /// In-memory log for tests: returns the log and the shared buffer.
    pub fn in_memory() -> (Self, Arc<Mutex<Vec<ExecEvent>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                sender: None,
                handle: None,
                memory: Some(buffer.clone()),
            },
            buffer,
        )
    }

    /// Log that only mirrors to tracing.
    pub fn disabled() -> Self {
        Self {
            sender: None,
            handle: None,
            memory: None,
        }
    }

    pub fn emit(&self, event_type: EventType, intent_id: &str, instrument: &str, payload: Value) {
        let event = ExecEvent::new(event_type, intent_id, instrument, payload);

        if event.event_type.is_emergency() {
            error!(
                event = event.event_type.as_str(),
                intent_id = %event.intent_id,
                instrument = %event.instrument,
                payload = %event.payload,
                "execution event"
            );
        } else if event.event_type.is_warning() {
            warn!(
                event = event.event_type.as_str(),
                intent_id = %event.intent_id,
                instrument = %event.instrument,
                payload = %event.payload,
                "execution event"
            );
        } else {
            info!(
                event = event.event_type.as_str(),
                intent_id = %event.intent_id,
                instrument = %event.instrument,
                "execution event"
            );
        }

        if let Some(buffer) = &self.memory {
            buffer.lock().push(event);
            return;
        }

        if let Some(sender) = &self.sender {
            if let Err(err) = sender.try_send(event) {
                // Dropping an event beats stalling the submission path.
                error!(%err, "event buffer full or disconnected, dropping event");
            }
        }
    }

    fn writer_loop(path: PathBuf, receiver: Receiver<ExecEvent>) {
        let mut file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(err) => {
                error!(path = %path.display(), %err, "failed to open event log");
                return;
            }
        };

        for event in receiver {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if let Err(err) = writeln!(file, "{}", json) {
                        error!(%err, "failed to write event log");
                    }
                }
                Err(err) => {
                    error!(%err, "failed to serialize event");
                }
            }
        }

        if let Err(err) = file.flush() {
            error!(%err, "failed to flush event log");
        }
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        // Disconnect first, otherwise the writer blocks on recv forever.
        let _ = self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::BufRead;

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&EventType::ExecutionJournalCorruption).unwrap(),
            "\"EXECUTION_JOURNAL_CORRUPTION\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::OrderCreatedStopmarket).unwrap(),
            "\"ORDER_CREATED_STOPMARKET\""
        );
        assert_eq!(EventType::EntrySubmitPrecheck.as_str(), "ENTRY_SUBMIT_PRECHECK");
    }

    #[test]
    fn test_file_log_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let log = EventLog::to_file(&path).unwrap();
            log.emit(
                EventType::OrderSubmitAttempt,
                "abc123",
                "MES",
                json!({"quantity": 2}),
            );
            log.emit(EventType::OrderSubmitSuccess, "abc123", "MES", json!({}));
        }

        let file = std::fs::File::open(&path).unwrap();
        let lines: Vec<String> = std::io::BufReader::new(file)
            .lines()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(lines.len(), 2);

        let first: ExecEvent = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first.event_type, EventType::OrderSubmitAttempt);
        assert_eq!(first.intent_id, "abc123");
        assert_eq!(first.payload["quantity"], 2);
    }

    #[test]
    fn test_memory_log_captures() {
        let (log, buffer) = EventLog::in_memory();
        log.emit(EventType::ExecutionBlocked, "abc", "MES", json!({"reason": "x"}));
        let events = buffer.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ExecutionBlocked);
    }
}

//! Per-intent exposure accounting.
//!
//! The coordinator is the authority on how much of an intent is actually
//! on (entry fills) and how much has been taken off (exit fills). Exit
//! orders are admitted against it, and the invariant
//! `0 <= exit_filled <= entry_filled <= expected` is enforced on every
//! fill delta — an excursion is an emergency, not an accounting update.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::{Direction, ExecError, Intent, StandDownFn};
use crate::monitoring::{EventLog, EventType};

/// Live exposure for one intent.
#[derive(Debug, Clone)]
pub struct ExposureRecord {
    pub intent_id: String,
    pub stream: String,
    pub instrument: String,
    pub direction: Option<Direction>,
    pub expected_quantity: u32,
    pub entry_filled: u32,
    pub exit_filled: u32,
    pub first_fill_time: Option<DateTime<Utc>>,
    pub protective_failure: bool,
}

impl ExposureRecord {
    pub fn open_quantity(&self) -> u32 {
        self.entry_filled.saturating_sub(self.exit_filled)
    }
}

/// Result of applying an exit fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exposure remains; `remaining` contracts still open.
    Open { remaining: u32 },
    /// Exit fills reached entry fills; the record was released.
    Released,
}

pub struct ExposureCoordinator {
    records: Mutex<HashMap<String, ExposureRecord>>,
    stand_down: RwLock<Option<StandDownFn>>,
    events: Arc<EventLog>,
}

impl ExposureCoordinator {
    pub fn new(events: Arc<EventLog>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            stand_down: RwLock::new(None),
            events,
        }
    }

    /// Registered once at wiring time.
    pub fn set_stand_down(&self, f: StandDownFn) {
        *self.stand_down.write() = Some(f);
    }

    /// Declare the expected quantity before any order is submitted.
    /// Re-declaration updates the expectation (declaration is the only
    /// mutation path for it).
    pub fn register_expectation(&self, intent: &Intent, expected_quantity: u32) {
        let intent_id = intent.intent_id();
        let mut records = self.records.lock();
        let record = records.entry(intent_id.clone()).or_insert(ExposureRecord {
            intent_id,
            stream: intent.stream.clone(),
            instrument: intent.execution_instrument.clone(),
            direction: intent.direction,
            expected_quantity,
            entry_filled: 0,
            exit_filled: 0,
            first_fill_time: None,
            protective_failure: false,
        });
        record.expected_quantity = expected_quantity;
    }

    /// Rebuild an exposure record from journal state during recovery.
    /// Exit fills are not journalled, so a restored record starts with
    /// the journalled entry quantity and zero exits. A record that
    /// already exists (live in this process) wins over the restore.
    pub fn restore_exposure(&self, record: ExposureRecord) {
        let mut records = self.records.lock();
        records.entry(record.intent_id.clone()).or_insert(record);
    }

    /// Credit an entry-fill delta. Returns the new cumulative entry fill.
    pub fn on_entry_fill(
        &self,
        intent_id: &str,
        direction: Direction,
        delta: u32,
    ) -> Result<u32, ExecError> {
        let mut records = self.records.lock();
        let record = records.get_mut(intent_id).ok_or_else(|| {
            ExecError::InvariantViolation(format!("no exposure record for intent {}", intent_id))
        })?;

        let new_total = record.entry_filled.saturating_add(delta);
        if new_total > record.expected_quantity {
            let (stream, instrument) = (record.stream.clone(), record.instrument.clone());
            let (entry_filled, expected) = (record.entry_filled, record.expected_quantity);
            drop(records);
            self.events.emit(
                EventType::IntentOverfillEmergency,
                intent_id,
                &instrument,
                json!({
                    "stream": stream,
                    "entry_filled": entry_filled,
                    "delta": delta,
                    "expected_quantity": expected,
                }),
            );
            self.invoke_stand_down(&stream, "entry fills exceed expected quantity");
            return Err(ExecError::InvariantViolation(format!(
                "entry fills {} + {} exceed expected {} for intent {}",
                entry_filled, delta, expected, intent_id
            )));
        }

        if record.first_fill_time.is_none() {
            record.first_fill_time = Some(Utc::now());
            record.direction = Some(direction);
        }
        record.entry_filled = new_total;
        debug!(
            intent_id,
            entry_filled = record.entry_filled,
            expected = record.expected_quantity,
            "entry fill credited"
        );
        Ok(new_total)
    }

    /// Credit an exit-fill delta. Releases the record when exposure is flat.
    pub fn on_exit_fill(&self, intent_id: &str, delta: u32) -> Result<ExitOutcome, ExecError> {
        let mut records = self.records.lock();
        let record = records.get_mut(intent_id).ok_or_else(|| {
            ExecError::InvariantViolation(format!("no exposure record for intent {}", intent_id))
        })?;

        let new_total = record.exit_filled.saturating_add(delta);
        if new_total > record.entry_filled {
            let (stream, instrument) = (record.stream.clone(), record.instrument.clone());
            let (entry_filled, exit_filled) = (record.entry_filled, record.exit_filled);
            drop(records);
            self.events.emit(
                EventType::IntentOverfillEmergency,
                intent_id,
                &instrument,
                json!({
                    "stream": stream,
                    "entry_filled": entry_filled,
                    "exit_filled": exit_filled,
                    "delta": delta,
                }),
            );
            self.invoke_stand_down(&stream, "exit fills exceed entry fills");
            return Err(ExecError::InvariantViolation(format!(
                "exit fills {} + {} exceed entry fills {} for intent {}",
                exit_filled, delta, entry_filled, intent_id
            )));
        }

        record.exit_filled = new_total;
        if record.exit_filled == record.entry_filled && record.entry_filled > 0 {
            records.remove(intent_id);
            debug!(intent_id, "exposure released");
            return Ok(ExitOutcome::Released);
        }
        let remaining = record.open_quantity();
        Ok(ExitOutcome::Open { remaining })
    }

    /// Exit-order admission: an exit may only cover what entry fills have
    /// actually put on, and never while a protective failure is pending.
    pub fn can_submit_exit(&self, intent_id: &str, quantity: u32) -> bool {
        let records = self.records.lock();
        match records.get(intent_id) {
            Some(record) => {
                record.entry_filled > 0
                    && !record.protective_failure
                    && record.exit_filled.saturating_add(quantity) <= record.entry_filled
            }
            None => false,
        }
    }

    /// Mark the intent's exposure failed and stand the stream down.
    pub fn on_protective_failure(&self, intent_id: &str) {
        let stream = {
            let mut records = self.records.lock();
            match records.get_mut(intent_id) {
                Some(record) => {
                    record.protective_failure = true;
                    Some(record.stream.clone())
                }
                None => None,
            }
        };
        match stream {
            Some(stream) => {
                warn!(intent_id, %stream, "protective failure marked on exposure");
                self.invoke_stand_down(&stream, "protective order failure");
            }
            None => {
                warn!(intent_id, "protective failure for unknown exposure record");
            }
        }
    }

    pub fn record(&self, intent_id: &str) -> Option<ExposureRecord> {
        self.records.lock().get(intent_id).cloned()
    }

    pub fn entry_filled(&self, intent_id: &str) -> u32 {
        self.records
            .lock()
            .get(intent_id)
            .map(|r| r.entry_filled)
            .unwrap_or(0)
    }

    pub fn open_quantity(&self, intent_id: &str) -> u32 {
        self.records
            .lock()
            .get(intent_id)
            .map(|r| r.open_quantity())
            .unwrap_or(0)
    }

    fn invoke_stand_down(&self, stream: &str, reason: &str) {
        if let Some(stand_down) = self.stand_down.read().as_ref() {
            stand_down(stream, reason);
        }
    }
}

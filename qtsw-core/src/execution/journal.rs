//! Per-intent execution journal.
//!
//! One JSON file per (trading_date, stream, intent_id) records every
//! transition the intent went through: submission, fills, rejection,
//! break-even modification. Fields are accretive — flags only move from
//! false to true, the cumulative fill quantity never decreases — which is
//! what makes replaying a journal after a crash idempotent.
//!
//! Corruption is fail-closed: a journal file that exists but will not
//! deserialize stands the stream down and reports the intent as
//! already-submitted / already-modified, so the caller cannot create a
//! duplicate broker order on top of unknown state. The
//! `EXECUTION_JOURNAL_CORRUPTION` event fires every time that path is
//! taken; corrupt files are never silently rewritten.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;

use crate::core::{Direction, ExecError, Intent, OrderType, StandDownFn};
use crate::monitoring::{EventLog, EventType};

/// Identity of one journal file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JournalKey {
    pub trading_date: String,
    pub stream: String,
    pub intent_id: String,
    /// Event metadata only; not part of the file name.
    pub instrument: String,
}

impl JournalKey {
    pub fn for_intent(intent: &Intent) -> Self {
        Self {
            trading_date: intent.trading_date.clone(),
            stream: intent.stream.clone(),
            intent_id: intent.intent_id(),
            instrument: intent.execution_instrument.clone(),
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.json",
            self.trading_date, self.stream, self.intent_id
        )
    }
}

/// Persisted journal document. All timestamps are UTC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalEntry {
    // Accretive flags.
    #[serde(default)]
    pub entry_submitted: bool,
    #[serde(default)]
    pub entry_filled: bool,
    #[serde(default)]
    pub rejected: bool,
    #[serde(default)]
    pub be_modified: bool,

    // Transition timestamps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub be_modified_at: Option<DateTime<Utc>>,

    // Order details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_order_type: Option<OrderType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<Decimal>,
    /// Cumulative across partial fills.
    #[serde(default)]
    pub fill_quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub be_stop_price: Option<Decimal>,

    // Recovery triple: enough to re-derive protective orders after a crash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oco_group: Option<String>,

    // Slippage accounting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_entry_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_fill_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage_points: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage_dollars: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commission: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees: Option<Decimal>,
}

/// What `record_submission` persists.
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub broker_order_id: String,
    pub entry_order_type: OrderType,
    pub direction: Option<Direction>,
    pub entry_price: Option<Decimal>,
    pub stop_price: Decimal,
    pub target_price: Decimal,
    pub oco_group: Option<String>,
    pub expected_entry_price: Option<Decimal>,
}

/// What `record_fill` persists.
#[derive(Debug, Clone)]
pub struct FillRecord {
    pub fill_price: Decimal,
    /// Cumulative quantity after this fill.
    pub cumulative_quantity: u32,
    pub commission: Decimal,
    pub fees: Decimal,
}

/// The journal. A single mutex serializes all reads and writes.
pub struct ExecutionJournal {
    root: PathBuf,
    contract_multiplier: Option<Decimal>,
    inner: Mutex<HashMap<String, JournalEntry>>,
    stand_down: RwLock<Option<StandDownFn>>,
    events: Arc<EventLog>,
}

impl ExecutionJournal {
    /// `root` is the `data/execution_journals` directory.
    pub fn new(
        root: impl Into<PathBuf>,
        contract_multiplier: Option<Decimal>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            root: root.into(),
            contract_multiplier,
            inner: Mutex::new(HashMap::new()),
            stand_down: RwLock::new(None),
            events,
        }
    }

    /// Registered once at wiring time.
    pub fn set_stand_down(&self, f: StandDownFn) {
        *self.stand_down.write() = Some(f);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Intent ids of every journal file on disk, parsed from file names.
    /// Used by recovery to recognize robot orders from prior runs.
    pub fn known_intent_ids(&self) -> Vec<String> {
        self.file_names()
            .iter()
            .filter_map(|name| parse_file_name(name))
            .map(|(_, _, intent_id)| intent_id)
            .collect()
    }

    /// Replay every journal file on disk: `(key, entry)` per intent.
    /// This is the recovery read path; the entries carry the recovery
    /// triple needed to rebuild trackers and exposure after a restart.
    /// Corrupt files have already stood their stream down by the time
    /// this returns and are skipped.
    pub fn replay(&self, instrument: &str) -> Vec<(JournalKey, JournalEntry)> {
        let mut entries = Vec::new();
        for name in self.file_names() {
            let (trading_date, stream, intent_id) = match parse_file_name(&name) {
                Some(parts) => parts,
                None => continue,
            };
            let key = JournalKey {
                trading_date,
                stream,
                intent_id,
                instrument: instrument.to_string(),
            };
            let mut cache = self.inner.lock();
            if let Ok(Some(entry)) = self.load(&mut cache, &key) {
                entries.push((key, entry));
            }
        }
        entries
    }

    /// Locate the journal key for an intent id by scanning file names.
    /// Lets callers reach journal state for intents with no in-memory
    /// tracker, e.g. a break-even request after a restart.
    pub fn key_for(&self, intent_id: &str, instrument: &str) -> Option<JournalKey> {
        for name in self.file_names() {
            if let Some((trading_date, stream, id)) = parse_file_name(&name) {
                if id == intent_id {
                    return Some(JournalKey {
                        trading_date,
                        stream,
                        intent_id: id,
                        instrument: instrument.to_string(),
                    });
                }
            }
        }
        None
    }

    fn file_names(&self) -> Vec<String> {
        match std::fs::read_dir(&self.root) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Fail-closed: journal corruption reports "submitted".
    pub fn is_intent_submitted(&self, key: &JournalKey) -> bool {
        let mut cache = self.inner.lock();
        match self.load(&mut cache, key) {
            Ok(Some(entry)) => entry.entry_submitted,
            Ok(None) => false,
            Err(_) => true,
        }
    }

    /// Fail-closed: journal corruption reports "modified".
    pub fn is_be_modified(&self, key: &JournalKey) -> bool {
        let mut cache = self.inner.lock();
        match self.load(&mut cache, key) {
            Ok(Some(entry)) => entry.be_modified,
            Ok(None) => false,
            Err(_) => true,
        }
    }

    pub fn record_submission(
        &self,
        key: &JournalKey,
        record: &SubmissionRecord,
    ) -> Result<(), ExecError> {
        self.update(key, |entry| {
            entry.entry_submitted = true;
            if entry.submitted_at.is_none() {
                entry.submitted_at = Some(Utc::now());
            }
            entry.broker_order_id = Some(record.broker_order_id.clone());
            entry.entry_order_type = Some(record.entry_order_type);
            entry.direction = record.direction;
            entry.entry_price = record.entry_price;
            entry.stop_price = Some(record.stop_price);
            entry.target_price = Some(record.target_price);
            if record.oco_group.is_some() {
                entry.oco_group = record.oco_group.clone();
            }
            entry.expected_entry_price = record.expected_entry_price;
        })
    }

    pub fn record_fill(&self, key: &JournalKey, record: &FillRecord) -> Result<(), ExecError> {
        let multiplier = self.contract_multiplier;
        self.update(key, |entry| {
            entry.entry_filled = true;
            if entry.filled_at.is_none() {
                entry.filled_at = Some(Utc::now());
            }
            entry.fill_price = Some(record.fill_price);
            entry.actual_fill_price = Some(record.fill_price);
            // Cumulative quantity is monotone.
            entry.fill_quantity = entry.fill_quantity.max(record.cumulative_quantity);
            entry.commission = Some(record.commission);
            entry.fees = Some(record.fees);

            if let (Some(expected), Some(mult)) = (entry.expected_entry_price, multiplier) {
                let points = match entry.direction {
                    Some(Direction::Short) => expected - record.fill_price,
                    // Long or unknown: positive means paid up.
                    _ => record.fill_price - expected,
                };
                entry.slippage_points = Some(points);
                entry.slippage_dollars =
                    Some(points * mult * Decimal::from(entry.fill_quantity));
            }
        })
    }

    pub fn record_rejection(&self, key: &JournalKey, reason: &str) -> Result<(), ExecError> {
        self.update(key, |entry| {
            entry.rejected = true;
            if entry.rejected_at.is_none() {
                entry.rejected_at = Some(Utc::now());
            }
            entry.rejection_reason = Some(reason.to_string());
        })
    }

    pub fn record_be_modification(
        &self,
        key: &JournalKey,
        be_stop_price: Decimal,
    ) -> Result<(), ExecError> {
        self.update(key, |entry| {
            entry.be_modified = true;
            if entry.be_modified_at.is_none() {
                entry.be_modified_at = Some(Utc::now());
            }
            entry.be_stop_price = Some(be_stop_price);
        })
    }

    /// Current journal state, if readable.
    pub fn entry(&self, key: &JournalKey) -> Option<JournalEntry> {
        let mut cache = self.inner.lock();
        self.load(&mut cache, key).ok().flatten()
    }

    fn update(
        &self,
        key: &JournalKey,
        mutate: impl FnOnce(&mut JournalEntry),
    ) -> Result<(), ExecError> {
        let mut cache = self.inner.lock();
        let mut entry = match self.load(&mut cache, key) {
            Ok(existing) => existing.unwrap_or_default(),
            Err(err) => return Err(err),
        };

        mutate(&mut entry);
        self.persist(key, &entry)?;
        cache.insert(key.file_name(), entry);
        Ok(())
    }

    /// Read-through load. `Err` means the file exists but is corrupt; the
    /// stand-down and event emission have already happened by then.
    fn load(
        &self,
        cache: &mut HashMap<String, JournalEntry>,
        key: &JournalKey,
    ) -> Result<Option<JournalEntry>, ExecError> {
        let name = key.file_name();
        if let Some(entry) = cache.get(&name) {
            return Ok(Some(entry.clone()));
        }

        let path = self.root.join(&name);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(self.corruption(key, &path, &format!("read failed: {}", err)));
            }
        };

        match serde_json::from_str::<JournalEntry>(&raw) {
            Ok(entry) => {
                cache.insert(name, entry.clone());
                Ok(Some(entry))
            }
            Err(err) => Err(self.corruption(key, &path, &format!("deserialize failed: {}", err))),
        }
    }

    fn persist(&self, key: &JournalKey, entry: &JournalEntry) -> Result<(), ExecError> {
        if let Err(err) = std::fs::create_dir_all(&self.root) {
            return Err(ExecError::Corruption(format!(
                "journal dir unwritable: {}",
                err
            )));
        }
        let path = self.root.join(key.file_name());
        let tmp = self.root.join(format!("{}.tmp", key.file_name()));
        let json = serde_json::to_string_pretty(entry)
            .map_err(|err| ExecError::Corruption(format!("serialize failed: {}", err)))?;
        std::fs::write(&tmp, json)
            .map_err(|err| ExecError::Corruption(format!("write failed: {}", err)))?;
        // Atomic at the granularity of the JSON file.
        std::fs::rename(&tmp, &path)
            .map_err(|err| ExecError::Corruption(format!("rename failed: {}", err)))?;
        Ok(())
    }

    /// Fail-closed corruption path: emit, stand the stream down, and hand
    /// the caller an error that reads as "do not touch this intent".
    fn corruption(&self, key: &JournalKey, path: &Path, detail: &str) -> ExecError {
        error!(
            intent_id = %key.intent_id,
            stream = %key.stream,
            path = %path.display(),
            detail,
            "execution journal corrupt, failing closed"
        );
        self.events.emit(
            EventType::ExecutionJournalCorruption,
            &key.intent_id,
            &key.instrument,
            json!({
                "stream": key.stream,
                "path": path.display().to_string(),
                "detail": detail,
            }),
        );
        if let Some(stand_down) = self.stand_down.read().as_ref() {
            stand_down(&key.stream, "execution journal corruption");
        }
        ExecError::Corruption(format!("{}: {}", path.display(), detail))
    }
}

/// Split `<date>_<stream>_<intent_id>.json` back into its parts. The
/// date carries no underscores and the intent id is the last segment, so
/// streams containing underscores survive the round trip.
fn parse_file_name(name: &str) -> Option<(String, String, String)> {
    let stem = name.strip_suffix(".json")?;
    let (trading_date, rest) = stem.split_once('_')?;
    let (stream, intent_id) = rest.rsplit_once('_')?;
    if trading_date.is_empty() || stream.is_empty() || intent_id.is_empty() {
        return None;
    }
    Some((
        trading_date.to_string(),
        stream.to_string(),
        intent_id.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn key() -> JournalKey {
        JournalKey {
            trading_date: "2025-11-20".to_string(),
            stream: "NY1".to_string(),
            intent_id: "abc123def4567890".to_string(),
            instrument: "MES".to_string(),
        }
    }

    fn submission() -> SubmissionRecord {
        SubmissionRecord {
            broker_order_id: "B1".to_string(),
            entry_order_type: OrderType::EntryStop,
            direction: Some(Direction::Long),
            entry_price: Some(dec!(4500.00)),
            stop_price: dec!(4495.00),
            target_price: dec!(4510.00),
            oco_group: None,
            expected_entry_price: Some(dec!(4500.00)),
        }
    }

    fn journal(root: &Path, multiplier: Option<Decimal>) -> ExecutionJournal {
        ExecutionJournal::new(root, multiplier, Arc::new(EventLog::disabled()))
    }

    #[test]
    fn test_file_name_layout() {
        assert_eq!(
            key().file_name(),
            "2025-11-20_NY1_abc123def4567890.json"
        );
    }

    #[test]
    fn test_submission_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), None);
        let key = key();

        assert!(!journal.is_intent_submitted(&key));
        journal.record_submission(&key, &submission()).unwrap();
        assert!(journal.is_intent_submitted(&key));

        // A fresh journal instance reads the same file back.
        let journal2 = self::journal(dir.path(), None);
        assert!(journal2.is_intent_submitted(&key));
        let entry = journal2.entry(&key).unwrap();
        assert_eq!(entry.broker_order_id.as_deref(), Some("B1"));
        assert_eq!(entry.entry_order_type, Some(OrderType::EntryStop));
        assert_eq!(entry.stop_price, Some(dec!(4495.00)));
    }

    #[test]
    fn test_fill_derives_slippage() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), Some(dec!(5)));
        let key = key();

        journal.record_submission(&key, &submission()).unwrap();
        journal
            .record_fill(
                &key,
                &FillRecord {
                    fill_price: dec!(4500.25),
                    cumulative_quantity: 2,
                    commission: dec!(1.24),
                    fees: dec!(0.62),
                },
            )
            .unwrap();

        let entry = journal.entry(&key).unwrap();
        assert!(entry.entry_filled);
        assert_eq!(entry.fill_quantity, 2);
        assert_eq!(entry.slippage_points, Some(dec!(0.25)));
        // 0.25 points * $5/point * 2 contracts
        assert_eq!(entry.slippage_dollars, Some(dec!(2.50)));
    }

    #[test]
    fn test_short_slippage_sign() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), Some(dec!(5)));
        let key = key();

        let mut sub = submission();
        sub.direction = Some(Direction::Short);
        journal.record_submission(&key, &sub).unwrap();
        // Short filled below expected: paid up by 0.25.
        journal
            .record_fill(
                &key,
                &FillRecord {
                    fill_price: dec!(4499.75),
                    cumulative_quantity: 1,
                    commission: dec!(0.62),
                    fees: dec!(0.31),
                },
            )
            .unwrap();

        let entry = journal.entry(&key).unwrap();
        assert_eq!(entry.slippage_points, Some(dec!(0.25)));
    }

    #[test]
    fn test_flags_are_accretive() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), None);
        let key = key();

        journal.record_submission(&key, &submission()).unwrap();
        let first_submitted_at = journal.entry(&key).unwrap().submitted_at;

        journal
            .record_fill(
                &key,
                &FillRecord {
                    fill_price: dec!(4500.25),
                    cumulative_quantity: 2,
                    commission: dec!(1.24),
                    fees: dec!(0.62),
                },
            )
            .unwrap();
        // A lower cumulative quantity never decrements the journal.
        journal
            .record_fill(
                &key,
                &FillRecord {
                    fill_price: dec!(4500.25),
                    cumulative_quantity: 1,
                    commission: dec!(1.24),
                    fees: dec!(0.62),
                },
            )
            .unwrap();

        let entry = journal.entry(&key).unwrap();
        assert!(entry.entry_submitted);
        assert!(entry.entry_filled);
        assert_eq!(entry.fill_quantity, 2);
        assert_eq!(entry.submitted_at, first_submitted_at);
    }

    #[test]
    fn test_be_modification_guard() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), None);
        let key = key();

        assert!(!journal.is_be_modified(&key));
        journal.record_be_modification(&key, dec!(4500.00)).unwrap();
        assert!(journal.is_be_modified(&key));
        assert_eq!(journal.entry(&key).unwrap().be_stop_price, Some(dec!(4500.00)));
    }

    #[test]
    fn test_corruption_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let (events, captured) = EventLog::in_memory();
        let journal = ExecutionJournal::new(dir.path(), None, Arc::new(events));

        let stood_down = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
        let sink = stood_down.clone();
        journal.set_stand_down(Arc::new(move |stream: &str, reason: &str| {
            sink.lock().push((stream.to_string(), reason.to_string()));
        }));

        let key = key();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join(key.file_name()), "{truncated").unwrap();

        // Fail-closed: reads report submitted/modified.
        assert!(journal.is_intent_submitted(&key));
        assert!(journal.is_be_modified(&key));

        // Writes refuse to touch the corrupt file.
        assert!(matches!(
            journal.record_submission(&key, &submission()),
            Err(ExecError::Corruption(_))
        ));
        assert!(std::fs::read_to_string(dir.path().join(key.file_name()))
            .unwrap()
            .starts_with("{truncated"));

        // Stream stood down, event emitted on every hit.
        assert!(!stood_down.lock().is_empty());
        let events = captured.lock();
        assert!(events.len() >= 3);
        assert!(events
            .iter()
            .all(|e| e.event_type == EventType::ExecutionJournalCorruption));
    }

    #[test]
    fn test_known_intent_ids_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), None);
        let key = key();
        journal.record_submission(&key, &submission()).unwrap();

        let ids = journal.known_intent_ids();
        assert_eq!(ids, vec!["abc123def4567890".to_string()]);
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            parse_file_name("2025-11-20_NY1_abc123def4567890.json"),
            Some((
                "2025-11-20".to_string(),
                "NY1".to_string(),
                "abc123def4567890".to_string()
            ))
        );
        // Streams with underscores keep the id as the last segment.
        assert_eq!(
            parse_file_name("2025-11-20_NY_1_abc123def4567890.json"),
            Some((
                "2025-11-20".to_string(),
                "NY_1".to_string(),
                "abc123def4567890".to_string()
            ))
        );
        assert_eq!(parse_file_name("garbage"), None);
        // Leftover atomic-write temp files are not journal entries.
        assert_eq!(
            parse_file_name("2025-11-20_NY1_abc123def4567890.json.tmp"),
            None
        );
    }

    #[test]
    fn test_replay_returns_recovery_state() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), None);
        let key = key();
        journal.record_submission(&key, &submission()).unwrap();
        journal
            .record_fill(
                &key,
                &FillRecord {
                    fill_price: dec!(4500.25),
                    cumulative_quantity: 2,
                    commission: dec!(1.24),
                    fees: dec!(0.62),
                },
            )
            .unwrap();

        let replayed = journal.replay("MES");
        assert_eq!(replayed.len(), 1);
        let (replayed_key, entry) = &replayed[0];
        assert_eq!(replayed_key.trading_date, "2025-11-20");
        assert_eq!(replayed_key.stream, "NY1");
        assert_eq!(replayed_key.intent_id, "abc123def4567890");
        assert_eq!(replayed_key.instrument, "MES");
        assert_eq!(entry.direction, Some(Direction::Long));
        assert_eq!(entry.stop_price, Some(dec!(4495.00)));
        assert_eq!(entry.target_price, Some(dec!(4510.00)));
        assert_eq!(entry.fill_quantity, 2);
    }

    #[test]
    fn test_replay_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), None);
        journal.record_submission(&key(), &submission()).unwrap();
        std::fs::write(dir.path().join("2025-11-20_NY2_feedfacefeedface.json"), "{bad").unwrap();

        let replayed = journal.replay("MES");
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].0.intent_id, "abc123def4567890");
    }

    #[test]
    fn test_key_for_intent_id() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(dir.path(), None);
        let key = key();
        journal.record_submission(&key, &submission()).unwrap();

        let found = journal.key_for("abc123def4567890", "MES").unwrap();
        assert_eq!(found.trading_date, key.trading_date);
        assert_eq!(found.stream, key.stream);
        assert_eq!(found.intent_id, key.intent_id);
        assert!(journal.key_for("0000000000000000", "MES").is_none());
    }
}

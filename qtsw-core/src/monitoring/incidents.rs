//! Persistent incident records for post-mortem analysis.
//!
//! Incidents are the durable counterpart of emergency notifications: a
//! protective-order failure writes one JSON file per incident, orphan
//! fills append to a per-day JSONL. All file-name time components are UTC.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::Direction;

/// Written when protective-order placement ultimately fails and the
/// position is force-flattened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectiveFailureIncident {
    pub timestamp_utc: DateTime<Utc>,
    pub intent_id: String,
    pub stream: String,
    pub instrument: String,
    pub direction: Option<Direction>,
    /// Open quantity at the time the failure was declared.
    pub open_quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    /// Whether the fail-closed flatten reached flat.
    pub flattened: bool,
}

/// One line in the per-day orphan-fill JSONL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanFillRecord {
    pub timestamp_utc: DateTime<Utc>,
    pub broker_order_id: String,
    pub instrument: String,
    pub tag: String,
    pub quantity: u32,
    pub price: Decimal,
    pub reason: String,
    pub action_taken: String,
}

/// Owns the incident directory layout.
pub struct IncidentStore {
    root: PathBuf,
}

impl IncidentStore {
    /// `root` is the `data/execution_incidents` directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a protective-failure incident; returns the file written.
    pub fn record_protective_failure(
        &self,
        incident: &ProtectiveFailureIncident,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("creating incident dir {}", self.root.display()))?;
        let stamp = incident.timestamp_utc.format("%Y%m%d%H%M%S");
        let path = self
            .root
            .join(format!("protective_failure_{}_{}.json", incident.intent_id, stamp));
        let json = serde_json::to_string_pretty(incident)?;
        std::fs::write(&path, json)
            .with_context(|| format!("writing incident {}", path.display()))?;
        Ok(path)
    }

    /// Append an orphan-fill record to the per-day JSONL.
    pub fn record_orphan_fill(&self, record: &OrphanFillRecord) -> Result<PathBuf> {
        let dir = self.root.join("orphan_fills");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating orphan dir {}", dir.display()))?;
        let date = record.timestamp_utc.format("%Y-%m-%d");
        let path = dir.join(format!("orphan_fills_{}.jsonl", date));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening orphan log {}", path.display()))?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn sample_incident() -> ProtectiveFailureIncident {
        ProtectiveFailureIncident {
            timestamp_utc: Utc.with_ymd_and_hms(2025, 11, 20, 14, 31, 5).unwrap(),
            intent_id: "abc123def4567890".to_string(),
            stream: "NY1".to_string(),
            instrument: "MES".to_string(),
            direction: Some(Direction::Long),
            open_quantity: 2,
            stop_error: Some("rejected: margin".to_string()),
            target_error: None,
            flattened: true,
        }
    }

    #[test]
    fn test_protective_failure_filename_is_utc_stamped() {
        let dir = tempfile::tempdir().unwrap();
        let store = IncidentStore::new(dir.path().join("execution_incidents"));
        let path = store.record_protective_failure(&sample_incident()).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(
            name,
            "protective_failure_abc123def4567890_20251120143105.json"
        );

        let raw = std::fs::read_to_string(&path).unwrap();
        let loaded: ProtectiveFailureIncident = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded.intent_id, "abc123def4567890");
        assert!(loaded.flattened);
    }

    #[test]
    fn test_orphan_fills_append_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = IncidentStore::new(dir.path().join("execution_incidents"));

        let record = OrphanFillRecord {
            timestamp_utc: Utc.with_ymd_and_hms(2025, 11, 20, 15, 0, 0).unwrap(),
            broker_order_id: "B77".to_string(),
            instrument: "MES".to_string(),
            tag: String::new(),
            quantity: 1,
            price: dec!(4501.25),
            reason: "missing tag".to_string(),
            action_taken: "flattened instrument".to_string(),
        };
        let path_a = store.record_orphan_fill(&record).unwrap();
        let path_b = store.record_orphan_fill(&record).unwrap();
        assert_eq!(path_a, path_b);
        assert!(path_a.ends_with("orphan_fills/orphan_fills_2025-11-20.jsonl"));

        let raw = std::fs::read_to_string(&path_a).unwrap();
        assert_eq!(raw.lines().count(), 2);
        let first: OrphanFillRecord = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first.broker_order_id, "B77");
    }
}

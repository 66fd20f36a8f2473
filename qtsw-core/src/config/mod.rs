//! Execution configuration.
//!
//! Runtime settings live in a single JSON document (JSON because every
//! other on-disk artifact of this system — kill switch, journals,
//! incidents — is JSON). Everything has a usable default so tests and the
//! simulation binary can run from a bare temp directory.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for one engine process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Root under which `data/execution_journals` and
    /// `data/execution_incidents` are created.
    pub data_root: PathBuf,

    /// Kill-switch file location.
    #[serde(default = "default_kill_switch_path")]
    pub kill_switch_path: PathBuf,

    /// Broker account the adapter binds to.
    #[serde(default = "default_account")]
    pub account: String,

    /// Canonical instrument the strategy reasons about.
    pub canonical_instrument: String,

    /// Instrument actually routed to the broker.
    pub execution_instrument: String,

    /// Dollars per point, for slippage accounting. Absent disables the
    /// slippage derivation in the journal.
    #[serde(default)]
    pub contract_multiplier: Option<Decimal>,

    /// Session label -> allowed slot ends (`HH:MM`, Chicago-local).
    #[serde(default)]
    pub sessions: HashMap<String, Vec<String>>,

    #[serde(default)]
    pub adapter: AdapterTuning,
}

/// Retry and watchdog tuning for the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterTuning {
    /// Attempts per protective leg.
    #[serde(default = "default_protective_attempts")]
    pub protective_retry_attempts: u32,

    /// Delay between protective attempts, milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub protective_retry_backoff_ms: u64,

    /// Attempts for the fail-closed flatten.
    #[serde(default = "default_flatten_attempts")]
    pub flatten_retry_attempts: u32,

    /// Lookup retries for a fill racing the order map.
    #[serde(default = "default_fill_lookup_retries")]
    pub fill_lookup_retries: u32,

    /// Delay between fill lookups, milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub fill_lookup_backoff_ms: u64,

    /// Unprotected-position watchdog timeout, seconds.
    #[serde(default = "default_watchdog_secs")]
    pub watchdog_timeout_secs: u64,

    /// Minimum interval between instrument-mismatch log lines, seconds.
    #[serde(default = "default_mismatch_log_secs")]
    pub mismatch_log_interval_secs: u64,
}

fn default_kill_switch_path() -> PathBuf {
    PathBuf::from("configs/robot/kill_switch.json")
}

fn default_account() -> String {
    "Sim101".to_string()
}

fn default_protective_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_flatten_attempts() -> u32 {
    3
}

fn default_fill_lookup_retries() -> u32 {
    3
}

fn default_watchdog_secs() -> u64 {
    10
}

fn default_mismatch_log_secs() -> u64 {
    60
}

impl Default for AdapterTuning {
    fn default() -> Self {
        Self {
            protective_retry_attempts: default_protective_attempts(),
            protective_retry_backoff_ms: default_retry_backoff_ms(),
            flatten_retry_attempts: default_flatten_attempts(),
            fill_lookup_retries: default_fill_lookup_retries(),
            fill_lookup_backoff_ms: default_retry_backoff_ms(),
            watchdog_timeout_secs: default_watchdog_secs(),
            mismatch_log_interval_secs: default_mismatch_log_secs(),
        }
    }
}

impl AdapterTuning {
    pub fn protective_backoff(&self) -> Duration {
        Duration::from_millis(self.protective_retry_backoff_ms)
    }

    pub fn fill_lookup_backoff(&self) -> Duration {
        Duration::from_millis(self.fill_lookup_backoff_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_secs)
    }

    pub fn mismatch_log_interval(&self) -> Duration {
        Duration::from_secs(self.mismatch_log_interval_secs)
    }
}

impl ExecutionConfig {
    /// Configuration rooted at `data_root` with defaults everywhere else.
    pub fn for_instrument(
        data_root: impl Into<PathBuf>,
        canonical_instrument: &str,
        execution_instrument: &str,
    ) -> Self {
        let data_root = data_root.into();
        let mut sessions = HashMap::new();
        sessions.insert(
            "AM".to_string(),
            vec!["08:30".to_string(), "09:00".to_string(), "09:30".to_string()],
        );
        sessions.insert(
            "PM".to_string(),
            vec!["13:00".to_string(), "13:30".to_string()],
        );
        Self {
            kill_switch_path: data_root.join(default_kill_switch_path()),
            data_root,
            account: default_account(),
            canonical_instrument: canonical_instrument.to_string(),
            execution_instrument: execution_instrument.to_string(),
            contract_multiplier: None,
            sessions,
            adapter: AdapterTuning::default(),
        }
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading execution config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing execution config {}", path.display()))?;
        Ok(config)
    }

    pub fn journal_root(&self) -> PathBuf {
        self.data_root.join("data").join("execution_journals")
    }

    pub fn incident_root(&self) -> PathBuf {
        self.data_root.join("data").join("execution_incidents")
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.data_root.join("data").join("execution_events.jsonl")
    }

    pub fn notification_log_path(&self) -> PathBuf {
        self.data_root.join("data").join("notifications.jsonl")
    }

    /// Whether `slot_time` is an allowed slot end for `session`.
    pub fn slot_allowed(&self, session: &str, slot_time: &str) -> bool {
        self.sessions
            .get(session)
            .map(|slots| slots.iter().any(|s| s == slot_time))
            .unwrap_or(false)
    }

    pub fn session_known(&self, session: &str) -> bool {
        self.sessions.contains_key(session)
    }
}

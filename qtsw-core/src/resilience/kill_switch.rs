//! File-backed global kill switch.
//!
//! Operators flip trading off by writing `{"enabled": true}` to a fixed
//! path; no process restart involved. Reads are cached for a few seconds
//! to bound I/O cost, so a flip takes at most one TTL to be observed.
//!
//! Read errors are fail-open here (a missing or unreadable file reports
//! "disabled") — the fail-closed decision belongs to the risk gate, which
//! consults this value among its other gates. Unreadable files are logged
//! loudly so a corrupted switch never goes unnoticed.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::error;

/// Default cache TTL for kill-switch file reads.
pub const KILL_SWITCH_CACHE_TTL: Duration = Duration::from_secs(5);

/// Parsed kill-switch file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchState {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

struct CachedRead {
    at: Instant,
    state: KillSwitchState,
}

/// Shared handle consulted before every order submission.
pub struct KillSwitch {
    path: PathBuf,
    ttl: Duration,
    cache: RwLock<Option<CachedRead>>,
}

impl KillSwitch {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_ttl(path, KILL_SWITCH_CACHE_TTL)
    }

    pub fn with_ttl(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current switch state, served from cache within the TTL.
    pub fn current(&self) -> KillSwitchState {
        {
            let cache = self.cache.read();
            if let Some(cached) = cache.as_ref() {
                if cached.at.elapsed() < self.ttl {
                    return cached.state.clone();
                }
            }
        }

        let state = self.read_file();
        *self.cache.write() = Some(CachedRead {
            at: Instant::now(),
            state: state.clone(),
        });
        state
    }

    pub fn is_enabled(&self) -> bool {
        self.current().enabled
    }

    /// Drop the cached read so the next query hits the file.
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    fn read_file(&self) -> KillSwitchState {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // Absence means disabled.
                return KillSwitchState::default();
            }
            Err(err) => {
                error!(
                    path = %self.path.display(),
                    %err,
                    "kill switch file unreadable, treating as disabled"
                );
                return KillSwitchState::default();
            }
        };

        match serde_json::from_str::<KillSwitchState>(&raw) {
            Ok(state) => state,
            Err(err) => {
                error!(
                    path = %self.path.display(),
                    %err,
                    "kill switch file unparseable, treating as disabled"
                );
                KillSwitchState::default()
            }
        }
    }
}

//! Fail-closed safety mechanisms.

pub mod kill_switch;

pub use kill_switch::{KillSwitch, KillSwitchState, KILL_SWITCH_CACHE_TTL};

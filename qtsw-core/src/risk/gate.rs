//! Pre-trade risk gate.
//!
//! Six gates evaluated in a fixed order; the first failure supplies the
//! blocking reason. Every gate's status is reported in a single
//! `EXECUTION_BLOCKED` event so an operator can see the whole picture
//! from one record instead of peeling failures one at a time.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use crate::core::Intent;
use crate::monitoring::{EventLog, EventType};
use crate::resilience::KillSwitch;

/// Blocking reasons, stable wire names.
pub const REASON_RECOVERY_GUARD: &str = "RECOVERY_GUARD_ENGAGED";
pub const REASON_KILL_SWITCH: &str = "KILL_SWITCH_ACTIVE";
pub const REASON_TIMETABLE: &str = "TIMETABLE_NOT_VALIDATED";
pub const REASON_STREAM_NOT_ARMED: &str = "STREAM_NOT_ARMED";
pub const REASON_SESSION_UNKNOWN: &str = "SESSION_NOT_RECOGNIZED";
pub const REASON_SLOT_TIME: &str = "SLOT_TIME_NOT_ALLOWED";
pub const REASON_TRADING_DATE: &str = "TRADING_DATE_NOT_SET";

/// The gates, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateKind {
    RecoveryGuard,
    KillSwitch,
    Timetable,
    StreamArmed,
    SlotTime,
    TradingDate,
}

impl GateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateKind::RecoveryGuard => "RECOVERY_GUARD",
            GateKind::KillSwitch => "KILL_SWITCH",
            GateKind::Timetable => "TIMETABLE",
            GateKind::StreamArmed => "STREAM_ARMED",
            GateKind::SlotTime => "SLOT_TIME",
            GateKind::TradingDate => "TRADING_DATE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateStatus {
    pub gate: GateKind,
    pub passed: bool,
}

/// Outcome of a gate evaluation.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub allowed: bool,
    /// First failing gate's reason.
    pub reason: Option<String>,
    pub gates: Vec<GateStatus>,
}

impl GateDecision {
    pub fn failed_gates(&self) -> Vec<GateKind> {
        self.gates
            .iter()
            .filter(|g| !g.passed)
            .map(|g| g.gate)
            .collect()
    }
}

/// Everything the gate consults besides the kill switch. Owned by the
/// engine binding; assembled fresh per evaluation.
pub struct GateContext<'a> {
    pub recovery_engaged: bool,
    pub timetable_validated: bool,
    pub armed_streams: &'a HashSet<String>,
    pub trading_date: Option<&'a str>,
    /// `(session_known, slot_allowed)` for the intent under evaluation.
    pub session_known: bool,
    pub slot_allowed: bool,
}

pub struct RiskGate {
    kill_switch: Arc<KillSwitch>,
    events: Arc<EventLog>,
}

impl RiskGate {
    pub fn new(kill_switch: Arc<KillSwitch>, events: Arc<EventLog>) -> Self {
        Self {
            kill_switch,
            events,
        }
    }

    /// Evaluate all gates for one intent. Emits `EXECUTION_BLOCKED` (and
    /// `KILL_SWITCH_ACTIVE` where applicable) when the intent is blocked.
    pub fn evaluate(&self, intent: &Intent, ctx: &GateContext<'_>) -> GateDecision {
        let kill_switch = self.kill_switch.current();

        let checks: [(GateKind, bool, &str); 6] = [
            (
                GateKind::RecoveryGuard,
                !ctx.recovery_engaged,
                REASON_RECOVERY_GUARD,
            ),
            (GateKind::KillSwitch, !kill_switch.enabled, REASON_KILL_SWITCH),
            (GateKind::Timetable, ctx.timetable_validated, REASON_TIMETABLE),
            (
                GateKind::StreamArmed,
                ctx.armed_streams.contains(&intent.stream),
                REASON_STREAM_NOT_ARMED,
            ),
            (
                GateKind::SlotTime,
                ctx.session_known && ctx.slot_allowed,
                if ctx.session_known {
                    REASON_SLOT_TIME
                } else {
                    REASON_SESSION_UNKNOWN
                },
            ),
            (
                GateKind::TradingDate,
                ctx.trading_date.is_some(),
                REASON_TRADING_DATE,
            ),
        ];

        let gates: Vec<GateStatus> = checks
            .iter()
            .map(|(gate, passed, _)| GateStatus {
                gate: *gate,
                passed: *passed,
            })
            .collect();

        let reason = checks
            .iter()
            .find(|(_, passed, _)| !passed)
            .map(|(_, _, reason)| reason.to_string());

        let decision = GateDecision {
            allowed: reason.is_none(),
            reason,
            gates,
        };

        if !decision.allowed {
            let intent_id = intent.intent_id();
            self.events.emit(
                EventType::ExecutionBlocked,
                &intent_id,
                &intent.execution_instrument,
                json!({
                    "reason": decision.reason,
                    "stream": intent.stream,
                    "session": intent.session,
                    "slot_time": intent.slot_time,
                    "gates": decision.gates,
                }),
            );
            if decision.reason.as_deref() == Some(REASON_KILL_SWITCH) {
                self.events.emit(
                    EventType::KillSwitchActive,
                    &intent_id,
                    &intent.execution_instrument,
                    json!({ "message": kill_switch.message }),
                );
            }
        }

        decision
    }
}

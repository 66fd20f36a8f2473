//! Engine binding: turns intents into adapter calls and wires the
//! fail-closed callbacks.
//!
//! One engine process serves one trading day on one execution instrument.
//! The binding owns the arming state (which streams may trade, whether
//! the timetable validated, the trading date) and the recovery guard;
//! everything order-shaped is delegated to the adapter.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ExecutionConfig;
use crate::core::{encode_oco_group, Direction, ExecError, Intent, StandDownFn, ALL_STREAMS};
use crate::execution::adapter::{AdapterConfig, ExecutionAdapter, ReconcileReport};
use crate::execution::broker::BrokerApi;
use crate::execution::journal::ExecutionJournal;
use crate::execution::types::{BrokerEvent, EntryKind};
use crate::monitoring::{EventLog, IncidentStore, LogNotifier, Notifier};
use crate::resilience::KillSwitch;
use crate::risk::{GateContext, GateKind, RiskGate};

use super::coordinator::ExposureCoordinator;

/// Arming and guard state for one engine process.
#[derive(Debug, Default)]
struct EngineState {
    recovery_engaged: bool,
    timetable_validated: bool,
    trading_date: Option<String>,
    armed: HashSet<String>,
    /// Stream -> reason. A stood-down stream requires manual re-arming.
    stood_down: HashMap<String, String>,
}

/// Outcome of handing an intent to the engine.
#[derive(Debug, Clone)]
pub enum IntentSubmission {
    /// A gate refused the intent; nothing reached the broker.
    Blocked {
        reason: String,
        failed_gates: Vec<GateKind>,
    },
    /// Orders are live at the broker.
    Submitted {
        intent_id: String,
        broker_order_ids: Vec<String>,
    },
}

impl IntentSubmission {
    pub fn is_submitted(&self) -> bool {
        matches!(self, IntentSubmission::Submitted { .. })
    }
}

pub struct ExecutionEngine<B: BrokerApi + 'static> {
    cfg: ExecutionConfig,
    adapter: Arc<ExecutionAdapter<B>>,
    gate: RiskGate,
    coordinator: Arc<ExposureCoordinator>,
    journal: Arc<ExecutionJournal>,
    events: Arc<EventLog>,
    kill_switch: Arc<KillSwitch>,
    state: Arc<Mutex<EngineState>>,
}

impl<B: BrokerApi + 'static> ExecutionEngine<B> {
    /// Wire the whole execution subsystem over one broker connection.
    pub fn new(cfg: ExecutionConfig, broker: B) -> Result<Self> {
        let events = Arc::new(
            EventLog::to_file(cfg.event_log_path()).context("opening execution event log")?,
        );
        let notifier: Arc<dyn Notifier> = Arc::new(
            LogNotifier::with_file(cfg.notification_log_path())
                .context("opening notification log")?,
        );
        Self::with_parts(cfg, broker, events, notifier)
    }

    /// Wiring with caller-supplied sinks (tests use the in-memory log).
    pub fn with_parts(
        cfg: ExecutionConfig,
        broker: B,
        events: Arc<EventLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let incidents = Arc::new(IncidentStore::new(cfg.incident_root()));
        let journal = Arc::new(ExecutionJournal::new(
            cfg.journal_root(),
            cfg.contract_multiplier,
            events.clone(),
        ));
        let coordinator = Arc::new(ExposureCoordinator::new(events.clone()));
        let kill_switch = Arc::new(KillSwitch::new(cfg.kill_switch_path.clone()));
        let gate = RiskGate::new(kill_switch.clone(), events.clone());

        let adapter = ExecutionAdapter::new(
            broker,
            AdapterConfig::from_execution(&cfg),
            journal.clone(),
            coordinator.clone(),
            events.clone(),
            notifier,
            incidents,
        );

        let state = Arc::new(Mutex::new(EngineState::default()));
        let stand_down: StandDownFn = {
            let state = state.clone();
            Arc::new(move |stream: &str, reason: &str| {
                let mut state = state.lock();
                if stream == ALL_STREAMS {
                    let streams: Vec<String> = state.armed.drain().collect();
                    for stream in streams {
                        warn!(%stream, reason, "stream stood down");
                        state.stood_down.insert(stream, reason.to_string());
                    }
                } else {
                    state.armed.remove(stream);
                    state.stood_down.insert(stream.to_string(), reason.to_string());
                    warn!(stream, reason, "stream stood down");
                }
            })
        };
        journal.set_stand_down(stand_down.clone());
        coordinator.set_stand_down(stand_down.clone());
        adapter.set_stand_down(stand_down);

        Ok(Self {
            cfg,
            adapter,
            gate,
            coordinator,
            journal,
            events,
            kill_switch,
            state,
        })
    }

    // ------------------------------------------------------------------
    // Arming and guards
    // ------------------------------------------------------------------

    /// Arm a stream for trading. Clears any stand-down reason: arming is
    /// the manual re-enable.
    pub fn arm_stream(&self, stream: &str) {
        let mut state = self.state.lock();
        state.stood_down.remove(stream);
        state.armed.insert(stream.to_string());
        info!(stream, "stream armed");
    }

    pub fn disarm_stream(&self, stream: &str) {
        self.state.lock().armed.remove(stream);
    }

    pub fn stream_armed(&self, stream: &str) -> bool {
        self.state.lock().armed.contains(stream)
    }

    pub fn stand_down_reason(&self, stream: &str) -> Option<String> {
        self.state.lock().stood_down.get(stream).cloned()
    }

    pub fn set_trading_date(&self, date: &str) {
        self.state.lock().trading_date = Some(date.to_string());
    }

    pub fn set_timetable_validated(&self, validated: bool) {
        self.state.lock().timetable_validated = validated;
    }

    pub fn engage_recovery_guard(&self) {
        self.state.lock().recovery_engaged = true;
    }

    pub fn release_recovery_guard(&self) {
        self.state.lock().recovery_engaged = false;
    }

    // ------------------------------------------------------------------
    // Intent submission
    // ------------------------------------------------------------------

    /// Directional intent: breakout stop entry at the entry price, or a
    /// market entry when no entry price is given.
    pub fn submit_intent(
        &self,
        intent: &Intent,
        quantity: u32,
    ) -> Result<IntentSubmission, ExecError> {
        let direction = intent.direction.ok_or_else(|| {
            ExecError::InvariantViolation(
                "directionless intent requires submit_breakout_pair".to_string(),
            )
        })?;

        if let Some(blocked) = self.gate_check(intent) {
            return Ok(blocked);
        }
        let intent_id = intent.intent_id();
        self.adapter.register_policy(intent, quantity, quantity, "strategy");
        self.coordinator.register_expectation(intent, quantity);

        let broker_order_id = match intent.entry_price {
            Some(entry_price) => self.adapter.submit_stop_entry(
                intent,
                direction,
                entry_price,
                quantity,
                None,
            )?,
            None => self
                .adapter
                .submit_entry(intent, quantity, EntryKind::Market)?,
        };
        Ok(IntentSubmission::Submitted {
            intent_id,
            broker_order_ids: vec![broker_order_id],
        })
    }

    /// Symmetric breakout pair on range lock: long stop above, short stop
    /// below, one OCO group.
    pub fn submit_breakout_pair(
        &self,
        intent: &Intent,
        long_stop: Decimal,
        short_stop: Decimal,
        quantity: u32,
    ) -> Result<IntentSubmission, ExecError> {
        if let Some(blocked) = self.gate_check(intent) {
            return Ok(blocked);
        }
        let intent_id = intent.intent_id();
        self.adapter.register_policy(intent, quantity, quantity, "strategy");
        self.coordinator.register_expectation(intent, quantity);

        let oco_group =
            encode_oco_group(&intent.trading_date, &intent.stream, &intent.slot_time);
        let (long_id, short_id) =
            self.adapter
                .submit_breakout_pair(intent, long_stop, short_stop, quantity, &oco_group)?;
        Ok(IntentSubmission::Submitted {
            intent_id,
            broker_order_ids: vec![long_id, short_id],
        })
    }

    fn gate_check(&self, intent: &Intent) -> Option<IntentSubmission> {
        let decision = {
            let state = self.state.lock();
            let ctx = GateContext {
                recovery_engaged: state.recovery_engaged,
                timetable_validated: state.timetable_validated,
                armed_streams: &state.armed,
                trading_date: state.trading_date.as_deref(),
                session_known: self.cfg.session_known(&intent.session),
                slot_allowed: self.cfg.slot_allowed(&intent.session, &intent.slot_time),
            };
            self.gate.evaluate(intent, &ctx)
        };
        if decision.allowed {
            None
        } else {
            Some(IntentSubmission::Blocked {
                reason: decision
                    .reason
                    .clone()
                    .unwrap_or_else(|| "blocked".to_string()),
                failed_gates: decision.failed_gates(),
            })
        }
    }

    // ------------------------------------------------------------------
    // Broker event pump and break-even
    // ------------------------------------------------------------------

    /// Dispatch one broker callback into the adapter.
    pub fn on_broker_event(&self, event: &BrokerEvent) {
        match event {
            BrokerEvent::State(update) => self.adapter.on_order_state_update(update),
            BrokerEvent::Execution(exec) => self.adapter.on_execution_update(exec),
        }
    }

    /// Dispatch a batch of broker callbacks in arrival order.
    pub fn dispatch_events(&self, events: Vec<BrokerEvent>) {
        for event in &events {
            self.on_broker_event(event);
        }
    }

    /// Apply the break-even rule against the last traded price. The
    /// modification itself is journal-guarded, so repeated triggers are
    /// harmless.
    pub fn maybe_trigger_break_even(
        &self,
        intent_id: &str,
        last_price: Decimal,
    ) -> Result<bool, ExecError> {
        let intent = match self.adapter.intent(intent_id) {
            Some(intent) => intent,
            None => return Ok(false),
        };
        if self.coordinator.entry_filled(intent_id) == 0 {
            return Ok(false);
        }
        let direction = self
            .coordinator
            .record(intent_id)
            .and_then(|r| r.direction)
            .or(intent.direction);
        let triggered = match direction {
            Some(Direction::Long) => last_price >= intent.be_trigger,
            Some(Direction::Short) => last_price <= intent.be_trigger,
            None => false,
        };
        if !triggered {
            return Ok(false);
        }
        self.adapter.modify_stop_to_break_even(intent_id)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Recovery and shutdown
    // ------------------------------------------------------------------

    /// Reconcile the broker account against the journal: the journal is
    /// replayed into live trackers and exposure, orphan robot orders are
    /// cancelled, non-robot orders untouched. The recovery guard blocks
    /// submissions for the duration.
    pub fn recover(&self) -> Result<ReconcileReport, ExecError> {
        self.engage_recovery_guard();
        let known: HashSet<String> = self.journal.known_intent_ids().into_iter().collect();
        let report = self.adapter.reconcile_account(&known);
        self.release_recovery_guard();
        let report = report?;
        info!(
            robot_orders = report.robot_working_orders,
            orphans = report.orphans_cancelled.len(),
            restored = report.restored_intents,
            "account reconciliation complete"
        );
        Ok(report)
    }

    /// Shutdown path: pull every robot-owned working order.
    pub fn shutdown(&self) -> Result<usize, ExecError> {
        self.adapter.cancel_robot_owned_working_orders()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn adapter(&self) -> &Arc<ExecutionAdapter<B>> {
        &self.adapter
    }

    pub fn coordinator(&self) -> &Arc<ExposureCoordinator> {
        &self.coordinator
    }

    pub fn journal(&self) -> &Arc<ExecutionJournal> {
        &self.journal
    }

    pub fn kill_switch(&self) -> &Arc<KillSwitch> {
        &self.kill_switch
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.cfg
    }
}

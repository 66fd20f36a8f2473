//! Broker-agnostic order-submission state machine.
//!
//! The adapter owns every robot order at the broker: it enforces the
//! pre-submission invariants, verifies tags before an order goes live,
//! places protective orders on entry fills, and fails closed — flatten,
//! stand down, notify — whenever a position cannot be proven protected.
//!
//! Two thread contexts meet here: the engine tick calls the submission
//! and modification methods, and broker-owned threads deliver
//! [`OrderStateUpdate`] / [`ExecutionUpdate`] callbacks. A single mutex
//! over the adapter's maps serializes them; broker calls are short, so
//! blocking inside the lock is accepted in exchange for linearizable
//! per-intent effects.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::broker::BrokerApi;
use super::journal::{ExecutionJournal, FillRecord, JournalKey, SubmissionRecord};
use super::types::{
    AccountSnapshot, BrokerOrder, BrokerOrderSpec, EntryKind, ExecutionUpdate, IntentPolicy,
    OrderInfo, OrderStateUpdate, WorkingOrder,
};
use crate::config::ExecutionConfig;
use crate::core::{
    decode_intent_id, encode_order_tag, is_robot_tag, Direction, ExecError, Intent, OrderState,
    OrderType, StandDownFn, TagRole, ALL_STREAMS,
};
use crate::engine::coordinator::{ExposureCoordinator, ExposureRecord};
use crate::monitoring::{
    EventLog, EventType, IncidentStore, Notifier, NotifyPriority, OrphanFillRecord,
    ProtectiveFailureIncident,
};

/// Adapter tuning, resolved from [`ExecutionConfig`].
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub account: String,
    pub execution_instrument: String,
    pub protective_retry_attempts: u32,
    pub protective_retry_backoff: Duration,
    pub flatten_retry_attempts: u32,
    pub fill_lookup_retries: u32,
    pub fill_lookup_backoff: Duration,
    pub watchdog_timeout: Duration,
    pub mismatch_log_interval: Duration,
}

impl AdapterConfig {
    pub fn from_execution(cfg: &ExecutionConfig) -> Self {
        Self {
            account: cfg.account.clone(),
            execution_instrument: cfg.execution_instrument.clone(),
            protective_retry_attempts: cfg.adapter.protective_retry_attempts,
            protective_retry_backoff: cfg.adapter.protective_backoff(),
            flatten_retry_attempts: cfg.adapter.flatten_retry_attempts,
            fill_lookup_retries: cfg.adapter.fill_lookup_retries,
            fill_lookup_backoff: cfg.adapter.fill_lookup_backoff(),
            watchdog_timeout: cfg.adapter.watchdog_timeout(),
            mismatch_log_interval: cfg.adapter.mismatch_log_interval(),
        }
    }
}

/// Per-intent tracking: the intent itself, its declared policy, and the
/// broker orders working on its behalf.
///
/// `key` carries the authoritative intent id. For trackers rebuilt from
/// the journal the intent is a partial reconstruction, so the id must
/// never be recomputed from it.
struct IntentTracker {
    intent: Intent,
    key: JournalKey,
    policy: IntentPolicy,
    stop_order_id: Option<String>,
    target_order_id: Option<String>,
    protective_stop_acknowledged: bool,
    protective_target_acknowledged: bool,
    /// Unprotected-position watchdog deadline, armed on the first entry fill.
    protective_deadline: Option<Instant>,
}

/// State behind the adapter mutex.
struct AdapterInner<B> {
    broker: B,
    orders: HashMap<String, OrderInfo>,
    intents: HashMap<String, IntentTracker>,
    /// Intents whose emergency handler already ran; it runs once.
    emergencies: HashSet<String>,
}

/// Outcome of account reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub snapshot: AccountSnapshot,
    pub robot_working_orders: usize,
    pub orphans_cancelled: Vec<String>,
    /// Intents rebuilt from the journal replay.
    pub restored_intents: usize,
}

pub struct ExecutionAdapter<B: BrokerApi> {
    inner: Mutex<AdapterInner<B>>,
    cfg: AdapterConfig,
    journal: Arc<ExecutionJournal>,
    coordinator: Arc<ExposureCoordinator>,
    events: Arc<EventLog>,
    notifier: Arc<dyn Notifier>,
    incidents: Arc<IncidentStore>,
    stand_down: RwLock<Option<StandDownFn>>,
    /// Last mismatch log per instrument, for rate limiting.
    mismatch_log: DashMap<String, Instant>,
}

impl<B: BrokerApi + 'static> ExecutionAdapter<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: B,
        cfg: AdapterConfig,
        journal: Arc<ExecutionJournal>,
        coordinator: Arc<ExposureCoordinator>,
        events: Arc<EventLog>,
        notifier: Arc<dyn Notifier>,
        incidents: Arc<IncidentStore>,
    ) -> Arc<Self> {
        let adapter = Arc::new(Self {
            inner: Mutex::new(AdapterInner {
                broker,
                orders: HashMap::new(),
                intents: HashMap::new(),
                emergencies: HashSet::new(),
            }),
            cfg,
            journal,
            coordinator,
            events,
            notifier,
            incidents,
            stand_down: RwLock::new(None),
            mismatch_log: DashMap::new(),
        });
        Self::spawn_watchdog(&adapter);
        adapter
    }

    /// Registered once at wiring time.
    pub fn set_stand_down(&self, f: StandDownFn) {
        *self.stand_down.write() = Some(f);
    }

    // ------------------------------------------------------------------
    // Policy registration and prechecks
    // ------------------------------------------------------------------

    /// Declare the expected/max quantity for an intent. Must happen before
    /// any entry submission; absence of a policy is a hard block.
    pub fn register_policy(
        &self,
        intent: &Intent,
        expected_quantity: u32,
        max_quantity: u32,
        source: &str,
    ) {
        let intent_id = intent.intent_id();
        let policy = IntentPolicy {
            intent_id: intent_id.clone(),
            expected_quantity,
            max_quantity,
            source: source.to_string(),
            canonical_instrument: intent.canonical_instrument.clone(),
            execution_instrument: intent.execution_instrument.clone(),
        };
        let key = JournalKey::for_intent(intent);
        let mut inner = self.inner.lock();
        // Re-declaration refreshes the intent as well as the policy: a
        // tracker restored from the journal holds a partial intent until
        // the strategy re-declares the real one (same deterministic id).
        inner
            .intents
            .entry(intent_id)
            .and_modify(|t| {
                t.intent = intent.clone();
                t.key = key.clone();
                t.policy = policy.clone();
            })
            .or_insert(IntentTracker {
                intent: intent.clone(),
                key,
                policy,
                stop_order_id: None,
                target_order_id: None,
                protective_stop_acknowledged: false,
                protective_target_acknowledged: false,
                protective_deadline: None,
            });
    }

    /// Pre-submission invariants for an entry order. Returns the blocking
    /// reason on failure.
    fn precheck_entry(
        &self,
        inner: &AdapterInner<B>,
        intent: &Intent,
        intent_id: &str,
        quantity: u32,
        direction: Option<Direction>,
        oco_group: Option<&str>,
    ) -> Result<(), String> {
        let policy = match inner.intents.get(intent_id) {
            Some(tracker) => &tracker.policy,
            None => return Err("no policy registered for intent".to_string()),
        };

        if quantity == 0 {
            return Err("quantity must be positive".to_string());
        }
        let filled_so_far = self.coordinator.entry_filled(intent_id);
        if filled_so_far > policy.expected_quantity {
            return Err(format!(
                "filled {} already exceeds expected {}",
                filled_so_far, policy.expected_quantity
            ));
        }
        if filled_so_far + quantity > policy.expected_quantity {
            return Err(format!(
                "requested {} + filled {} exceeds expected {}",
                quantity, filled_so_far, policy.expected_quantity
            ));
        }
        if quantity > policy.max_quantity {
            return Err(format!(
                "requested {} exceeds max {}",
                quantity, policy.max_quantity
            ));
        }
        if !self.instrument_allowed(&intent.execution_instrument) {
            return Err(format!(
                "instrument {} does not match bound {}",
                intent.execution_instrument, self.cfg.execution_instrument
            ));
        }

        // Duplicate-entry guard: one live (or filled) entry per intent.
        // The sibling leg of the same OCO group is the one exception.
        let duplicate = inner.orders.values().any(|o| {
            o.intent_id == intent_id
                && o.order_type.is_entry()
                && (o.state.is_active() || o.state == OrderState::Filled)
                && !(oco_group.is_some()
                    && o.oco_group.as_deref() == oco_group
                    && Some(o.direction) != direction)
        });
        if duplicate {
            return Err("Entry order already exists".to_string());
        }
        Ok(())
    }

    /// Bound-instrument check; mismatches log at most once per interval
    /// per instrument so a misconfigured strategy cannot flood the log.
    fn instrument_allowed(&self, requested: &str) -> bool {
        if instrument_matches(requested, &self.cfg.execution_instrument) {
            return true;
        }
        let now = Instant::now();
        let should_log = self
            .mismatch_log
            .get(requested)
            .map(|last| now.duration_since(*last) >= self.cfg.mismatch_log_interval)
            .unwrap_or(true);
        if should_log {
            self.mismatch_log.insert(requested.to_string(), now);
            warn!(
                requested,
                bound = %self.cfg.execution_instrument,
                "instrument mismatch, submission blocked"
            );
        }
        false
    }

    // ------------------------------------------------------------------
    // Entry submission
    // ------------------------------------------------------------------

    /// Immediate entry: market, or limit at the given price.
    pub fn submit_entry(
        &self,
        intent: &Intent,
        quantity: u32,
        kind: EntryKind,
    ) -> Result<String, ExecError> {
        let direction = intent.direction.ok_or_else(|| {
            ExecError::InvariantViolation("entry requires a direction".to_string())
        })?;
        let (limit_price, journal_type) = match kind {
            EntryKind::Market => (None, OrderType::Market),
            EntryKind::Limit(price) => (Some(price), OrderType::Entry),
        };

        let mut inner = self.inner.lock();
        self.submit_entry_locked(
            &mut inner,
            intent,
            direction,
            OrderType::Entry,
            journal_type,
            quantity,
            limit_price,
            None,
            None,
        )
    }

    /// Breakout stop entry, optionally part of an OCO group.
    pub fn submit_stop_entry(
        &self,
        intent: &Intent,
        direction: Direction,
        stop_price: Decimal,
        quantity: u32,
        oco_group: Option<&str>,
    ) -> Result<String, ExecError> {
        let mut inner = self.inner.lock();
        self.submit_entry_locked(
            &mut inner,
            intent,
            direction,
            OrderType::EntryStop,
            OrderType::EntryStop,
            quantity,
            None,
            Some(stop_price),
            oco_group,
        )
    }

    /// Symmetric breakout pair: long stop and short stop sharing one OCO
    /// group, journalled as a single submission. If the second leg cannot
    /// be placed the first is cancelled so no naked half-pair survives.
    pub fn submit_breakout_pair(
        &self,
        intent: &Intent,
        long_stop: Decimal,
        short_stop: Decimal,
        quantity: u32,
        oco_group: &str,
    ) -> Result<(String, String), ExecError> {
        let mut inner = self.inner.lock();
        let long_id = self.submit_entry_locked(
            &mut inner,
            intent,
            Direction::Long,
            OrderType::EntryStop,
            OrderType::EntryStop,
            quantity,
            None,
            Some(long_stop),
            Some(oco_group),
        )?;
        match self.submit_entry_locked(
            &mut inner,
            intent,
            Direction::Short,
            OrderType::EntryStop,
            OrderType::EntryStop,
            quantity,
            None,
            Some(short_stop),
            Some(oco_group),
        ) {
            Ok(short_id) => Ok((long_id, short_id)),
            Err(err) => {
                warn!(
                    intent_id = %intent.intent_id(),
                    %err,
                    "second OCO leg failed, cancelling the first"
                );
                if let Err(cancel_err) = inner.broker.cancel_order(&long_id) {
                    self.notifier.notify(
                        NotifyPriority::Emergency,
                        "OCO pair rollback failed",
                        &format!(
                            "leg {} could not be cancelled after sibling failure: {}",
                            long_id, cancel_err
                        ),
                    );
                }
                inner.orders.remove(&long_id);
                Err(err)
            }
        }
    }

    /// Shared entry path: precheck, journal guard, create + verify tag,
    /// journal the submission, then place the order.
    #[allow(clippy::too_many_arguments)]
    fn submit_entry_locked(
        &self,
        inner: &mut AdapterInner<B>,
        intent: &Intent,
        direction: Direction,
        order_type: OrderType,
        journal_type: OrderType,
        quantity: u32,
        limit_price: Option<Decimal>,
        stop_price: Option<Decimal>,
        oco_group: Option<&str>,
    ) -> Result<String, ExecError> {
        let intent_id = intent.intent_id();
        let instrument = intent.execution_instrument.clone();

        let precheck = self.precheck_entry(
            inner,
            intent,
            &intent_id,
            quantity,
            Some(direction),
            oco_group,
        );
        self.events.emit(
            EventType::EntrySubmitPrecheck,
            &intent_id,
            &instrument,
            json!({
                "direction": direction.as_str(),
                "quantity": quantity,
                "order_type": order_type.as_str(),
                "passed": precheck.is_ok(),
                "reason": precheck.as_ref().err(),
            }),
        );
        if let Err(reason) = precheck {
            self.events.emit(
                EventType::OrderSubmitFail,
                &intent_id,
                &instrument,
                json!({ "reason": reason, "stage": "precheck" }),
            );
            return Err(ExecError::InvariantViolation(reason));
        }

        // Journal idempotency guard. The OCO sibling (same group, already
        // tracked this run) shares the pair's single journal record.
        let key = JournalKey::for_intent(intent);
        let sibling_tracked = oco_group.is_some()
            && inner
                .orders
                .values()
                .any(|o| o.intent_id == intent_id && o.oco_group.as_deref() == oco_group);
        if !sibling_tracked && self.journal.is_intent_submitted(&key) {
            self.events.emit(
                EventType::OrderSubmitFail,
                &intent_id,
                &instrument,
                json!({ "reason": "intent already submitted per journal", "stage": "journal" }),
            );
            return Err(ExecError::InvariantViolation(
                "intent already submitted per journal".to_string(),
            ));
        }

        let tag = encode_order_tag(&intent_id, TagRole::Entry);
        let spec = BrokerOrderSpec {
            account: self.cfg.account.clone(),
            instrument: instrument.clone(),
            side: direction.entry_side(),
            order_type,
            quantity,
            limit_price,
            stop_price,
            tag,
            oco_group: oco_group.map(|g| g.to_string()),
        };

        self.events.emit(
            EventType::OrderSubmitAttempt,
            &intent_id,
            &instrument,
            json!({
                "order_type": order_type.as_str(),
                "side": spec.side.to_string(),
                "quantity": quantity,
                "limit_price": limit_price,
                "stop_price": stop_price,
                "oco_group": oco_group,
            }),
        );

        let order = match self.create_verified_order(inner, &intent_id, &spec) {
            Ok(order) => order,
            Err(err) => {
                self.events.emit(
                    EventType::OrderSubmitFail,
                    &intent_id,
                    &instrument,
                    json!({ "reason": err.to_string(), "stage": "create" }),
                );
                return Err(err);
            }
        };

        if order.acknowledged_quantity != quantity {
            let detail = format!(
                "broker acknowledged {} contracts, requested {}",
                order.acknowledged_quantity, quantity
            );
            let _ = inner.broker.cancel_order(&order.broker_order_id);
            self.run_emergency(inner, &intent_id, &detail);
            return Err(ExecError::InvariantViolation(detail));
        }

        // Track before the journal write so the fill callback can never
        // observe a journalled-but-unknown order.
        inner.orders.insert(
            order.broker_order_id.clone(),
            OrderInfo {
                broker_order_id: order.broker_order_id.clone(),
                intent_id: intent_id.clone(),
                order_type,
                direction,
                quantity,
                price: stop_price.or(limit_price),
                state: OrderState::Submitted,
                filled_quantity: 0,
                entry_fill_time: None,
                tag: spec.tag.clone(),
                oco_group: spec.oco_group.clone(),
            },
        );

        if !sibling_tracked {
            let submission = SubmissionRecord {
                broker_order_id: order.broker_order_id.clone(),
                entry_order_type: journal_type,
                direction: intent.direction,
                entry_price: intent.entry_price,
                stop_price: intent.stop_price,
                target_price: intent.target_price,
                oco_group: oco_group.map(|g| g.to_string()),
                expected_entry_price: intent.entry_price.or(stop_price),
            };
            if let Err(err) = self.journal.record_submission(&key, &submission) {
                // Fail closed: an unjournalled submission must not go live.
                let _ = inner.broker.cancel_order(&order.broker_order_id);
                inner.orders.remove(&order.broker_order_id);
                self.events.emit(
                    EventType::OrderSubmitFail,
                    &intent_id,
                    &instrument,
                    json!({ "reason": err.to_string(), "stage": "journal_write" }),
                );
                return Err(err);
            }
        }

        if let Err(err) = inner.broker.submit_order(&order.broker_order_id) {
            inner.orders.remove(&order.broker_order_id);
            let _ = self
                .journal
                .record_rejection(&key, &format!("submit failed: {}", err));
            self.events.emit(
                EventType::OrderSubmitFail,
                &intent_id,
                &instrument,
                json!({ "reason": err.to_string(), "stage": "submit" }),
            );
            return Err(err.into());
        }

        self.events.emit(
            EventType::OrderSubmitSuccess,
            &intent_id,
            &instrument,
            json!({
                "broker_order_id": order.broker_order_id,
                "order_type": order_type.as_str(),
                "quantity": quantity,
            }),
        );
        Ok(order.broker_order_id)
    }

    /// Create an order and verify the echoed tag; one retry, then the
    /// order is discarded — an untrackable order never goes live.
    fn create_verified_order(
        &self,
        inner: &mut AdapterInner<B>,
        intent_id: &str,
        spec: &BrokerOrderSpec,
    ) -> Result<BrokerOrder, ExecError> {
        let mut order = inner.broker.create_order(spec)?;

        if spec.order_type == OrderType::EntryStop || spec.order_type == OrderType::Stop {
            self.events.emit(
                EventType::OrderCreatedStopmarket,
                intent_id,
                &spec.instrument,
                json!({
                    "broker_order_id": order.broker_order_id,
                    "stop_price": spec.stop_price,
                    "quantity": spec.quantity,
                }),
            );
        }

        let mut verified = order.tag == spec.tag;
        let mut retried = false;
        if !verified {
            retried = true;
            if let Ok(echoed) = inner.broker.set_order_tag(&order.broker_order_id, &spec.tag) {
                verified = echoed == spec.tag;
                order.tag = echoed;
            }
        }
        self.events.emit(
            EventType::OrderCreatedVerification,
            intent_id,
            &spec.instrument,
            json!({
                "broker_order_id": order.broker_order_id,
                "expected_tag": spec.tag,
                "echoed_tag": order.tag,
                "verified": verified,
                "retried": retried,
            }),
        );
        if !verified {
            let _ = inner.broker.cancel_order(&order.broker_order_id);
            return Err(ExecError::InvariantViolation(format!(
                "tag verification failed for order {}",
                order.broker_order_id
            )));
        }
        Ok(order)
    }

    // ------------------------------------------------------------------
    // Protective orders
    // ------------------------------------------------------------------

    /// Place or reconcile the protective stop for an intent's open
    /// position. Public for the engine's recovery pass; the entry-fill
    /// path calls the same logic.
    pub fn submit_protective_stop(&self, intent_id: &str, quantity: u32) -> Result<String, ExecError> {
        let mut inner = self.inner.lock();
        self.reconcile_protective_leg(&mut inner, intent_id, OrderType::Stop, quantity)
    }

    /// Place or reconcile the profit target. See [`Self::submit_protective_stop`].
    pub fn submit_target(&self, intent_id: &str, quantity: u32) -> Result<String, ExecError> {
        let mut inner = self.inner.lock();
        self.reconcile_protective_leg(&mut inner, intent_id, OrderType::Target, quantity)
    }

    /// Bring both protective legs in line with the open position. Any
    /// ultimate failure takes the fail-closed path.
    fn ensure_protective_orders(&self, inner: &mut AdapterInner<B>, intent_id: &str) {
        let open_quantity = self.coordinator.open_quantity(intent_id);
        if open_quantity == 0 {
            return;
        }

        let stop = self.reconcile_protective_leg(inner, intent_id, OrderType::Stop, open_quantity);
        let target =
            self.reconcile_protective_leg(inner, intent_id, OrderType::Target, open_quantity);

        match (&stop, &target) {
            (Ok(stop_id), Ok(target_id)) => {
                let instrument = self.instrument_of(inner, intent_id);
                self.events.emit(
                    EventType::ProtectiveOrdersSubmitted,
                    intent_id,
                    &instrument,
                    json!({
                        "stop_order_id": stop_id,
                        "target_order_id": target_id,
                        "quantity": open_quantity,
                    }),
                );
            }
            _ => {
                self.protective_failure(
                    inner,
                    intent_id,
                    stop.err().map(|e| e.to_string()),
                    target.err().map(|e| e.to_string()),
                );
            }
        }
    }

    /// Reconcile one protective leg against the open position: place it
    /// if absent, modify on price drift, cancel-and-recreate on quantity
    /// drift (the broker cannot resize a working order). Placement retries
    /// with backoff, re-checking coordinator admission before each try.
    fn reconcile_protective_leg(
        &self,
        inner: &mut AdapterInner<B>,
        intent_id: &str,
        leg: OrderType,
        quantity: u32,
    ) -> Result<String, ExecError> {
        let (intent, existing_id) = match inner.intents.get(intent_id) {
            Some(tracker) => (
                tracker.intent.clone(),
                match leg {
                    OrderType::Stop => tracker.stop_order_id.clone(),
                    _ => tracker.target_order_id.clone(),
                },
            ),
            None => {
                return Err(ExecError::InvariantViolation(format!(
                    "no tracker for intent {}",
                    intent_id
                )))
            }
        };
        let direction = self
            .coordinator
            .record(intent_id)
            .and_then(|r| r.direction)
            .or(intent.direction)
            .ok_or_else(|| {
                ExecError::InvariantViolation("no direction known for protective order".to_string())
            })?;
        let price = match leg {
            OrderType::Stop => intent.stop_price,
            _ => intent.target_price,
        };

        if let Some(existing_id) = existing_id {
            if let Some(existing) = inner.orders.get(&existing_id) {
                if existing.state.is_active() {
                    if existing.quantity == quantity && existing.price == Some(price) {
                        return Ok(existing_id);
                    }
                    if existing.quantity == quantity {
                        // Price-only drift goes through a modify.
                        inner
                            .broker
                            .modify_order_price(&existing_id, price)
                            .map_err(ExecError::from)?;
                        if let Some(order) = inner.orders.get_mut(&existing_id) {
                            order.price = Some(price);
                        }
                        return Ok(existing_id);
                    }
                    // Quantity drift: cancel and recreate below.
                    let _ = inner.broker.cancel_order(&existing_id);
                    if let Some(order) = inner.orders.get_mut(&existing_id) {
                        order.state = OrderState::Cancelled;
                    }
                }
            }
        }

        let mut last_err =
            ExecError::Transient("protective order not attempted".to_string());
        for attempt in 0..self.cfg.protective_retry_attempts {
            if attempt > 0 {
                std::thread::sleep(self.cfg.protective_retry_backoff);
            }
            if !self.coordinator.can_submit_exit(intent_id, quantity) {
                return Err(ExecError::InvariantViolation(format!(
                    "coordinator refused {} exit for {} contracts",
                    leg, quantity
                )));
            }
            match self.place_exit_order(inner, intent_id, &intent, direction, leg, price, quantity) {
                Ok(order_id) => {
                    if let Some(tracker) = inner.intents.get_mut(intent_id) {
                        match leg {
                            OrderType::Stop => tracker.stop_order_id = Some(order_id.clone()),
                            _ => tracker.target_order_id = Some(order_id.clone()),
                        }
                    }
                    return Ok(order_id);
                }
                Err(err) => {
                    warn!(
                        intent_id,
                        leg = leg.as_str(),
                        attempt = attempt + 1,
                        %err,
                        "protective leg attempt failed"
                    );
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    /// Create + verify + submit one exit order (protective leg or flatten).
    /// The intent id is passed in, not recomputed: a tracker restored
    /// from the journal holds only a partial intent.
    #[allow(clippy::too_many_arguments)]
    fn place_exit_order(
        &self,
        inner: &mut AdapterInner<B>,
        intent_id: &str,
        intent: &Intent,
        direction: Direction,
        order_type: OrderType,
        price: Decimal,
        quantity: u32,
    ) -> Result<String, ExecError> {
        let intent_id = intent_id.to_string();
        let instrument = intent.execution_instrument.clone();
        let (role, limit_price, stop_price) = match order_type {
            OrderType::Stop => (TagRole::Stop, None, Some(price)),
            OrderType::Target => (TagRole::Target, Some(price), None),
            _ => (TagRole::Entry, None, None),
        };
        let spec = BrokerOrderSpec {
            account: self.cfg.account.clone(),
            instrument: instrument.clone(),
            side: direction.exit_side(),
            order_type,
            quantity,
            limit_price,
            stop_price,
            tag: encode_order_tag(&intent_id, role),
            oco_group: None,
        };

        self.events.emit(
            EventType::OrderSubmitAttempt,
            &intent_id,
            &instrument,
            json!({
                "order_type": order_type.as_str(),
                "side": spec.side.to_string(),
                "quantity": quantity,
                "price": price,
            }),
        );

        let order = self.create_verified_order(inner, &intent_id, &spec)?;
        inner.orders.insert(
            order.broker_order_id.clone(),
            OrderInfo {
                broker_order_id: order.broker_order_id.clone(),
                intent_id: intent_id.clone(),
                order_type,
                direction,
                quantity,
                price: (order_type != OrderType::Market).then_some(price),
                state: OrderState::Submitted,
                filled_quantity: 0,
                entry_fill_time: None,
                tag: spec.tag.clone(),
                oco_group: None,
            },
        );
        if let Err(err) = inner.broker.submit_order(&order.broker_order_id) {
            inner.orders.remove(&order.broker_order_id);
            self.events.emit(
                EventType::OrderSubmitFail,
                &intent_id,
                &instrument,
                json!({ "reason": err.to_string(), "order_type": order_type.as_str() }),
            );
            return Err(err.into());
        }
        self.events.emit(
            EventType::OrderSubmitSuccess,
            &intent_id,
            &instrument,
            json!({
                "broker_order_id": order.broker_order_id,
                "order_type": order_type.as_str(),
                "quantity": quantity,
            }),
        );
        Ok(order.broker_order_id)
    }

    /// Fail-closed path for a protective failure: mark the exposure,
    /// cancel the intent's working orders, flatten with retry, persist an
    /// incident, and notify at emergency priority.
    fn protective_failure(
        &self,
        inner: &mut AdapterInner<B>,
        intent_id: &str,
        stop_error: Option<String>,
        target_error: Option<String>,
    ) {
        error!(
            intent_id,
            ?stop_error,
            ?target_error,
            "protective order failure, flattening"
        );
        // Marks the exposure and stands the stream down.
        self.coordinator.on_protective_failure(intent_id);
        if let Some(tracker) = inner.intents.get_mut(intent_id) {
            tracker.protective_deadline = None;
        }

        self.cancel_intent_orders(inner, intent_id);
        let open_quantity = self.coordinator.open_quantity(intent_id);
        let flattened = self.flatten_intent_locked(inner, intent_id);

        let (instrument, stream, direction) = match inner.intents.get(intent_id) {
            Some(tracker) => (
                tracker.intent.execution_instrument.clone(),
                tracker.intent.stream.clone(),
                tracker.intent.direction,
            ),
            None => (
                self.cfg.execution_instrument.clone(),
                ALL_STREAMS.to_string(),
                None,
            ),
        };
        let direction = self
            .coordinator
            .record(intent_id)
            .and_then(|r| r.direction)
            .or(direction);

        let incident = ProtectiveFailureIncident {
            timestamp_utc: Utc::now(),
            intent_id: intent_id.to_string(),
            stream: stream.clone(),
            instrument: instrument.clone(),
            direction,
            open_quantity,
            stop_error: stop_error.clone(),
            target_error: target_error.clone(),
            flattened: flattened.is_ok(),
        };
        if let Err(err) = self.incidents.record_protective_failure(&incident) {
            error!(%err, "failed to persist protective-failure incident");
        }

        self.events.emit(
            EventType::ProtectiveOrdersFailedFlattened,
            intent_id,
            &instrument,
            json!({
                "stream": stream,
                "stop_error": stop_error,
                "target_error": target_error,
                "open_quantity": open_quantity,
                "flattened": flattened.is_ok(),
            }),
        );
        self.notifier.notify(
            NotifyPriority::Emergency,
            "protective orders failed, position flattened",
            &format!(
                "intent {} on {}: stop_error={:?} target_error={:?} flattened={}",
                intent_id,
                instrument,
                stop_error,
                target_error,
                flattened.is_ok()
            ),
        );
    }

    // ------------------------------------------------------------------
    // Break-even modification
    // ------------------------------------------------------------------

    /// Move the protective stop to (approximately) the entry price once
    /// the BE trigger has traded. Journal-guarded: duplicate calls drop.
    ///
    /// The tracker is preferred, but the journal is authoritative across
    /// restarts: an intent recovered from a prior run may have no
    /// in-memory tracker at all, and the stop is located by tag in the
    /// account snapshot either way.
    pub fn modify_stop_to_break_even(&self, intent_id: &str) -> Result<(), ExecError> {
        let mut inner = self.inner.lock();
        let (key, entry_price, instrument) = match inner.intents.get(intent_id) {
            Some(tracker) => (
                tracker.key.clone(),
                tracker.intent.entry_price,
                tracker.intent.execution_instrument.clone(),
            ),
            None => {
                let key = self
                    .journal
                    .key_for(intent_id, &self.cfg.execution_instrument)
                    .ok_or_else(|| {
                        ExecError::InvariantViolation(format!(
                            "no tracker or journal for intent {}",
                            intent_id
                        ))
                    })?;
                let entry_price = self.journal.entry(&key).and_then(|e| e.entry_price);
                (key, entry_price, self.cfg.execution_instrument.clone())
            }
        };
        if self.journal.is_be_modified(&key) {
            debug!(intent_id, "break-even already applied, dropping duplicate");
            return Ok(());
        }

        // Find the stop by tag among the account's working orders; our
        // own map may be stale across restarts.
        let stop_tag = encode_order_tag(intent_id, TagRole::Stop);
        let snapshot = inner.broker.account_snapshot().map_err(ExecError::from)?;
        let stop_order = snapshot
            .working_orders
            .iter()
            .find(|o| o.tag == stop_tag)
            .cloned()
            .ok_or_else(|| {
                ExecError::InvariantViolation(format!(
                    "no working protective stop for intent {}",
                    intent_id
                ))
            })?;

        let be_price = match entry_price {
            Some(price) => price,
            None => self
                .journal
                .entry(&key)
                .and_then(|e| e.actual_fill_price)
                .ok_or_else(|| {
                    ExecError::InvariantViolation(
                        "no entry price known for break-even".to_string(),
                    )
                })?,
        };

        inner
            .broker
            .modify_order_price(&stop_order.broker_order_id, be_price)
            .map_err(ExecError::from)?;
        if let Some(order) = inner.orders.get_mut(&stop_order.broker_order_id) {
            order.price = Some(be_price);
        }
        self.journal.record_be_modification(&key, be_price)?;
        self.events.emit(
            EventType::StopModifySuccess,
            intent_id,
            &instrument,
            json!({
                "broker_order_id": stop_order.broker_order_id,
                "be_stop_price": be_price,
            }),
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Flatten / cancel
    // ------------------------------------------------------------------

    /// Flatten the intent's open position with an offsetting market order,
    /// retried; falls back to the account-level instrument flatten.
    pub fn flatten_intent(&self, intent_id: &str) -> Result<(), ExecError> {
        let mut inner = self.inner.lock();
        self.flatten_intent_locked(&mut inner, intent_id)
    }

    fn flatten_intent_locked(
        &self,
        inner: &mut AdapterInner<B>,
        intent_id: &str,
    ) -> Result<(), ExecError> {
        let open_quantity = self.coordinator.open_quantity(intent_id);
        if open_quantity == 0 {
            return Ok(());
        }
        let tracked: Option<Intent> = inner.intents.get(intent_id).map(|t| t.intent.clone());
        let coordinator_direction = self
            .coordinator
            .record(intent_id)
            .and_then(|r| r.direction);
        let (intent, direction) = match tracked {
            Some(intent) => match coordinator_direction.or(intent.direction) {
                Some(direction) => (intent, direction),
                None => {
                    let instrument = intent.execution_instrument.clone();
                    return self.flatten_instrument(inner, &instrument);
                }
            },
            None => {
                let instrument = self.cfg.execution_instrument.clone();
                return self.flatten_instrument(inner, &instrument);
            }
        };

        let mut last_err = ExecError::Transient("flatten not attempted".to_string());
        for attempt in 0..self.cfg.flatten_retry_attempts {
            if attempt > 0 {
                std::thread::sleep(self.cfg.protective_retry_backoff);
            }
            match self.place_exit_order(
                inner,
                intent_id,
                &intent,
                direction,
                OrderType::Market,
                Decimal::ZERO,
                open_quantity,
            ) {
                Ok(_) => return Ok(()),
                Err(err) => last_err = err,
            }
        }
        warn!(
            intent_id,
            %last_err,
            "per-intent flatten failed, flattening whole instrument"
        );
        self.flatten_instrument(inner, &intent.execution_instrument.clone())
    }

    /// Account-level whole-instrument flatten, retried.
    fn flatten_instrument(
        &self,
        inner: &mut AdapterInner<B>,
        instrument: &str,
    ) -> Result<(), ExecError> {
        let mut last_err = ExecError::Transient("flatten not attempted".to_string());
        for attempt in 0..self.cfg.flatten_retry_attempts {
            if attempt > 0 {
                std::thread::sleep(self.cfg.protective_retry_backoff);
            }
            match inner.broker.flatten_position(instrument) {
                Ok(()) => return Ok(()),
                Err(err) => last_err = err.into(),
            }
        }
        error!(instrument, %last_err, "instrument flatten failed after retries");
        Err(last_err)
    }

    fn cancel_intent_orders(&self, inner: &mut AdapterInner<B>, intent_id: &str) {
        let active: Vec<String> = inner
            .orders
            .values()
            .filter(|o| o.intent_id == intent_id && o.state.is_active())
            .map(|o| o.broker_order_id.clone())
            .collect();
        for order_id in active {
            if let Err(err) = inner.broker.cancel_order(&order_id) {
                warn!(%order_id, %err, "cancel failed during intent cleanup");
            }
            if let Some(order) = inner.orders.get_mut(&order_id) {
                order.state = OrderState::Cancelled;
            }
        }
    }

    /// Cancel every robot-owned working order at the broker (shutdown).
    pub fn cancel_robot_owned_working_orders(&self) -> Result<usize, ExecError> {
        let mut inner = self.inner.lock();
        let snapshot = inner.broker.account_snapshot().map_err(ExecError::from)?;
        let mut cancelled = 0;
        for order in snapshot
            .working_orders
            .iter()
            .filter(|o| is_robot_tag(&o.tag))
        {
            match inner.broker.cancel_order(&order.broker_order_id) {
                Ok(()) => {
                    cancelled += 1;
                    if let Some(info) = inner.orders.get_mut(&order.broker_order_id) {
                        info.state = OrderState::Cancelled;
                    }
                }
                Err(err) => {
                    warn!(order_id = %order.broker_order_id, %err, "shutdown cancel failed")
                }
            }
        }
        info!(cancelled, "robot-owned working orders cancelled");
        Ok(cancelled)
    }

    // ------------------------------------------------------------------
    // Snapshot and reconciliation
    // ------------------------------------------------------------------

    pub fn get_account_snapshot(&self) -> Result<AccountSnapshot, ExecError> {
        let mut inner = self.inner.lock();
        inner.broker.account_snapshot().map_err(ExecError::from)
    }

    /// Recovery pass: snapshot the account, replay the journal into
    /// trackers and exposure, match robot-tagged working orders against
    /// known intents, cancel orphans, and adopt the survivors into the
    /// live order map so their fills resume as normal continuations.
    /// Non-robot orders are never touched.
    pub fn reconcile_account(
        &self,
        known_intent_ids: &HashSet<String>,
    ) -> Result<ReconcileReport, ExecError> {
        let mut inner = self.inner.lock();
        let snapshot = inner.broker.account_snapshot().map_err(ExecError::from)?;

        let restored_intents = self.restore_from_journal(&mut inner, &snapshot);

        let mut robot_working_orders = 0;
        let mut orphans_cancelled = Vec::new();
        for order in &snapshot.working_orders {
            let intent_id = match decode_intent_id(&order.tag) {
                Some(id) => id.to_string(),
                // Not a robot order; never touched.
                None => continue,
            };
            robot_working_orders += 1;
            let known = inner.intents.contains_key(&intent_id)
                || known_intent_ids.contains(&intent_id);
            if known {
                self.adopt_working_order(&mut inner, &intent_id, order, &snapshot);
            } else {
                match inner.broker.cancel_order(&order.broker_order_id) {
                    Ok(()) => orphans_cancelled.push(order.broker_order_id.clone()),
                    Err(err) => {
                        warn!(order_id = %order.broker_order_id, %err, "orphan cancel failed")
                    }
                }
            }
        }

        self.events.emit(
            EventType::SimAccountVerified,
            "",
            &self.cfg.execution_instrument,
            json!({
                "positions": snapshot.positions,
                "robot_working_orders": robot_working_orders,
                "orphans_cancelled": orphans_cancelled,
                "restored_intents": restored_intents,
            }),
        );

        Ok(ReconcileReport {
            snapshot,
            robot_working_orders,
            orphans_cancelled,
            restored_intents,
        })
    }

    /// Replay the journal: rebuild a tracker and an exposure record for
    /// every intent that is still live (open position or working orders).
    /// The reconstructed intent carries the recovery triple; the real
    /// intent replaces it if the strategy re-declares (same id).
    fn restore_from_journal(
        &self,
        inner: &mut AdapterInner<B>,
        snapshot: &AccountSnapshot,
    ) -> usize {
        let position = snapshot.position_for(&self.cfg.execution_instrument);
        let mut restored = 0;

        for (key, entry) in self.journal.replay(&self.cfg.execution_instrument) {
            if inner.intents.contains_key(&key.intent_id) {
                continue;
            }
            let has_working = snapshot
                .working_orders
                .iter()
                .any(|o| decode_intent_id(&o.tag) == Some(key.intent_id.as_str()));
            // Nothing live: no working orders, and either never filled or
            // already flat. The journal file alone still blocks duplicates.
            if !has_working && (entry.fill_quantity == 0 || position == 0) {
                continue;
            }
            let (Some(stop_price), Some(target_price)) = (entry.stop_price, entry.target_price)
            else {
                warn!(
                    intent_id = %key.intent_id,
                    "journal lacks recovery prices, intent not restored"
                );
                continue;
            };

            let direction = entry.direction.or(match position.signum() {
                1 => Some(Direction::Long),
                -1 => Some(Direction::Short),
                _ => None,
            });
            let working_entry_quantity = snapshot
                .working_orders
                .iter()
                .filter(|o| {
                    decode_intent_id(&o.tag) == Some(key.intent_id.as_str())
                        && o.order_type.is_entry()
                })
                .map(|o| o.quantity)
                .max()
                .unwrap_or(0);
            let expected_quantity = entry.fill_quantity.max(working_entry_quantity);
            if expected_quantity == 0 {
                continue;
            }

            // Partial reconstruction: session, slot and BE trigger are not
            // journalled. The BE trigger defaults to the target so a
            // recovered stop never jumps to break-even on its own.
            let intent = Intent {
                trading_date: key.trading_date.clone(),
                stream: key.stream.clone(),
                canonical_instrument: self.cfg.execution_instrument.clone(),
                execution_instrument: self.cfg.execution_instrument.clone(),
                session: String::new(),
                slot_time: String::new(),
                direction,
                entry_price: entry.entry_price,
                stop_price,
                target_price,
                be_trigger: target_price,
                entry_time: entry.filled_at,
                trigger_reason: "journal_recovery".to_string(),
            };
            let policy = IntentPolicy {
                intent_id: key.intent_id.clone(),
                expected_quantity,
                max_quantity: expected_quantity,
                source: "journal_recovery".to_string(),
                canonical_instrument: self.cfg.execution_instrument.clone(),
                execution_instrument: self.cfg.execution_instrument.clone(),
            };
            self.coordinator.restore_exposure(ExposureRecord {
                intent_id: key.intent_id.clone(),
                stream: key.stream.clone(),
                instrument: self.cfg.execution_instrument.clone(),
                direction,
                expected_quantity,
                entry_filled: entry.fill_quantity,
                exit_filled: 0,
                first_fill_time: entry.filled_at,
                protective_failure: false,
            });
            info!(
                intent_id = %key.intent_id,
                stream = %key.stream,
                entry_filled = entry.fill_quantity,
                expected_quantity,
                "intent restored from journal"
            );
            inner.intents.insert(
                key.intent_id.clone(),
                IntentTracker {
                    intent,
                    key,
                    policy,
                    stop_order_id: None,
                    target_order_id: None,
                    protective_stop_acknowledged: false,
                    protective_target_acknowledged: false,
                    protective_deadline: None,
                },
            );
            restored += 1;
        }
        restored
    }

    /// Bring a surviving robot working order back into the live order
    /// map so subsequent fills on it are continuations, not orphans.
    fn adopt_working_order(
        &self,
        inner: &mut AdapterInner<B>,
        intent_id: &str,
        order: &WorkingOrder,
        snapshot: &AccountSnapshot,
    ) {
        if inner.orders.contains_key(&order.broker_order_id) {
            return;
        }
        let tracker_direction = match inner.intents.get(intent_id) {
            Some(tracker) => tracker.intent.direction,
            None => {
                debug!(
                    broker_order_id = %order.broker_order_id,
                    "surviving order has no tracker, left untracked"
                );
                return;
            }
        };
        let direction = tracker_direction
            .or_else(|| self.coordinator.record(intent_id).and_then(|r| r.direction))
            .or_else(|| infer_pair_leg_direction(order, snapshot));
        let direction = match direction {
            Some(direction) => direction,
            None => {
                warn!(
                    broker_order_id = %order.broker_order_id,
                    "cannot infer direction for surviving order, left untracked"
                );
                return;
            }
        };
        let filled_quantity = if order.order_type.is_entry() {
            self.coordinator.entry_filled(intent_id).min(order.quantity)
        } else {
            0
        };

        inner.orders.insert(
            order.broker_order_id.clone(),
            OrderInfo {
                broker_order_id: order.broker_order_id.clone(),
                intent_id: intent_id.to_string(),
                order_type: order.order_type,
                direction,
                quantity: order.quantity,
                price: order.stop_price.or(order.limit_price),
                state: OrderState::Working,
                filled_quantity,
                entry_fill_time: None,
                tag: order.tag.clone(),
                oco_group: order.oco_group.clone(),
            },
        );
        if let Some(tracker) = inner.intents.get_mut(intent_id) {
            match order.order_type {
                OrderType::Stop => {
                    tracker.stop_order_id = Some(order.broker_order_id.clone());
                    tracker.protective_stop_acknowledged = true;
                }
                OrderType::Target => {
                    tracker.target_order_id = Some(order.broker_order_id.clone());
                    tracker.protective_target_acknowledged = true;
                }
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Broker event intake
    // ------------------------------------------------------------------

    /// Order-state transition from a broker thread.
    pub fn on_order_state_update(&self, update: &OrderStateUpdate) {
        let mut inner = self.inner.lock();
        let (intent_id, order_type, quantity, old_state) =
            match inner.orders.get(&update.broker_order_id) {
                Some(order) => (
                    order.intent_id.clone(),
                    order.order_type,
                    order.quantity,
                    order.state,
                ),
                None => {
                    debug!(
                        broker_order_id = %update.broker_order_id,
                        "state update for untracked order ignored"
                    );
                    return;
                }
            };

        if let Some(acknowledged) = update.acknowledged_quantity {
            if acknowledged != quantity {
                let detail = format!(
                    "broker acknowledged {} contracts for order {}, tracked {}",
                    acknowledged, update.broker_order_id, quantity
                );
                self.run_emergency(&mut inner, &intent_id, &detail);
                return;
            }
        }

        if !old_state.can_transition_to(update.state) {
            warn!(
                broker_order_id = %update.broker_order_id,
                from = old_state.as_str(),
                to = update.state.as_str(),
                "invalid order state transition ignored"
            );
            return;
        }
        if let Some(order) = inner.orders.get_mut(&update.broker_order_id) {
            order.state = update.state;
        }

        match update.state {
            OrderState::Accepted | OrderState::Working if order_type.is_protective() => {
                if let Some(tracker) = inner.intents.get_mut(&intent_id) {
                    match order_type {
                        OrderType::Stop => tracker.protective_stop_acknowledged = true,
                        _ => tracker.protective_target_acknowledged = true,
                    }
                    if tracker.protective_stop_acknowledged
                        && tracker.protective_target_acknowledged
                    {
                        tracker.protective_deadline = None;
                    }
                }
            }
            OrderState::Rejected => {
                let instrument = self.instrument_of(&inner, &intent_id);
                self.events.emit(
                    EventType::OrderRejected,
                    &intent_id,
                    &instrument,
                    json!({
                        "broker_order_id": update.broker_order_id,
                        "order_type": order_type.as_str(),
                        "reason": update.reason,
                    }),
                );
                if order_type.is_entry() {
                    if let Some(tracker) = inner.intents.get(&intent_id) {
                        let key = tracker.key.clone();
                        let reason = update
                            .reason
                            .clone()
                            .unwrap_or_else(|| "rejected by broker".to_string());
                        let _ = self.journal.record_rejection(&key, &reason);
                    }
                } else if order_type.is_protective() {
                    // A broker rejection of a live protective order is the
                    // same emergency as a failed submission.
                    let (stop_error, target_error) = match order_type {
                        OrderType::Stop => (update.reason.clone(), None),
                        _ => (None, update.reason.clone()),
                    };
                    self.clear_protective_leg(&mut inner, &intent_id, order_type);
                    self.protective_failure(&mut inner, &intent_id, stop_error, target_error);
                }
            }
            _ => {}
        }
    }

    fn clear_protective_leg(
        &self,
        inner: &mut AdapterInner<B>,
        intent_id: &str,
        leg: OrderType,
    ) {
        if let Some(tracker) = inner.intents.get_mut(intent_id) {
            match leg {
                OrderType::Stop => {
                    tracker.stop_order_id = None;
                    tracker.protective_stop_acknowledged = false;
                }
                _ => {
                    tracker.target_order_id = None;
                    tracker.protective_target_acknowledged = false;
                }
            }
        }
    }

    /// Execution (fill) from a broker thread. Credits the delta to the
    /// coordinator, journals, and drives protective placement.
    pub fn on_execution_update(&self, exec: &ExecutionUpdate) {
        let intent_id = match decode_intent_id(&exec.tag) {
            Some(id) if !exec.tag.is_empty() => id.to_string(),
            _ => {
                self.handle_orphan_fill(exec, None, "missing or invalid tag");
                return;
            }
        };

        // The fill can race the submission path's map insertion; retry the
        // lookup briefly before declaring the fill orphaned.
        let mut attempt = 0;
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.orders.contains_key(&exec.broker_order_id) {
                    self.apply_execution(&mut inner, &intent_id, exec);
                    return;
                }
            }
            if attempt >= self.cfg.fill_lookup_retries {
                break;
            }
            attempt += 1;
            std::thread::sleep(self.cfg.fill_lookup_backoff);
        }

        self.handle_orphan_fill(exec, Some(&intent_id), "fill for untracked order");
    }

    fn apply_execution(
        &self,
        inner: &mut AdapterInner<B>,
        intent_id: &str,
        exec: &ExecutionUpdate,
    ) {
        let (order_type, direction, order_quantity, prior_filled) =
            match inner.orders.get(&exec.broker_order_id) {
                Some(order) => (
                    order.order_type,
                    order.direction,
                    order.quantity,
                    order.filled_quantity,
                ),
                None => return,
            };

        let cumulative = prior_filled.saturating_add(exec.quantity);
        if cumulative > order_quantity {
            let detail = format!(
                "fills {} exceed order quantity {} on order {}",
                cumulative, order_quantity, exec.broker_order_id
            );
            self.run_emergency(inner, intent_id, &detail);
            return;
        }

        let full = cumulative == order_quantity;
        if let Some(order) = inner.orders.get_mut(&exec.broker_order_id) {
            order.filled_quantity = cumulative;
            order.state = if full {
                OrderState::Filled
            } else {
                OrderState::Working
            };
            if order.order_type.is_entry() && order.entry_fill_time.is_none() {
                order.entry_fill_time = Some(exec.time);
            }
        }

        if order_type.is_entry() {
            self.apply_entry_fill(inner, intent_id, exec, direction, full, cumulative);
        } else {
            self.apply_exit_fill(inner, intent_id, exec, order_type);
        }
    }

    fn apply_entry_fill(
        &self,
        inner: &mut AdapterInner<B>,
        intent_id: &str,
        exec: &ExecutionUpdate,
        direction: Direction,
        order_full: bool,
        order_cumulative: u32,
    ) {
        let intent_total = match self
            .coordinator
            .on_entry_fill(intent_id, direction, exec.quantity)
        {
            Ok(total) => total,
            Err(err) => {
                self.run_emergency(inner, intent_id, &err.to_string());
                return;
            }
        };

        if let Some(tracker) = inner.intents.get_mut(intent_id) {
            if tracker.protective_deadline.is_none()
                && !(tracker.protective_stop_acknowledged
                    && tracker.protective_target_acknowledged)
            {
                tracker.protective_deadline = Some(Instant::now() + self.cfg.watchdog_timeout);
            }
            let key = tracker.key.clone();
            let record = FillRecord {
                fill_price: exec.price,
                cumulative_quantity: intent_total,
                commission: exec.commission,
                fees: exec.fees,
            };
            // The journal write precedes any protective submission this
            // fill drives.
            if let Err(err) = self.journal.record_fill(&key, &record) {
                error!(intent_id, %err, "journal write failed on fill");
            }
        }

        let event_type = if order_full {
            EventType::ExecutionFilled
        } else {
            EventType::ExecutionPartialFill
        };
        self.events.emit(
            event_type,
            intent_id,
            &exec.instrument,
            json!({
                "broker_order_id": exec.broker_order_id,
                "quantity": exec.quantity,
                "price": exec.price,
                "order_cumulative": order_cumulative,
            }),
        );
        self.events.emit(
            EventType::IntentFillUpdate,
            intent_id,
            &exec.instrument,
            json!({
                "entry_filled": intent_total,
                "open_quantity": self.coordinator.open_quantity(intent_id),
            }),
        );

        self.ensure_protective_orders(inner, intent_id);
    }

    fn apply_exit_fill(
        &self,
        inner: &mut AdapterInner<B>,
        intent_id: &str,
        exec: &ExecutionUpdate,
        order_type: OrderType,
    ) {
        use crate::engine::coordinator::ExitOutcome;
        match self.coordinator.on_exit_fill(intent_id, exec.quantity) {
            Ok(outcome) => {
                self.events.emit(
                    EventType::ExecutionExitFill,
                    intent_id,
                    &exec.instrument,
                    json!({
                        "broker_order_id": exec.broker_order_id,
                        "order_type": order_type.as_str(),
                        "quantity": exec.quantity,
                        "price": exec.price,
                        "released": outcome == ExitOutcome::Released,
                    }),
                );
                if outcome == ExitOutcome::Released {
                    // The surviving protective sibling is now orphaned.
                    self.cancel_intent_orders(inner, intent_id);
                    if let Some(tracker) = inner.intents.get_mut(intent_id) {
                        tracker.protective_deadline = None;
                    }
                }
            }
            Err(err) => {
                self.run_emergency(inner, intent_id, &err.to_string());
            }
        }
    }

    /// Fail-closed handling for fills that cannot be attributed: flatten
    /// the instrument, persist an orphan record, notify at highest
    /// priority regardless of the flatten outcome.
    fn handle_orphan_fill(
        &self,
        exec: &ExecutionUpdate,
        intent_id: Option<&str>,
        reason: &str,
    ) {
        error!(
            broker_order_id = %exec.broker_order_id,
            tag = %exec.tag,
            reason,
            "orphan fill, failing closed"
        );

        let flatten_result = {
            let mut inner = self.inner.lock();
            self.flatten_instrument(&mut inner, &exec.instrument)
        };
        let action = match &flatten_result {
            Ok(()) => "flattened instrument".to_string(),
            Err(err) => format!("flatten failed: {}", err),
        };

        let record = OrphanFillRecord {
            timestamp_utc: exec.time,
            broker_order_id: exec.broker_order_id.clone(),
            instrument: exec.instrument.clone(),
            tag: exec.tag.clone(),
            quantity: exec.quantity,
            price: exec.price,
            reason: reason.to_string(),
            action_taken: action.clone(),
        };
        if let Err(err) = self.incidents.record_orphan_fill(&record) {
            error!(%err, "failed to persist orphan-fill record");
        }

        self.events.emit(
            EventType::OrphanFillCritical,
            intent_id.unwrap_or(""),
            &exec.instrument,
            json!({
                "broker_order_id": exec.broker_order_id,
                "tag": exec.tag,
                "quantity": exec.quantity,
                "reason": reason,
                "action_taken": action,
            }),
        );

        // A tagged orphan implicates a stream we cannot identify; stand
        // everything down rather than guessing.
        if intent_id.is_some() {
            if let Some(stand_down) = self.stand_down.read().as_ref() {
                stand_down(ALL_STREAMS, reason);
            }
        }
        self.notifier.notify(
            NotifyPriority::Highest,
            "orphan fill",
            &format!(
                "order {} on {}: {} ({})",
                exec.broker_order_id, exec.instrument, reason, action
            ),
        );
    }

    /// Quantity-mismatch emergency, once per intent: cancel the intent's
    /// orders, flatten, stand down, notify at emergency priority.
    fn run_emergency(&self, inner: &mut AdapterInner<B>, intent_id: &str, detail: &str) {
        if !inner.emergencies.insert(intent_id.to_string()) {
            debug!(intent_id, "emergency handler already ran for intent");
            return;
        }
        error!(intent_id, detail, "quantity mismatch emergency");

        self.cancel_intent_orders(inner, intent_id);
        let flattened = self.flatten_intent_locked(inner, intent_id);

        let (instrument, stream) = match inner.intents.get(intent_id) {
            Some(tracker) => (
                tracker.intent.execution_instrument.clone(),
                tracker.intent.stream.clone(),
            ),
            None => (
                self.cfg.execution_instrument.clone(),
                ALL_STREAMS.to_string(),
            ),
        };
        if let Some(stand_down) = self.stand_down.read().as_ref() {
            stand_down(&stream, detail);
        }
        self.events.emit(
            EventType::QuantityMismatchEmergency,
            intent_id,
            &instrument,
            json!({
                "detail": detail,
                "stream": stream,
                "flattened": flattened.is_ok(),
            }),
        );
        self.notifier.notify(
            NotifyPriority::Emergency,
            "quantity mismatch emergency",
            &format!("intent {}: {}", intent_id, detail),
        );
    }

    // ------------------------------------------------------------------
    // Watchdog
    // ------------------------------------------------------------------

    fn spawn_watchdog(adapter: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(adapter);
        let scan = (adapter.cfg.watchdog_timeout / 4).min(Duration::from_millis(250));
        let scan = scan.max(Duration::from_millis(10));
        std::thread::Builder::new()
            .name("qtsw-watchdog".to_string())
            .spawn(move || loop {
                std::thread::sleep(scan);
                match weak.upgrade() {
                    Some(adapter) => adapter.check_watchdogs(),
                    None => break,
                }
            })
            .expect("failed to spawn watchdog thread");
    }

    /// Trip the unprotected-position watchdog for every intent whose
    /// protective legs are not acknowledged within the timeout.
    fn check_watchdogs(&self) {
        let expired: Vec<String> = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            let mut expired = Vec::new();
            for (intent_id, tracker) in inner.intents.iter_mut() {
                if let Some(deadline) = tracker.protective_deadline {
                    if now >= deadline {
                        tracker.protective_deadline = None;
                        if !(tracker.protective_stop_acknowledged
                            && tracker.protective_target_acknowledged)
                        {
                            expired.push(intent_id.clone());
                        }
                    }
                }
            }
            expired
        };

        for intent_id in expired {
            warn!(%intent_id, "unprotected-position watchdog tripped");
            let mut inner = self.inner.lock();
            self.protective_failure(
                &mut inner,
                &intent_id,
                Some("unprotected position watchdog expired".to_string()),
                Some("unprotected position watchdog expired".to_string()),
            );
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn order(&self, broker_order_id: &str) -> Option<OrderInfo> {
        self.inner.lock().orders.get(broker_order_id).cloned()
    }

    /// `(stop, target)` protective orders for an intent, if tracked.
    pub fn protective_orders(&self, intent_id: &str) -> (Option<OrderInfo>, Option<OrderInfo>) {
        let inner = self.inner.lock();
        let tracker = match inner.intents.get(intent_id) {
            Some(tracker) => tracker,
            None => return (None, None),
        };
        let stop = tracker
            .stop_order_id
            .as_ref()
            .and_then(|id| inner.orders.get(id))
            .cloned();
        let target = tracker
            .target_order_id
            .as_ref()
            .and_then(|id| inner.orders.get(id))
            .cloned();
        (stop, target)
    }

    pub fn policy(&self, intent_id: &str) -> Option<IntentPolicy> {
        self.inner
            .lock()
            .intents
            .get(intent_id)
            .map(|t| t.policy.clone())
    }

    pub fn intent(&self, intent_id: &str) -> Option<Intent> {
        self.inner
            .lock()
            .intents
            .get(intent_id)
            .map(|t| t.intent.clone())
    }

    fn instrument_of(&self, inner: &AdapterInner<B>, intent_id: &str) -> String {
        inner
            .intents
            .get(intent_id)
            .map(|t| t.intent.execution_instrument.clone())
            .unwrap_or_else(|| self.cfg.execution_instrument.clone())
    }
}

/// Infer which side of a breakout pair a recovered stop-entry leg is:
/// the leg with the higher stop price breaks upward. Only meaningful for
/// entry orders in an OCO group whose sibling is also still working.
fn infer_pair_leg_direction(order: &WorkingOrder, snapshot: &AccountSnapshot) -> Option<Direction> {
    if !order.order_type.is_entry() {
        return None;
    }
    let stop = order.stop_price?;
    let group = order.oco_group.as_deref()?;
    let sibling_stop = snapshot
        .working_orders
        .iter()
        .find(|o| {
            o.broker_order_id != order.broker_order_id && o.oco_group.as_deref() == Some(group)
        })
        .and_then(|o| o.stop_price)?;
    if stop > sibling_stop {
        Some(Direction::Long)
    } else {
        Some(Direction::Short)
    }
}

/// Root-only comparison when the requested name carries no contract
/// month (no digits, no space); exact otherwise. Contract names are
/// expected as `ROOT MM-YY`.
fn instrument_matches(requested: &str, bound: &str) -> bool {
    let has_month = requested.chars().any(|c| c.is_ascii_digit() || c == ' ');
    if has_month {
        requested == bound
    } else {
        let bound_root: String = bound
            .chars()
            .take_while(|c| !c.is_ascii_digit() && *c != ' ')
            .collect();
        requested == bound_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_matches_root_only() {
        assert!(instrument_matches("MES", "MES"));
        assert!(instrument_matches("MES", "MES 12-25"));
        assert!(instrument_matches("MES 12-25", "MES 12-25"));
        assert!(!instrument_matches("MES 03-26", "MES 12-25"));
        assert!(!instrument_matches("MNQ", "MES 12-25"));
        assert!(!instrument_matches("ES", "MES 12-25"));
    }
}

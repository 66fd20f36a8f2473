//! Broker capability seam and the simulation account.
//!
//! The adapter talks to [`BrokerApi`] only; no broker-specific types leak
//! into the engine-facing surface. Order construction and submission are
//! separate calls so the adapter can verify the echoed tag before the
//! order goes live.
//!
//! [`SimBroker`] backs the simulation account: a working-order book with
//! OCO sibling cancellation, per-instrument signed positions, and
//! injection hooks for the failure paths the safety tests exercise.

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

use super::types::{
    AccountPosition, AccountSnapshot, BrokerEvent, BrokerOrder, BrokerOrderSpec, ExecutionUpdate,
    OrderStateUpdate, WorkingOrder,
};
use crate::core::{BrokerError, OrderState, OrderType, Side};

/// Capability surface the adapter consumes.
pub trait BrokerApi: Send {
    /// Construct an order at the broker. The order is not live until
    /// [`BrokerApi::submit_order`]; the echoed tag must be verified first.
    fn create_order(&mut self, spec: &BrokerOrderSpec) -> Result<BrokerOrder, BrokerError>;

    /// Re-apply the tag to a constructed order; returns the tag as the
    /// broker stored it.
    fn set_order_tag(&mut self, broker_order_id: &str, tag: &str) -> Result<String, BrokerError>;

    /// Place a constructed order into the market.
    fn submit_order(&mut self, broker_order_id: &str) -> Result<(), BrokerError>;

    /// Price-only modification of a working order. Quantity changes are
    /// not supported by the underlying broker; cancel-and-recreate.
    fn modify_order_price(
        &mut self,
        broker_order_id: &str,
        price: Decimal,
    ) -> Result<(), BrokerError>;

    fn cancel_order(&mut self, broker_order_id: &str) -> Result<(), BrokerError>;

    /// Account-level flatten of one instrument's whole position.
    fn flatten_position(&mut self, instrument: &str) -> Result<(), BrokerError>;

    fn account_snapshot(&mut self) -> Result<AccountSnapshot, BrokerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimOrderStatus {
    Created,
    Working,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone)]
struct SimOrder {
    id: String,
    spec: BrokerOrderSpec,
    status: SimOrderStatus,
    filled: u32,
}

#[derive(Debug, Clone, Default)]
struct SimPosition {
    quantity: i64,
    average_price: Decimal,
}

#[derive(Default)]
struct SimInner {
    next_id: u64,
    orders: HashMap<String, SimOrder>,
    positions: HashMap<String, SimPosition>,
    events: VecDeque<BrokerEvent>,
    last_price: HashMap<String, Decimal>,
    commission_per_contract: Decimal,
    fees_per_contract: Decimal,
    // Failure injection for tests.
    fail_next_creates: u32,
    fail_next_submits: u32,
    fail_submits_matching: Option<(String, u32)>,
    corrupt_next_tags: u32,
}

/// Cloneable handle to one simulated account.
#[derive(Clone, Default)]
pub struct SimBroker {
    inner: Arc<Mutex<SimInner>>,
}

impl SimBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_costs(commission_per_contract: Decimal, fees_per_contract: Decimal) -> Self {
        let broker = Self::new();
        {
            let mut inner = broker.inner.lock();
            inner.commission_per_contract = commission_per_contract;
            inner.fees_per_contract = fees_per_contract;
        }
        broker
    }

    /// Pop everything the broker would have pushed on its own threads.
    pub fn drain_events(&self) -> Vec<BrokerEvent> {
        self.inner.lock().events.drain(..).collect()
    }

    /// Fill a working order by `quantity` contracts at `price`.
    pub fn fill_order(&self, broker_order_id: &str, quantity: u32, price: Decimal) {
        let mut inner = self.inner.lock();
        inner.apply_fill(broker_order_id, quantity, price);
    }

    /// Reject a constructed or working order.
    pub fn reject_order(&self, broker_order_id: &str, reason: &str) {
        let mut inner = self.inner.lock();
        if let Some(order) = inner.orders.get_mut(broker_order_id) {
            order.status = SimOrderStatus::Rejected;
            let update = OrderStateUpdate {
                broker_order_id: broker_order_id.to_string(),
                state: OrderState::Rejected,
                reason: Some(reason.to_string()),
                acknowledged_quantity: None,
            };
            inner.events.push_back(BrokerEvent::State(update));
        }
    }

    /// Advance the simulated market: trigger stops, fill resting limit
    /// orders and pending market orders against `price`.
    pub fn process_tick(&self, instrument: &str, price: Decimal) {
        let mut inner = self.inner.lock();
        inner.last_price.insert(instrument.to_string(), price);

        let due: Vec<(String, Decimal)> = inner
            .orders
            .values()
            .filter(|o| o.status == SimOrderStatus::Working && o.spec.instrument == instrument)
            .filter_map(|o| fill_price_at(&o.spec, price).map(|p| (o.id.clone(), p)))
            .collect();

        for (id, fill_price) in due {
            let remaining = inner
                .orders
                .get(&id)
                .map(|o| o.spec.quantity.saturating_sub(o.filled))
                .unwrap_or(0);
            if remaining > 0 {
                inner.apply_fill(&id, remaining, fill_price);
            }
        }
    }

    pub fn position(&self, instrument: &str) -> i64 {
        self.inner
            .lock()
            .positions
            .get(instrument)
            .map(|p| p.quantity)
            .unwrap_or(0)
    }

    pub fn order_status_is_working(&self, broker_order_id: &str) -> bool {
        self.inner
            .lock()
            .orders
            .get(broker_order_id)
            .map(|o| o.status == SimOrderStatus::Working)
            .unwrap_or(false)
    }

    /// Seed a pre-existing working order (recovery tests).
    pub fn seed_working_order(&self, order: WorkingOrder, side: Side) {
        let mut inner = self.inner.lock();
        let spec = BrokerOrderSpec {
            account: "Sim101".to_string(),
            instrument: order.instrument.clone(),
            side,
            order_type: order.order_type,
            quantity: order.quantity,
            limit_price: order.limit_price,
            stop_price: order.stop_price,
            tag: order.tag.clone(),
            oco_group: order.oco_group.clone(),
        };
        inner.orders.insert(
            order.broker_order_id.clone(),
            SimOrder {
                id: order.broker_order_id,
                spec,
                status: SimOrderStatus::Working,
                filled: 0,
            },
        );
    }

    /// Seed a pre-existing position (recovery tests).
    pub fn seed_position(&self, instrument: &str, quantity: i64, average_price: Decimal) {
        self.inner.lock().positions.insert(
            instrument.to_string(),
            SimPosition {
                quantity,
                average_price,
            },
        );
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.inner.lock().fail_next_creates = count;
    }

    pub fn fail_next_submits(&self, count: u32) {
        self.inner.lock().fail_next_submits = count;
    }

    /// Fail submissions of orders whose tag contains `fragment`.
    pub fn fail_submits_matching(&self, fragment: &str, count: u32) {
        self.inner.lock().fail_submits_matching = Some((fragment.to_string(), count));
    }

    /// Echo a corrupted tag from the next `count` create/set-tag calls.
    pub fn corrupt_next_tags(&self, count: u32) {
        self.inner.lock().corrupt_next_tags = count;
    }
}

impl SimInner {
    fn alloc_id(&mut self) -> String {
        self.next_id += 1;
        format!("B{}", self.next_id)
    }

    fn echo_tag(&mut self, tag: &str) -> String {
        if self.corrupt_next_tags > 0 {
            self.corrupt_next_tags -= 1;
            format!("{}~corrupt", tag)
        } else {
            tag.to_string()
        }
    }

    fn apply_fill(&mut self, broker_order_id: &str, quantity: u32, price: Decimal) {
        let (spec, oco_group, done, quantity) = match self.orders.get_mut(broker_order_id) {
            Some(order) if order.status == SimOrderStatus::Working => {
                let remaining = order.spec.quantity.saturating_sub(order.filled);
                let quantity = quantity.min(remaining);
                if quantity == 0 {
                    return;
                }
                order.filled += quantity;
                let done = order.filled >= order.spec.quantity;
                if done {
                    order.status = SimOrderStatus::Filled;
                }
                (order.spec.clone(), order.spec.oco_group.clone(), done, quantity)
            }
            _ => return,
        };

        let signed = match spec.side {
            Side::Buy => quantity as i64,
            Side::Sell => -(quantity as i64),
        };
        let position = self.positions.entry(spec.instrument.clone()).or_default();
        let prior = position.quantity;
        position.quantity += signed;
        if prior == 0 || prior.signum() == signed.signum() {
            position.average_price = price;
        }

        let commission = self.commission_per_contract * Decimal::from(quantity);
        let fees = self.fees_per_contract * Decimal::from(quantity);
        self.events
            .push_back(BrokerEvent::Execution(ExecutionUpdate {
                broker_order_id: broker_order_id.to_string(),
                instrument: spec.instrument.clone(),
                tag: spec.tag.clone(),
                quantity,
                price,
                time: Utc::now(),
                commission,
                fees,
            }));
        if done {
            self.events.push_back(BrokerEvent::State(OrderStateUpdate {
                broker_order_id: broker_order_id.to_string(),
                state: OrderState::Filled,
                reason: None,
                acknowledged_quantity: None,
            }));
        }

        // One-cancels-other: a fill kills the siblings in the group.
        if let Some(group) = oco_group {
            let siblings: Vec<String> = self
                .orders
                .values()
                .filter(|o| {
                    o.id != broker_order_id
                        && o.status == SimOrderStatus::Working
                        && o.spec.oco_group.as_deref() == Some(group.as_str())
                })
                .map(|o| o.id.clone())
                .collect();
            for sibling in siblings {
                if let Some(order) = self.orders.get_mut(&sibling) {
                    order.status = SimOrderStatus::Cancelled;
                }
                self.events.push_back(BrokerEvent::State(OrderStateUpdate {
                    broker_order_id: sibling,
                    state: OrderState::Cancelled,
                    reason: Some("OCO sibling filled".to_string()),
                    acknowledged_quantity: None,
                }));
            }
        }
    }
}

/// Price a working order would fill at for a given tick, if triggered.
fn fill_price_at(spec: &BrokerOrderSpec, tick: Decimal) -> Option<Decimal> {
    match spec.order_type {
        OrderType::Market => Some(tick),
        OrderType::EntryStop | OrderType::Stop => {
            let stop = spec.stop_price?;
            let triggered = match spec.side {
                Side::Buy => tick >= stop,
                Side::Sell => tick <= stop,
            };
            triggered.then_some(stop)
        }
        OrderType::Entry | OrderType::Target => {
            let limit = spec.limit_price?;
            let crossed = match spec.side {
                Side::Buy => tick <= limit,
                Side::Sell => tick >= limit,
            };
            crossed.then_some(limit)
        }
    }
}

impl BrokerApi for SimBroker {
    fn create_order(&mut self, spec: &BrokerOrderSpec) -> Result<BrokerOrder, BrokerError> {
        let mut inner = self.inner.lock();
        if inner.fail_next_creates > 0 {
            inner.fail_next_creates -= 1;
            return Err(BrokerError::Unavailable("create failed (injected)".into()));
        }
        let id = inner.alloc_id();
        let tag = inner.echo_tag(&spec.tag);
        inner.orders.insert(
            id.clone(),
            SimOrder {
                id: id.clone(),
                spec: spec.clone(),
                status: SimOrderStatus::Created,
                filled: 0,
            },
        );
        debug!(broker_order_id = %id, tag = %spec.tag, "sim order created");
        Ok(BrokerOrder {
            broker_order_id: id,
            tag,
            acknowledged_quantity: spec.quantity,
        })
    }

    fn set_order_tag(&mut self, broker_order_id: &str, tag: &str) -> Result<String, BrokerError> {
        let mut inner = self.inner.lock();
        if !inner.orders.contains_key(broker_order_id) {
            return Err(BrokerError::UnknownOrder(broker_order_id.to_string()));
        }
        let echoed = inner.echo_tag(tag);
        if let Some(order) = inner.orders.get_mut(broker_order_id) {
            order.spec.tag = echoed.clone();
        }
        Ok(echoed)
    }

    fn submit_order(&mut self, broker_order_id: &str) -> Result<(), BrokerError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.fail_next_submits > 0 {
            inner.fail_next_submits -= 1;
            return Err(BrokerError::Unavailable("submit failed (injected)".into()));
        }
        let (tag, quantity) = match inner.orders.get(broker_order_id) {
            Some(order) => (order.spec.tag.clone(), order.spec.quantity),
            None => return Err(BrokerError::UnknownOrder(broker_order_id.to_string())),
        };
        if let Some((fragment, count)) = inner.fail_submits_matching.clone() {
            if count > 0 && tag.contains(&fragment) {
                inner.fail_submits_matching = Some((fragment, count - 1));
                return Err(BrokerError::Unavailable("submit failed (injected)".into()));
            }
        }

        if let Some(order) = inner.orders.get_mut(broker_order_id) {
            order.status = SimOrderStatus::Working;
        }
        for state in [OrderState::Accepted, OrderState::Working] {
            inner.events.push_back(BrokerEvent::State(OrderStateUpdate {
                broker_order_id: broker_order_id.to_string(),
                state,
                reason: None,
                acknowledged_quantity: Some(quantity),
            }));
        }
        Ok(())
    }

    fn modify_order_price(
        &mut self,
        broker_order_id: &str,
        price: Decimal,
    ) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        let order = inner
            .orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::UnknownOrder(broker_order_id.to_string()))?;
        if order.status != SimOrderStatus::Working {
            return Err(BrokerError::Rejected(format!(
                "order {} not working",
                broker_order_id
            )));
        }
        if order.spec.stop_price.is_some() {
            order.spec.stop_price = Some(price);
        } else {
            order.spec.limit_price = Some(price);
        }
        Ok(())
    }

    fn cancel_order(&mut self, broker_order_id: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        let order = inner
            .orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::UnknownOrder(broker_order_id.to_string()))?;
        if !matches!(
            order.status,
            SimOrderStatus::Created | SimOrderStatus::Working
        ) {
            return Err(BrokerError::Rejected(format!(
                "order {} not cancellable",
                broker_order_id
            )));
        }
        order.status = SimOrderStatus::Cancelled;
        inner.events.push_back(BrokerEvent::State(OrderStateUpdate {
            broker_order_id: broker_order_id.to_string(),
            state: OrderState::Cancelled,
            reason: Some("cancelled".to_string()),
            acknowledged_quantity: None,
        }));
        Ok(())
    }

    fn flatten_position(&mut self, instrument: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        if let Some(position) = inner.positions.get_mut(instrument) {
            position.quantity = 0;
        }
        Ok(())
    }

    fn account_snapshot(&mut self) -> Result<AccountSnapshot, BrokerError> {
        let inner = self.inner.lock();
        let positions = inner
            .positions
            .iter()
            .filter(|(_, p)| p.quantity != 0)
            .map(|(instrument, p)| AccountPosition {
                instrument: instrument.clone(),
                quantity: p.quantity,
                average_price: p.average_price,
            })
            .collect();
        let working_orders = inner
            .orders
            .values()
            .filter(|o| o.status == SimOrderStatus::Working)
            .map(|o| WorkingOrder {
                broker_order_id: o.id.clone(),
                instrument: o.spec.instrument.clone(),
                tag: o.spec.tag.clone(),
                oco_group: o.spec.oco_group.clone(),
                order_type: o.spec.order_type,
                limit_price: o.spec.limit_price,
                stop_price: o.spec.stop_price,
                quantity: o.spec.quantity,
            })
            .collect();
        Ok(AccountSnapshot {
            positions,
            working_orders,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stop_entry(side: Side, stop: Decimal, group: Option<&str>) -> BrokerOrderSpec {
        BrokerOrderSpec {
            account: "Sim101".to_string(),
            instrument: "MES".to_string(),
            side,
            order_type: OrderType::EntryStop,
            quantity: 2,
            limit_price: None,
            stop_price: Some(stop),
            tag: format!("QTSW2:test{}", stop),
            oco_group: group.map(|g| g.to_string()),
        }
    }

    #[test]
    fn test_create_submit_fill_lifecycle() {
        let mut broker = SimBroker::new();
        let order = broker
            .create_order(&stop_entry(Side::Buy, dec!(4500.00), None))
            .unwrap();
        assert_eq!(order.tag, "QTSW2:test4500.00");

        broker.submit_order(&order.broker_order_id).unwrap();
        let events = broker.drain_events();
        assert_eq!(events.len(), 2);

        broker.fill_order(&order.broker_order_id, 2, dec!(4500.25));
        assert_eq!(broker.position("MES"), 2);

        let events = broker.drain_events();
        match &events[0] {
            BrokerEvent::Execution(exec) => {
                assert_eq!(exec.quantity, 2);
                assert_eq!(exec.price, dec!(4500.25));
            }
            other => panic!("expected execution, got {:?}", other),
        }
        match &events[1] {
            BrokerEvent::State(update) => assert_eq!(update.state, OrderState::Filled),
            other => panic!("expected state, got {:?}", other),
        }
    }

    #[test]
    fn test_oco_sibling_cancelled_on_fill() {
        let mut broker = SimBroker::new();
        let long = broker
            .create_order(&stop_entry(Side::Buy, dec!(4505.00), Some("G1")))
            .unwrap();
        let short = broker
            .create_order(&stop_entry(Side::Sell, dec!(4495.00), Some("G1")))
            .unwrap();
        broker.submit_order(&long.broker_order_id).unwrap();
        broker.submit_order(&short.broker_order_id).unwrap();
        broker.drain_events();

        // Tick through the long stop.
        broker.process_tick("MES", dec!(4505.25));
        assert_eq!(broker.position("MES"), 2);
        assert!(!broker.order_status_is_working(&short.broker_order_id));

        let events = broker.drain_events();
        let cancelled: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::State(u) if u.state == OrderState::Cancelled => {
                    Some(u.broker_order_id.clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(cancelled, vec![short.broker_order_id.clone()]);
    }

    #[test]
    fn test_partial_fill_keeps_order_working() {
        let mut broker = SimBroker::new();
        let order = broker
            .create_order(&stop_entry(Side::Buy, dec!(4500.00), None))
            .unwrap();
        broker.submit_order(&order.broker_order_id).unwrap();
        broker.drain_events();

        broker.fill_order(&order.broker_order_id, 1, dec!(4500.25));
        assert!(broker.order_status_is_working(&order.broker_order_id));
        assert_eq!(broker.position("MES"), 1);

        broker.fill_order(&order.broker_order_id, 1, dec!(4500.50));
        assert!(!broker.order_status_is_working(&order.broker_order_id));
        assert_eq!(broker.position("MES"), 2);
    }

    #[test]
    fn test_corrupt_tag_injection() {
        let mut broker = SimBroker::new();
        broker.corrupt_next_tags(1);
        let order = broker
            .create_order(&stop_entry(Side::Buy, dec!(4500.00), None))
            .unwrap();
        assert!(order.tag.ends_with("~corrupt"));

        // The retry echoes faithfully once the counter is spent.
        let echoed = broker
            .set_order_tag(&order.broker_order_id, "QTSW2:test4500.00")
            .unwrap();
        assert_eq!(echoed, "QTSW2:test4500.00");
    }

    #[test]
    fn test_flatten_position() {
        let mut broker = SimBroker::new();
        broker.seed_position("MES", 3, dec!(4500.00));
        broker.flatten_position("MES").unwrap();
        assert_eq!(broker.position("MES"), 0);
    }

    #[test]
    fn test_snapshot_contains_working_orders_only() {
        let mut broker = SimBroker::new();
        let a = broker
            .create_order(&stop_entry(Side::Buy, dec!(4500.00), None))
            .unwrap();
        let _b = broker
            .create_order(&stop_entry(Side::Sell, dec!(4490.00), None))
            .unwrap();
        broker.submit_order(&a.broker_order_id).unwrap();

        let snapshot = broker.account_snapshot().unwrap();
        assert_eq!(snapshot.working_orders.len(), 1);
        assert_eq!(snapshot.working_orders[0].broker_order_id, a.broker_order_id);
    }
}

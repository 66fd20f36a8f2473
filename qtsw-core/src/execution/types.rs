//! Execution-side data types shared by the adapter, broker seam and engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{Direction, OrderState, OrderType, Side};

/// Declared expectation for one intent, registered before any order is
/// submitted. Mutable only by re-declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentPolicy {
    pub intent_id: String,
    pub expected_quantity: u32,
    pub max_quantity: u32,
    /// What declared the policy (strategy / recovery / manual).
    pub source: String,
    pub canonical_instrument: String,
    pub execution_instrument: String,
}

/// In-memory tracking for one broker order.
#[derive(Debug, Clone)]
pub struct OrderInfo {
    pub broker_order_id: String,
    pub intent_id: String,
    pub order_type: OrderType,
    /// Direction of the intent position this order belongs to.
    pub direction: Direction,
    pub quantity: u32,
    pub price: Option<Decimal>,
    pub state: OrderState,
    /// Cumulative across partial fills.
    pub filled_quantity: u32,
    pub entry_fill_time: Option<DateTime<Utc>>,
    pub tag: String,
    pub oco_group: Option<String>,
}

impl OrderInfo {
    pub fn remaining_quantity(&self) -> u32 {
        self.quantity.saturating_sub(self.filled_quantity)
    }
}

/// How an entry should reach the market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryKind {
    Market,
    Limit(Decimal),
}

/// One open position in an account snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPosition {
    pub instrument: String,
    /// Signed: positive long, negative short.
    pub quantity: i64,
    pub average_price: Decimal,
}

/// One working order in an account snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingOrder {
    pub broker_order_id: String,
    pub instrument: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oco_group: Option<String>,
    pub order_type: OrderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    pub quantity: u32,
}

/// Ephemeral view of the whole account, robot and non-robot alike.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub positions: Vec<AccountPosition>,
    pub working_orders: Vec<WorkingOrder>,
}

impl AccountSnapshot {
    pub fn position_for(&self, instrument: &str) -> i64 {
        self.positions
            .iter()
            .find(|p| p.instrument == instrument)
            .map(|p| p.quantity)
            .unwrap_or(0)
    }
}

/// Order-state transition pushed by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStateUpdate {
    pub broker_order_id: String,
    pub state: OrderState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Quantity the broker acknowledged, when it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_quantity: Option<u32>,
}

/// Execution (fill) pushed by the broker. Quantity is this execution's
/// delta, not a cumulative total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUpdate {
    pub broker_order_id: String,
    pub instrument: String,
    /// Tag as the broker reports it; may be empty or foreign.
    pub tag: String,
    pub quantity: u32,
    pub price: Decimal,
    pub time: DateTime<Utc>,
    pub commission: Decimal,
    pub fees: Decimal,
}

/// Event delivered on a broker-owned thread.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    State(OrderStateUpdate),
    Execution(ExecutionUpdate),
}

/// What the adapter asks the broker to construct.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerOrderSpec {
    pub account: String,
    pub instrument: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: u32,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub tag: String,
    pub oco_group: Option<String>,
}

/// The broker's view of a constructed order, echoed back on creation.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerOrder {
    pub broker_order_id: String,
    /// Tag as the broker stored it; compared against the requested tag.
    pub tag: String,
    pub acknowledged_quantity: u32,
}

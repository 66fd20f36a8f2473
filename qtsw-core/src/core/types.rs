use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Position direction for an intent or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Broker side that opens a position in this direction.
    pub fn entry_side(&self) -> Side {
        match self {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }

    /// Broker side that closes a position in this direction.
    pub fn exit_side(&self) -> Side {
        self.entry_side().opposite()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order side at the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Role an order plays for its intent.
///
/// `Entry`/`EntryStop` open the position, `Stop`/`Target` protect it,
/// `Market` is the flatten path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Entry,
    EntryStop,
    Stop,
    Target,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Entry => "ENTRY",
            OrderType::EntryStop => "ENTRY_STOP",
            OrderType::Stop => "STOP",
            OrderType::Target => "TARGET",
            OrderType::Market => "MARKET",
        }
    }

    /// Entry orders open exposure; everything else reduces it.
    pub fn is_entry(&self) -> bool {
        matches!(self, OrderType::Entry | OrderType::EntryStop)
    }

    pub fn is_protective(&self) -> bool {
        matches!(self, OrderType::Stop | OrderType::Target)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broker order lifecycle state.
///
/// ```text
/// Submitted -> Accepted -> Working -> (Filled | Cancelled)
///      \          \           \
///       \----------\-----------> Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Submitted,
    Accepted,
    Working,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Submitted => "SUBMITTED",
            OrderState::Accepted => "ACCEPTED",
            OrderState::Working => "WORKING",
            OrderState::Filled => "FILLED",
            OrderState::Rejected => "REJECTED",
            OrderState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Rejected | OrderState::Cancelled
        )
    }

    /// Active means the order still occupies the duplicate-entry guard.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderState::Submitted | OrderState::Accepted | OrderState::Working
        )
    }

    /// Whether the broker is allowed to move an order from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        match (self, next) {
            (Submitted, Accepted) | (Accepted, Working) => true,
            // Brokers routinely skip the Accepted notification.
            (Submitted, Working) => true,
            (Working, Filled) | (Working, Cancelled) => true,
            (Submitted, Rejected) | (Accepted, Rejected) | (Working, Rejected) => true,
            // Cancel races acceptance at the broker.
            (Submitted, Cancelled) | (Accepted, Cancelled) => true,
            (a, b) if *a == b => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stand-down callback handle: `(stream, reason)`.
///
/// Registered once at wiring time by the engine binding. The sentinel
/// stream `"*"` stands down every armed stream (used when a failure cannot
/// be attributed to a single stream).
pub type StandDownFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Stream sentinel for failures that cannot name a stream.
pub const ALL_STREAMS: &str = "*";

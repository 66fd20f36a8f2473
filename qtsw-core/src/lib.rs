//! QTSW Core - Broker-Facing Execution Engine
//!
//! Turns abstract trading intents from a range-breakout strategy into
//! broker orders on a simulation account, with the guarantees the robot
//! lives by: every filled position is protected, every action is
//! idempotent, and every failure leaves an auditable trail.
//!
//! ## Safety model
//! - **Deterministic identity**: intent ids are stable hashes, so re-runs
//!   and crash recovery never double-submit.
//! - **Fail-closed everywhere**: journal corruption, protective-order
//!   failure, orphan fills and quantity mismatches all end in flatten,
//!   stand-down and a persistent incident record.
//! - **Single-writer maps**: the adapter serializes engine ticks and
//!   broker callbacks behind one mutex, keeping per-intent effects
//!   linearizable.
//!
//! ## Core Modules
//! - `core`: domain types (Intent, tags, order states, error taxonomy)
//! - `config`: execution configuration
//! - `resilience`: file-backed kill switch
//! - `monitoring`: JSONL event stream, notifications, incident records
//! - `risk`: pre-trade gate
//! - `execution`: journal, broker seam, submission adapter
//! - `engine`: exposure coordinator and the engine binding

pub mod config;
pub mod core;
pub mod engine;
pub mod execution;
pub mod monitoring;
pub mod resilience;
pub mod risk;

pub use crate::core::{
    decode_intent_id, encode_oco_group, encode_order_tag, BrokerError, Direction, ExecError,
    Intent, OrderState, OrderType, Side,
};
pub use config::ExecutionConfig;
pub use engine::{ExecutionEngine, ExposureCoordinator, IntentSubmission};
pub use execution::{
    AccountSnapshot, BrokerApi, BrokerEvent, EntryKind, ExecutionAdapter, ExecutionJournal,
    SimBroker,
};
pub use monitoring::{EventLog, EventType, Notifier, NotifyPriority};
pub use resilience::KillSwitch;
pub use risk::RiskGate;

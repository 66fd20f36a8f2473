//! Order execution: broker seam, journal, and the submission adapter.

pub mod adapter;
pub mod broker;
pub mod journal;
pub mod types;

pub use adapter::{AdapterConfig, ExecutionAdapter, ReconcileReport};
pub use broker::{BrokerApi, SimBroker};
pub use journal::{ExecutionJournal, FillRecord, JournalEntry, JournalKey, SubmissionRecord};
pub use types::{
    AccountPosition, AccountSnapshot, BrokerEvent, BrokerOrder, BrokerOrderSpec, EntryKind,
    ExecutionUpdate, IntentPolicy, OrderInfo, OrderStateUpdate, WorkingOrder,
};

//! Observability: event stream, notifications, incident records.

pub mod events;
pub mod incidents;
pub mod notify;

pub use events::{EventLog, EventType, ExecEvent};
pub use incidents::{IncidentStore, OrphanFillRecord, ProtectiveFailureIncident};
pub use notify::{LogNotifier, MemoryNotifier, Notification, Notifier, NotifyPriority};

//! Engine binding and exposure coordination.

pub mod binding;
pub mod coordinator;

pub use binding::{ExecutionEngine, IntentSubmission};
pub use coordinator::{ExitOutcome, ExposureCoordinator, ExposureRecord};

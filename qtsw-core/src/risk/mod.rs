//! Pre-trade risk controls.

pub mod gate;

pub use gate::{GateContext, GateDecision, GateKind, GateStatus, RiskGate};

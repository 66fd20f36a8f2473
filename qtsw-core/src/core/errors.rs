//! Error taxonomy for execution operations.
//!
//! Operational failures never cross the adapter boundary as panics; they
//! are structured results whose variants drive the retry / fail-closed
//! policy: transient errors get bounded retries, invariant violations are
//! hard blocks, rejections of protective orders trigger the flatten path.

use thiserror::Error;

/// Failure of an execution operation, classified by required response.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// Network or momentary broker unavailability. Retried within the
    /// adapter's bounded retry policies.
    #[error("transient broker failure: {0}")]
    Transient(String),

    /// Quantity overflow, missing policy, tag verification mismatch,
    /// duplicate entry. Hard block, no retry.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Broker refused the order.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// Journal unreadable. Callers must treat the affected intent as
    /// already-submitted / already-modified.
    #[error("journal corruption: {0}")]
    Corruption(String),

    /// Unparseable broker callback. Fail-closed.
    #[error("unparseable broker callback: {0}")]
    Unknown(String),
}

impl ExecError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecError::Transient(_))
    }
}

/// Failure at the broker seam.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("rejected by broker: {0}")]
    Rejected(String),

    #[error("unknown broker order: {0}")]
    UnknownOrder(String),

    #[error("unsupported broker operation: {0}")]
    Unsupported(String),
}

impl From<BrokerError> for ExecError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Unavailable(msg) => ExecError::Transient(msg),
            BrokerError::Rejected(msg) => ExecError::Rejected(msg),
            BrokerError::UnknownOrder(msg) => ExecError::InvariantViolation(msg),
            BrokerError::Unsupported(msg) => ExecError::Unknown(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_mapping() {
        let e: ExecError = BrokerError::Unavailable("timeout".into()).into();
        assert!(e.is_transient());

        let e: ExecError = BrokerError::Rejected("margin".into()).into();
        assert!(matches!(e, ExecError::Rejected(_)));

        let e: ExecError = BrokerError::UnknownOrder("B9".into()).into();
        assert!(matches!(e, ExecError::InvariantViolation(_)));
    }

    #[test]
    fn test_display_includes_detail() {
        let e = ExecError::InvariantViolation("policy missing".into());
        assert!(e.to_string().contains("policy missing"));
    }
}

//! Trading intents and their deterministic identity.
//!
//! An [`Intent`] is the complete specification of one trade the strategy
//! wants executed. It is immutable after creation; everything downstream
//! (journals, order tags, exposure records) keys off [`Intent::intent_id`],
//! which is stable across process restarts for the same logical trade.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Direction;

/// Number of hex characters kept from the SHA-256 digest.
const INTENT_ID_LEN: usize = 16;

/// One trade the strategy wants executed.
///
/// `direction` is absent for a symmetric breakout pair (the OCO entry
/// placement decides which side ends up filled).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Calendar date string, `YYYY-MM-DD`.
    pub trading_date: String,
    /// Logical strategy instance, e.g. `"NY1"`.
    pub stream: String,
    /// Canonical instrument, e.g. `"MES"`.
    pub canonical_instrument: String,
    /// Instrument actually routed to the broker (may be a micro substitute).
    pub execution_instrument: String,
    /// Session label, e.g. `"AM"`.
    pub session: String,
    /// Chicago-local `HH:MM` of the breakout slot.
    pub slot_time: String,
    pub direction: Option<Direction>,
    pub entry_price: Option<Decimal>,
    pub stop_price: Decimal,
    pub target_price: Decimal,
    pub be_trigger: Decimal,
    pub entry_time: Option<DateTime<Utc>>,
    /// Free-form tag describing what produced the intent.
    pub trigger_reason: String,
}

impl Intent {
    /// Deterministic identity: first 16 hex characters of SHA-256 over the
    /// canonical pipe-joined fields. Re-running the same logical intent
    /// always yields the same id.
    pub fn intent_id(&self) -> String {
        let canonical = self.canonical_repr();
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)[..INTENT_ID_LEN].to_string()
    }

    /// The exact string that gets hashed. Field order and formatting are
    /// load-bearing: any change invalidates every existing journal.
    fn canonical_repr(&self) -> String {
        let direction = self
            .direction
            .map(|d| d.as_str().to_string())
            .unwrap_or_else(|| "NULL".to_string());
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.trading_date,
            self.stream,
            self.canonical_instrument,
            self.session,
            self.slot_time,
            direction,
            fmt_price(self.entry_price),
            fmt_price(Some(self.stop_price)),
            fmt_price(Some(self.target_price)),
            fmt_price(Some(self.be_trigger)),
        )
    }
}

/// Two-decimal canonical price formatting, `NULL` when absent.
fn fmt_price(price: Option<Decimal>) -> String {
    match price {
        Some(p) => format!("{:.2}", p),
        None => "NULL".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_intent() -> Intent {
        Intent {
            trading_date: "2025-11-20".to_string(),
            stream: "NY1".to_string(),
            canonical_instrument: "MES".to_string(),
            execution_instrument: "MES".to_string(),
            session: "AM".to_string(),
            slot_time: "08:30".to_string(),
            direction: Some(Direction::Long),
            entry_price: Some(dec!(4500.00)),
            stop_price: dec!(4495.00),
            target_price: dec!(4510.00),
            be_trigger: dec!(4502.50),
            entry_time: None,
            trigger_reason: "range_breakout".to_string(),
        }
    }

    #[test]
    fn test_intent_id_is_stable() {
        let a = sample_intent();
        let b = sample_intent();
        assert_eq!(a.intent_id(), b.intent_id());
        assert_eq!(a.intent_id().len(), 16);
        assert!(a.intent_id().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_intent_id_ignores_non_canonical_fields() {
        let a = sample_intent();
        let mut b = sample_intent();
        b.trigger_reason = "different".to_string();
        b.execution_instrument = "MESZ5".to_string();
        b.entry_time = Some(Utc::now());
        // Identity covers only the canonical fields.
        assert_eq!(a.intent_id(), b.intent_id());
    }

    #[test]
    fn test_intent_id_changes_with_canonical_fields() {
        let a = sample_intent();

        let mut b = sample_intent();
        b.direction = Some(Direction::Short);
        assert_ne!(a.intent_id(), b.intent_id());

        let mut c = sample_intent();
        c.stop_price = dec!(4494.75);
        assert_ne!(a.intent_id(), c.intent_id());

        let mut d = sample_intent();
        d.slot_time = "09:00".to_string();
        assert_ne!(a.intent_id(), d.intent_id());
    }

    #[test]
    fn test_canonical_repr_null_fields() {
        let mut intent = sample_intent();
        intent.direction = None;
        intent.entry_price = None;
        let repr = intent.canonical_repr();
        assert!(repr.contains("|NULL|NULL|"));
    }

    #[test]
    fn test_price_formatting_two_decimals() {
        assert_eq!(fmt_price(Some(dec!(4500))), "4500.00");
        assert_eq!(fmt_price(Some(dec!(4502.5))), "4502.50");
        assert_eq!(fmt_price(Some(dec!(4500.25))), "4500.25");
        assert_eq!(fmt_price(None), "NULL");
    }
}

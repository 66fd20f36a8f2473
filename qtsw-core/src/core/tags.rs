//! Tag envelope for robot-owned broker orders.
//!
//! Every order the robot creates carries a tag beginning with the reserved
//! prefix, which is the sole mechanism for recognizing our own orders in a
//! flat account snapshot. OCO group identifiers get a fresh UUID each time
//! because some brokers refuse to accept a previously used group string.

use uuid::Uuid;

/// Reserved prefix for robot-owned broker orders.
pub const ROBOT_TAG_PREFIX: &str = "QTSW2:";

/// Marker segment that distinguishes OCO group ids from order tags.
const OCO_ENTRY_SEGMENT: &str = "OCO_ENTRY";

/// Which leg of an intent an order tag names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagRole {
    Entry,
    Stop,
    Target,
}

impl TagRole {
    fn suffix(&self) -> &'static str {
        match self {
            TagRole::Entry => "",
            TagRole::Stop => ":STOP",
            TagRole::Target => ":TARGET",
        }
    }
}

/// `QTSW2:<intent_id>` with an optional `:STOP` / `:TARGET` suffix.
pub fn encode_order_tag(intent_id: &str, role: TagRole) -> String {
    format!("{}{}{}", ROBOT_TAG_PREFIX, intent_id, role.suffix())
}

/// `QTSW2:OCO_ENTRY:<trading_date>:<stream>:<slot>:<uuid>`.
///
/// The trailing UUID guarantees a never-reused group string per call.
pub fn encode_oco_group(trading_date: &str, stream: &str, slot: &str) -> String {
    format!(
        "{}{}:{}:{}:{}:{}",
        ROBOT_TAG_PREFIX,
        OCO_ENTRY_SEGMENT,
        trading_date,
        stream,
        slot,
        Uuid::new_v4()
    )
}

/// Whether a tag marks a robot-owned order.
pub fn is_robot_tag(tag: &str) -> bool {
    tag.starts_with(ROBOT_TAG_PREFIX)
}

/// Extract the intent id from an order tag.
///
/// Returns `None` for anything that is not a robot order. The result stops
/// at the first `:` after the prefix, so role suffixes are ignored.
pub fn decode_intent_id(tag: &str) -> Option<&str> {
    let rest = tag.strip_prefix(ROBOT_TAG_PREFIX)?;
    let base = rest.split(':').next().unwrap_or(rest);
    if base.is_empty() {
        return None;
    }
    Some(base)
}

/// Whether a tag is an OCO group id rather than an order tag.
pub fn is_oco_group(tag: &str) -> bool {
    decode_intent_id(tag) == Some(OCO_ENTRY_SEGMENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_roles() {
        assert_eq!(encode_order_tag("abc123", TagRole::Entry), "QTSW2:abc123");
        assert_eq!(
            encode_order_tag("abc123", TagRole::Stop),
            "QTSW2:abc123:STOP"
        );
        assert_eq!(
            encode_order_tag("abc123", TagRole::Target),
            "QTSW2:abc123:TARGET"
        );
    }

    #[test]
    fn test_decode_round_trip() {
        for role in [TagRole::Entry, TagRole::Stop, TagRole::Target] {
            let tag = encode_order_tag("deadbeef01234567", role);
            assert_eq!(decode_intent_id(&tag), Some("deadbeef01234567"));
        }
    }

    #[test]
    fn test_decode_rejects_foreign_tags() {
        assert_eq!(decode_intent_id("X"), None);
        assert_eq!(decode_intent_id(""), None);
        assert_eq!(decode_intent_id("QTSW:abc"), None);
        assert_eq!(decode_intent_id("qtsw2:abc"), None);
        // Prefix alone carries no id.
        assert_eq!(decode_intent_id("QTSW2:"), None);
    }

    #[test]
    fn test_decode_stops_at_suffix() {
        assert_eq!(decode_intent_id("QTSW2:X:STOP"), Some("X"));
        assert_eq!(decode_intent_id("QTSW2:X:TARGET"), Some("X"));
    }

    #[test]
    fn test_oco_group_unique_per_call() {
        let a = encode_oco_group("2025-11-20", "NY1", "08:30");
        let b = encode_oco_group("2025-11-20", "NY1", "08:30");
        assert_ne!(a, b);
        assert!(a.starts_with("QTSW2:OCO_ENTRY:2025-11-20:NY1:08:30:"));
        assert!(is_robot_tag(&a));
        assert!(is_oco_group(&a));
        assert!(!is_oco_group("QTSW2:abc123:STOP"));
    }
}

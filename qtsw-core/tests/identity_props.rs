//! Property tests for intent identity and the tag envelope.

use proptest::prelude::*;
use qtsw_core::core::tags::{decode_intent_id, encode_order_tag, is_robot_tag, TagRole};
use qtsw_core::{Direction, Intent};
use rust_decimal::Decimal;

fn price_strategy() -> impl Strategy<Value = Decimal> {
    // Quarter-point futures prices in a realistic band.
    (4_000i64..30_000).prop_map(|quarters| Decimal::new(quarters * 25, 2))
}

fn intent_strategy() -> impl Strategy<Value = Intent> {
    (
        prop_oneof![Just("NY1"), Just("NY2"), Just("LN1")],
        prop_oneof![Just("AM"), Just("PM")],
        prop_oneof![Just("08:30"), Just("09:00"), Just("13:30")],
        prop_oneof![
            Just(None),
            Just(Some(Direction::Long)),
            Just(Some(Direction::Short))
        ],
        proptest::option::of(price_strategy()),
        price_strategy(),
        price_strategy(),
        price_strategy(),
    )
        .prop_map(
            |(stream, session, slot, direction, entry, stop, target, be)| Intent {
                trading_date: "2025-11-20".to_string(),
                stream: stream.to_string(),
                canonical_instrument: "MES".to_string(),
                execution_instrument: "MES".to_string(),
                session: session.to_string(),
                slot_time: slot.to_string(),
                direction,
                entry_price: entry,
                stop_price: stop,
                target_price: target,
                be_trigger: be,
                entry_time: None,
                trigger_reason: "prop".to_string(),
            },
        )
}

proptest! {
    #[test]
    fn intent_id_is_stable_and_well_formed(intent in intent_strategy()) {
        let a = intent.intent_id();
        let b = intent.clone().intent_id();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.len(), 16);
        prop_assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tag_round_trips_for_every_role(intent in intent_strategy()) {
        let id = intent.intent_id();
        for role in [TagRole::Entry, TagRole::Stop, TagRole::Target] {
            let tag = encode_order_tag(&id, role);
            prop_assert!(is_robot_tag(&tag));
            prop_assert_eq!(decode_intent_id(&tag), Some(id.as_str()));
        }
    }

    #[test]
    fn foreign_tags_never_decode(raw in "[a-zA-Z0-9:_-]{0,40}") {
        prop_assume!(!raw.starts_with("QTSW2:"));
        prop_assert_eq!(decode_intent_id(&raw), None);
    }
}

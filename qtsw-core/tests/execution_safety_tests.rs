//! Safety tests for the execution subsystem.
//!
//! These walk the literal lifecycle scenarios the robot must survive:
//! clean round trips, partial fills, protective rejections, duplicate
//! submissions, journal corruption and untagged fills. Every failure
//! path must end flat, stood down and auditable.

use parking_lot::Mutex;
use qtsw_core::config::ExecutionConfig;
use qtsw_core::execution::JournalKey;
use qtsw_core::monitoring::{ExecEvent, MemoryNotifier, NotifyPriority};
use qtsw_core::{
    Direction, EventLog, EventType, ExecutionEngine, Intent, IntentSubmission, SimBroker,
};
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;

type Captured = Arc<Mutex<Vec<ExecEvent>>>;

fn seed_intent() -> Intent {
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

fn test_engine(
    dir: &Path,
) -> (
    ExecutionEngine<SimBroker>,
    SimBroker,
    Captured,
    Arc<MemoryNotifier>,
) {
    let mut cfg = ExecutionConfig::for_instrument(dir, "MES", "MES");
    cfg.contract_multiplier = Some(dec!(5));
    cfg.adapter.protective_retry_backoff_ms = 1;
    cfg.adapter.fill_lookup_backoff_ms = 1;

    let broker = SimBroker::new();
    let (events, captured) = EventLog::in_memory();
    let notifier = Arc::new(MemoryNotifier::new());
    let engine =
        ExecutionEngine::with_parts(cfg, broker.clone(), Arc::new(events), notifier.clone())
            .unwrap();
    engine.set_trading_date("2025-11-20");
    engine.set_timetable_validated(true);
    engine.arm_stream("NY1");
    (engine, broker, captured, notifier)
}

fn count_events(captured: &Captured, event_type: EventType) -> usize {
    captured
        .lock()
        .iter()
        .filter(|e| e.event_type == event_type)
        .count()
}

fn submitted_order_id(submission: IntentSubmission) -> String {
    match submission {
        IntentSubmission::Submitted {
            broker_order_ids, ..
        } => broker_order_ids[0].clone(),
        IntentSubmission::Blocked { reason, .. } => panic!("unexpectedly blocked: {}", reason),
    }
}

#[test]
fn test_clean_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, broker, captured, _notifier) = test_engine(dir.path());
    let intent = seed_intent();
    let intent_id = intent.intent_id();

    // Submit: breakout stop entry at 4500.00.
    let entry_id = submitted_order_id(engine.submit_intent(&intent, 2).unwrap());
    engine.dispatch_events(broker.drain_events());

    // Entry fills 2 contracts at 4500.25.
    broker.fill_order(&entry_id, 2, dec!(4500.25));
    engine.dispatch_events(broker.drain_events());

    // Protective legs placed for the full position.
    let (stop, target) = engine.adapter().protective_orders(&intent_id);
    let stop = stop.expect("protective stop tracked");
    let target = target.expect("target tracked");
    assert_eq!(stop.quantity, 2);
    assert_eq!(stop.price, Some(dec!(4495.00)));
    assert_eq!(target.quantity, 2);
    assert_eq!(target.price, Some(dec!(4510.00)));
    assert_eq!(count_events(&captured, EventType::ProtectiveOrdersSubmitted), 1);

    // Acks flow back.
    engine.dispatch_events(broker.drain_events());

    // Last trade reaches the BE trigger: stop moves to the entry price.
    assert!(engine
        .maybe_trigger_break_even(&intent_id, dec!(4502.50))
        .unwrap());
    let snapshot = engine.adapter().get_account_snapshot().unwrap();
    let working_stop = snapshot
        .working_orders
        .iter()
        .find(|o| o.tag.ends_with(":STOP"))
        .expect("stop still working");
    assert_eq!(working_stop.stop_price, Some(dec!(4500.00)));

    // A second trigger is dropped by the journal guard.
    assert!(engine
        .maybe_trigger_break_even(&intent_id, dec!(4503.00))
        .unwrap());
    assert_eq!(count_events(&captured, EventType::StopModifySuccess), 1);

    // Target fills; the coordinator releases and the stop is pulled.
    broker.fill_order(&target.broker_order_id, 2, dec!(4510.00));
    engine.dispatch_events(broker.drain_events());

    assert!(engine.coordinator().record(&intent_id).is_none());
    assert!(!broker.order_status_is_working(&stop.broker_order_id));
    assert_eq!(count_events(&captured, EventType::ExecutionExitFill), 1);

    // Journal captured the whole trip, slippage included.
    let entry = engine
        .journal()
        .entry(&JournalKey::for_intent(&intent))
        .unwrap();
    assert!(entry.entry_submitted);
    assert!(entry.entry_filled);
    assert!(entry.be_modified);
    assert_eq!(entry.fill_quantity, 2);
    assert_eq!(entry.slippage_points, Some(dec!(0.25)));
    assert_eq!(entry.slippage_dollars, Some(dec!(2.50)));
}

#[test]
fn test_partial_fill_reconciles_protective_quantity() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, broker, captured, _notifier) = test_engine(dir.path());
    let intent = seed_intent();
    let intent_id = intent.intent_id();

    let entry_id = submitted_order_id(engine.submit_intent(&intent, 2).unwrap());
    engine.dispatch_events(broker.drain_events());

    // First partial: one contract.
    broker.fill_order(&entry_id, 1, dec!(4500.25));
    engine.dispatch_events(broker.drain_events());

    let (stop, target) = engine.adapter().protective_orders(&intent_id);
    let first_stop = stop.expect("stop for partial");
    assert_eq!(first_stop.quantity, 1);
    assert_eq!(target.expect("target for partial").quantity, 1);
    assert_eq!(count_events(&captured, EventType::ExecutionPartialFill), 1);

    // Second partial completes the order; protective legs are
    // cancel-and-recreated at the full quantity.
    broker.fill_order(&entry_id, 1, dec!(4500.50));
    engine.dispatch_events(broker.drain_events());

    let (stop, target) = engine.adapter().protective_orders(&intent_id);
    let stop = stop.expect("reconciled stop");
    let target = target.expect("reconciled target");
    assert_eq!(stop.quantity, 2);
    assert_eq!(target.quantity, 2);
    assert_ne!(stop.broker_order_id, first_stop.broker_order_id);
    assert!(!broker.order_status_is_working(&first_stop.broker_order_id));
    assert!(broker.order_status_is_working(&stop.broker_order_id));

    assert_eq!(count_events(&captured, EventType::ExecutionFilled), 1);
    assert_eq!(engine.coordinator().entry_filled(&intent_id), 2);
}

#[test]
fn test_protective_rejection_flattens_and_stands_down() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, broker, captured, notifier) = test_engine(dir.path());
    let intent = seed_intent();
    let intent_id = intent.intent_id();

    let entry_id = submitted_order_id(engine.submit_intent(&intent, 2).unwrap());
    engine.dispatch_events(broker.drain_events());
    broker.fill_order(&entry_id, 2, dec!(4500.25));
    engine.dispatch_events(broker.drain_events());

    let (stop, _) = engine.adapter().protective_orders(&intent_id);
    let stop = stop.expect("stop placed");

    // Broker rejects the live stop: same emergency as a failed placement.
    broker.reject_order(&stop.broker_order_id, "margin rejected");
    engine.dispatch_events(broker.drain_events());

    // Flatten order went out; fill it to reach flat.
    engine.dispatch_events(broker.drain_events());
    broker.process_tick("MES", dec!(4500.00));
    engine.dispatch_events(broker.drain_events());
    assert_eq!(broker.position("MES"), 0);

    // Stream stood down, incident persisted, emergency notified.
    assert!(!engine.stream_armed("NY1"));
    assert!(engine.stand_down_reason("NY1").is_some());
    assert_eq!(
        count_events(&captured, EventType::ProtectiveOrdersFailedFlattened),
        1
    );
    let incidents: Vec<_> = std::fs::read_dir(engine.config().incident_root())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("protective_failure_")
        })
        .collect();
    assert_eq!(incidents.len(), 1);
    assert!(notifier
        .sent
        .lock()
        .iter()
        .any(|n| n.priority == NotifyPriority::Emergency));
}

#[test]
fn test_duplicate_entry_guard() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, broker, _captured, _notifier) = test_engine(dir.path());
    let intent = seed_intent();

    assert!(engine.submit_intent(&intent, 2).unwrap().is_submitted());

    // Second submission with the same intent id, no fill in between.
    let err = engine.submit_intent(&intent, 2).unwrap_err();
    assert!(err.to_string().contains("Entry order already exists"));

    // Exactly one order reached the broker.
    let snapshot = engine.adapter().get_account_snapshot().unwrap();
    assert_eq!(snapshot.working_orders.len(), 1);
    let _ = broker;
}

#[test]
fn test_duplicate_entry_guard_after_fill() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, broker, _captured, _notifier) = test_engine(dir.path());
    let intent = seed_intent();
    let entry_id = submitted_order_id(engine.submit_intent(&intent, 2).unwrap());
    engine.dispatch_events(broker.drain_events());
    broker.fill_order(&entry_id, 2, dec!(4500.25));
    engine.dispatch_events(broker.drain_events());

    // Entry filled; a re-dispatch attempt is still a duplicate.
    let err = engine.submit_intent(&intent, 2).unwrap_err();
    assert!(err.to_string().contains("Entry order already exists"));
}

#[test]
fn test_journal_corruption_blocks_resubmission() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, broker, captured, _notifier) = test_engine(dir.path());
    let intent = seed_intent();
    let key = JournalKey::for_intent(&intent);

    // A corrupt journal exists for this intent before submission.
    let journal_root = engine.config().journal_root();
    std::fs::create_dir_all(&journal_root).unwrap();
    std::fs::write(journal_root.join(key.file_name()), "{not json").unwrap();

    // Fail-closed: the submission path reads the intent as already
    // submitted and refuses to create a duplicate broker order.
    let err = engine.submit_intent(&intent, 2).unwrap_err();
    assert!(err.to_string().contains("already submitted"));
    assert!(engine.journal().is_intent_submitted(&key));

    // No broker order was created and the corruption was reported.
    let snapshot = engine.adapter().get_account_snapshot().unwrap();
    assert!(snapshot.working_orders.is_empty());
    assert!(count_events(&captured, EventType::ExecutionJournalCorruption) >= 1);
    assert!(!engine.stream_armed("NY1"));
    let _ = broker;
}

#[test]
fn test_untagged_fill_flattens_instrument() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, broker, captured, notifier) = test_engine(dir.path());

    // Some position exists that the robot did not put on.
    broker.seed_position("MES", 1, dec!(4500.00));

    let exec = qtsw_core::execution::ExecutionUpdate {
        broker_order_id: "X9".to_string(),
        instrument: "MES".to_string(),
        tag: String::new(),
        quantity: 1,
        price: dec!(4501.25),
        time: chrono::Utc::now(),
        commission: dec!(0),
        fees: dec!(0),
    };
    engine.on_broker_event(&qtsw_core::BrokerEvent::Execution(exec));

    assert_eq!(broker.position("MES"), 0);
    assert_eq!(count_events(&captured, EventType::OrphanFillCritical), 1);
    assert_eq!(notifier.highest_count(), 1);

    // Orphan record persisted to the per-day JSONL.
    let orphan_dir = engine.config().incident_root().join("orphan_fills");
    let files: Vec<_> = std::fs::read_dir(&orphan_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(files.len(), 1);
}

#[test]
fn test_tagged_fill_for_unknown_intent_stands_down() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, broker, captured, notifier) = test_engine(dir.path());
    broker.seed_position("MES", 2, dec!(4500.00));

    let exec = qtsw_core::execution::ExecutionUpdate {
        broker_order_id: "X10".to_string(),
        instrument: "MES".to_string(),
        tag: "QTSW2:feedfacecafebeef".to_string(),
        quantity: 2,
        price: dec!(4501.25),
        time: chrono::Utc::now(),
        commission: dec!(0),
        fees: dec!(0),
    };
    engine.on_broker_event(&qtsw_core::BrokerEvent::Execution(exec));

    assert_eq!(broker.position("MES"), 0);
    assert!(!engine.stream_armed("NY1"));
    assert_eq!(count_events(&captured, EventType::OrphanFillCritical), 1);
    assert_eq!(notifier.highest_count(), 1);
}

#[test]
fn test_kill_switch_blocks_submission() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _broker, captured, _notifier) = test_engine(dir.path());

    let path = engine.kill_switch().path().to_path_buf();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{"enabled": true, "message": "halt"}"#).unwrap();

    match engine.submit_intent(&seed_intent(), 2).unwrap() {
        IntentSubmission::Blocked { reason, .. } => {
            assert_eq!(reason, "KILL_SWITCH_ACTIVE");
        }
        other => panic!("expected block, got {:?}", other),
    }
    assert_eq!(count_events(&captured, EventType::KillSwitchActive), 1);
    assert_eq!(count_events(&captured, EventType::ExecutionBlocked), 1);
}

#[test]
fn test_slot_time_not_allowed_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _broker, captured, _notifier) = test_engine(dir.path());

    let mut intent = seed_intent();
    intent.slot_time = "11:00".to_string();
    match engine.submit_intent(&intent, 2).unwrap() {
        IntentSubmission::Blocked { reason, .. } => {
            assert_eq!(reason, "SLOT_TIME_NOT_ALLOWED");
        }
        other => panic!("expected block, got {:?}", other),
    }
    assert_eq!(count_events(&captured, EventType::ExecutionBlocked), 1);
}

#[test]
fn test_resubmission_blocked_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let intent = seed_intent();

    {
        let (engine, broker, _captured, _notifier) = test_engine(dir.path());
        assert!(engine.submit_intent(&intent, 2).unwrap().is_submitted());
        let _ = broker;
    }

    // Fresh engine, fresh broker, same data root: the journal remembers.
    let (engine, _broker, _captured, _notifier) = test_engine(dir.path());
    let err = engine.submit_intent(&intent, 2).unwrap_err();
    assert!(err.to_string().contains("already submitted"));
}

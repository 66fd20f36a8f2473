//! Execution engine against the simulation account.
//!
//! Drives one breakout intent through the full lifecycle on the sim
//! broker: stop entry, protective orders, break-even modification,
//! target exit, reconciliation. Useful as a smoke test of the whole
//! wiring and as a worked example of the engine API.

use anyhow::Result;
use clap::Parser;
use qtsw_bins::common::{init_logging, CommonArgs};
use qtsw_core::{
    Direction, ExecutionConfig, ExecutionEngine, Intent, IntentSubmission, SimBroker,
};
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn main() -> Result<()> {
    let args = CommonArgs::parse();
    init_logging(&args.log_level)?;

    tracing::info!("=== QTSW execution engine (simulation account) ===");

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    let mut cfg =
        ExecutionConfig::for_instrument(&args.data_root, &args.instrument, args.execution_instrument());
    cfg.contract_multiplier = Some(dec!(5));

    let broker = SimBroker::with_costs(dec!(0.62), dec!(0.37));
    let engine = ExecutionEngine::new(cfg, broker.clone())?;

    // Reconcile before trading; on a fresh account this just verifies flat.
    let report = engine.recover()?;
    tracing::info!(
        positions = report.snapshot.positions.len(),
        robot_orders = report.robot_working_orders,
        "account verified"
    );

    engine.set_trading_date("2025-11-20");
    engine.set_timetable_validated(true);
    engine.arm_stream("NY1");

    let intent = Intent {
        trading_date: "2025-11-20".to_string(),
        stream: "NY1".to_string(),
        canonical_instrument: args.instrument.clone(),
        execution_instrument: args.execution_instrument().to_string(),
        session: "AM".to_string(),
        slot_time: "08:30".to_string(),
        direction: Some(Direction::Long),
        entry_price: Some(dec!(4500.00)),
        stop_price: dec!(4495.00),
        target_price: dec!(4510.00),
        be_trigger: dec!(4502.50),
        entry_time: None,
        trigger_reason: "range_breakout".to_string(),
    };

    let intent_id = match engine.submit_intent(&intent, 2)? {
        IntentSubmission::Submitted { intent_id, .. } => {
            tracing::info!(%intent_id, "intent submitted");
            intent_id
        }
        IntentSubmission::Blocked { reason, .. } => {
            tracing::warn!(%reason, "intent blocked, nothing to do");
            return Ok(());
        }
    };

    // Walk the market through the breakout, the BE trigger and the target.
    let ticks = [
        dec!(4499.50),
        dec!(4500.25),
        dec!(4501.00),
        dec!(4502.50),
        dec!(4506.00),
        dec!(4510.00),
    ];
    for price in ticks {
        if stop.load(Ordering::SeqCst) {
            tracing::warn!("interrupted, cancelling working orders");
            break;
        }
        tracing::info!(%price, "tick");
        broker.process_tick(args.execution_instrument(), price);
        engine.dispatch_events(broker.drain_events());
        engine.maybe_trigger_break_even(&intent_id, price)?;
    }
    // Drain anything the last tick produced.
    engine.dispatch_events(broker.drain_events());

    let cancelled = engine.shutdown()?;
    tracing::info!(
        cancelled,
        position = broker.position(args.execution_instrument()),
        released = engine.coordinator().record(&intent_id).is_none(),
        "run complete"
    );

    if let Some(entry) = engine
        .journal()
        .entry(&qtsw_core::execution::JournalKey::for_intent(&intent))
    {
        tracing::info!(
            filled = entry.entry_filled,
            fill_quantity = entry.fill_quantity,
            be_modified = entry.be_modified,
            slippage_dollars = ?entry.slippage_dollars,
            "journal summary"
        );
    }

    Ok(())
}

mod common;

use common::{as_of, harness, TestHarness};
use rust_decimal_macros::dec;
use tradeplane::domain::circuit::TripReason;
use tradeplane::domain::ports::CoordinationStore;
use tradeplane::domain::repositories::{AuditRepository, OrderRepository};
use tradeplane::domain::run::{RunOutcome, RunStage, StageStatus};
use tradeplane::domain::trading::types::{OrderSide, OrderStatus};

/// Keep broker events flowing into webhook ingestion while a run executes,
/// the way the serve-mode pump does.
fn spawn_pump(h: &TestHarness) -> tokio::task::JoinHandle<()> {
    let mock = h.mock.clone();
    let gateway = h.ctx.gateway.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(50));
        loop {
            interval.tick().await;
            for event in mock.drain_events() {
                let _ = gateway.ingest_webhook(&event).await;
            }
        }
    })
}

#[tokio::test]
async fn paper_run_top1_bottom1_submits_two_orders() {
    let h = harness().await;
    let pump = spawn_pump(&h);

    let record = h.ctx.orchestrator.run_paper(as_of(), "test").await.unwrap();
    pump.abort();

    assert_eq!(record.outcome, Some(RunOutcome::Success));
    assert!(record.report_payload.is_some());

    // Two orders: long the top symbol, short the bottom one
    let orders = h.ctx.orders.orders_for_date(as_of()).await.unwrap();
    assert_eq!(orders.len(), 2);
    let aapl = orders.iter().find(|o| o.symbol == "AAPL").unwrap();
    assert_eq!(aapl.side, OrderSide::Buy);
    let googl = orders.iter().find(|o| o.symbol == "GOOGL").unwrap();
    assert_eq!(googl.side, OrderSide::Sell);
    for order in &orders {
        assert!(matches!(
            order.status,
            OrderStatus::Accepted | OrderStatus::Filled
        ));
    }

    // One submit audit event per order
    let audits = h.ctx.audit.recent(50).await.unwrap();
    let submits = audits
        .iter()
        .filter(|e| e.event_type == "order" && e.action == "submit")
        .count();
    assert_eq!(submits, 2);
}

#[tokio::test]
async fn rerunning_a_terminal_run_changes_nothing() {
    let h = harness().await;
    let pump = spawn_pump(&h);

    let first = h.ctx.orchestrator.run_paper(as_of(), "test").await.unwrap();
    let broker_orders_after_first = h.mock.submitted_order_count();

    let second = h.ctx.orchestrator.run_paper(as_of(), "test").await.unwrap();
    pump.abort();

    assert_eq!(first.run_id, second.run_id);
    assert_eq!(first.outcome, second.outcome);
    // No new broker orders on the rerun
    assert_eq!(h.mock.submitted_order_count(), broker_orders_after_first);
}

#[tokio::test]
async fn different_trigger_is_a_different_run() {
    let h = harness().await;
    let pump = spawn_pump(&h);
    let scheduled = h.ctx.orchestrator.run_paper(as_of(), "scheduled").await.unwrap();
    let manual = h.ctx.orchestrator.run_paper(as_of(), "manual").await.unwrap();
    pump.abort();
    assert_ne!(scheduled.run_id, manual.run_id);
}

#[tokio::test]
async fn tripped_breaker_fails_the_run_up_front() {
    let h = harness().await;
    h.ctx
        .breaker
        .trip(TripReason::Manual, "pre-run trip", "test")
        .await
        .unwrap();

    let record = h.ctx.orchestrator.run_paper(as_of(), "test").await.unwrap();
    assert_eq!(record.outcome, Some(RunOutcome::Failed));
    assert_eq!(
        record.stage(RunStage::HealthChecks).unwrap().status,
        StageStatus::Failed
    );
    // Nothing reached the broker
    assert_eq!(h.mock.submitted_order_count(), 0);
}

#[tokio::test]
async fn unset_reconciled_gate_fails_the_run() {
    let h = harness().await;
    h.ctx.store.delete("reconciled:execution").await.unwrap();

    let record = h.ctx.orchestrator.run_paper(as_of(), "test").await.unwrap();
    assert_eq!(record.outcome, Some(RunOutcome::Failed));
    assert_eq!(h.mock.submitted_order_count(), 0);
}

#[tokio::test]
async fn risk_rejection_marks_the_run_partial() {
    let h = harness().await;
    // Blacklist the short leg: its order gets rejected at plan time
    let limits_repo =
        tradeplane::infrastructure::persistence::repositories::SqliteRiskLimitsRepository::new(
            h.ctx.database.clone(),
        );
    use tradeplane::domain::repositories::RiskLimitsRepository;
    let mut limits = tradeplane::domain::risk::RiskLimits::default();
    limits.blacklist.insert("GOOGL".to_string());
    limits_repo.upsert("global", &limits).await.unwrap();

    let pump = spawn_pump(&h);
    let record = h.ctx.orchestrator.run_paper(as_of(), "test").await.unwrap();
    pump.abort();

    assert_eq!(record.outcome, Some(RunOutcome::Partial));
    // The clean leg still went out
    let orders = h.ctx.orders.orders_for_date(as_of()).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].symbol, "AAPL");
}

#[tokio::test]
async fn report_carries_notional_pnl() {
    let h = harness().await;
    let pump = spawn_pump(&h);
    let record = h.ctx.orchestrator.run_paper(as_of(), "test").await.unwrap();
    pump.abort();

    let report = record.report_payload.unwrap();
    assert_eq!(report["orders_total"].as_u64(), Some(2));
    let symbols = report["symbols"].as_array().unwrap();
    assert_eq!(symbols.len(), 2);
}

#[tokio::test]
async fn signal_weights_flow_into_submitted_quantities() {
    let h = harness().await;
    let pump = spawn_pump(&h);
    let record = h.ctx.orchestrator.run_paper(as_of(), "test").await.unwrap();
    pump.abort();
    assert_eq!(record.outcome, Some(RunOutcome::Success));

    // top-1/bottom-1 weights are +/-1.0: AAPL 100k/100 = 1000 shares,
    // GOOGL 100k/50 = 2000 shares
    let orders = h.ctx.orders.orders_for_date(as_of()).await.unwrap();
    let aapl = orders.iter().find(|o| o.symbol == "AAPL").unwrap();
    assert_eq!(aapl.qty, dec!(1000));
    let googl = orders.iter().find(|o| o.symbol == "GOOGL").unwrap();
    assert_eq!(googl.qty, dec!(2000));
}

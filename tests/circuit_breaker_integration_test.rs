mod common;

use chrono::Utc;
use common::{harness, intent, step_up_token};
use rust_decimal_macros::dec;
use tradeplane::application::execution::destructive::DestructiveRequest;
use tradeplane::domain::circuit::{BreakerState, TripReason};
use tradeplane::domain::errors::ControlPlaneError;
use tradeplane::domain::repositories::{AuditRepository, PositionRepository};
use tradeplane::domain::trading::types::{OrderSide, Position};

fn destructive(actor: &str, role: &str) -> DestructiveRequest {
    let (ts, token) = step_up_token(actor);
    DestructiveRequest {
        reason: "manual intervention during incident drill".to_string(),
        actor: actor.to_string(),
        role: role.to_string(),
        step_up_ts: ts,
        step_up_token: token,
        ip_address: None,
    }
}

async fn seed_long_position(h: &common::TestHarness, symbol: &str, qty: rust_decimal::Decimal) {
    let mut position = Position::flat(symbol);
    position.qty = qty;
    position.avg_entry_price = dec!(100);
    h.ctx.positions.upsert(&position).await.unwrap();
    h.mock.set_position(symbol, qty, dec!(100));
}

#[tokio::test]
async fn tripped_breaker_blocks_entries_but_admits_reducing_orders() {
    let h = harness().await;
    seed_long_position(&h, "AAPL", dec!(10)).await;

    h.ctx
        .breaker
        .trip(TripReason::Drawdown, "drawdown -6%", "test")
        .await
        .unwrap();

    // Entry: blocked
    let entry = h
        .ctx
        .gateway
        .submit(&intent("MSFT", OrderSide::Buy, dec!(5)))
        .await;
    assert!(matches!(
        entry,
        Err(ControlPlaneError::CircuitBreakerTripped { .. })
    ));

    // Reducing: sell 5 against long 10 goes through
    let reducing = h
        .ctx
        .gateway
        .submit(&intent("AAPL", OrderSide::Sell, dec!(5)))
        .await;
    assert!(reducing.is_ok());

    // Oversized "reduction" that would flip the book: blocked
    let flip = h
        .ctx
        .gateway
        .submit(&intent("AAPL", OrderSide::Sell, dec!(25)))
        .await;
    assert!(matches!(
        flip,
        Err(ControlPlaneError::CircuitBreakerTripped { .. })
    ));
}

#[tokio::test]
async fn concurrent_trips_leave_one_record() {
    let h = harness().await;
    let (a, b) = tokio::join!(
        h.ctx.breaker.trip(TripReason::Manual, "first", "a"),
        h.ctx.breaker.trip(TripReason::Manual, "second", "b"),
    );
    a.unwrap();
    b.unwrap();
    let record = h.ctx.breaker.current().await.unwrap();
    assert_eq!(record.state, BreakerState::Tripped);
    assert_eq!(record.trip_count_today, 1);
}

#[tokio::test]
async fn reset_walks_through_quiet_period() {
    let h = harness().await;
    h.ctx
        .breaker
        .trip(TripReason::Manual, "drill", "ops")
        .await
        .unwrap();

    let all_clear = h.ctx.evaluate_all_clear().await;
    let quiet = h.ctx.breaker.approve_reset("ops", all_clear).await.unwrap();
    assert_eq!(quiet.state, BreakerState::QuietPeriod);

    // Cool-down is zero in tests; the tick reopens
    let reopened = h.ctx.breaker.tick(all_clear).await.unwrap().unwrap();
    assert_eq!(reopened.state, BreakerState::Open);

    // Entries flow again
    let entry = h
        .ctx
        .gateway
        .submit(&intent("AAPL", OrderSide::Buy, dec!(1)))
        .await;
    assert!(entry.is_ok());
}

#[tokio::test]
async fn kill_switch_trips_cancels_and_flattens() {
    let h = harness().await;
    seed_long_position(&h, "AAPL", dec!(10)).await;

    let (cancelled, flattened) = h
        .ctx
        .gateway
        .kill_switch(&destructive("ops@desk", "admin"))
        .await
        .unwrap();
    assert_eq!(cancelled, 0);
    assert_eq!(flattened.len(), 1);
    assert_eq!(flattened[0].side, OrderSide::Sell);
    assert_eq!(flattened[0].qty, dec!(10));

    let record = h.ctx.breaker.current().await.unwrap();
    assert_eq!(record.state, BreakerState::Tripped);

    // Audit carries request and outcome
    let audits = h.ctx.audit.recent(20).await.unwrap();
    assert!(audits
        .iter()
        .any(|e| e.action == "kill_switch" && e.outcome == "requested"));
    assert!(audits
        .iter()
        .any(|e| e.action == "kill_switch" && e.outcome == "completed"));
}

#[tokio::test]
async fn destructive_actions_demand_evidence() {
    let h = harness().await;

    // Viewer role lacks the destructive permission
    let denied = h
        .ctx
        .gateway
        .kill_switch(&destructive("viewer@desk", "viewer"))
        .await;
    assert!(matches!(denied, Err(ControlPlaneError::Auth { .. })));

    // Short reason is rejected before anything happens
    let mut short_reason = destructive("ops@desk", "admin");
    short_reason.reason = "oops".to_string();
    let denied = h.ctx.gateway.kill_switch(&short_reason).await;
    assert!(matches!(denied, Err(ControlPlaneError::Validation { .. })));

    // Tampered step-up token fails closed
    let mut bad_token = destructive("ops@desk", "admin");
    bad_token.step_up_token = "deadbeef".to_string();
    let denied = h.ctx.gateway.kill_switch(&bad_token).await;
    assert!(matches!(denied, Err(ControlPlaneError::Auth { .. })));
}

#[tokio::test]
async fn flatten_rate_limit_enforces_window() {
    let h = harness().await;
    seed_long_position(&h, "AAPL", dec!(5)).await;

    h.ctx
        .gateway
        .flatten_all(&destructive("ops@desk", "admin"))
        .await
        .unwrap();

    // Second flatten inside the window is rate limited
    let second = h
        .ctx
        .gateway
        .flatten_all(&destructive("ops@desk", "admin"))
        .await;
    assert!(matches!(second, Err(ControlPlaneError::RateLimited { .. })));
}

#[tokio::test]
async fn rate_limiter_outage_denies_by_default() {
    let h = harness().await;
    seed_long_position(&h, "AAPL", dec!(5)).await;

    // Take the coordination store down: the limiter window is unreadable and
    // destructive actions fail closed.
    let mem = h.ctx.memory_store.as_ref().unwrap().clone();
    mem.set_failing(true);
    let denied = h
        .ctx
        .gateway
        .cancel_all(&destructive("ops@desk", "admin"))
        .await;
    assert!(matches!(denied, Err(ControlPlaneError::RateLimited { .. })));

    mem.set_failing(false);
    let allowed = h
        .ctx
        .gateway
        .cancel_all(&destructive("ops@desk", "admin"))
        .await;
    assert!(allowed.is_ok());
}

#[tokio::test]
async fn unreadable_store_blocks_entries() {
    let h = harness().await;
    let mem = h.ctx.memory_store.as_ref().unwrap().clone();
    mem.set_failing(true);

    // Breaker state cannot be read: gate fails closed
    let entry = h
        .ctx
        .gateway
        .submit(&intent("AAPL", OrderSide::Buy, dec!(1)))
        .await;
    assert!(entry.is_err());
    mem.set_failing(false);
}

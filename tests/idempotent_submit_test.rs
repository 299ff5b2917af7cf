mod common;

use common::{harness, intent};
use rust_decimal_macros::dec;
use tradeplane::domain::repositories::{AuditRepository, OrderRepository};
use tradeplane::domain::trading::types::{OrderSide, OrderStatus};

#[tokio::test]
async fn duplicate_submit_yields_single_broker_order() {
    let h = harness().await;
    let buy = intent("AAPL", OrderSide::Buy, dec!(10));

    let first = h.ctx.gateway.submit(&buy).await.unwrap();
    assert!(!first.duplicate);
    assert!(first.order.broker_order_id.is_some());

    let second = h.ctx.gateway.submit(&buy).await.unwrap();
    assert!(second.duplicate);
    assert_eq!(
        first.order.client_order_id,
        second.order.client_order_id
    );

    // Exactly one broker order and one submit audit trail
    assert_eq!(h.mock.submitted_order_count(), 1);
    let audits = h.ctx.audit.recent(50).await.unwrap();
    let submits = audits
        .iter()
        .filter(|e| e.event_type == "order" && e.action == "submit")
        .count();
    assert_eq!(submits, 1);
}

#[tokio::test]
async fn concurrent_submits_reach_broker_once() {
    let h = harness().await;
    let buy = intent("MSFT", OrderSide::Buy, dec!(5));

    let (a, b) = tokio::join!(h.ctx.gateway.submit(&buy), h.ctx.gateway.submit(&buy));
    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.order.client_order_id, b.order.client_order_id);
    // One of the two answered without a broker call
    assert!(a.duplicate || b.duplicate);
    assert_eq!(h.mock.submitted_order_count(), 1);
}

#[tokio::test]
async fn terminal_order_short_circuits_resubmission() {
    let h = harness().await;
    let buy = intent("AAPL", OrderSide::Buy, dec!(10));

    h.ctx.gateway.submit(&buy).await.unwrap();
    h.pump_webhooks().await;

    let stored = h
        .ctx
        .orders
        .get(&buy.client_order_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, OrderStatus::Filled);

    // Re-submitting the same intent returns the terminal record untouched
    let again = h.ctx.gateway.submit(&buy).await.unwrap();
    assert!(again.duplicate);
    assert_eq!(again.order.status, OrderStatus::Filled);
    assert_eq!(h.mock.submitted_order_count(), 1);
}

#[tokio::test]
async fn retry_after_transient_broker_failure_keeps_same_id() {
    let h = harness().await;
    let buy = intent("GOOGL", OrderSide::Buy, dec!(4));

    h.mock.set_fail_submits(true);
    let failed = h.ctx.gateway.submit(&buy).await;
    assert!(failed.is_err());

    // The claimed row survives with no broker id; the retry completes it
    let row = h
        .ctx
        .orders
        .get(&buy.client_order_id())
        .await
        .unwrap()
        .unwrap();
    assert!(row.broker_order_id.is_none());
    assert_eq!(row.status, OrderStatus::New);

    h.mock.set_fail_submits(false);
    let receipt = h.ctx.gateway.submit(&buy).await.unwrap();
    assert_eq!(receipt.order.client_order_id, buy.client_order_id());
    assert!(receipt.order.broker_order_id.is_some());
    assert_eq!(h.mock.submitted_order_count(), 1);
}

#[tokio::test]
async fn validation_rejects_malformed_intents() {
    let h = harness().await;

    let zero_qty = intent("AAPL", OrderSide::Buy, dec!(0));
    assert!(h.ctx.gateway.submit(&zero_qty).await.is_err());

    let mut no_price = intent("AAPL", OrderSide::Buy, dec!(1));
    no_price.order_type = tradeplane::domain::trading::types::OrderType::Limit;
    assert!(h.ctx.gateway.submit(&no_price).await.is_err());
}

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{harness, intent};
use rust_decimal_macros::dec;
use tradeplane::domain::repositories::AuditRepository;
use tradeplane::domain::trading::types::{OrderSide, OrderStatus};

#[tokio::test]
async fn aged_open_orders_are_swept() {
    let h = harness().await;

    // A row that never reached the broker, backdated past the TTL
    let mut stranded = intent("AAPL", OrderSide::Buy, dec!(5)).to_order();
    stranded.created_at = Utc::now() - ChronoDuration::minutes(30);
    stranded.updated_at = stranded.created_at;
    use tradeplane::domain::repositories::OrderRepository;
    h.ctx.orders.insert_if_absent(&stranded).await.unwrap();

    let swept = h.ctx.gateway.sweep_stale_orders().await.unwrap();
    assert_eq!(swept, 1);

    let closed = h
        .ctx
        .orders
        .get(&stranded.client_order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed.status, OrderStatus::Canceled);

    // Anomaly recorded
    let audits = h.ctx.audit.recent(20).await.unwrap();
    assert!(audits
        .iter()
        .any(|e| e.event_type == "anomaly" && e.action == "stale_order_sweep"));
}

#[tokio::test]
async fn fresh_orders_are_left_alone() {
    let h = harness().await;
    let fresh = intent("MSFT", OrderSide::Buy, dec!(2)).to_order();
    use tradeplane::domain::repositories::OrderRepository;
    h.ctx.orders.insert_if_absent(&fresh).await.unwrap();

    let swept = h.ctx.gateway.sweep_stale_orders().await.unwrap();
    assert_eq!(swept, 0);
    let row = h
        .ctx
        .orders
        .get(&fresh.client_order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, OrderStatus::New);
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let h = harness().await;
    let mut stranded = intent("GOOGL", OrderSide::Sell, dec!(3)).to_order();
    stranded.created_at = Utc::now() - ChronoDuration::minutes(30);
    stranded.updated_at = stranded.created_at;
    use tradeplane::domain::repositories::OrderRepository;
    h.ctx.orders.insert_if_absent(&stranded).await.unwrap();

    assert_eq!(h.ctx.gateway.sweep_stale_orders().await.unwrap(), 1);
    // Terminal now; the second pass finds nothing
    assert_eq!(h.ctx.gateway.sweep_stale_orders().await.unwrap(), 0);
}

mod common;

use common::{as_of, harness, intent};
use rust_decimal_macros::dec;
use tradeplane::application::execution::webhook::IngestDisposition;
use tradeplane::domain::ports::WebhookEventType;
use tradeplane::domain::repositories::{OrderRepository, PositionRepository};
use tradeplane::domain::trading::types::{OrderSide, OrderStatus};

#[tokio::test]
async fn fill_replay_applies_exactly_once() {
    let h = harness().await;
    let buy = intent("AAPL", OrderSide::Buy, dec!(10));
    h.ctx.gateway.submit(&buy).await.unwrap();

    let events = h.mock.drain_events();
    let accepted = events
        .iter()
        .find(|e| e.event_type == WebhookEventType::Accepted)
        .unwrap();
    let fill = events
        .iter()
        .find(|e| e.event_type == WebhookEventType::Fill)
        .unwrap();

    assert_eq!(
        h.ctx.gateway.ingest_webhook(accepted).await.unwrap(),
        IngestDisposition::Applied
    );

    // Deliver the same fill three times
    assert_eq!(
        h.ctx.gateway.ingest_webhook(fill).await.unwrap(),
        IngestDisposition::Applied
    );
    for _ in 0..2 {
        assert_eq!(
            h.ctx.gateway.ingest_webhook(fill).await.unwrap(),
            IngestDisposition::Replay
        );
    }

    // One fill row, filled_qty set once, position moved once
    let fills = h.ctx.orders.fills_for_date(as_of()).await.unwrap();
    assert_eq!(fills.len(), 1);
    let order = h
        .ctx
        .orders
        .get(&buy.client_order_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_qty, dec!(10));
    let position = h.ctx.positions.get("AAPL").await.unwrap().unwrap();
    assert_eq!(position.qty, dec!(10));
}

#[tokio::test]
async fn accepted_replay_is_a_no_op() {
    let h = harness().await;
    let buy = intent("MSFT", OrderSide::Buy, dec!(3));
    h.ctx.gateway.submit(&buy).await.unwrap();

    let events = h.mock.drain_events();
    let accepted = events
        .iter()
        .find(|e| e.event_type == WebhookEventType::Accepted)
        .unwrap();

    assert_eq!(
        h.ctx.gateway.ingest_webhook(accepted).await.unwrap(),
        IngestDisposition::Applied
    );
    assert_eq!(
        h.ctx.gateway.ingest_webhook(accepted).await.unwrap(),
        IngestDisposition::Replay
    );
}

#[tokio::test]
async fn unknown_order_is_reported_not_errored() {
    let h = harness().await;
    let event = tradeplane::domain::ports::BrokerWebhookEvent {
        event_type: WebhookEventType::Canceled,
        broker_order_id: "never-seen".to_string(),
        client_order_id: None,
        fill: None,
        timestamp: chrono::Utc::now(),
    };
    assert_eq!(
        h.ctx.gateway.ingest_webhook(&event).await.unwrap(),
        IngestDisposition::UnknownOrder
    );
}

#[tokio::test]
async fn out_of_order_terminal_freezes_late_events() {
    let h = harness().await;
    let buy = intent("GOOGL", OrderSide::Buy, dec!(2));
    h.ctx.gateway.submit(&buy).await.unwrap();
    let events = h.mock.drain_events();
    let fill = events
        .iter()
        .find(|e| e.event_type == WebhookEventType::Fill)
        .unwrap();

    // Fill lands first (terminal), then the stale accepted arrives
    h.ctx.gateway.ingest_webhook(fill).await.unwrap();
    let accepted = events
        .iter()
        .find(|e| e.event_type == WebhookEventType::Accepted)
        .unwrap();
    assert_eq!(
        h.ctx.gateway.ingest_webhook(accepted).await.unwrap(),
        IngestDisposition::Replay
    );
    let order = h
        .ctx
        .orders
        .get(&buy.client_order_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
}

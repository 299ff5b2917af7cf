use super::ExecutionGateway;
use crate::domain::errors::ControlPlaneError;
use crate::domain::ports::{BrokerWebhookEvent, WebhookEventType};
use crate::domain::trading::types::{Fill, OrderStatus};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// What happened to an ingested event. Replays and unknown orders are
/// reported, not errored, so the broker does not retry them forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestDisposition {
    Applied,
    Replay,
    UnknownOrder,
}

/// Verify the `X-Webhook-Signature` HMAC over the raw body.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Sign a webhook body; used by the mock broker and tests.
pub fn sign_webhook_body(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

impl ExecutionGateway {
    /// Apply one broker event idempotently.
    ///
    /// Fill events update the order, the fill table, and the symbol position
    /// in one durable-store transaction; replaying the same fill id changes
    /// nothing.
    pub async fn ingest_webhook(
        &self,
        event: &BrokerWebhookEvent,
    ) -> Result<IngestDisposition, ControlPlaneError> {
        let order = match self
            .orders
            .get_by_broker_id(&event.broker_order_id)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?
        {
            Some(order) => Some(order),
            None => match &event.client_order_id {
                Some(client_id) => self
                    .orders
                    .get(client_id)
                    .await
                    .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?,
                None => None,
            },
        };

        let Some(order) = order else {
            warn!(
                "ExecutionGateway: Webhook {} for unknown broker order {}",
                event.event_type.as_str(),
                event.broker_order_id
            );
            self.metrics
                .webhook_events_total
                .with_label_values(&[event.event_type.as_str(), "unknown_order"])
                .inc();
            self.write_audit(
                "webhook",
                "ingest",
                "unknown_order",
                serde_json::json!({
                    "broker_order_id": event.broker_order_id,
                    "event_type": event.event_type.as_str(),
                }),
            )
            .await;
            return Ok(IngestDisposition::UnknownOrder);
        };

        let disposition = match event.event_type {
            WebhookEventType::Fill | WebhookEventType::PartialFill => {
                let Some(ref fill_data) = event.fill else {
                    return Err(ControlPlaneError::validation(
                        "fill event without fill payload",
                    ));
                };
                let fill = Fill {
                    fill_id: fill_data.fill_id.clone(),
                    client_order_id: order.client_order_id.clone(),
                    symbol: order.symbol.clone(),
                    side: order.side,
                    qty: fill_data.qty,
                    price: fill_data.price,
                    fill_time: fill_data.fill_time,
                };
                let applied = self
                    .orders
                    .apply_fill(&fill)
                    .await
                    .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
                if applied.applied {
                    info!(
                        "ExecutionGateway: Fill {} applied to {} ({} @ {}) -> {}",
                        fill.fill_id,
                        order.client_order_id,
                        fill.qty,
                        fill.price,
                        applied.order.status
                    );
                    IngestDisposition::Applied
                } else {
                    IngestDisposition::Replay
                }
            }
            WebhookEventType::Accepted => {
                let applied = self
                    .orders
                    .transition(&order.client_order_id, OrderStatus::Accepted)
                    .await
                    .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
                if applied {
                    IngestDisposition::Applied
                } else {
                    IngestDisposition::Replay
                }
            }
            WebhookEventType::Canceled | WebhookEventType::Rejected | WebhookEventType::Expired => {
                let status = match event.event_type {
                    WebhookEventType::Canceled => OrderStatus::Canceled,
                    WebhookEventType::Rejected => OrderStatus::Rejected,
                    _ => OrderStatus::Expired,
                };
                let applied = self
                    .orders
                    .transition(&order.client_order_id, status)
                    .await
                    .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
                if applied {
                    info!(
                        "ExecutionGateway: Order {} -> {} via webhook",
                        order.client_order_id, status
                    );
                    IngestDisposition::Applied
                } else {
                    IngestDisposition::Replay
                }
            }
        };

        self.metrics
            .webhook_events_total
            .with_label_values(&[
                event.event_type.as_str(),
                match disposition {
                    IngestDisposition::Applied => "applied",
                    IngestDisposition::Replay => "replay",
                    IngestDisposition::UnknownOrder => "unknown_order",
                },
            ])
            .inc();

        Ok(disposition)
    }
}

use crate::domain::errors::ControlPlaneError;
use crate::domain::ports::{BrokerAccount, BrokerAck, BrokerOrder, BrokerPosition, BrokerService};
use crate::domain::trading::types::{Order, OrderStatus, OrderType};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use async_trait::async_trait;
use chrono::DateTime;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

// ===== Wire DTOs =====

#[derive(Debug, Serialize)]
struct OrderRequestBody {
    client_order_id: String,
    symbol: String,
    qty: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderResponseBody {
    id: String,
    #[serde(default)]
    client_order_id: Option<String>,
    symbol: String,
    side: String,
    qty: String,
    #[serde(default)]
    filled_qty: Option<String>,
    #[serde(default)]
    filled_avg_price: Option<String>,
    status: String,
    #[serde(default)]
    submitted_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponseBody {
    portfolio_value: String,
    buying_power: String,
    #[serde(default)]
    market_open: bool,
}

#[derive(Debug, Deserialize)]
struct PositionResponseBody {
    symbol: String,
    qty: String,
    avg_entry_price: String,
}

fn parse_status(raw: &str) -> OrderStatus {
    OrderStatus::from_str(raw).unwrap_or(OrderStatus::Accepted)
}

fn to_broker_order(body: OrderResponseBody) -> BrokerOrder {
    BrokerOrder {
        broker_order_id: body.id,
        client_order_id: body.client_order_id,
        symbol: body.symbol,
        side: body.side.parse().unwrap_or(crate::domain::trading::types::OrderSide::Buy),
        qty: Decimal::from_str(&body.qty).unwrap_or_default(),
        filled_qty: body
            .filled_qty
            .and_then(|q| Decimal::from_str(&q).ok())
            .unwrap_or_default(),
        avg_fill_price: body
            .filled_avg_price
            .and_then(|p| Decimal::from_str(&p).ok()),
        status: parse_status(&body.status),
        submitted_at: body.submitted_at.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&chrono::Utc))
                .ok()
        }),
    }
}

/// REST client for the paper broker.
///
/// The broker accepts a caller-supplied `client_order_id` and answers
/// HTTP 409 for retries of an id it already knows — the duplicate indicator
/// this client folds into a successful ack.
pub struct PaperBrokerClient {
    client: ClientWithMiddleware,
    submit_client: ClientWithMiddleware,
    base_url: String,
    api_token: String,
}

impl PaperBrokerClient {
    pub fn new(base_url: String, api_token: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            submit_client: HttpClientFactory::create_submit_client(),
            base_url,
            api_token,
        }
    }

    fn classify_status(status: u16, body: &str) -> ControlPlaneError {
        if status >= 500 || status == 429 {
            ControlPlaneError::broker_retriable(format!("broker {}: {}", status, body))
        } else {
            ControlPlaneError::broker_permanent(format!("broker {}: {}", status, body))
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ControlPlaneError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ControlPlaneError::broker_retriable(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ControlPlaneError::broker_retriable(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::classify_status(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|e| {
            ControlPlaneError::broker_permanent(format!("broker response decode: {}", e))
        })
    }

    async fn order_by_client_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrder>, ControlPlaneError> {
        let url = format!("{}/v1/orders/by-client/{}", self.base_url, client_order_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ControlPlaneError::broker_retriable(e.to_string()))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ControlPlaneError::broker_retriable(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::classify_status(status.as_u16(), &body));
        }
        let parsed: OrderResponseBody = serde_json::from_str(&body).map_err(|e| {
            ControlPlaneError::broker_permanent(format!("broker response decode: {}", e))
        })?;
        Ok(Some(to_broker_order(parsed)))
    }
}

#[async_trait]
impl BrokerService for PaperBrokerClient {
    async fn submit_order(&self, order: &Order) -> Result<BrokerAck, ControlPlaneError> {
        let body = OrderRequestBody {
            client_order_id: order.client_order_id.clone(),
            symbol: order.symbol.clone(),
            qty: order.qty.to_string(),
            side: order.side.to_string(),
            order_type: order.order_type.to_string(),
            time_in_force: order.time_in_force.to_string(),
            limit_price: match order.order_type {
                OrderType::Limit => order.limit_price.map(|p| p.to_string()),
                OrderType::Market => None,
            },
        };

        let url = format!("{}/v1/orders", self.base_url);
        let response = self
            .submit_client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ControlPlaneError::broker_retriable(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 409 {
            // Duplicate indicator: the broker already holds this id.
            info!(
                "PaperBroker: Duplicate client order id {}; fetching existing order",
                order.client_order_id
            );
            let existing = self
                .order_by_client_id(&order.client_order_id)
                .await?
                .ok_or_else(|| {
                    ControlPlaneError::broker_retriable(format!(
                        "broker reported duplicate for {} but lookup found nothing",
                        order.client_order_id
                    ))
                })?;
            return Ok(BrokerAck {
                broker_order_id: existing.broker_order_id,
                status: existing.status,
                duplicate: true,
            });
        }

        let raw = response
            .text()
            .await
            .map_err(|e| ControlPlaneError::broker_retriable(e.to_string()))?;
        if status >= 400 {
            return Err(Self::classify_status(status, &raw));
        }
        let parsed: OrderResponseBody = serde_json::from_str(&raw).map_err(|e| {
            ControlPlaneError::broker_permanent(format!("broker response decode: {}", e))
        })?;
        Ok(BrokerAck {
            broker_order_id: parsed.id,
            status: parse_status(&parsed.status),
            duplicate: false,
        })
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), ControlPlaneError> {
        let url = format!("{}/v1/orders/{}", self.base_url, broker_order_id);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ControlPlaneError::broker_retriable(e.to_string()))?;
        let status = response.status().as_u16();
        if status == 404 {
            // Already closed broker-side; cancel stays idempotent.
            info!(
                "PaperBroker: Order {} not found for cancel (already closed?)",
                broker_order_id
            );
            return Ok(());
        }
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }
        Ok(())
    }

    async fn get_order(
        &self,
        broker_order_id: &str,
    ) -> Result<Option<BrokerOrder>, ControlPlaneError> {
        let url = format!("{}/v1/orders/{}", self.base_url, broker_order_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ControlPlaneError::broker_retriable(e.to_string()))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ControlPlaneError::broker_retriable(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::classify_status(status.as_u16(), &body));
        }
        let parsed: OrderResponseBody = serde_json::from_str(&body).map_err(|e| {
            ControlPlaneError::broker_permanent(format!("broker response decode: {}", e))
        })?;
        Ok(Some(to_broker_order(parsed)))
    }

    async fn open_orders(&self) -> Result<Vec<BrokerOrder>, ControlPlaneError> {
        // The order filter is a fixed token, not caller input, so the URL is
        // assembled directly.
        let url = format!("{}/v1/orders?status=open", self.base_url);
        let bodies: Vec<OrderResponseBody> = self.get_json(&url).await?;
        Ok(bodies.into_iter().map(to_broker_order).collect())
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, ControlPlaneError> {
        let url = format!("{}/v1/positions", self.base_url);
        let bodies: Vec<PositionResponseBody> = self.get_json(&url).await?;
        Ok(bodies
            .into_iter()
            .map(|p| BrokerPosition {
                symbol: p.symbol,
                qty: Decimal::from_str(&p.qty).unwrap_or_default(),
                avg_entry_price: Decimal::from_str(&p.avg_entry_price).unwrap_or_default(),
            })
            .collect())
    }

    async fn account(&self) -> Result<BrokerAccount, ControlPlaneError> {
        let url = format!("{}/v1/account", self.base_url);
        let body: AccountResponseBody = self.get_json(&url).await?;
        Ok(BrokerAccount {
            portfolio_value: Decimal::from_str(&body.portfolio_value).unwrap_or_default(),
            buying_power: Decimal::from_str(&body.buying_power).unwrap_or_default(),
            market_open: body.market_open,
        })
    }
}

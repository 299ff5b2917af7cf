//! HTTP client adapters for the inter-service ports, used when the services
//! run as separate processes. Wire schemas are shared with the axum handlers.

use crate::domain::errors::{ControlPlaneError, RiskRejectionKind};
use crate::domain::ports::{ExecutionPort, RiskPort, SignalPort, SubmitReceipt};
use crate::domain::risk::plan::{OrderIntent, OrderPlan};
use crate::domain::signals::SignalSet;
use crate::domain::trading::types::{Fill, Order, Position};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::interfaces::http::dto::{
    ErrorBody, GenerateSignalsRequest, HealthResponse, RiskPlanRequest, RiskPlanResponse,
    SubmitOrderResponse, TargetWeightDto,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;

/// Rebuild a typed error from the wire body. The stable `error` code picks
/// the variant; the human message rides along as detail.
fn error_from_wire(status: u16, body: &str) -> ControlPlaneError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let (code, message) = match parsed {
        Some(body) => (body.error, body.message),
        None => (String::new(), format!("HTTP {}: {}", status, body)),
    };
    match code.as_str() {
        "validation_error" => ControlPlaneError::validation(message),
        "auth_error" => ControlPlaneError::auth(message),
        "circuit_breaker_tripped" => ControlPlaneError::CircuitBreakerTripped { reason: message },
        "risk_violation" => {
            let kind = if message.contains("blacklist") {
                RiskRejectionKind::Blacklist
            } else if message.contains("per_symbol_cap") {
                RiskRejectionKind::PerSymbolCap
            } else if message.contains("daily_loss") {
                RiskRejectionKind::DailyLoss
            } else {
                RiskRejectionKind::TotalNotional
            };
            ControlPlaneError::RiskViolation {
                kind,
                detail: message,
            }
        }
        "model_not_loaded" => ControlPlaneError::ModelNotLoaded {
            strategy_id: message,
        },
        "reconciler_not_ready" => ControlPlaneError::ReconcilerNotReady { service: message },
        "rate_limited" => ControlPlaneError::RateLimited { detail: message },
        _ if status >= 500 => ControlPlaneError::storage_transient(message),
        _ => ControlPlaneError::broker_permanent(message),
    }
}

async fn post_json<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
    client: &ClientWithMiddleware,
    url: &str,
    request: &Req,
) -> Result<Resp, ControlPlaneError> {
    let response = client
        .post(url)
        .json(request)
        .send()
        .await
        .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
    if status >= 400 {
        return Err(error_from_wire(status, &body));
    }
    serde_json::from_str(&body)
        .map_err(|e| ControlPlaneError::storage_transient(format!("response decode: {}", e)))
}

async fn get_json<Resp: serde::de::DeserializeOwned>(
    client: &ClientWithMiddleware,
    url: &str,
) -> Result<Resp> {
    let response = client.get(url).send().await.context("Request failed")?;
    let status = response.status();
    let body = response.text().await.context("Body read failed")?;
    if !status.is_success() {
        anyhow::bail!("HTTP {}: {}", status, body);
    }
    serde_json::from_str(&body).context("Response decode failed")
}

pub struct HttpSignalPort {
    client: ClientWithMiddleware,
    base_url: String,
}

impl HttpSignalPort {
    pub fn new(base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
        }
    }
}

#[async_trait]
impl SignalPort for HttpSignalPort {
    async fn health(&self) -> Result<bool> {
        let health: HealthResponse =
            get_json(&self.client, &format!("{}/health", self.base_url)).await?;
        Ok(health.status == "ok" && health.model_loaded.unwrap_or(false))
    }

    async fn generate(
        &self,
        symbols: &[String],
        as_of: NaiveDate,
        top_n: Option<usize>,
    ) -> Result<SignalSet, ControlPlaneError> {
        let request = GenerateSignalsRequest {
            symbols: symbols.to_vec(),
            as_of_date: as_of,
            strategy_id: None,
            top_n,
        };
        post_json(
            &self.client,
            &format!("{}/api/v1/signals/generate", self.base_url),
            &request,
        )
        .await
    }
}

pub struct HttpRiskPort {
    client: ClientWithMiddleware,
    base_url: String,
}

impl HttpRiskPort {
    pub fn new(base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
        }
    }
}

#[async_trait]
impl RiskPort for HttpRiskPort {
    async fn plan(
        &self,
        strategy_id: &str,
        as_of: NaiveDate,
        weights: &[(String, Decimal)],
    ) -> Result<OrderPlan, ControlPlaneError> {
        let request = RiskPlanRequest {
            strategy_id: strategy_id.to_string(),
            as_of_date: as_of,
            target_weights: weights
                .iter()
                .map(|(symbol, weight)| TargetWeightDto {
                    symbol: symbol.clone(),
                    weight: *weight,
                })
                .collect(),
        };
        let response: RiskPlanResponse = post_json(
            &self.client,
            &format!("{}/api/v1/risk/plan", self.base_url),
            &request,
        )
        .await?;
        Ok(response.plan)
    }

    async fn pre_check(&self, order: &Order) -> Result<(), ControlPlaneError> {
        let response = self
            .client
            .post(format!("{}/api/v1/risk/pre-check", self.base_url))
            .json(order)
            .send()
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_wire(status, &body));
        }
        Ok(())
    }
}

pub struct HttpExecutionPort {
    client: ClientWithMiddleware,
    base_url: String,
}

impl HttpExecutionPort {
    pub fn new(base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
        }
    }
}

#[async_trait]
impl ExecutionPort for HttpExecutionPort {
    async fn health(&self) -> Result<bool> {
        let health: HealthResponse =
            get_json(&self.client, &format!("{}/health", self.base_url)).await?;
        Ok(health.status == "ok")
    }

    async fn submit(&self, intent: &OrderIntent) -> Result<SubmitReceipt, ControlPlaneError> {
        // Service-to-service submissions carry an explicit operator claim.
        let response = self
            .client
            .post(format!("{}/api/v1/orders", self.base_url))
            .header("x-actor-role", "operator")
            .json(intent)
            .send()
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
        if status >= 400 {
            return Err(error_from_wire(status, &body));
        }
        let parsed: SubmitOrderResponse = serde_json::from_str(&body).map_err(|e| {
            ControlPlaneError::storage_transient(format!("response decode: {}", e))
        })?;
        Ok(SubmitReceipt {
            order: parsed.order,
            duplicate: parsed.duplicate_ok,
        })
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        get_json(&self.client, &format!("{}/api/v1/positions", self.base_url)).await
    }

    async fn orders_for_date(&self, date: NaiveDate) -> Result<Vec<Order>> {
        get_json(
            &self.client,
            &format!("{}/api/v1/orders?date={}", self.base_url, date.format("%Y-%m-%d")),
        )
        .await
    }

    async fn fills_for_date(&self, date: NaiveDate) -> Result<Vec<Fill>> {
        get_json(
            &self.client,
            &format!("{}/api/v1/fills?date={}", self.base_url, date.format("%Y-%m-%d")),
        )
        .await
    }
}

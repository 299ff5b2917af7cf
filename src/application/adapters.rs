//! In-process adapters binding the application services to the inter-service
//! ports. The HTTP client adapters in `infrastructure::interservice` serve
//! split deployments; these serve serve-all mode and tests.

use crate::application::execution::ExecutionGateway;
use crate::application::reconciler::Reconciler;
use crate::application::risk_manager::RiskManager;
use crate::application::signal_service::SignalService;
use crate::domain::errors::ControlPlaneError;
use crate::domain::ports::{
    ExecutionPort, ReconcileStatus, ReconcilerPort, RiskPort, SignalPort, SubmitReceipt,
};
use crate::domain::risk::plan::{OrderIntent, OrderPlan};
use crate::domain::signals::SignalSet;
use crate::domain::trading::types::{Fill, Order, Position};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

#[async_trait]
impl SignalPort for SignalService {
    async fn health(&self) -> Result<bool> {
        Ok(self.loaded_model().is_some())
    }

    async fn generate(
        &self,
        symbols: &[String],
        as_of: NaiveDate,
        top_n: Option<usize>,
    ) -> Result<SignalSet, ControlPlaneError> {
        SignalService::generate(self, symbols, as_of, top_n).await
    }
}

#[async_trait]
impl RiskPort for RiskManager {
    async fn plan(
        &self,
        strategy_id: &str,
        as_of: NaiveDate,
        weights: &[(String, Decimal)],
    ) -> Result<OrderPlan, ControlPlaneError> {
        RiskManager::plan(self, strategy_id, as_of, weights).await
    }

    async fn pre_check(&self, order: &Order) -> Result<(), ControlPlaneError> {
        RiskManager::pre_check(self, order).await
    }
}

#[async_trait]
impl ExecutionPort for ExecutionGateway {
    async fn health(&self) -> Result<bool> {
        Ok(true)
    }

    async fn submit(&self, intent: &OrderIntent) -> Result<SubmitReceipt, ControlPlaneError> {
        ExecutionGateway::submit(self, intent).await
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        self.positions.all().await
    }

    async fn orders_for_date(&self, date: NaiveDate) -> Result<Vec<Order>> {
        self.orders.orders_for_date(date).await
    }

    async fn fills_for_date(&self, date: NaiveDate) -> Result<Vec<Fill>> {
        self.orders.fills_for_date(date).await
    }
}

#[async_trait]
impl ReconcilerPort for Reconciler {
    async fn status(&self) -> Result<ReconcileStatus> {
        Reconciler::status(self).await
    }
}

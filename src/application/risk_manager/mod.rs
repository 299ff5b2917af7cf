pub mod pipeline;

use crate::application::circuit_breaker::CircuitBreakerClient;
use crate::domain::errors::ControlPlaneError;
use crate::domain::ports::{BrokerService, CoordinationStore, PriceSource};
use crate::domain::repositories::{PositionRepository, RiskLimitsRepository};
use crate::domain::risk::filters::{RejectCode, ValidationContext, ValidationResult};
use crate::domain::risk::plan::{OrderIntent, OrderPlan, PlanRejection};
use crate::domain::trading::types::{Order, OrderSide, OrderType, Position, TimeInForce};
use crate::infrastructure::observability::Metrics;
use chrono::NaiveDate;
use pipeline::RiskValidationPipeline;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// Translates target weights into a concrete order plan under the operative
/// limits and breaker state.
pub struct RiskManager {
    positions: Arc<dyn PositionRepository>,
    limits: Arc<dyn RiskLimitsRepository>,
    prices: Arc<dyn PriceSource>,
    broker: Arc<dyn BrokerService>,
    breaker: CircuitBreakerClient,
    store: Arc<dyn CoordinationStore>,
    pipeline: RiskValidationPipeline,
    metrics: Metrics,
}

impl RiskManager {
    pub fn new(
        positions: Arc<dyn PositionRepository>,
        limits: Arc<dyn RiskLimitsRepository>,
        prices: Arc<dyn PriceSource>,
        broker: Arc<dyn BrokerService>,
        breaker: CircuitBreakerClient,
        store: Arc<dyn CoordinationStore>,
        metrics: Metrics,
    ) -> Self {
        Self {
            positions,
            limits,
            prices,
            broker,
            breaker,
            store,
            pipeline: RiskValidationPipeline::standard(),
            metrics,
        }
    }

    /// Today's signed portfolio return against the first observed value of
    /// the day, kept as a shared counter so every service sees the same
    /// baseline.
    async fn drawdown_today(
        &self,
        as_of: NaiveDate,
        portfolio_value: Decimal,
    ) -> Result<Decimal, ControlPlaneError> {
        let key = format!("risk:day_start:{}", as_of.format("%Y-%m-%d"));
        let start = match self
            .store
            .get(&key)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?
        {
            Some(raw) => raw.parse::<Decimal>().unwrap_or(portfolio_value),
            None => {
                // First touch of the day claims the baseline; losers of the
                // race read the winner's value.
                let claimed = self
                    .store
                    .compare_and_set(&key, None, &portfolio_value.to_string())
                    .await
                    .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
                if claimed {
                    portfolio_value
                } else {
                    self.store
                        .get(&key)
                        .await
                        .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?
                        .and_then(|raw| raw.parse::<Decimal>().ok())
                        .unwrap_or(portfolio_value)
                }
            }
        };
        if start.is_zero() {
            return Ok(Decimal::ZERO);
        }
        Ok((portfolio_value - start) / start)
    }

    /// Build the order plan for a set of target weights.
    pub async fn plan(
        &self,
        strategy_id: &str,
        as_of: NaiveDate,
        target_weights: &[(String, Decimal)],
    ) -> Result<OrderPlan, ControlPlaneError> {
        let account = self.broker.account().await?;
        let portfolio_value = account.portfolio_value;

        let positions: HashMap<String, Position> = self
            .positions
            .all()
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();

        let limits = self
            .limits
            .effective_for_strategy(strategy_id)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;

        let breaker_state = self.breaker.state_or_tripped().await;
        let drawdown_today = self.drawdown_today(as_of, portfolio_value).await?;

        let mut symbols: HashSet<String> =
            target_weights.iter().map(|(s, _)| s.clone()).collect();
        symbols.extend(positions.keys().cloned());
        let symbol_list: Vec<String> = symbols.into_iter().collect();
        let prices = self
            .prices
            .last_prices(&symbol_list)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;

        let existing_exposure: Decimal = positions
            .values()
            .map(|p| {
                let px = prices.get(&p.symbol).copied().unwrap_or(p.avg_entry_price);
                p.notional(px)
            })
            .sum();

        let mut rejections = Vec::new();
        let mut candidates = Vec::new();

        for (symbol, weight) in target_weights {
            let Some(price) = prices.get(symbol).copied().filter(|p| !p.is_zero()) else {
                rejections.push(PlanRejection {
                    symbol: symbol.clone(),
                    side: OrderSide::Buy,
                    qty: Decimal::ZERO,
                    code: "validation_error".to_string(),
                    reason: format!("no reference price for {}", symbol),
                });
                continue;
            };
            let current_qty = positions
                .get(symbol)
                .map(|p| p.qty)
                .unwrap_or(Decimal::ZERO);
            let target_qty_raw = weight * portfolio_value / price;
            // Truncate toward zero to the lot grid, never up.
            let target_qty =
                target_qty_raw.signum() * limits.truncate_to_lot(target_qty_raw.abs());
            let delta = target_qty - current_qty;
            let qty = limits.truncate_to_lot(delta.abs());
            if qty.is_zero() {
                continue;
            }
            let side = if delta > Decimal::ZERO {
                OrderSide::Buy
            } else {
                OrderSide::Sell
            };
            candidates.push(OrderIntent {
                strategy_id: strategy_id.to_string(),
                symbol: symbol.clone(),
                side,
                qty,
                order_type: OrderType::Market,
                limit_price: None,
                time_in_force: TimeInForce::Day,
                as_of_date: as_of,
            });
        }

        // Reducing orders first so freed notional is available to entries.
        candidates.sort_by(|a, b| {
            let a_reducing = a.to_order().is_reducing_against(
                positions.get(&a.symbol).map(|p| p.qty).unwrap_or_default(),
            );
            let b_reducing = b.to_order().is_reducing_against(
                positions.get(&b.symbol).map(|p| p.qty).unwrap_or_default(),
            );
            b_reducing
                .cmp(&a_reducing)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        let mut orders = Vec::new();
        let mut planned_exposure = Decimal::ZERO;
        for intent in candidates {
            let order = intent.to_order();
            let ctx = ValidationContext {
                order: &order,
                positions: &positions,
                prices: &prices,
                portfolio_value,
                existing_exposure,
                planned_exposure,
                drawdown_today,
                breaker_state,
                limits: &limits,
            };
            match self.pipeline.validate(&ctx).await {
                ValidationResult::Approve => {
                    planned_exposure += ctx.order_notional();
                    orders.push(intent);
                }
                ValidationResult::Reject { code, reason } => {
                    let code_str = match &code {
                        RejectCode::CircuitBreaker => "circuit_breaker".to_string(),
                        RejectCode::Risk(kind) => kind.to_string(),
                    };
                    self.metrics
                        .risk_rejections_total
                        .with_label_values(&[code_str.as_str()])
                        .inc();
                    rejections.push(PlanRejection {
                        symbol: intent.symbol,
                        side: intent.side,
                        qty: intent.qty,
                        code: code_str,
                        reason,
                    });
                }
            }
        }

        info!(
            "RiskManager: Plan for {} on {}: {} orders, {} rejections (pv {}, exposure {})",
            strategy_id,
            as_of,
            orders.len(),
            rejections.len(),
            portfolio_value,
            existing_exposure
        );

        Ok(OrderPlan {
            strategy_id: strategy_id.to_string(),
            as_of_date: as_of,
            orders,
            rejections,
            portfolio_value,
        })
    }

    /// Single-order pre-check used by the execution gateway before each
    /// broker call. Maps the first failed check onto the typed error the
    /// caller surfaces.
    pub async fn pre_check(&self, order: &Order) -> Result<(), ControlPlaneError> {
        let account = self.broker.account().await?;
        let portfolio_value = account.portfolio_value;

        let positions: HashMap<String, Position> = self
            .positions
            .all()
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();

        let limits = self
            .limits
            .effective_for_strategy(&order.strategy_id)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;

        let breaker_state = self.breaker.state_or_tripped().await;
        let as_of = chrono::Utc::now().date_naive();
        let drawdown_today = self.drawdown_today(as_of, portfolio_value).await?;

        let mut symbols: Vec<String> = positions.keys().cloned().collect();
        if !symbols.contains(&order.symbol) {
            symbols.push(order.symbol.clone());
        }
        let prices = self
            .prices
            .last_prices(&symbols)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;

        let existing_exposure: Decimal = positions
            .values()
            .map(|p| {
                let px = prices.get(&p.symbol).copied().unwrap_or(p.avg_entry_price);
                p.notional(px)
            })
            .sum();

        let ctx = ValidationContext {
            order,
            positions: &positions,
            prices: &prices,
            portfolio_value,
            existing_exposure,
            planned_exposure: Decimal::ZERO,
            drawdown_today,
            breaker_state,
            limits: &limits,
        };

        match self.pipeline.validate(&ctx).await {
            ValidationResult::Approve => Ok(()),
            ValidationResult::Reject { code, reason } => match code {
                RejectCode::CircuitBreaker => {
                    Err(ControlPlaneError::CircuitBreakerTripped { reason })
                }
                RejectCode::Risk(kind) => Err(ControlPlaneError::RiskViolation {
                    kind,
                    detail: reason,
                }),
            },
        }
    }
}

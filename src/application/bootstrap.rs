//! Service wiring: every handle is built once here and injected explicitly.
//! No ambient singletons — the only process-wide state is the breaker
//! record, and that lives in the coordination store.

use crate::application::circuit_breaker::{AllClear, BreakerConfig, CircuitBreakerClient};
use crate::application::execution::{ExecutionGateway, GatewayConfig};
use crate::application::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::application::reconciler::{Reconciler, ReconcilerConfig};
use crate::application::risk_manager::RiskManager;
use crate::application::signal_service::{SignalService, SignalServiceConfig};
use crate::config::Config;
use crate::domain::auth::StepUpVerifier;
use crate::domain::ports::{
    BrokerService, CoordinationStore, ExecutionPort, FeatureSource, RiskPort, SignalPort,
};
use crate::domain::repositories::{
    AuditRepository, OrderRepository, PositionRepository, RunRepository,
};
use crate::infrastructure::broker::{FillMode, MockBroker, PaperBrokerClient};
use crate::infrastructure::coordination::{InMemoryCoordinationStore, RedisCoordinationStore};
use crate::infrastructure::interservice::{HttpExecutionPort, HttpRiskPort, HttpSignalPort};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteAuditRepository, SqliteFeatureRepository, SqliteModelRegistryRepository,
    SqliteOrderRepository, SqlitePositionRepository, SqliteRiskLimitsRepository,
    SqliteRunRepository, SqliteReconcileSnapshotRepository,
};
use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Fully wired control plane.
pub struct AppContext {
    pub config: Config,
    pub database: Database,
    pub store: Arc<dyn CoordinationStore>,
    /// Present when the coordination store is the in-process one; tests use
    /// its failure hook.
    pub memory_store: Option<Arc<InMemoryCoordinationStore>>,
    pub broker: Arc<dyn BrokerService>,
    /// Present in dry-run: the serve loop pumps its queued events into the
    /// webhook ingestion path.
    pub mock_broker: Option<Arc<MockBroker>>,
    pub features: Arc<SqliteFeatureRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub positions: Arc<dyn PositionRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub runs: Arc<dyn RunRepository>,
    pub breaker: CircuitBreakerClient,
    pub signal: Arc<SignalService>,
    pub risk: Arc<RiskManager>,
    pub gateway: Arc<ExecutionGateway>,
    pub reconciler: Arc<Reconciler>,
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Metrics,
}

impl AppContext {
    pub async fn build(config: Config) -> Result<Arc<Self>> {
        let metrics = Metrics::new()?;
        let database = Database::new(&config.stores.database_url).await?;

        let (store, memory_store): (
            Arc<dyn CoordinationStore>,
            Option<Arc<InMemoryCoordinationStore>>,
        ) = if config.stores.coordination_url.starts_with("memory://") {
            info!("Bootstrap: Using in-memory coordination store");
            let mem = Arc::new(InMemoryCoordinationStore::new());
            (mem.clone(), Some(mem))
        } else {
            (
                Arc::new(
                    RedisCoordinationStore::connect(&config.stores.coordination_url)
                        .await
                        .context("Coordination store connection failed")?,
                ),
                None,
            )
        };

        let (broker, mock_broker): (Arc<dyn BrokerService>, Option<Arc<MockBroker>>) =
            if config.dry_run {
                info!("Bootstrap: DRY_RUN active; broker is the in-process mock");
                let mock = Arc::new(MockBroker::new(FillMode::Immediate));
                (mock.clone(), Some(mock))
            } else {
                info!(
                    "Bootstrap: Using paper broker at {}",
                    config.broker.base_url
                );
                (
                    Arc::new(PaperBrokerClient::new(
                        config.broker.base_url.clone(),
                        config.broker.api_token.clone(),
                    )),
                    None,
                )
            };

        let orders = Arc::new(SqliteOrderRepository::new(database.clone()));
        let positions = Arc::new(SqlitePositionRepository::new(database.clone()));
        let orders_handle: Arc<dyn OrderRepository> = orders.clone();
        let positions_handle: Arc<dyn PositionRepository> = positions.clone();
        let registry = Arc::new(SqliteModelRegistryRepository::new(database.clone()));
        let runs: Arc<dyn RunRepository> = Arc::new(SqliteRunRepository::new(database.clone()));
        let audit: Arc<dyn AuditRepository> =
            Arc::new(SqliteAuditRepository::new(database.clone()));
        let snapshots = Arc::new(SqliteReconcileSnapshotRepository::new(database.clone()));
        let limits = Arc::new(SqliteRiskLimitsRepository::new(database.clone()));
        let features = Arc::new(SqliteFeatureRepository::new(database.clone()));

        let breaker = CircuitBreakerClient::new(
            store.clone(),
            BreakerConfig {
                cooldown: Duration::from_secs(config.risk.cb_cooldown_secs),
                max_drawdown: config.risk.cb_max_drawdown,
                max_data_age: Duration::from_secs(config.risk.cb_max_data_age_secs),
                broker_error_threshold: config.risk.cb_broker_error_threshold,
            },
            metrics.clone(),
        );

        let risk = Arc::new(RiskManager::new(
            positions.clone(),
            limits,
            features.clone(),
            broker.clone(),
            breaker.clone(),
            store.clone(),
            metrics.clone(),
        ));
        let risk_port: Arc<dyn RiskPort> = match &config.control.risk_url {
            Some(url) => Arc::new(HttpRiskPort::new(url.clone())),
            None => risk.clone(),
        };

        let step_up = StepUpVerifier::new(
            config.risk.step_up_secret.as_bytes().to_vec(),
            config.risk.step_up_max_age_secs,
        );
        let gateway = Arc::new(ExecutionGateway::new(
            orders.clone(),
            positions.clone(),
            broker.clone(),
            risk_port.clone(),
            breaker.clone(),
            audit.clone(),
            store.clone(),
            step_up,
            GatewayConfig {
                broker_deadline: Duration::from_secs(config.control.broker_deadline_secs),
                broker_max_attempts: config.control.broker_submit_max_attempts,
                stale_order_ttl: Duration::from_secs(config.control.stale_order_ttl_secs),
                sweep_interval: Duration::from_secs(config.control.sweep_interval_secs),
                min_reason_len: config.risk.min_reason_len,
                rate_limit_window: Duration::from_secs(config.risk.rate_limit_window_secs),
                rate_limit_max: config.risk.rate_limit_max,
                rate_limit_fail_open: config.risk.rate_limit_fail_open,
                webhook_secret: config.broker.webhook_secret.clone(),
            },
            metrics.clone(),
        ));

        let signal = Arc::new(SignalService::new(
            registry,
            features.clone(),
            SignalServiceConfig {
                strategy_id: config.control.strategy_id.clone(),
                min_universe: config.control.min_universe,
                top_n: config.control.top_n,
                reload_interval: Duration::from_secs(config.control.model_reload_interval_secs),
            },
            metrics.clone(),
        ));

        let reconciler = Arc::new(Reconciler::new(
            orders,
            positions,
            broker.clone(),
            snapshots,
            audit.clone(),
            store.clone(),
            ReconcilerConfig {
                interval: Duration::from_secs(config.control.reconcile_interval_secs),
                ..Default::default()
            },
            metrics.clone(),
        ));

        let signal_port: Arc<dyn SignalPort> = match &config.control.signal_url {
            Some(url) => Arc::new(HttpSignalPort::new(url.clone())),
            None => signal.clone(),
        };
        let execution_port: Arc<dyn ExecutionPort> = match &config.control.execution_url {
            Some(url) => Arc::new(HttpExecutionPort::new(url.clone())),
            None => gateway.clone(),
        };

        let orchestrator = Arc::new(Orchestrator::new(
            signal_port,
            risk_port,
            execution_port,
            runs.clone(),
            breaker.clone(),
            store.clone(),
            OrchestratorConfig {
                strategy_id: config.control.strategy_id.clone(),
                universe: config.control.universe.clone(),
                top_n: Some(config.control.top_n),
                fill_deadline: Duration::from_secs(config.control.fill_deadline_secs),
                fill_poll_interval: Duration::from_secs(2),
            },
            metrics.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            database,
            store,
            memory_store,
            broker,
            mock_broker,
            features,
            orders: orders_handle,
            positions: positions_handle,
            audit,
            runs,
            breaker,
            signal,
            risk,
            gateway,
            reconciler,
            orchestrator,
            metrics,
        }))
    }

    /// Current all-clear evidence for breaker resets and quiet-period ticks.
    pub async fn evaluate_all_clear(&self) -> AllClear {
        let data_fresh = match self.features.latest_timestamp().await {
            Ok(Some(latest)) => {
                let age = Utc::now().signed_duration_since(latest);
                age.num_seconds() <= self.config.risk.cb_max_data_age_secs as i64
            }
            Ok(None) => false,
            Err(_) => false,
        };
        let broker_healthy = match self.store.get("cb:broker_errors").await {
            Ok(Some(raw)) => {
                raw.parse::<i64>().unwrap_or(0) < self.config.risk.cb_broker_error_threshold
            }
            Ok(None) => true,
            Err(_) => false,
        };
        let drawdown_recovered = match self.broker.account().await {
            Ok(account) => {
                let key = format!("risk:day_start:{}", Utc::now().date_naive().format("%Y-%m-%d"));
                match self.store.get(&key).await {
                    Ok(Some(raw)) => match raw.parse::<Decimal>() {
                        Ok(start) if !start.is_zero() => {
                            (account.portfolio_value - start) / start
                                > -self.config.risk.cb_max_drawdown
                        }
                        _ => true,
                    },
                    Ok(None) => true,
                    Err(_) => false,
                }
            }
            Err(_) => false,
        };
        AllClear {
            drawdown_recovered,
            data_fresh,
            broker_healthy,
        }
    }

    /// Launch the always-on background loops: boot reconcile then cadence,
    /// stale-order sweeper, registry poller, breaker quiet-period tick, and
    /// (dry-run) the mock webhook pump.
    pub async fn spawn_background(self: &Arc<Self>) -> Result<()> {
        // Boot reconcile gates write traffic; run it to completion first.
        self.reconciler.reconcile_on_boot().await?;

        tokio::spawn(self.reconciler.clone().run());
        tokio::spawn(self.gateway.clone().run_sweeper());
        tokio::spawn(self.signal.clone().run_poller());

        let ctx = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let all_clear = ctx.evaluate_all_clear().await;
                if let Err(e) = ctx.breaker.tick(all_clear).await {
                    error!("Breaker tick failed: {}", e);
                }
            }
        });

        if let Some(mock) = &self.mock_broker {
            let mock = mock.clone();
            let gateway = self.gateway.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(500));
                loop {
                    interval.tick().await;
                    for event in mock.drain_events() {
                        if let Err(e) = gateway.ingest_webhook(&event).await {
                            error!("Mock webhook pump failed: {}", e);
                        }
                    }
                }
            });
        }
        Ok(())
    }
}

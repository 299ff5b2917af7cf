//! Shared harness: a fully wired dry-run control plane on in-memory stores,
//! with a seeded model, features, and prices.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::io::Write;
use std::sync::Arc;
use tradeplane::application::bootstrap::AppContext;
use tradeplane::config::{
    BrokerEnvConfig, Config, ControlEnvConfig, RiskEnvConfig, StoreEnvConfig,
};
use tradeplane::domain::model::{ModelArtifact, ModelMetadata, ModelStatus, StrategyDescriptor};
use tradeplane::domain::repositories::ModelRegistryRepository;
use tradeplane::infrastructure::broker::MockBroker;
use tradeplane::infrastructure::persistence::repositories::SqliteModelRegistryRepository;

pub const STRATEGY: &str = "default";
pub const STEP_UP_SECRET: &str = "test-step-up-secret";

pub fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
}

pub struct TestHarness {
    pub ctx: Arc<AppContext>,
    pub mock: Arc<MockBroker>,
    _model_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Deliver every queued broker event through webhook ingestion, exactly
    /// as the serve-mode pump would.
    pub async fn pump_webhooks(&self) {
        for event in self.mock.drain_events() {
            self.ctx
                .gateway
                .ingest_webhook(&event)
                .await
                .expect("webhook ingestion");
        }
    }
}

pub fn test_config() -> Config {
    Config {
        dry_run: true,
        http_bind: "127.0.0.1:0".to_string(),
        broker: BrokerEnvConfig {
            base_url: String::new(),
            api_token: String::new(),
            webhook_secret: "test-webhook-secret".to_string(),
        },
        stores: StoreEnvConfig {
            database_url: "sqlite::memory:".to_string(),
            coordination_url: "memory://".to_string(),
        },
        risk: RiskEnvConfig {
            cb_max_drawdown: dec!(0.05),
            cb_max_data_age_secs: 1800,
            cb_broker_error_threshold: 10,
            cb_cooldown_secs: 0,
            min_reason_len: 10,
            rate_limit_max: 1,
            rate_limit_window_secs: 300,
            rate_limit_fail_open: false,
            step_up_secret: STEP_UP_SECRET.to_string(),
            step_up_max_age_secs: 300,
        },
        control: ControlEnvConfig {
            strategy_id: STRATEGY.to_string(),
            universe: vec![
                "AAPL".to_string(),
                "MSFT".to_string(),
                "GOOGL".to_string(),
            ],
            min_universe: 2,
            top_n: 1,
            model_reload_interval_secs: 300,
            reconcile_interval_secs: 180,
            sweep_interval_secs: 300,
            stale_order_ttl_secs: 900,
            broker_deadline_secs: 5,
            broker_submit_max_attempts: 3,
            fill_deadline_secs: 2,
            signal_url: None,
            risk_url: None,
            execution_url: None,
        },
    }
}

fn write_model_artifact(dir: &tempfile::TempDir) -> String {
    let artifact = ModelArtifact {
        descriptor: StrategyDescriptor::Momentum {
            feature: "mom_20".to_string(),
            scale: 1.0,
        },
        feature_names: vec!["mom_20".to_string()],
    };
    let path = dir.path().join("model-v1.json");
    let mut file = std::fs::File::create(&path).expect("model file");
    file.write_all(&serde_json::to_vec(&artifact).expect("model json"))
        .expect("model write");
    path.to_string_lossy().into_owned()
}

/// Build the harness: wired context, active model, seeded features/prices,
/// boot reconcile done (gates set).
pub async fn harness() -> TestHarness {
    harness_with_config(test_config()).await
}

pub async fn harness_with_config(config: Config) -> TestHarness {
    let ctx = AppContext::build(config).await.expect("context build");
    let mock = ctx.mock_broker.clone().expect("dry-run mock broker");

    // Activate a model and load it
    let model_dir = tempfile::tempdir().expect("tempdir");
    let model_path = write_model_artifact(&model_dir);
    let registry = SqliteModelRegistryRepository::new(ctx.database.clone());
    registry
        .insert(&ModelMetadata {
            strategy_id: STRATEGY.to_string(),
            version: "v1".to_string(),
            status: ModelStatus::Active,
            model_path,
            performance_metrics: serde_json::json!({"sharpe": 1.1}),
            activated_at: Some(Utc::now()),
            deactivated_at: None,
        })
        .await
        .expect("registry insert");
    ctx.signal.poll_registry().await.expect("model load");

    // Features: AAPL strongest, GOOGL weakest. Prices for sizing.
    for (symbol, momentum, price) in [
        ("AAPL", 1.0_f64, dec!(100)),
        ("MSFT", 0.2, dec!(200)),
        ("GOOGL", -1.2, dec!(50)),
    ] {
        ctx.features
            .put_feature(symbol, as_of(), "mom_20", momentum)
            .await
            .expect("feature seed");
        ctx.features
            .put_price(symbol, price)
            .await
            .expect("price seed");
        mock.set_price(symbol, price);
    }

    // Boot reconcile sets the per-service gates
    ctx.reconciler
        .reconcile_once()
        .await
        .expect("boot reconcile");

    TestHarness {
        ctx,
        mock,
        _model_dir: model_dir,
    }
}

pub fn step_up_token(actor: &str) -> (i64, String) {
    let verifier = tradeplane::domain::auth::StepUpVerifier::new(
        STEP_UP_SECRET.as_bytes().to_vec(),
        300,
    );
    let now = Utc::now().timestamp();
    (now, verifier.mint(actor, now))
}

pub fn intent(
    symbol: &str,
    side: tradeplane::domain::trading::types::OrderSide,
    qty: Decimal,
) -> tradeplane::domain::risk::plan::OrderIntent {
    tradeplane::domain::risk::plan::OrderIntent {
        strategy_id: STRATEGY.to_string(),
        symbol: symbol.to_string(),
        side,
        qty,
        order_type: tradeplane::domain::trading::types::OrderType::Market,
        limit_price: None,
        time_in_force: tradeplane::domain::trading::types::TimeInForce::Day,
        as_of_date: as_of(),
    }
}

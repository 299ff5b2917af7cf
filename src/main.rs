//! Control-plane CLI.
//!
//! Exit codes: 0 = success, 1 = dependency failure, 2 = orchestration
//! failure, 3 = configuration error.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;
use tradeplane::application::bootstrap::AppContext;
use tradeplane::application::execution::destructive::DestructiveRequest;
use tradeplane::config::Config;
use tradeplane::domain::auth::StepUpVerifier;
use tradeplane::domain::circuit::TripReason;
use tradeplane::domain::run::RunOutcome;
use tradeplane::infrastructure::persistence::Database;

#[derive(Parser)]
#[command(name = "tradeplane", version, about = "Trading control plane")]
struct Cli {
    /// Never contact a real broker (flag wins over DRY_RUN).
    #[arg(long, global = true)]
    dry_run: Option<bool>,

    /// HTTP bind address (flag wins over HTTP_BIND).
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Durable store URL (flag wins over DATABASE_URL).
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all services in one process with the HTTP surface.
    Serve,
    /// Print breaker, reconciler, and position state.
    Status,
    /// Manually trip the circuit breaker.
    CircuitTrip {
        #[arg(long)]
        reason: String,
        #[arg(long, default_value = "cli-operator")]
        actor: String,
    },
    /// Trip the breaker, cancel all open orders, flatten all positions.
    KillSwitch {
        #[arg(long)]
        reason: String,
        #[arg(long, default_value = "cli-operator")]
        actor: String,
    },
    /// Drive the daily paper pipeline for a date (default: today).
    PaperRun {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Apply pending forward-only migrations and exit.
    Migrate,
}

fn init_tracing() {
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env()?;
    // CLI flag > environment > default
    if let Some(dry_run) = cli.dry_run {
        config.dry_run = dry_run;
    }
    if let Some(bind) = &cli.bind {
        config.http_bind = bind.clone();
    }
    if let Some(url) = &cli.database_url {
        config.stores.database_url = url.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::from(3);
        }
    };

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("Dependency failure: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli, config: Config) -> Result<ExitCode> {
    match cli.command {
        Command::Migrate => {
            let database = Database::new(&config.stores.database_url).await?;
            let applied = database.migrate().await?;
            info!("Migrations up to date ({} newly applied)", applied);
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve => {
            info!(
                "tradeplane {} starting (dry_run={})",
                env!("CARGO_PKG_VERSION"),
                config.dry_run
            );
            let bind = config.http_bind.clone();
            let ctx = AppContext::build(config).await?;
            ctx.spawn_background().await?;

            let router = tradeplane::interfaces::http::router(ctx);
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("Control plane listening on {}", bind);
            axum::serve(listener, router).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            let ctx = AppContext::build(config).await?;
            let breaker = ctx.breaker.current().await?;
            println!(
                "breaker: {} (trips today: {}, reason: {})",
                breaker.state,
                breaker.trip_count_today,
                breaker
                    .trip_details
                    .as_deref()
                    .unwrap_or("-")
            );
            let reconcile = ctx.reconciler.status().await?;
            println!(
                "reconciled gate: {} (last outcome: {})",
                reconcile.gate_set,
                reconcile.last_outcome.as_deref().unwrap_or("never run")
            );
            let positions = ctx.positions.all().await?;
            println!("positions: {}", positions.len());
            for position in &positions {
                println!(
                    "  {} {} @ {}",
                    position.symbol, position.qty, position.avg_entry_price
                );
            }
            let recent = ctx.audit.recent(5).await?;
            println!("recent audit events: {}", recent.len());
            for event in recent {
                println!(
                    "  [{}] {} {} {} -> {}",
                    event.timestamp.to_rfc3339(),
                    event.actor,
                    event.event_type,
                    event.action,
                    event.outcome
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::CircuitTrip { reason, actor } => {
            let ctx = AppContext::build(config).await?;
            let record = ctx
                .breaker
                .trip(TripReason::Manual, reason.clone(), &actor)
                .await?;
            let event = tradeplane::domain::audit::AuditEvent::new(
                "breaker",
                actor,
                "trip",
                "ok",
                serde_json::json!({ "reason": reason, "via": "cli" }),
            );
            ctx.audit.append(&event).await?;
            println!("breaker: {} ({})", record.state, reason);
            Ok(ExitCode::SUCCESS)
        }
        Command::KillSwitch { reason, actor } => {
            let step_up = StepUpVerifier::new(
                config.risk.step_up_secret.as_bytes().to_vec(),
                config.risk.step_up_max_age_secs,
            );
            let now = Utc::now().timestamp();
            let token = step_up.mint(&actor, now);
            let ctx = AppContext::build(config).await?;
            let request = DestructiveRequest {
                reason,
                actor,
                role: "admin".to_string(),
                step_up_ts: now,
                step_up_token: token,
                ip_address: None,
            };
            let (cancelled, flattened) = ctx
                .gateway
                .kill_switch(&request)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!(
                "kill switch engaged: {} orders cancelled, {} flatten orders submitted",
                cancelled,
                flattened.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::PaperRun { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let ctx = AppContext::build(config).await?;
            // Gate write traffic behind a verified boot reconcile.
            ctx.reconciler.reconcile_on_boot().await?;
            if let Some(mock) = &ctx.mock_broker {
                // Dry-run has no live webhook channel; pump events inline.
                let mock = mock.clone();
                let gateway = ctx.gateway.clone();
                tokio::spawn(async move {
                    let mut interval =
                        tokio::time::interval(std::time::Duration::from_millis(200));
                    loop {
                        interval.tick().await;
                        for event in mock.drain_events() {
                            if let Err(e) = gateway.ingest_webhook(&event).await {
                                error!("Webhook pump failed: {}", e);
                            }
                        }
                    }
                });
            }
            let record = ctx
                .orchestrator
                .run_paper(date, "cli")
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!("run {}: {:?}", record.run_id, record.outcome);
            if let Some(report) = &record.report_payload {
                println!("{}", serde_json::to_string_pretty(report)?);
            }
            match record.outcome {
                Some(RunOutcome::Failed) => Ok(ExitCode::from(2)),
                _ => Ok(ExitCode::SUCCESS),
            }
        }
    }
}

pub mod report;

use crate::application::circuit_breaker::CircuitBreakerClient;
use crate::application::reconciler::Reconciler;
use crate::domain::circuit::BreakerState;
use crate::domain::errors::ControlPlaneError;
use crate::domain::ids;
use crate::domain::ports::{CoordinationStore, ExecutionPort, RiskPort, SignalPort};
use crate::domain::repositories::RunRepository;
use crate::domain::risk::plan::OrderPlan;
use crate::domain::run::{RunOutcome, RunRecord, RunStage, StageStatus};
use crate::infrastructure::observability::Metrics;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub strategy_id: String,
    pub universe: Vec<String>,
    pub top_n: Option<usize>,
    /// How long stage 5 waits for fills before settling for a partial book.
    pub fill_deadline: Duration,
    pub fill_poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            strategy_id: "default".to_string(),
            universe: Vec::new(),
            top_n: None,
            fill_deadline: Duration::from_secs(120),
            fill_poll_interval: Duration::from_secs(5),
        }
    }
}

enum StageFlow {
    Continue,
    Abort(RunOutcome),
}

/// Drives the daily pipeline: health, signals, risk, submission, fills,
/// report.
///
/// The run id is deterministic over `(date, strategy, trigger)`; re-invoking
/// an in-flight or crashed run resumes at its first pending stage, and a
/// finished run returns its stored outcome untouched. Stage results are
/// persisted into the run record so a resume never replays a settled stage.
pub struct Orchestrator {
    signal: Arc<dyn SignalPort>,
    risk: Arc<dyn RiskPort>,
    execution: Arc<dyn ExecutionPort>,
    runs: Arc<dyn RunRepository>,
    breaker: CircuitBreakerClient,
    store: Arc<dyn CoordinationStore>,
    config: OrchestratorConfig,
    metrics: Metrics,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        signal: Arc<dyn SignalPort>,
        risk: Arc<dyn RiskPort>,
        execution: Arc<dyn ExecutionPort>,
        runs: Arc<dyn RunRepository>,
        breaker: CircuitBreakerClient,
        store: Arc<dyn CoordinationStore>,
        config: OrchestratorConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            signal,
            risk,
            execution,
            runs,
            breaker,
            store,
            config,
            metrics,
        }
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, ControlPlaneError> {
        self.runs
            .get(run_id)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))
    }

    /// Execute (or resume) the paper run for a date. At most one terminal
    /// outcome ever exists per run id.
    pub async fn run_paper(
        &self,
        as_of: NaiveDate,
        trigger: &str,
    ) -> Result<RunRecord, ControlPlaneError> {
        let run_id = ids::run_id(as_of, &self.config.strategy_id, trigger);
        let fresh = RunRecord::started(
            run_id.clone(),
            self.config.strategy_id.clone(),
            as_of,
            trigger.to_string(),
        );
        let mut record = self
            .runs
            .insert_if_absent(&fresh)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;

        if record.is_terminal() {
            info!(
                "Orchestrator: Run {} already terminal ({}); returning stored record",
                run_id,
                record.outcome.map(|o| o.to_string()).unwrap_or_default()
            );
            return Ok(record);
        }
        if record.next_pending_stage() != Some(RunStage::HealthChecks) {
            info!(
                "Orchestrator: Resuming run {} at {:?}",
                run_id,
                record.next_pending_stage()
            );
        }

        while let Some(stage) = record.next_pending_stage() {
            let flow = self.execute_stage(&mut record, stage).await;
            self.runs
                .update(&record)
                .await
                .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
            if let StageFlow::Abort(outcome) = flow {
                record.finish(outcome);
                self.runs
                    .update(&record)
                    .await
                    .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
                self.metrics
                    .runs_total
                    .with_label_values(&[&outcome.to_string()])
                    .inc();
                warn!("Orchestrator: Run {} aborted with outcome {}", run_id, outcome);
                return Ok(record);
            }
        }

        let outcome = if record
            .stages
            .iter()
            .any(|s| s.status == StageStatus::Failed)
        {
            RunOutcome::Failed
        } else if record
            .stages
            .iter()
            .any(|s| s.status == StageStatus::Partial)
        {
            RunOutcome::Partial
        } else {
            RunOutcome::Success
        };
        record.finish(outcome);
        self.runs
            .update(&record)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
        self.metrics
            .runs_total
            .with_label_values(&[&outcome.to_string()])
            .inc();
        info!("Orchestrator: Run {} finished with outcome {}", run_id, outcome);
        Ok(record)
    }

    fn settle(
        record: &mut RunRecord,
        stage: RunStage,
        status: StageStatus,
        detail: Option<String>,
    ) {
        let slot = record.stage_mut(stage);
        slot.status = status;
        slot.detail = detail;
        slot.finished_at = Some(Utc::now());
    }

    async fn execute_stage(&self, record: &mut RunRecord, stage: RunStage) -> StageFlow {
        match stage {
            RunStage::HealthChecks => self.stage_health(record).await,
            RunStage::Signals => self.stage_signals(record).await,
            RunStage::RiskPlan => self.stage_risk_plan(record).await,
            RunStage::Submission => self.stage_submission(record).await,
            RunStage::AwaitFills => self.stage_await_fills(record).await,
            RunStage::Report => self.stage_report(record).await,
        }
    }

    async fn stage_health(&self, record: &mut RunRecord) -> StageFlow {
        let breaker_state = self.breaker.state_or_tripped().await;
        if breaker_state == BreakerState::Tripped {
            Self::settle(
                record,
                RunStage::HealthChecks,
                StageStatus::Failed,
                Some("circuit breaker tripped".to_string()),
            );
            return StageFlow::Abort(RunOutcome::Failed);
        }
        let signal_ok = self.signal.health().await.unwrap_or(false);
        let execution_ok = self.execution.health().await.unwrap_or(false);
        let gate_ok = Reconciler::gate_is_set(self.store.as_ref(), "execution").await;

        if !(signal_ok && execution_ok && gate_ok) {
            Self::settle(
                record,
                RunStage::HealthChecks,
                StageStatus::Failed,
                Some(format!(
                    "signal_ok={} execution_ok={} reconciled_gate={}",
                    signal_ok, execution_ok, gate_ok
                )),
            );
            return StageFlow::Abort(RunOutcome::Failed);
        }
        Self::settle(record, RunStage::HealthChecks, StageStatus::Ok, None);
        StageFlow::Continue
    }

    async fn stage_signals(&self, record: &mut RunRecord) -> StageFlow {
        match self
            .signal
            .generate(&self.config.universe, record.as_of_date, self.config.top_n)
            .await
        {
            Ok(set) => {
                let weights = set.target_weights();
                let detail = serde_json::json!({
                    "weights": weights
                        .iter()
                        .map(|(s, w)| (s.clone(), w.to_string()))
                        .collect::<Vec<_>>(),
                    "warning": set.metadata.warning,
                    "model_version": set.metadata.model_version,
                });
                Self::settle(
                    record,
                    RunStage::Signals,
                    StageStatus::Ok,
                    Some(detail.to_string()),
                );
                StageFlow::Continue
            }
            Err(e) => {
                error!("Orchestrator: Signal stage failed: {}", e);
                Self::settle(
                    record,
                    RunStage::Signals,
                    StageStatus::Failed,
                    Some(e.to_string()),
                );
                StageFlow::Abort(RunOutcome::Failed)
            }
        }
    }

    fn weights_from_record(record: &RunRecord) -> Vec<(String, Decimal)> {
        record
            .stage(RunStage::Signals)
            .and_then(|s| s.detail.as_ref())
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .and_then(|v| {
                v.get("weights").and_then(|w| {
                    serde_json::from_value::<Vec<(String, String)>>(w.clone()).ok()
                })
            })
            .map(|pairs| {
                pairs
                    .into_iter()
                    .filter_map(|(s, w)| w.parse::<Decimal>().ok().map(|d| (s, d)))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn stage_risk_plan(&self, record: &mut RunRecord) -> StageFlow {
        let weights = Self::weights_from_record(record);
        if weights.is_empty() {
            Self::settle(
                record,
                RunStage::RiskPlan,
                StageStatus::Ok,
                Some("no non-zero target weights; empty plan".to_string()),
            );
            return StageFlow::Continue;
        }
        match self
            .risk
            .plan(&self.config.strategy_id, record.as_of_date, &weights)
            .await
        {
            Ok(plan) => {
                let status = if plan.orders.is_empty() && !plan.rejections.is_empty() {
                    StageStatus::Partial
                } else {
                    StageStatus::Ok
                };
                let detail = serde_json::to_string(&plan).unwrap_or_default();
                Self::settle(record, RunStage::RiskPlan, status, Some(detail));
                StageFlow::Continue
            }
            Err(e) => {
                error!("Orchestrator: Risk stage failed: {}", e);
                Self::settle(
                    record,
                    RunStage::RiskPlan,
                    StageStatus::Failed,
                    Some(e.to_string()),
                );
                StageFlow::Abort(RunOutcome::Failed)
            }
        }
    }

    fn plan_from_record(record: &RunRecord) -> Option<OrderPlan> {
        record
            .stage(RunStage::RiskPlan)
            .and_then(|s| s.detail.as_ref())
            .and_then(|raw| serde_json::from_str::<OrderPlan>(raw).ok())
    }

    async fn stage_submission(&self, record: &mut RunRecord) -> StageFlow {
        let Some(plan) = Self::plan_from_record(record) else {
            Self::settle(
                record,
                RunStage::Submission,
                StageStatus::Ok,
                Some("empty plan; nothing to submit".to_string()),
            );
            return StageFlow::Continue;
        };
        let had_plan_rejections = !plan.rejections.is_empty();

        // Each submit is idempotent, so the fan-out is safe to re-run on
        // resume: already-submitted orders answer from the store.
        let futures: Vec<_> = plan
            .orders
            .iter()
            .map(|intent| self.execution.submit(intent))
            .collect();
        let results = futures::future::join_all(futures).await;

        let mut submitted: Vec<String> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        for (intent, result) in plan.orders.iter().zip(results) {
            match result {
                Ok(receipt) => submitted.push(receipt.order.client_order_id),
                Err(e) => {
                    warn!(
                        "Orchestrator: Submit failed for {} {}: {}",
                        intent.side, intent.symbol, e
                    );
                    failures.push(format!("{} {}: {}", intent.side, intent.symbol, e));
                }
            }
        }

        let status = if !failures.is_empty() || had_plan_rejections {
            StageStatus::Partial
        } else {
            StageStatus::Ok
        };
        let detail = serde_json::json!({
            "submitted": submitted,
            "failures": failures,
            "plan_rejections": plan.rejections.len(),
        });
        Self::settle(record, RunStage::Submission, status, Some(detail.to_string()));
        StageFlow::Continue
    }

    fn submitted_from_record(record: &RunRecord) -> Vec<String> {
        record
            .stage(RunStage::Submission)
            .and_then(|s| s.detail.as_ref())
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .and_then(|v| {
                v.get("submitted")
                    .and_then(|s| serde_json::from_value::<Vec<String>>(s.clone()).ok())
            })
            .unwrap_or_default()
    }

    async fn stage_await_fills(&self, record: &mut RunRecord) -> StageFlow {
        let submitted = Self::submitted_from_record(record);
        if submitted.is_empty() {
            Self::settle(record, RunStage::AwaitFills, StageStatus::Ok, None);
            return StageFlow::Continue;
        }
        let deadline = tokio::time::Instant::now() + self.config.fill_deadline;
        let mut open_ids = submitted.len();
        loop {
            match self.execution.orders_for_date(record.as_of_date).await {
                Ok(orders) => {
                    open_ids = orders
                        .iter()
                        .filter(|o| submitted.contains(&o.client_order_id) && !o.is_terminal())
                        .count();
                    if open_ids == 0 {
                        break;
                    }
                }
                Err(e) => warn!("Orchestrator: Fill poll failed: {}", e),
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.config.fill_poll_interval).await;
        }
        // Partial fills at the deadline are an allowed outcome.
        let status = if open_ids == 0 {
            StageStatus::Ok
        } else {
            StageStatus::Partial
        };
        let detail = serde_json::json!({
            "awaited": submitted.len(),
            "still_open": open_ids,
        });
        Self::settle(record, RunStage::AwaitFills, status, Some(detail.to_string()));
        StageFlow::Continue
    }

    async fn stage_report(&self, record: &mut RunRecord) -> StageFlow {
        let orders = self
            .execution
            .orders_for_date(record.as_of_date)
            .await
            .unwrap_or_default();
        let fills = self
            .execution
            .fills_for_date(record.as_of_date)
            .await
            .unwrap_or_default();
        let positions = self.execution.positions().await.unwrap_or_default();

        let pnl = report::build_report(record.as_of_date, &orders, &fills, &positions);
        record.report_payload = serde_json::to_value(&pnl).ok();
        Self::settle(record, RunStage::Report, StageStatus::Ok, None);
        StageFlow::Continue
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stages of a paper run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    HealthChecks,
    Signals,
    RiskPlan,
    Submission,
    AwaitFills,
    Report,
}

impl RunStage {
    pub const ALL: [RunStage; 6] = [
        RunStage::HealthChecks,
        RunStage::Signals,
        RunStage::RiskPlan,
        RunStage::Submission,
        RunStage::AwaitFills,
        RunStage::Report,
    ];
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStage::HealthChecks => "health_checks",
            RunStage::Signals => "signals",
            RunStage::RiskPlan => "risk_plan",
            RunStage::Submission => "submission",
            RunStage::AwaitFills => "await_fills",
            RunStage::Report => "report",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Ok,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: RunStage,
    pub status: StageStatus,
    pub detail: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunOutcome::Success => "success",
            RunOutcome::Partial => "partial",
            RunOutcome::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One orchestrator execution. The `run_id` is deterministic over
/// `(date, strategy, trigger)`, so re-invocations find the existing row and
/// either return its terminal outcome or resume it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub strategy_id: String,
    pub as_of_date: NaiveDate,
    pub trigger: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<RunOutcome>,
    pub stages: Vec<StageOutcome>,
    pub report_payload: Option<serde_json::Value>,
}

impl RunRecord {
    pub fn started(run_id: String, strategy_id: String, as_of_date: NaiveDate, trigger: String) -> Self {
        let stages = RunStage::ALL
            .iter()
            .map(|stage| StageOutcome {
                stage: *stage,
                status: StageStatus::Pending,
                detail: None,
                finished_at: None,
            })
            .collect();
        Self {
            run_id,
            strategy_id,
            as_of_date,
            trigger,
            started_at: Utc::now(),
            ended_at: None,
            outcome: None,
            stages,
            report_payload: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn stage_mut(&mut self, stage: RunStage) -> &mut StageOutcome {
        let idx = match self.stages.iter().position(|s| s.stage == stage) {
            Some(i) => i,
            None => {
                // Stages are seeded at construction; this only runs for rows
                // deserialized from an older layout.
                self.stages.push(StageOutcome {
                    stage,
                    status: StageStatus::Pending,
                    detail: None,
                    finished_at: None,
                });
                self.stages.len() - 1
            }
        };
        &mut self.stages[idx]
    }

    pub fn stage(&self, stage: RunStage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// First stage not yet in a settled status — the resume point for a
    /// non-terminal run.
    pub fn next_pending_stage(&self) -> Option<RunStage> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Pending)
            .map(|s| s.stage)
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = Some(outcome);
        self.ended_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RunRecord {
        RunRecord::started(
            "r1".to_string(),
            "s1".to_string(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            "scheduled".to_string(),
        )
    }

    #[test]
    fn test_new_run_resumes_at_first_stage() {
        let run = record();
        assert!(!run.is_terminal());
        assert_eq!(run.next_pending_stage(), Some(RunStage::HealthChecks));
    }

    #[test]
    fn test_resume_point_advances_with_settled_stages() {
        let mut run = record();
        run.stage_mut(RunStage::HealthChecks).status = StageStatus::Ok;
        run.stage_mut(RunStage::Signals).status = StageStatus::Ok;
        assert_eq!(run.next_pending_stage(), Some(RunStage::RiskPlan));
    }

    #[test]
    fn test_finish_sets_terminal() {
        let mut run = record();
        run.finish(RunOutcome::Partial);
        assert!(run.is_terminal());
        assert!(run.ended_at.is_some());
    }
}

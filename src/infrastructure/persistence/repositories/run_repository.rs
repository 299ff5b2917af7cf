use crate::domain::repositories::RunRepository;
use crate::domain::run::{RunOutcome, RunRecord, StageOutcome};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;

pub struct SqliteRunRepository {
    database: Database,
}

impl SqliteRunRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> Result<RunRecord> {
    let as_of: String = row.try_get("as_of_date")?;
    let started_at: String = row.try_get("started_at")?;
    let ended_at: Option<String> = row.try_get("ended_at")?;
    let outcome: Option<String> = row.try_get("outcome")?;
    let stages: String = row.try_get("stages")?;
    let report: Option<String> = row.try_get("report_payload")?;

    let outcome: Option<RunOutcome> = outcome
        .map(|raw| serde_json::from_str(&format!("\"{}\"", raw)))
        .transpose()
        .context("Invalid run outcome")?;
    let stages: Vec<StageOutcome> =
        serde_json::from_str(&stages).context("Invalid stage payload")?;

    Ok(RunRecord {
        run_id: row.try_get("run_id")?,
        strategy_id: row.try_get("strategy_id")?,
        as_of_date: NaiveDate::parse_from_str(&as_of, "%Y-%m-%d")
            .context("Invalid run as_of_date")?,
        trigger: row.try_get("trigger_kind")?,
        started_at: DateTime::parse_from_rfc3339(&started_at)
            .context("Invalid started_at")?
            .with_timezone(&Utc),
        ended_at: ended_at
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .context("Invalid ended_at")
            })
            .transpose()?,
        outcome,
        stages,
        report_payload: report.and_then(|raw| serde_json::from_str(&raw).ok()),
    })
}

#[async_trait]
impl RunRepository for SqliteRunRepository {
    async fn insert_if_absent(&self, run: &RunRecord) -> Result<RunRecord> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO orchestration_runs \
             (run_id, strategy_id, as_of_date, trigger_kind, started_at, ended_at, outcome, stages, report_payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&run.run_id)
        .bind(&run.strategy_id)
        .bind(run.as_of_date.format("%Y-%m-%d").to_string())
        .bind(&run.trigger)
        .bind(run.started_at.to_rfc3339())
        .bind(run.ended_at.map(|t| t.to_rfc3339()))
        .bind(run.outcome.map(|o| o.to_string()))
        .bind(serde_json::to_string(&run.stages)?)
        .bind(
            run.report_payload
                .as_ref()
                .map(|p| p.to_string()),
        )
        .execute(&self.database.pool)
        .await
        .context("Failed to insert run")?;

        if result.rows_affected() == 1 {
            return Ok(run.clone());
        }
        self.get(&run.run_id)
            .await?
            .context("Run row vanished between insert and read-back")
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let row = sqlx::query("SELECT * FROM orchestration_runs WHERE run_id = $1")
            .bind(run_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load run")?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn update(&self, run: &RunRecord) -> Result<()> {
        sqlx::query(
            "UPDATE orchestration_runs SET ended_at = $1, outcome = $2, stages = $3, report_payload = $4 \
             WHERE run_id = $5",
        )
        .bind(run.ended_at.map(|t| t.to_rfc3339()))
        .bind(run.outcome.map(|o| o.to_string()))
        .bind(serde_json::to_string(&run.stages)?)
        .bind(run.report_payload.as_ref().map(|p| p.to_string()))
        .bind(&run.run_id)
        .execute(&self.database.pool)
        .await
        .context("Failed to update run")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::{RunStage, StageStatus};

    fn record(run_id: &str) -> RunRecord {
        RunRecord::started(
            run_id.to_string(),
            "s1".to_string(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            "scheduled".to_string(),
        )
    }

    #[tokio::test]
    async fn test_same_run_id_returns_existing_row() {
        let repo = SqliteRunRepository::new(Database::in_memory().await.unwrap());
        let mut first = record("r1");
        first.stage_mut(RunStage::HealthChecks).status = StageStatus::Ok;
        repo.insert_if_absent(&first).await.unwrap();
        repo.update(&first).await.unwrap();

        // Second claim with a fresh record gets the stored one back
        let second = repo.insert_if_absent(&record("r1")).await.unwrap();
        assert_eq!(
            second.stage(RunStage::HealthChecks).unwrap().status,
            StageStatus::Ok
        );
    }

    #[tokio::test]
    async fn test_terminal_outcome_round_trips() {
        let repo = SqliteRunRepository::new(Database::in_memory().await.unwrap());
        let mut run = record("r2");
        repo.insert_if_absent(&run).await.unwrap();
        run.finish(RunOutcome::Partial);
        repo.update(&run).await.unwrap();

        let loaded = repo.get("r2").await.unwrap().unwrap();
        assert!(loaded.is_terminal());
        assert_eq!(loaded.outcome, Some(RunOutcome::Partial));
    }
}

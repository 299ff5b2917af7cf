use crate::domain::repositories::ReconcileSnapshotRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

pub struct SqliteReconcileSnapshotRepository {
    database: Database,
}

impl SqliteReconcileSnapshotRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl ReconcileSnapshotRepository for SqliteReconcileSnapshotRepository {
    async fn append(&self, snapshot: &serde_json::Value, outcome: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO reconcile_snapshots (created_at, snapshot, outcome) VALUES ($1, $2, $3)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(snapshot.to_string())
        .bind(outcome)
        .execute(&self.database.pool)
        .await
        .context("Failed to append reconcile snapshot")?;
        Ok(())
    }

    async fn latest(&self) -> Result<Option<(DateTime<Utc>, serde_json::Value, String)>> {
        let row = sqlx::query(
            "SELECT created_at, snapshot, outcome FROM reconcile_snapshots ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load latest snapshot")?;
        row.map(|row| {
            let created_at: String = row.try_get("created_at")?;
            let snapshot: String = row.try_get("snapshot")?;
            let outcome: String = row.try_get("outcome")?;
            Ok((
                DateTime::parse_from_rfc3339(&created_at)
                    .context("Invalid snapshot timestamp")?
                    .with_timezone(&Utc),
                serde_json::from_str(&snapshot).unwrap_or(serde_json::json!({})),
                outcome,
            ))
        })
        .transpose()
    }
}

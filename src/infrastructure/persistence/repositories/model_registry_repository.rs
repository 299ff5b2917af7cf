use crate::domain::model::ModelMetadata;
use crate::domain::repositories::ModelRegistryRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

pub struct SqliteModelRegistryRepository {
    database: Database,
}

impl SqliteModelRegistryRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn row_to_metadata(row: &sqlx::sqlite::SqliteRow) -> Result<ModelMetadata> {
    let status: String = row.try_get("status")?;
    let metrics: String = row.try_get("performance_metrics")?;
    let activated_at: Option<String> = row.try_get("activated_at")?;
    let deactivated_at: Option<String> = row.try_get("deactivated_at")?;
    let parse = |raw: Option<String>| -> Option<DateTime<Utc>> {
        raw.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .ok()
        })
    };
    Ok(ModelMetadata {
        strategy_id: row.try_get("strategy_id")?,
        version: row.try_get("version")?,
        status: status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        model_path: row.try_get("model_path")?,
        performance_metrics: serde_json::from_str(&metrics).unwrap_or(serde_json::json!({})),
        activated_at: parse(activated_at),
        deactivated_at: parse(deactivated_at),
    })
}

#[async_trait]
impl ModelRegistryRepository for SqliteModelRegistryRepository {
    async fn active_for_strategy(&self, strategy_id: &str) -> Result<Option<ModelMetadata>> {
        let row = sqlx::query(
            "SELECT * FROM model_registry WHERE strategy_id = $1 AND status = 'active'",
        )
        .bind(strategy_id)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to read active model")?;
        row.as_ref().map(row_to_metadata).transpose()
    }

    /// Deactivate the current active row and activate the named version in
    /// one transaction, preserving the at-most-one-active invariant.
    async fn activate(&self, strategy_id: &str, version: &str) -> Result<()> {
        let mut tx = self.database.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        let exists: Option<(String,)> = sqlx::query_as(
            "SELECT version FROM model_registry WHERE strategy_id = $1 AND version = $2",
        )
        .bind(strategy_id)
        .bind(version)
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            bail!("No registry row for {} version {}", strategy_id, version);
        }

        sqlx::query(
            "UPDATE model_registry SET status = 'inactive', deactivated_at = $1 \
             WHERE strategy_id = $2 AND status = 'active'",
        )
        .bind(&now)
        .bind(strategy_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE model_registry SET status = 'active', activated_at = $1, deactivated_at = NULL \
             WHERE strategy_id = $2 AND version = $3",
        )
        .bind(&now)
        .bind(strategy_id)
        .bind(version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert(&self, metadata: &ModelMetadata) -> Result<()> {
        sqlx::query(
            "INSERT INTO model_registry (strategy_id, version, status, model_path, performance_metrics, activated_at, deactivated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&metadata.strategy_id)
        .bind(&metadata.version)
        .bind(metadata.status.to_string())
        .bind(&metadata.model_path)
        .bind(metadata.performance_metrics.to_string())
        .bind(metadata.activated_at.map(|t| t.to_rfc3339()))
        .bind(metadata.deactivated_at.map(|t| t.to_rfc3339()))
        .execute(&self.database.pool)
        .await
        .context("Failed to insert registry row")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ModelStatus;

    fn metadata(version: &str, status: ModelStatus) -> ModelMetadata {
        ModelMetadata {
            strategy_id: "s1".to_string(),
            version: version.to_string(),
            status,
            model_path: format!("/models/{}.json", version),
            performance_metrics: serde_json::json!({"sharpe": 1.2}),
            activated_at: None,
            deactivated_at: None,
        }
    }

    #[tokio::test]
    async fn test_activation_is_a_single_swap() {
        let repo = SqliteModelRegistryRepository::new(Database::in_memory().await.unwrap());
        repo.insert(&metadata("v1", ModelStatus::Active)).await.unwrap();
        repo.insert(&metadata("v2", ModelStatus::Staging)).await.unwrap();

        assert_eq!(
            repo.active_for_strategy("s1").await.unwrap().unwrap().version,
            "v1"
        );

        repo.activate("s1", "v2").await.unwrap();
        let active = repo.active_for_strategy("s1").await.unwrap().unwrap();
        assert_eq!(active.version, "v2");
        assert!(active.activated_at.is_some());
    }

    #[tokio::test]
    async fn test_activate_unknown_version_fails() {
        let repo = SqliteModelRegistryRepository::new(Database::in_memory().await.unwrap());
        repo.insert(&metadata("v1", ModelStatus::Active)).await.unwrap();
        assert!(repo.activate("s1", "v9").await.is_err());
        // Existing activation untouched
        assert_eq!(
            repo.active_for_strategy("s1").await.unwrap().unwrap().version,
            "v1"
        );
    }
}

use crate::domain::audit::AuditEvent;
use crate::domain::repositories::AuditRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

/// Append-only audit log. The application only ever inserts; retention jobs
/// own deletion.
pub struct SqliteAuditRepository {
    database: Database,
}

impl SqliteAuditRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn append(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (id, timestamp, event_type, actor, action, outcome, details, ip_address) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&event.id)
        .bind(event.timestamp.to_rfc3339())
        .bind(&event.event_type)
        .bind(&event.actor)
        .bind(&event.action)
        .bind(&event.outcome)
        .bind(event.details.to_string())
        .bind(&event.ip_address)
        .execute(&self.database.pool)
        .await
        .context("Failed to append audit event")?;
        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query("SELECT * FROM audit_log ORDER BY timestamp DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to load audit events")?;
        rows.iter()
            .map(|row| {
                let timestamp: String = row.try_get("timestamp")?;
                let details: String = row.try_get("details")?;
                Ok(AuditEvent {
                    id: row.try_get("id")?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .context("Invalid audit timestamp")?
                        .with_timezone(&Utc),
                    event_type: row.try_get("event_type")?,
                    actor: row.try_get("actor")?,
                    action: row.try_get("action")?,
                    outcome: row.try_get("outcome")?,
                    details: serde_json::from_str(&details).unwrap_or(serde_json::json!({})),
                    ip_address: row.try_get("ip_address")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_read_back() {
        let repo = SqliteAuditRepository::new(Database::in_memory().await.unwrap());
        for i in 0..3 {
            let event = AuditEvent::new(
                "order",
                "gateway",
                "submit",
                "ok",
                serde_json::json!({"n": i}),
            );
            repo.append(&event).await.unwrap();
        }
        let recent = repo.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
    }
}

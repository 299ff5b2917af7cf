use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Durable store handle shared by every repository.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

/// Forward-only migrations, applied in order and recorded in
/// `schema_migrations`. Running services never issue ad-hoc ALTERs; schema
/// changes land here as new numbered entries.
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        r#"
        CREATE TABLE orders (
            client_order_id TEXT PRIMARY KEY,
            strategy_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            qty TEXT NOT NULL,
            order_type TEXT NOT NULL,
            limit_price TEXT,
            time_in_force TEXT NOT NULL,
            as_of_date TEXT NOT NULL,
            status TEXT NOT NULL,
            broker_order_id TEXT,
            parent_order_id TEXT,
            filled_qty TEXT NOT NULL,
            avg_fill_price TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            submitted_at TEXT,
            terminal_at TEXT
        );
        CREATE INDEX idx_orders_broker_id ON orders (broker_order_id);
        CREATE INDEX idx_orders_status ON orders (status);
        CREATE INDEX idx_orders_as_of ON orders (as_of_date);
        "#,
    ),
    (
        2,
        r#"
        CREATE TABLE fills (
            fill_id TEXT PRIMARY KEY,
            client_order_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            qty TEXT NOT NULL,
            price TEXT NOT NULL,
            fill_time TEXT NOT NULL
        );
        CREATE INDEX idx_fills_order ON fills (client_order_id);
        "#,
    ),
    (
        3,
        r#"
        CREATE TABLE positions (
            symbol TEXT PRIMARY KEY,
            qty TEXT NOT NULL,
            avg_entry_price TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    ),
    (
        4,
        r#"
        CREATE TABLE model_registry (
            strategy_id TEXT NOT NULL,
            version TEXT NOT NULL,
            status TEXT NOT NULL,
            model_path TEXT NOT NULL,
            performance_metrics TEXT NOT NULL,
            activated_at TEXT,
            deactivated_at TEXT,
            PRIMARY KEY (strategy_id, version)
        );
        CREATE UNIQUE INDEX idx_registry_one_active
        ON model_registry (strategy_id) WHERE status = 'active';
        "#,
    ),
    (
        5,
        r#"
        CREATE TABLE orchestration_runs (
            run_id TEXT PRIMARY KEY,
            strategy_id TEXT NOT NULL,
            as_of_date TEXT NOT NULL,
            trigger_kind TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            outcome TEXT,
            stages TEXT NOT NULL,
            report_payload TEXT
        );
        "#,
    ),
    (
        6,
        r#"
        CREATE TABLE audit_log (
            id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            outcome TEXT NOT NULL,
            details TEXT NOT NULL,
            ip_address TEXT
        );
        CREATE INDEX idx_audit_time ON audit_log (timestamp);
        "#,
    ),
    (
        7,
        r#"
        CREATE TABLE reconcile_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            snapshot TEXT NOT NULL,
            outcome TEXT NOT NULL
        );
        "#,
    ),
    (
        8,
        r#"
        CREATE TABLE risk_limits (
            scope TEXT PRIMARY KEY,
            max_pos_per_symbol TEXT NOT NULL,
            max_total_notional TEXT NOT NULL,
            daily_loss_limit TEXT NOT NULL,
            blacklist TEXT NOT NULL,
            lot_size TEXT NOT NULL
        );
        "#,
    ),
    (
        9,
        r#"
        CREATE TABLE features (
            symbol TEXT NOT NULL,
            as_of_date TEXT NOT NULL,
            name TEXT NOT NULL,
            value REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (symbol, as_of_date, name)
        );
        CREATE TABLE prices (
            symbol TEXT PRIMARY KEY,
            price TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    ),
];

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // A pooled :memory: database would hand every connection its own
        // empty schema; pin it to one connection.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory database for tests and pure dry-runs.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply pending migrations in version order.
    pub async fn migrate(&self) -> Result<u32> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create schema_migrations table")?;

        let applied: Vec<(i64,)> =
            sqlx::query_as("SELECT version FROM schema_migrations ORDER BY version")
                .fetch_all(&self.pool)
                .await
                .context("Failed to read schema_migrations")?;
        let applied: std::collections::HashSet<i64> =
            applied.into_iter().map(|(v,)| v).collect();

        let mut count = 0u32;
        for (version, sql) in MIGRATIONS {
            if applied.contains(version) {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            // raw_sql: migration bodies may hold several statements.
            sqlx::raw_sql(sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Migration {} failed", version))?;
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES ($1, $2)")
                .bind(version)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to record migration {}", version))?;
            tx.commit().await?;
            info!("Applied migration {}", version);
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::in_memory().await.unwrap();
        // All migrations applied on open; a second pass is a no-op.
        let count = db.migrate().await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_one_active_model_per_strategy() {
        let db = Database::in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO model_registry (strategy_id, version, status, model_path, performance_metrics) \
             VALUES ('s1', 'v1', 'active', '/m1', '{}')",
        )
        .execute(&db.pool)
        .await
        .unwrap();
        // Second active row for the same strategy violates the partial index
        let second = sqlx::query(
            "INSERT INTO model_registry (strategy_id, version, status, model_path, performance_metrics) \
             VALUES ('s1', 'v2', 'active', '/m2', '{}')",
        )
        .execute(&db.pool)
        .await;
        assert!(second.is_err());
        // Inactive rows are fine
        sqlx::query(
            "INSERT INTO model_registry (strategy_id, version, status, model_path, performance_metrics) \
             VALUES ('s1', 'v2', 'staging', '/m2', '{}')",
        )
        .execute(&db.pool)
        .await
        .unwrap();
    }
}

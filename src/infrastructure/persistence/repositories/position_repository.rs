use crate::domain::repositories::PositionRepository;
use crate::domain::trading::types::Position;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use std::str::FromStr;

pub struct SqlitePositionRepository {
    database: Database,
}

impl SqlitePositionRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn row_to_position(row: &sqlx::sqlite::SqliteRow) -> Result<Position> {
    let qty: String = row.try_get("qty")?;
    let avg: String = row.try_get("avg_entry_price")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Position {
        symbol: row.try_get("symbol")?,
        qty: Decimal::from_str(&qty).unwrap_or_default(),
        avg_entry_price: Decimal::from_str(&avg).unwrap_or_default(),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[async_trait]
impl PositionRepository for SqlitePositionRepository {
    async fn get(&self, symbol: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE symbol = $1")
            .bind(symbol)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load position")?;
        row.as_ref().map(row_to_position).transpose()
    }

    async fn all(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions ORDER BY symbol")
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to load positions")?;
        rows.iter().map(row_to_position).collect()
    }

    async fn upsert(&self, position: &Position) -> Result<()> {
        sqlx::query(
            "INSERT INTO positions (symbol, qty, avg_entry_price, updated_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT(symbol) DO UPDATE SET qty = excluded.qty, \
             avg_entry_price = excluded.avg_entry_price, updated_at = excluded.updated_at",
        )
        .bind(&position.symbol)
        .bind(position.qty.to_string())
        .bind(position.avg_entry_price.to_string())
        .bind(position.updated_at.to_rfc3339())
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert position")?;
        Ok(())
    }

    async fn delete(&self, symbol: &str) -> Result<()> {
        sqlx::query("DELETE FROM positions WHERE symbol = $1")
            .bind(symbol)
            .execute(&self.database.pool)
            .await
            .context("Failed to delete position")?;
        Ok(())
    }
}

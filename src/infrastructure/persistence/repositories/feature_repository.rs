use crate::domain::ports::{FeatureSource, PriceSource};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;

/// Read-only view over the externally ingested `features` and `prices`
/// tables. Ingestion and corporate-action adjustment happen upstream; only
/// the freshness contract matters here.
pub struct SqliteFeatureRepository {
    database: Database,
}

impl SqliteFeatureRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Test/dry-run seeding helper.
    pub async fn put_feature(
        &self,
        symbol: &str,
        as_of: NaiveDate,
        name: &str,
        value: f64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO features (symbol, as_of_date, name, value, updated_at) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT(symbol, as_of_date, name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(symbol)
        .bind(as_of.format("%Y-%m-%d").to_string())
        .bind(name)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert feature")?;
        Ok(())
    }

    pub async fn put_price(&self, symbol: &str, price: Decimal) -> Result<()> {
        sqlx::query(
            "INSERT INTO prices (symbol, price, updated_at) VALUES ($1, $2, $3) \
             ON CONFLICT(symbol) DO UPDATE SET price = excluded.price, updated_at = excluded.updated_at",
        )
        .bind(symbol)
        .bind(price.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert price")?;
        Ok(())
    }
}

#[async_trait]
impl FeatureSource for SqliteFeatureRepository {
    async fn features(
        &self,
        symbols: &[String],
        as_of: NaiveDate,
    ) -> Result<HashMap<String, HashMap<String, f64>>> {
        let mut out: HashMap<String, HashMap<String, f64>> = HashMap::new();
        let date = as_of.format("%Y-%m-%d").to_string();
        for symbol in symbols {
            let rows = sqlx::query(
                "SELECT name, value FROM features WHERE symbol = $1 AND as_of_date = $2",
            )
            .bind(symbol)
            .bind(&date)
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to load features")?;
            if rows.is_empty() {
                continue;
            }
            let mut vector = HashMap::new();
            for row in rows {
                let name: String = row.try_get("name")?;
                let value: f64 = row.try_get("value")?;
                vector.insert(name, value);
            }
            out.insert(symbol.clone(), vector);
        }
        Ok(out)
    }

    async fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT MAX(updated_at) AS latest FROM features")
            .fetch_one(&self.database.pool)
            .await
            .context("Failed to read feature freshness")?;
        let latest: Option<String> = row.try_get("latest")?;
        Ok(latest.and_then(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .ok()
        }))
    }
}

#[async_trait]
impl PriceSource for SqliteFeatureRepository {
    async fn last_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        let mut out = HashMap::new();
        for symbol in symbols {
            let row = sqlx::query("SELECT price FROM prices WHERE symbol = $1")
                .bind(symbol)
                .fetch_optional(&self.database.pool)
                .await
                .context("Failed to load price")?;
            if let Some(row) = row {
                let raw: String = row.try_get("price")?;
                if let Ok(price) = Decimal::from_str(&raw) {
                    out.insert(symbol.clone(), price);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_features_round_trip() {
        let repo = SqliteFeatureRepository::new(Database::in_memory().await.unwrap());
        let date = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        repo.put_feature("AAPL", date, "mom_20", 0.42).await.unwrap();
        repo.put_feature("AAPL", date, "vol_20", 0.10).await.unwrap();

        let features = repo
            .features(&["AAPL".to_string(), "MSFT".to_string()], date)
            .await
            .unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features["AAPL"]["mom_20"], 0.42);
        assert!(repo.latest_timestamp().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_prices_round_trip() {
        let repo = SqliteFeatureRepository::new(Database::in_memory().await.unwrap());
        repo.put_price("AAPL", dec!(187.5)).await.unwrap();
        let prices = repo.last_prices(&["AAPL".to_string()]).await.unwrap();
        assert_eq!(prices["AAPL"], dec!(187.5));
    }
}

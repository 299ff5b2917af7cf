use crate::domain::repositories::RiskLimitsRepository;
use crate::domain::risk::RiskLimits;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::Row;
use std::collections::HashSet;
use std::str::FromStr;

const GLOBAL_SCOPE: &str = "global";

pub struct SqliteRiskLimitsRepository {
    database: Database,
}

impl SqliteRiskLimitsRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    async fn load_scope(&self, scope: &str) -> Result<Option<RiskLimits>> {
        let row = sqlx::query("SELECT * FROM risk_limits WHERE scope = $1")
            .bind(scope)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load risk limits")?;
        row.map(|row| {
            let max_pos: String = row.try_get("max_pos_per_symbol")?;
            let max_notional: String = row.try_get("max_total_notional")?;
            let daily_loss: String = row.try_get("daily_loss_limit")?;
            let blacklist: String = row.try_get("blacklist")?;
            let lot_size: String = row.try_get("lot_size")?;
            Ok(RiskLimits {
                max_pos_per_symbol: Decimal::from_str(&max_pos).unwrap_or_default(),
                max_total_notional: Decimal::from_str(&max_notional).unwrap_or_default(),
                daily_loss_limit: Decimal::from_str(&daily_loss).unwrap_or_default(),
                blacklist: serde_json::from_str::<HashSet<String>>(&blacklist)
                    .unwrap_or_default(),
                lot_size: Decimal::from_str(&lot_size).unwrap_or(Decimal::ONE),
            })
        })
        .transpose()
    }
}

#[async_trait]
impl RiskLimitsRepository for SqliteRiskLimitsRepository {
    /// Per-strategy row wins; global row is the fallback; built-in defaults
    /// otherwise. The blacklist is the union of both scopes.
    async fn effective_for_strategy(&self, strategy_id: &str) -> Result<RiskLimits> {
        let global = self.load_scope(GLOBAL_SCOPE).await?;
        let strategy = self.load_scope(strategy_id).await?;
        Ok(match (global, strategy) {
            (Some(global), Some(mut strategy)) => {
                strategy.blacklist.extend(global.blacklist);
                strategy
            }
            (Some(global), None) => global,
            (None, Some(strategy)) => strategy,
            (None, None) => RiskLimits::default(),
        })
    }

    async fn upsert(&self, scope: &str, limits: &RiskLimits) -> Result<()> {
        sqlx::query(
            "INSERT INTO risk_limits (scope, max_pos_per_symbol, max_total_notional, daily_loss_limit, blacklist, lot_size) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT(scope) DO UPDATE SET \
             max_pos_per_symbol = excluded.max_pos_per_symbol, \
             max_total_notional = excluded.max_total_notional, \
             daily_loss_limit = excluded.daily_loss_limit, \
             blacklist = excluded.blacklist, \
             lot_size = excluded.lot_size",
        )
        .bind(scope)
        .bind(limits.max_pos_per_symbol.to_string())
        .bind(limits.max_total_notional.to_string())
        .bind(limits.daily_loss_limit.to_string())
        .bind(serde_json::to_string(&limits.blacklist)?)
        .bind(limits.lot_size.to_string())
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert risk limits")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_strategy_scope_overrides_global() {
        let repo = SqliteRiskLimitsRepository::new(Database::in_memory().await.unwrap());
        let mut global = RiskLimits {
            max_pos_per_symbol: dec!(100),
            ..Default::default()
        };
        global.blacklist.insert("GME".to_string());
        repo.upsert("global", &global).await.unwrap();

        let mut strategy = RiskLimits {
            max_pos_per_symbol: dec!(50),
            ..Default::default()
        };
        strategy.blacklist.insert("AMC".to_string());
        repo.upsert("s1", &strategy).await.unwrap();

        let effective = repo.effective_for_strategy("s1").await.unwrap();
        assert_eq!(effective.max_pos_per_symbol, dec!(50));
        // Blacklists merge across scopes
        assert!(effective.blacklist.contains("GME"));
        assert!(effective.blacklist.contains("AMC"));

        // Unknown strategy falls back to global
        let fallback = repo.effective_for_strategy("s2").await.unwrap();
        assert_eq!(fallback.max_pos_per_symbol, dec!(100));
    }

    #[tokio::test]
    async fn test_defaults_when_no_rows() {
        let repo = SqliteRiskLimitsRepository::new(Database::in_memory().await.unwrap());
        let limits = repo.effective_for_strategy("s1").await.unwrap();
        assert!(limits.max_pos_per_symbol > Decimal::ZERO);
    }
}

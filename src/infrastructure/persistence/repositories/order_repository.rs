use crate::domain::repositories::{FillApplied, InsertOutcome, OrderRepository};
use crate::domain::trading::types::{Fill, Order, OrderStatus, Position};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;
use tracing::warn;

const TERMINAL_STATUSES: &str = "('filled','canceled','rejected','expired')";

pub struct SqliteOrderRepository {
    database: Database,
}

impl SqliteOrderRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp: {}", raw))?
        .with_timezone(&Utc))
}

fn parse_opt_datetime(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_datetime(&s)).transpose()
}

fn row_to_order(row: &SqliteRow) -> Result<Order> {
    let side: String = row.try_get("side")?;
    let order_type: String = row.try_get("order_type")?;
    let tif: String = row.try_get("time_in_force")?;
    let status: String = row.try_get("status")?;
    let qty: String = row.try_get("qty")?;
    let filled_qty: String = row.try_get("filled_qty")?;
    let limit_price: Option<String> = row.try_get("limit_price")?;
    let avg_fill_price: Option<String> = row.try_get("avg_fill_price")?;
    let as_of_date: String = row.try_get("as_of_date")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let submitted_at: Option<String> = row.try_get("submitted_at")?;
    let terminal_at: Option<String> = row.try_get("terminal_at")?;

    Ok(Order {
        client_order_id: row.try_get("client_order_id")?,
        strategy_id: row.try_get("strategy_id")?,
        symbol: row.try_get("symbol")?,
        side: side.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        qty: Decimal::from_str(&qty).unwrap_or_default(),
        order_type: order_type.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        limit_price: limit_price.and_then(|p| Decimal::from_str(&p).ok()),
        time_in_force: tif.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        as_of_date: NaiveDate::parse_from_str(&as_of_date, "%Y-%m-%d")
            .with_context(|| format!("Invalid as_of_date: {}", as_of_date))?,
        status: status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        broker_order_id: row.try_get("broker_order_id")?,
        parent_order_id: row.try_get("parent_order_id")?,
        filled_qty: Decimal::from_str(&filled_qty).unwrap_or_default(),
        avg_fill_price: avg_fill_price.and_then(|p| Decimal::from_str(&p).ok()),
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
        submitted_at: parse_opt_datetime(submitted_at)?,
        terminal_at: parse_opt_datetime(terminal_at)?,
    })
}

fn row_to_fill(row: &SqliteRow) -> Result<Fill> {
    let side: String = row.try_get("side")?;
    let qty: String = row.try_get("qty")?;
    let price: String = row.try_get("price")?;
    let fill_time: String = row.try_get("fill_time")?;
    Ok(Fill {
        fill_id: row.try_get("fill_id")?,
        client_order_id: row.try_get("client_order_id")?,
        symbol: row.try_get("symbol")?,
        side: side.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        qty: Decimal::from_str(&qty).unwrap_or_default(),
        price: Decimal::from_str(&price).unwrap_or_default(),
        fill_time: parse_datetime(&fill_time)?,
    })
}

fn row_to_position(row: &SqliteRow) -> Result<Position> {
    let qty: String = row.try_get("qty")?;
    let avg: String = row.try_get("avg_entry_price")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Position {
        symbol: row.try_get("symbol")?,
        qty: Decimal::from_str(&qty).unwrap_or_default(),
        avg_entry_price: Decimal::from_str(&avg).unwrap_or_default(),
        updated_at: parse_datetime(&updated_at)?,
    })
}

const INSERT_ORDER_SQL: &str = r#"
    INSERT OR IGNORE INTO orders (
        client_order_id, strategy_id, symbol, side, qty, order_type,
        limit_price, time_in_force, as_of_date, status, broker_order_id,
        parent_order_id, filled_qty, avg_fill_price, created_at, updated_at,
        submitted_at, terminal_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
"#;

fn bind_order<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    order: &'q Order,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&order.client_order_id)
        .bind(&order.strategy_id)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(order.qty.to_string())
        .bind(order.order_type.to_string())
        .bind(order.limit_price.map(|p| p.to_string()))
        .bind(order.time_in_force.to_string())
        .bind(order.as_of_date.format("%Y-%m-%d").to_string())
        .bind(order.status.to_string())
        .bind(&order.broker_order_id)
        .bind(&order.parent_order_id)
        .bind(order.filled_qty.to_string())
        .bind(order.avg_fill_price.map(|p| p.to_string()))
        .bind(order.created_at.to_rfc3339())
        .bind(order.updated_at.to_rfc3339())
        .bind(order.submitted_at.map(|t| t.to_rfc3339()))
        .bind(order.terminal_at.map(|t| t.to_rfc3339()))
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn insert_if_absent(&self, order: &Order) -> Result<InsertOutcome> {
        let result = bind_order(sqlx::query(INSERT_ORDER_SQL), order)
            .execute(&self.database.pool)
            .await
            .context("Failed to insert order")?;
        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::Inserted);
        }
        let existing = self
            .get(&order.client_order_id)
            .await?
            .context("Order row vanished between insert and read-back")?;
        Ok(InsertOutcome::Existing(existing))
    }

    async fn get(&self, client_order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE client_order_id = $1")
            .bind(client_order_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load order")?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn get_by_broker_id(&self, broker_order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE broker_order_id = $1")
            .bind(broker_order_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load order by broker id")?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn mark_submitted(
        &self,
        client_order_id: &str,
        broker_order_id: &str,
        status: OrderStatus,
    ) -> Result<()> {
        let mut tx = self.database.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM orders WHERE client_order_id = $1")
            .bind(client_order_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row.as_ref() else {
            bail!("Cannot mark unknown order {} submitted", client_order_id);
        };
        let order = row_to_order(row)?;
        let now = Utc::now();

        sqlx::query(
            "UPDATE orders SET broker_order_id = $1, submitted_at = COALESCE(submitted_at, $2), updated_at = $3 \
             WHERE client_order_id = $4",
        )
        .bind(broker_order_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(client_order_id)
        .execute(&mut *tx)
        .await?;

        // Only advance the status; a webhook may already have moved the row
        // further along the lifecycle.
        if order.status != status && order.status.can_transition_to(status) {
            sqlx::query(
                "UPDATE orders SET status = $1, updated_at = $2, terminal_at = CASE WHEN $3 THEN $2 ELSE terminal_at END \
                 WHERE client_order_id = $4",
            )
            .bind(status.to_string())
            .bind(now.to_rfc3339())
            .bind(status.is_terminal())
            .bind(client_order_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn transition(&self, client_order_id: &str, status: OrderStatus) -> Result<bool> {
        let mut tx = self.database.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM orders WHERE client_order_id = $1")
            .bind(client_order_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row.as_ref() else {
            bail!("Cannot transition unknown order {}", client_order_id);
        };
        let order = row_to_order(row)?;
        if order.status == status || !order.status.can_transition_to(status) {
            // Replays and illegal walks are no-ops; terminal rows stay frozen.
            return Ok(false);
        }
        let now = Utc::now();
        sqlx::query(
            "UPDATE orders SET status = $1, updated_at = $2, terminal_at = CASE WHEN $3 THEN $2 ELSE terminal_at END \
             WHERE client_order_id = $4",
        )
        .bind(status.to_string())
        .bind(now.to_rfc3339())
        .bind(status.is_terminal())
        .bind(client_order_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn apply_fill(&self, fill: &Fill) -> Result<FillApplied> {
        let mut tx = self.database.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM orders WHERE client_order_id = $1")
            .bind(&fill.client_order_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row.as_ref() else {
            bail!("Fill {} references unknown order {}", fill.fill_id, fill.client_order_id);
        };
        let mut order = row_to_order(row)?;

        let position_row = sqlx::query("SELECT * FROM positions WHERE symbol = $1")
            .bind(&fill.symbol)
            .fetch_optional(&mut *tx)
            .await?;
        let mut position = match position_row.as_ref() {
            Some(row) => row_to_position(row)?,
            None => Position::flat(&fill.symbol),
        };

        if order.is_terminal() {
            // Terminal rows are frozen; late or replayed fills never write.
            warn!(
                "OrderRepository: Dropping fill {} against terminal order {} ({})",
                fill.fill_id, order.client_order_id, order.status
            );
            return Ok(FillApplied {
                order,
                position,
                applied: false,
            });
        }

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO fills (fill_id, client_order_id, symbol, side, qty, price, fill_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&fill.fill_id)
        .bind(&fill.client_order_id)
        .bind(&fill.symbol)
        .bind(fill.side.to_string())
        .bind(fill.qty.to_string())
        .bind(fill.price.to_string())
        .bind(fill.fill_time.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // Replay of a known fill id: the whole event is a no-op.
            return Ok(FillApplied {
                order,
                position,
                applied: false,
            });
        }

        let prev_filled = order.filled_qty;
        let mut new_filled = prev_filled + fill.qty;
        if new_filled > order.qty {
            warn!(
                "OrderRepository: Fill {} overshoots order {} ({} > {}); clamping",
                fill.fill_id, order.client_order_id, new_filled, order.qty
            );
            new_filled = order.qty;
        }
        let new_avg = match order.avg_fill_price {
            Some(avg) if !prev_filled.is_zero() => {
                (avg * prev_filled + fill.price * fill.qty) / (prev_filled + fill.qty)
            }
            _ => fill.price,
        };
        let new_status = if new_filled >= order.qty {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        let now = Utc::now();

        sqlx::query(
            "UPDATE orders SET filled_qty = $1, avg_fill_price = $2, status = $3, updated_at = $4, \
             terminal_at = CASE WHEN $5 THEN $4 ELSE terminal_at END \
             WHERE client_order_id = $6",
        )
        .bind(new_filled.to_string())
        .bind(new_avg.to_string())
        .bind(new_status.to_string())
        .bind(now.to_rfc3339())
        .bind(new_status.is_terminal())
        .bind(&order.client_order_id)
        .execute(&mut *tx)
        .await?;

        position.apply_fill(fill.side, fill.qty, fill.price);
        sqlx::query(
            "INSERT INTO positions (symbol, qty, avg_entry_price, updated_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT(symbol) DO UPDATE SET qty = excluded.qty, \
             avg_entry_price = excluded.avg_entry_price, updated_at = excluded.updated_at",
        )
        .bind(&position.symbol)
        .bind(position.qty.to_string())
        .bind(position.avg_entry_price.to_string())
        .bind(position.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        order.filled_qty = new_filled;
        order.avg_fill_price = Some(new_avg);
        order.status = new_status;
        order.updated_at = now;
        if new_status.is_terminal() {
            order.terminal_at = Some(now);
        }

        Ok(FillApplied {
            order,
            position,
            applied: true,
        })
    }

    async fn open_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM orders WHERE status NOT IN {} ORDER BY created_at",
            TERMINAL_STATUSES
        ))
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load open orders")?;
        rows.iter().map(row_to_order).collect()
    }

    async fn open_orders_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM orders WHERE status NOT IN {} AND created_at < $1 ORDER BY created_at",
            TERMINAL_STATUSES
        ))
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load stale orders")?;
        rows.iter().map(row_to_order).collect()
    }

    async fn orders_for_date(&self, date: NaiveDate) -> Result<Vec<Order>> {
        let rows = sqlx::query("SELECT * FROM orders WHERE as_of_date = $1 ORDER BY created_at")
            .bind(date.format("%Y-%m-%d").to_string())
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to load orders for date")?;
        rows.iter().map(row_to_order).collect()
    }

    async fn fills_for_date(&self, date: NaiveDate) -> Result<Vec<Fill>> {
        let rows = sqlx::query(
            "SELECT f.* FROM fills f JOIN orders o ON o.client_order_id = f.client_order_id \
             WHERE o.as_of_date = $1 ORDER BY f.fill_time",
        )
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load fills for date")?;
        rows.iter().map(row_to_fill).collect()
    }

    async fn insert_shadow(&self, order: &Order) -> Result<()> {
        bind_order(sqlx::query(INSERT_ORDER_SQL), order)
            .execute(&self.database.pool)
            .await
            .context("Failed to insert shadow order")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::{OrderSide, OrderType, TimeInForce};
    use rust_decimal_macros::dec;

    fn order(id: &str) -> Order {
        Order::new(
            id.to_string(),
            "s1".to_string(),
            "AAPL".to_string(),
            OrderSide::Buy,
            dec!(10),
            OrderType::Market,
            None,
            TimeInForce::Day,
        )
    }

    fn fill(fill_id: &str, order_id: &str, qty: Decimal, price: Decimal) -> Fill {
        Fill {
            fill_id: fill_id.to_string(),
            client_order_id: order_id.to_string(),
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            qty,
            price,
            fill_time: Utc::now(),
        }
    }

    async fn repo() -> SqliteOrderRepository {
        SqliteOrderRepository::new(Database::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_insert_if_absent_claims_once() {
        let repo = repo().await;
        let order = order("abc");
        assert!(matches!(
            repo.insert_if_absent(&order).await.unwrap(),
            InsertOutcome::Inserted
        ));
        assert!(matches!(
            repo.insert_if_absent(&order).await.unwrap(),
            InsertOutcome::Existing(_)
        ));
    }

    #[tokio::test]
    async fn test_fill_updates_order_and_position_atomically() {
        let repo = repo().await;
        let order = order("abc");
        repo.insert_if_absent(&order).await.unwrap();
        repo.mark_submitted("abc", "br-1", OrderStatus::Accepted)
            .await
            .unwrap();

        let applied = repo
            .apply_fill(&fill("f1", "abc", dec!(4), dec!(100)))
            .await
            .unwrap();
        assert!(applied.applied);
        assert_eq!(applied.order.status, OrderStatus::PartiallyFilled);
        assert_eq!(applied.order.filled_qty, dec!(4));
        assert_eq!(applied.position.qty, dec!(4));

        let applied = repo
            .apply_fill(&fill("f2", "abc", dec!(6), dec!(110)))
            .await
            .unwrap();
        assert!(applied.applied);
        assert_eq!(applied.order.status, OrderStatus::Filled);
        assert_eq!(applied.order.filled_qty, dec!(10));
        assert_eq!(applied.order.avg_fill_price, Some(dec!(106)));
        assert_eq!(applied.position.qty, dec!(10));
    }

    #[tokio::test]
    async fn test_fill_replay_is_a_no_op() {
        let repo = repo().await;
        repo.insert_if_absent(&order("abc")).await.unwrap();
        repo.mark_submitted("abc", "br-1", OrderStatus::Accepted)
            .await
            .unwrap();

        let event = fill("f1", "abc", dec!(10), dec!(100));
        let first = repo.apply_fill(&event).await.unwrap();
        assert!(first.applied);

        for _ in 0..2 {
            let replay = repo.apply_fill(&event).await.unwrap();
            assert!(!replay.applied);
            assert_eq!(replay.order.filled_qty, dec!(10));
            assert_eq!(replay.position.qty, dec!(10));
        }
    }

    #[tokio::test]
    async fn test_terminal_rows_are_frozen() {
        let repo = repo().await;
        repo.insert_if_absent(&order("abc")).await.unwrap();
        assert!(repo
            .transition("abc", OrderStatus::Canceled)
            .await
            .unwrap());
        // Terminal: no further transitions, replays report false
        assert!(!repo
            .transition("abc", OrderStatus::Canceled)
            .await
            .unwrap());
        assert!(!repo.transition("abc", OrderStatus::Filled).await.unwrap());
        let row = repo.get("abc").await.unwrap().unwrap();
        assert_eq!(row.status, OrderStatus::Canceled);
        assert!(row.terminal_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_submitted_does_not_regress_status() {
        let repo = repo().await;
        repo.insert_if_absent(&order("abc")).await.unwrap();
        repo.mark_submitted("abc", "br-1", OrderStatus::Accepted)
            .await
            .unwrap();
        repo.apply_fill(&fill("f1", "abc", dec!(10), dec!(100)))
            .await
            .unwrap();
        // A late duplicate ack must not pull the row back to accepted
        repo.mark_submitted("abc", "br-1", OrderStatus::Accepted)
            .await
            .unwrap();
        let row = repo.get("abc").await.unwrap().unwrap();
        assert_eq!(row.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_open_orders_filters_terminal(){
        let repo = repo().await;
        repo.insert_if_absent(&order("open1")).await.unwrap();
        repo.insert_if_absent(&order("done1")).await.unwrap();
        repo.transition("done1", OrderStatus::Canceled).await.unwrap();
        let open = repo.open_orders().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].client_order_id, "open1");
    }
}

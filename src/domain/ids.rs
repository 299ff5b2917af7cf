//! Deterministic identifier derivation.
//!
//! Client order ids and run ids are SHA-256 prefixes over a canonical `|`
//! delimited concatenation of the intent fields, so retries of the same
//! logical action always land on the same primary key.

use crate::domain::trading::types::OrderSide;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Broker-facing client order id length cap.
pub const CLIENT_ORDER_ID_LEN: usize = 24;

const RUN_ID_LEN: usize = 24;

fn hash_prefix(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = hex::encode(digest);
    out.truncate(len);
    out
}

/// Derive the deterministic client order id for an order intent.
///
/// Canonical form: `symbol|side|qty|limit_price?|strategy_id|date` with the
/// date in ISO-8601. The limit price slot is empty for market orders so a
/// market and a limit order with otherwise identical fields never collide.
pub fn client_order_id(
    symbol: &str,
    side: OrderSide,
    qty: Decimal,
    limit_price: Option<Decimal>,
    strategy_id: &str,
    date: NaiveDate,
) -> String {
    let price_part = limit_price
        .map(|p| p.normalize().to_string())
        .unwrap_or_default();
    let canonical = format!(
        "{}|{}|{}|{}|{}|{}",
        symbol,
        side,
        qty.normalize(),
        price_part,
        strategy_id,
        date.format("%Y-%m-%d"),
    );
    hash_prefix(&canonical, CLIENT_ORDER_ID_LEN)
}

/// Derive the deterministic orchestration run id from `(date, strategy, trigger)`.
pub fn run_id(date: NaiveDate, strategy_id: &str, trigger: &str) -> String {
    let canonical = format!("{}|{}|{}", date.format("%Y-%m-%d"), strategy_id, trigger);
    hash_prefix(&canonical, RUN_ID_LEN)
}

/// Fingerprint for a registry row, used by the hot-reload poller to detect
/// that the active model changed.
pub fn model_fingerprint(version: &str, model_path: &str) -> String {
    hash_prefix(&format!("{}|{}", version, model_path), 16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
    }

    #[test]
    fn test_client_order_id_is_deterministic() {
        let a = client_order_id("AAPL", OrderSide::Buy, dec!(10), None, "s1", date());
        let b = client_order_id("AAPL", OrderSide::Buy, dec!(10), None, "s1", date());
        assert_eq!(a, b);
        assert_eq!(a.len(), CLIENT_ORDER_ID_LEN);
    }

    #[test]
    fn test_client_order_id_varies_by_field() {
        let base = client_order_id("AAPL", OrderSide::Buy, dec!(10), None, "s1", date());
        assert_ne!(
            base,
            client_order_id("MSFT", OrderSide::Buy, dec!(10), None, "s1", date())
        );
        assert_ne!(
            base,
            client_order_id("AAPL", OrderSide::Sell, dec!(10), None, "s1", date())
        );
        assert_ne!(
            base,
            client_order_id("AAPL", OrderSide::Buy, dec!(11), None, "s1", date())
        );
        assert_ne!(
            base,
            client_order_id("AAPL", OrderSide::Buy, dec!(10), Some(dec!(99)), "s1", date())
        );
        assert_ne!(
            base,
            client_order_id("AAPL", OrderSide::Buy, dec!(10), None, "s2", date())
        );
    }

    #[test]
    fn test_quantity_normalization() {
        // 10 and 10.0 are the same logical quantity
        let a = client_order_id("AAPL", OrderSide::Buy, dec!(10), None, "s1", date());
        let b = client_order_id("AAPL", OrderSide::Buy, dec!(10.0), None, "s1", date());
        assert_eq!(a, b);
    }

    #[test]
    fn test_run_id_is_deterministic() {
        let a = run_id(date(), "s1", "scheduled");
        let b = run_id(date(), "s1", "scheduled");
        assert_eq!(a, b);
        assert_ne!(a, run_id(date(), "s1", "manual"));
    }
}

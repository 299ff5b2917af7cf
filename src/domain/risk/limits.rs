use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Effective pre-trade limits, merged from global and per-strategy rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Absolute share cap per symbol.
    pub max_pos_per_symbol: Decimal,
    /// Gross notional cap across all positions plus planned orders.
    pub max_total_notional: Decimal,
    /// Daily loss limit as a positive fraction of portfolio value
    /// (0.03 = trip at -3%).
    pub daily_loss_limit: Decimal,
    pub blacklist: HashSet<String>,
    /// Broker lot size; planned quantities are truncated to a multiple of
    /// this, never rounded up.
    pub lot_size: Decimal,
}

impl RiskLimits {
    pub fn is_blacklisted(&self, symbol: &str) -> bool {
        self.blacklist.contains(symbol)
    }

    /// Truncate a quantity down to the lot grid. Returns zero for quantities
    /// below one lot.
    pub fn truncate_to_lot(&self, qty: Decimal) -> Decimal {
        if self.lot_size <= Decimal::ZERO {
            return qty;
        }
        let lots = (qty / self.lot_size).floor();
        lots * self.lot_size
    }
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_pos_per_symbol: Decimal::new(10_000, 0),
            max_total_notional: Decimal::new(1_000_000, 0),
            daily_loss_limit: Decimal::new(3, 2),
            blacklist: HashSet::new(),
            lot_size: Decimal::ONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_truncate_to_lot_never_rounds_up() {
        let limits = RiskLimits {
            lot_size: dec!(1),
            ..Default::default()
        };
        assert_eq!(limits.truncate_to_lot(dec!(10.9)), dec!(10));
        assert_eq!(limits.truncate_to_lot(dec!(0.5)), dec!(0));

        let fractional = RiskLimits {
            lot_size: dec!(0.01),
            ..Default::default()
        };
        assert_eq!(fractional.truncate_to_lot(dec!(1.2345)), dec!(1.23));
    }
}

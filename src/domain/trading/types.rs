use chrono::{DateTime, Utc};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Signed direction of the quantity change a fill on this side produces.
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(format!("Invalid order side: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            _ => Err(format!("Invalid order type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    #[default]
    Day,
    Gtc,
    Ioc,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeInForce::Day => write!(f, "day"),
            TimeInForce::Gtc => write!(f, "gtc"),
            TimeInForce::Ioc => write!(f, "ioc"),
        }
    }
}

impl std::str::FromStr for TimeInForce {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" => Ok(TimeInForce::Day),
            "gtc" => Ok(TimeInForce::Gtc),
            "ioc" => Ok(TimeInForce::Ioc),
            _ => Err(format!("Invalid time in force: {}", s)),
        }
    }
}

/// Order lifecycle state.
///
/// Orders walk the DAG
/// `new -> submitted -> accepted -> (partially_filled | filled | canceled | rejected | expired)`.
/// Terminal states admit no further transitions; `PartiallyFilled` may
/// self-loop on additional fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    /// Whether moving from `self` to `next` is a legal walk on the lifecycle DAG.
    ///
    /// Re-applying the current non-terminal state is legal so replayed broker
    /// events stay no-ops.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        use OrderStatus::*;
        match self {
            New => matches!(next, Submitted | Accepted | Canceled | Rejected | Expired),
            Submitted => matches!(
                next,
                Accepted | PartiallyFilled | Filled | Canceled | Rejected | Expired
            ),
            Accepted => matches!(
                next,
                PartiallyFilled | Filled | Canceled | Rejected | Expired
            ),
            PartiallyFilled => matches!(next, Filled | Canceled | Expired),
            Filled | Canceled | Rejected | Expired => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::New => "new",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Accepted => "accepted",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(OrderStatus::New),
            "submitted" => Ok(OrderStatus::Submitted),
            "accepted" => Ok(OrderStatus::Accepted),
            "partially_filled" => Ok(OrderStatus::PartiallyFilled),
            "filled" => Ok(OrderStatus::Filled),
            "canceled" => Ok(OrderStatus::Canceled),
            "rejected" => Ok(OrderStatus::Rejected),
            "expired" => Ok(OrderStatus::Expired),
            _ => Err(format!("Invalid order status: {}", s)),
        }
    }
}

/// Full lifecycle record of a broker order.
///
/// `client_order_id` is the primary key and is derived deterministically from
/// the order intent (see `domain::ids`), so a retried submission maps onto
/// the same row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    /// Trading date this order belongs to; part of the id derivation.
    pub as_of_date: chrono::NaiveDate,
    pub status: OrderStatus,
    pub broker_order_id: Option<String>,
    pub parent_order_id: Option<String>,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub terminal_at: Option<DateTime<Utc>>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client_order_id: String,
        strategy_id: String,
        symbol: String,
        side: OrderSide,
        qty: Decimal,
        order_type: OrderType,
        limit_price: Option<Decimal>,
        time_in_force: TimeInForce,
    ) -> Self {
        let now = Utc::now();
        Self {
            client_order_id,
            strategy_id,
            symbol,
            side,
            qty,
            order_type,
            limit_price,
            time_in_force,
            as_of_date: now.date_naive(),
            status: OrderStatus::New,
            broker_order_id: None,
            parent_order_id: None,
            filled_qty: Decimal::ZERO,
            avg_fill_price: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            terminal_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a full fill of this order strictly reduces `abs(position_qty)`.
    ///
    /// The worst case is a complete fill, so the quantity must not exceed the
    /// current absolute position.
    pub fn is_reducing_against(&self, position_qty: Decimal) -> bool {
        if position_qty.is_zero() {
            return false;
        }
        let opposes = (position_qty > Decimal::ZERO && self.side == OrderSide::Sell)
            || (position_qty < Decimal::ZERO && self.side == OrderSide::Buy);
        opposes && self.qty <= position_qty.abs()
    }

    /// Notional value of the unfilled remainder, using the limit price when
    /// present and `reference_price` otherwise.
    pub fn remaining_notional(&self, reference_price: Decimal) -> Decimal {
        let px = self.limit_price.unwrap_or(reference_price);
        (self.qty - self.filled_qty) * px
    }
}

/// Immutable execution event reported by the broker. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub price: Decimal,
    pub fill_time: DateTime<Utc>,
}

/// Per-symbol aggregated holdings. Long positions carry positive `qty`,
/// shorts negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            qty: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Apply a fill to this position.
    ///
    /// Same-direction fills move the average entry price by quantity
    /// weighting. Opposite-direction fills reduce toward zero without
    /// touching the average; crossing through zero re-bases the average at
    /// the fill price for the remainder.
    pub fn apply_fill(&mut self, side: OrderSide, qty: Decimal, price: Decimal) {
        let delta = side.sign() * qty;
        let new_qty = self.qty + delta;

        if self.qty.is_zero() || self.qty.signum() == delta.signum() {
            let total = self.qty.abs() + qty;
            if !total.is_zero() {
                self.avg_entry_price =
                    (self.avg_entry_price * self.qty.abs() + price * qty) / total;
            }
        } else if new_qty.is_zero() {
            self.avg_entry_price = Decimal::ZERO;
        } else if new_qty.signum() != self.qty.signum() {
            // Crossed through zero: the surviving exposure was opened at the
            // fill price.
            self.avg_entry_price = price;
        }

        self.qty = new_qty;
        self.updated_at = Utc::now();
    }

    pub fn is_flat(&self) -> bool {
        self.qty.is_zero()
    }

    pub fn notional(&self, price: Decimal) -> Decimal {
        self.qty.abs() * price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_terminal_states_are_frozen() {
        for terminal in [
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(OrderStatus::Accepted));
            assert!(!terminal.can_transition_to(terminal));
        }
    }

    #[test]
    fn test_lifecycle_walk() {
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Submitted));
        assert!(OrderStatus::Submitted.can_transition_to(OrderStatus::Accepted));
        assert!(OrderStatus::Accepted.can_transition_to(OrderStatus::PartiallyFilled));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::PartiallyFilled));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Filled));

        // No walking backwards
        assert!(!OrderStatus::Accepted.can_transition_to(OrderStatus::New));
        assert!(!OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Submitted));
    }

    #[test]
    fn test_reapplying_current_state_is_legal() {
        assert!(OrderStatus::Accepted.can_transition_to(OrderStatus::Accepted));
        assert!(OrderStatus::Submitted.can_transition_to(OrderStatus::Submitted));
    }

    #[test]
    fn test_reducing_order_detection() {
        let mut order = Order::new(
            "abc".to_string(),
            "s1".to_string(),
            "AAPL".to_string(),
            OrderSide::Sell,
            dec!(5),
            OrderType::Market,
            None,
            TimeInForce::Day,
        );

        // Long 10, selling 5 reduces
        assert!(order.is_reducing_against(dec!(10)));
        // Long 3, selling 5 could flip the position — not strictly reducing
        assert!(!order.is_reducing_against(dec!(3)));
        // Flat position: nothing to reduce
        assert!(!order.is_reducing_against(Decimal::ZERO));

        order.side = OrderSide::Buy;
        // Short 10, buying 5 reduces
        assert!(order.is_reducing_against(dec!(-10)));
        assert!(!order.is_reducing_against(dec!(10)));
    }

    #[test]
    fn test_position_averaging() {
        let mut pos = Position::flat("AAPL");
        pos.apply_fill(OrderSide::Buy, dec!(10), dec!(100));
        assert_eq!(pos.qty, dec!(10));
        assert_eq!(pos.avg_entry_price, dec!(100));

        pos.apply_fill(OrderSide::Buy, dec!(10), dec!(110));
        assert_eq!(pos.qty, dec!(20));
        assert_eq!(pos.avg_entry_price, dec!(105));

        // Reducing leaves the average untouched
        pos.apply_fill(OrderSide::Sell, dec!(5), dec!(120));
        assert_eq!(pos.qty, dec!(15));
        assert_eq!(pos.avg_entry_price, dec!(105));
    }

    #[test]
    fn test_position_flip_rebases_average() {
        let mut pos = Position::flat("MSFT");
        pos.apply_fill(OrderSide::Buy, dec!(10), dec!(100));
        pos.apply_fill(OrderSide::Sell, dec!(15), dec!(90));
        assert_eq!(pos.qty, dec!(-5));
        assert_eq!(pos.avg_entry_price, dec!(90));
    }

    #[test]
    fn test_position_close_to_flat() {
        let mut pos = Position::flat("GOOGL");
        pos.apply_fill(OrderSide::Buy, dec!(4), dec!(200));
        pos.apply_fill(OrderSide::Sell, dec!(4), dec!(210));
        assert!(pos.is_flat());
        assert_eq!(pos.avg_entry_price, Decimal::ZERO);
    }
}

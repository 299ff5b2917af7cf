use crate::domain::ids;
use crate::domain::trading::types::{Order, OrderSide, OrderType, TimeInForce};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A fully specified order intent, the unit the risk manager emits and the
/// execution gateway accepts. The client order id is derived, never chosen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub strategy_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub as_of_date: NaiveDate,
}

impl OrderIntent {
    pub fn client_order_id(&self) -> String {
        ids::client_order_id(
            &self.symbol,
            self.side,
            self.qty,
            self.limit_price,
            &self.strategy_id,
            self.as_of_date,
        )
    }

    pub fn to_order(&self) -> Order {
        let mut order = Order::new(
            self.client_order_id(),
            self.strategy_id.clone(),
            self.symbol.clone(),
            self.side,
            self.qty,
            self.order_type,
            self.limit_price,
            self.time_in_force,
        );
        order.as_of_date = self.as_of_date;
        order
    }
}

/// One rejected candidate with the reason it was dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRejection {
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub code: String,
    pub reason: String,
}

/// Risk manager output: accepted orders in submission order plus the trace
/// of rejected candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlan {
    pub strategy_id: String,
    pub as_of_date: NaiveDate,
    pub orders: Vec<OrderIntent>,
    pub rejections: Vec<PlanRejection>,
    pub portfolio_value: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_intent_id_matches_order_id() {
        let intent = OrderIntent {
            strategy_id: "s1".to_string(),
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            qty: dec!(10),
            order_type: OrderType::Market,
            limit_price: None,
            time_in_force: TimeInForce::Day,
            as_of_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        };
        let order = intent.to_order();
        assert_eq!(order.client_order_id, intent.client_order_id());
        assert_eq!(order.client_order_id.len(), 24);
    }
}

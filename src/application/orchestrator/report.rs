use crate::domain::trading::types::{Fill, Order, OrderSide, Position};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-symbol notional P&L line: cash flow from today's fills plus the open
/// remainder marked at the last fill price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolPnl {
    pub symbol: String,
    pub buy_qty: Decimal,
    pub sell_qty: Decimal,
    pub buy_notional: Decimal,
    pub sell_notional: Decimal,
    pub fills: u32,
    pub position_qty: Decimal,
    pub mark_price: Decimal,
    pub notional_pnl: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlReport {
    pub as_of_date: NaiveDate,
    pub orders_total: u32,
    pub orders_filled: u32,
    pub symbols: Vec<SymbolPnl>,
    pub total_notional_pnl: Decimal,
}

/// Notional P&L over one day's fills.
///
/// Realized leg: sell notional minus buy notional. Open leg: the day's net
/// traded quantity marked at the last observed fill price for the symbol.
pub fn build_report(
    as_of: NaiveDate,
    orders: &[Order],
    fills: &[Fill],
    positions: &[Position],
) -> PnlReport {
    #[derive(Default)]
    struct Acc {
        buy_qty: Decimal,
        sell_qty: Decimal,
        buy_notional: Decimal,
        sell_notional: Decimal,
        fills: u32,
        last_price: Decimal,
    }

    let mut by_symbol: BTreeMap<String, Acc> = BTreeMap::new();
    let mut sorted_fills: Vec<&Fill> = fills.iter().collect();
    sorted_fills.sort_by_key(|f| f.fill_time);

    for fill in sorted_fills {
        let acc = by_symbol.entry(fill.symbol.clone()).or_default();
        match fill.side {
            OrderSide::Buy => {
                acc.buy_qty += fill.qty;
                acc.buy_notional += fill.qty * fill.price;
            }
            OrderSide::Sell => {
                acc.sell_qty += fill.qty;
                acc.sell_notional += fill.qty * fill.price;
            }
        }
        acc.fills += 1;
        acc.last_price = fill.price;
    }

    let position_by_symbol: BTreeMap<&str, &Position> =
        positions.iter().map(|p| (p.symbol.as_str(), p)).collect();

    let mut total = Decimal::ZERO;
    let symbols: Vec<SymbolPnl> = by_symbol
        .into_iter()
        .map(|(symbol, acc)| {
            let net_traded = acc.buy_qty - acc.sell_qty;
            let position_qty = position_by_symbol
                .get(symbol.as_str())
                .map(|p| p.qty)
                .unwrap_or(net_traded);
            let notional_pnl =
                acc.sell_notional - acc.buy_notional + net_traded * acc.last_price;
            total += notional_pnl;
            SymbolPnl {
                symbol,
                buy_qty: acc.buy_qty,
                sell_qty: acc.sell_qty,
                buy_notional: acc.buy_notional,
                sell_notional: acc.sell_notional,
                fills: acc.fills,
                position_qty,
                mark_price: acc.last_price,
                notional_pnl,
            }
        })
        .collect();

    PnlReport {
        as_of_date: as_of,
        orders_total: orders.len() as u32,
        orders_filled: orders
            .iter()
            .filter(|o| o.status == crate::domain::trading::types::OrderStatus::Filled)
            .count() as u32,
        symbols,
        total_notional_pnl: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn fill(symbol: &str, side: OrderSide, qty: Decimal, price: Decimal) -> Fill {
        Fill {
            fill_id: format!("{}-{}-{}", symbol, side, qty),
            client_order_id: "order".to_string(),
            symbol: symbol.to_string(),
            side,
            qty,
            price,
            fill_time: Utc::now(),
        }
    }

    #[test]
    fn test_round_trip_is_pure_cash_pnl() {
        // Buy 10 @ 100, sell 10 @ 110: flat book, +100 notional
        let fills = vec![
            fill("AAPL", OrderSide::Buy, dec!(10), dec!(100)),
            fill("AAPL", OrderSide::Sell, dec!(10), dec!(110)),
        ];
        let report = build_report(
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            &[],
            &fills,
            &[],
        );
        assert_eq!(report.total_notional_pnl, dec!(100));
        assert_eq!(report.symbols[0].position_qty, Decimal::ZERO);
    }

    #[test]
    fn test_open_position_marked_at_last_fill() {
        // Buy 10 @ 100; still long 10, marked at 100: zero P&L
        let fills = vec![fill("MSFT", OrderSide::Buy, dec!(10), dec!(100))];
        let report = build_report(
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            &[],
            &fills,
            &[],
        );
        assert_eq!(report.total_notional_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_symbols_are_sorted() {
        let fills = vec![
            fill("MSFT", OrderSide::Buy, dec!(1), dec!(10)),
            fill("AAPL", OrderSide::Buy, dec!(1), dec!(10)),
        ];
        let report = build_report(
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            &[],
            &fills,
            &[],
        );
        let names: Vec<&str> = report.symbols.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(names, vec!["AAPL", "MSFT"]);
    }
}

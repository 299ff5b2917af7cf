use crate::domain::errors::ControlPlaneError;
use crate::domain::ports::{
    BrokerAccount, BrokerAck, BrokerOrder, BrokerPosition, BrokerService, BrokerWebhookEvent,
    WebhookEventType, WebhookFill,
};
use crate::domain::trading::types::{Order, OrderSide, OrderStatus};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

/// How the mock settles accepted orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Fill immediately at the reference price and queue the fill event.
    Immediate,
    /// Leave orders open until a test drives them.
    Manual,
}

#[derive(Default)]
struct MockState {
    orders: HashMap<String, BrokerOrder>,
    by_client_id: HashMap<String, String>,
    positions: HashMap<String, BrokerPosition>,
    prices: HashMap<String, Decimal>,
    events: Vec<BrokerWebhookEvent>,
}

/// In-process broker honoring the outbound contract: client-order-id dedup
/// with a duplicate indicator, webhook-style events, positions and account
/// queries. Backs `DRY_RUN=true` and the test suite; nothing here ever
/// touches a network.
pub struct MockBroker {
    state: Mutex<MockState>,
    seq: AtomicU64,
    fill_mode: FillMode,
    portfolio_value: Mutex<Decimal>,
    /// Test hook: force submit failures to exercise retry paths.
    fail_submits: AtomicBool,
}

impl MockBroker {
    pub fn new(fill_mode: FillMode) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            seq: AtomicU64::new(1),
            fill_mode,
            portfolio_value: Mutex::new(dec!(100_000)),
            fail_submits: AtomicBool::new(false),
        }
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.lock().prices.insert(symbol.to_string(), price);
    }

    pub fn set_portfolio_value(&self, value: Decimal) {
        *self.portfolio_value.lock() = value;
    }

    pub fn set_position(&self, symbol: &str, qty: Decimal, avg_entry_price: Decimal) {
        self.state.lock().positions.insert(
            symbol.to_string(),
            BrokerPosition {
                symbol: symbol.to_string(),
                qty,
                avg_entry_price,
            },
        );
    }

    pub fn set_fail_submits(&self, fail: bool) {
        self.fail_submits.store(fail, Ordering::SeqCst);
    }

    /// Events queued since the last drain, in emission order. The serve
    /// loop pumps these into the webhook endpoint; tests feed them to the
    /// gateway directly.
    pub fn drain_events(&self) -> Vec<BrokerWebhookEvent> {
        std::mem::take(&mut self.state.lock().events)
    }

    pub fn submitted_order_count(&self) -> usize {
        self.state.lock().orders.len()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.seq.fetch_add(1, Ordering::SeqCst))
    }

    fn apply_fill_to_position(
        positions: &mut HashMap<String, BrokerPosition>,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        price: Decimal,
    ) {
        let entry = positions.entry(symbol.to_string()).or_insert(BrokerPosition {
            symbol: symbol.to_string(),
            qty: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
        });
        let delta = side.sign() * qty;
        let new_qty = entry.qty + delta;
        if entry.qty.is_zero() || entry.qty.signum() == delta.signum() {
            let total = entry.qty.abs() + qty;
            if !total.is_zero() {
                entry.avg_entry_price =
                    (entry.avg_entry_price * entry.qty.abs() + price * qty) / total;
            }
        } else if new_qty.signum() != entry.qty.signum() {
            entry.avg_entry_price = price;
        }
        entry.qty = new_qty;
        if entry.qty.is_zero() {
            positions.remove(symbol);
        }
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new(FillMode::Immediate)
    }
}

#[async_trait]
impl BrokerService for MockBroker {
    async fn submit_order(&self, order: &Order) -> Result<BrokerAck, ControlPlaneError> {
        if self.fail_submits.load(Ordering::SeqCst) {
            return Err(ControlPlaneError::broker_retriable(
                "mock broker configured to fail submits",
            ));
        }

        let mut state = self.state.lock();
        // Duplicate indicator: same client order id maps to the same order.
        if let Some(broker_id) = state.by_client_id.get(&order.client_order_id).cloned() {
            let existing = state.orders.get(&broker_id).cloned();
            if let Some(existing) = existing {
                info!(
                    "MockBroker: Duplicate client order id {} -> {}",
                    order.client_order_id, existing.broker_order_id
                );
                return Ok(BrokerAck {
                    broker_order_id: existing.broker_order_id,
                    status: existing.status,
                    duplicate: true,
                });
            }
        }

        let broker_order_id = self.next_id("mock");
        let price = order.limit_price.unwrap_or_else(|| {
            state
                .prices
                .get(&order.symbol)
                .copied()
                .unwrap_or(dec!(100))
        });

        let mut remote = BrokerOrder {
            broker_order_id: broker_order_id.clone(),
            client_order_id: Some(order.client_order_id.clone()),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: order.qty,
            filled_qty: Decimal::ZERO,
            avg_fill_price: None,
            status: OrderStatus::Accepted,
            submitted_at: Some(Utc::now()),
        };

        state.events.push(BrokerWebhookEvent {
            event_type: WebhookEventType::Accepted,
            broker_order_id: broker_order_id.clone(),
            client_order_id: Some(order.client_order_id.clone()),
            fill: None,
            timestamp: Utc::now(),
        });

        if self.fill_mode == FillMode::Immediate {
            remote.status = OrderStatus::Filled;
            remote.filled_qty = order.qty;
            remote.avg_fill_price = Some(price);
            let fill_id = self.next_id("fill");
            state.events.push(BrokerWebhookEvent {
                event_type: WebhookEventType::Fill,
                broker_order_id: broker_order_id.clone(),
                client_order_id: Some(order.client_order_id.clone()),
                fill: Some(WebhookFill {
                    fill_id,
                    qty: order.qty,
                    price,
                    fill_time: Utc::now(),
                }),
                timestamp: Utc::now(),
            });
            Self::apply_fill_to_position(
                &mut state.positions,
                &order.symbol,
                order.side,
                order.qty,
                price,
            );
        }

        let status = remote.status;
        state
            .by_client_id
            .insert(order.client_order_id.clone(), broker_order_id.clone());
        state.orders.insert(broker_order_id.clone(), remote);

        Ok(BrokerAck {
            broker_order_id,
            status,
            duplicate: false,
        })
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock();
        let Some(order) = state.orders.get_mut(broker_order_id) else {
            // Unknown id cancels are fine; the order may already be gone.
            return Ok(());
        };
        if order.status.is_terminal() {
            return Ok(());
        }
        order.status = OrderStatus::Canceled;
        let client_order_id = order.client_order_id.clone();
        state.events.push(BrokerWebhookEvent {
            event_type: WebhookEventType::Canceled,
            broker_order_id: broker_order_id.to_string(),
            client_order_id,
            fill: None,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn get_order(
        &self,
        broker_order_id: &str,
    ) -> Result<Option<BrokerOrder>, ControlPlaneError> {
        Ok(self.state.lock().orders.get(broker_order_id).cloned())
    }

    async fn open_orders(&self) -> Result<Vec<BrokerOrder>, ControlPlaneError> {
        Ok(self
            .state
            .lock()
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, ControlPlaneError> {
        Ok(self.state.lock().positions.values().cloned().collect())
    }

    async fn account(&self) -> Result<BrokerAccount, ControlPlaneError> {
        Ok(BrokerAccount {
            portfolio_value: *self.portfolio_value.lock(),
            buying_power: *self.portfolio_value.lock() * dec!(2),
            market_open: true,
        })
    }
}

// =============================================================================
// Paper broker — fully in-process simulated account
// =============================================================================
//
// A mutable cash balance, a symbol -> position map, and an order_id -> order
// map, all behind `parking_lot::RwLock`. Fills are synthesized immediately at
// the current price; each order mutates the in-process state atomically under
// one write lock.
//
// Price resolution for market orders, in order: an injected price provider,
// then the last explicitly set price. No price means the order is rejected
// rather than guessed.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, TradingError};
use crate::types::Side;

use super::{
    AccountBalance, Broker, BrokerOrder, BrokerPosition, OrderRequest, OrderResponse,
};

/// Pluggable quote source for market-order fills (the backtester injects the
/// replay cursor through this).
pub trait PriceProvider: Send + Sync {
    fn price_of(&self, symbol: &str) -> Option<Decimal>;
}

struct Book {
    cash: Decimal,
    positions: HashMap<String, BrokerPosition>,
    orders: HashMap<String, BrokerOrder>,
    prices: HashMap<String, Decimal>,
    connected: bool,
}

pub struct PaperBroker {
    initial_cash: Decimal,
    book: RwLock<Book>,
    price_provider: Option<Arc<dyn PriceProvider>>,
}

impl PaperBroker {
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            initial_cash,
            book: RwLock::new(Book {
                cash: initial_cash,
                positions: HashMap::new(),
                orders: HashMap::new(),
                prices: HashMap::new(),
                connected: false,
            }),
            price_provider: None,
        }
    }

    pub fn with_price_provider(initial_cash: Decimal, provider: Arc<dyn PriceProvider>) -> Self {
        let mut broker = Self::new(initial_cash);
        broker.price_provider = Some(provider);
        broker
    }

    /// Pin a quote for a symbol (tests and manual simulation).
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.book.write().prices.insert(symbol.to_string(), price);
    }

    /// Wipe the book back to the initial cash balance.
    pub fn reset(&self) {
        let mut book = self.book.write();
        book.cash = self.initial_cash;
        book.positions.clear();
        book.orders.clear();
        info!(initial_cash = %self.initial_cash, "paper broker reset");
    }

    fn resolve_price(&self, symbol: &str) -> Option<Decimal> {
        if let Some(provider) = &self.price_provider {
            if let Some(price) = provider.price_of(symbol) {
                return Some(price);
            }
        }
        self.book.read().prices.get(symbol).copied()
    }

    fn revalued(position: &BrokerPosition, current_price: Decimal) -> BrokerPosition {
        let market_value = current_price * Decimal::from(position.quantity);
        let cost_basis = position.avg_price * Decimal::from(position.quantity);
        let unrealized_pnl = market_value - cost_basis;
        BrokerPosition {
            current_price,
            market_value,
            unrealized_pnl,
            unrealized_pnl_pct: if cost_basis > Decimal::ZERO {
                unrealized_pnl / cost_basis
            } else {
                Decimal::ZERO
            },
            ..position.clone()
        }
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn connect(&self) -> Result<()> {
        self.book.write().connected = true;
        info!(initial_cash = %self.initial_cash, "paper broker connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.book.write().connected = false;
        info!("paper broker disconnected");
        Ok(())
    }

    async fn get_balance(&self) -> Result<AccountBalance> {
        let book = self.book.read();
        let mut securities_value = Decimal::ZERO;
        for position in book.positions.values() {
            let price = self
                .price_provider
                .as_ref()
                .and_then(|p| p.price_of(&position.symbol))
                .or_else(|| book.prices.get(&position.symbol).copied())
                .unwrap_or(position.avg_price);
            securities_value += price * Decimal::from(position.quantity);
        }
        Ok(AccountBalance {
            total_value: book.cash + securities_value,
            cash_balance: book.cash,
            securities_value,
            buying_power: book.cash,
        })
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        let book = self.book.read();
        let mut out = Vec::with_capacity(book.positions.len());
        for position in book.positions.values() {
            if position.quantity == 0 {
                continue;
            }
            let price = self
                .price_provider
                .as_ref()
                .and_then(|p| p.price_of(&position.symbol))
                .or_else(|| book.prices.get(&position.symbol).copied())
                .unwrap_or(position.avg_price);
            out.push(Self::revalued(position, price));
        }
        Ok(out)
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>> {
        let positions = self.get_positions().await?;
        Ok(positions.into_iter().find(|p| p.symbol == symbol))
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Decimal> {
        self.resolve_price(symbol)
            .ok_or_else(|| TradingError::Broker(format!("no paper price for {symbol}")))
    }

    async fn place_order(&self, request: OrderRequest) -> Result<OrderResponse> {
        let price = match request.method {
            crate::types::OrderMethod::Market => self.resolve_price(&request.symbol),
            crate::types::OrderMethod::Limit => request.price,
        };
        let Some(price) = price.filter(|p| *p > Decimal::ZERO) else {
            return Ok(OrderResponse::rejected(format!(
                "invalid price for {}",
                request.symbol
            )));
        };

        let order_id = Uuid::new_v4().to_string()[..8].to_string();
        let now = Utc::now().to_rfc3339();

        // One write lock for the whole fill: cash, position, and order move
        // together or not at all.
        let mut book = self.book.write();

        match request.side {
            Side::Buy => {
                let required = price * Decimal::from(request.quantity);
                if required > book.cash {
                    warn!(
                        symbol = %request.symbol,
                        required = %required,
                        available = %book.cash,
                        quantity = request.quantity,
                        "paper order rejected: insufficient funds"
                    );
                    return Ok(OrderResponse::rejected(format!(
                        "insufficient funds: need {required}, have {}",
                        book.cash
                    )));
                }
                book.cash -= required;

                let entry = book
                    .positions
                    .entry(request.symbol.clone())
                    .or_insert_with(|| BrokerPosition {
                        symbol: request.symbol.clone(),
                        quantity: 0,
                        avg_price: Decimal::ZERO,
                        current_price: price,
                        market_value: Decimal::ZERO,
                        unrealized_pnl: Decimal::ZERO,
                        unrealized_pnl_pct: Decimal::ZERO,
                    });
                let total_cost = entry.avg_price * Decimal::from(entry.quantity)
                    + price * Decimal::from(request.quantity);
                entry.quantity += request.quantity;
                entry.avg_price = total_cost / Decimal::from(entry.quantity);
                entry.current_price = price;
                entry.market_value = price * Decimal::from(entry.quantity);
            }
            Side::Sell => {
                let Some(position) = book.positions.get(&request.symbol).cloned() else {
                    warn!(symbol = %request.symbol, "paper order rejected: no position");
                    return Ok(OrderResponse::rejected(format!(
                        "no position in {}",
                        request.symbol
                    )));
                };
                if position.quantity < request.quantity {
                    warn!(
                        symbol = %request.symbol,
                        have = position.quantity,
                        need = request.quantity,
                        "paper order rejected: insufficient shares"
                    );
                    return Ok(OrderResponse::rejected(format!(
                        "insufficient shares: have {}, need {}",
                        position.quantity, request.quantity
                    )));
                }

                book.cash += price * Decimal::from(request.quantity);
                let remaining = position.quantity - request.quantity;
                if remaining > 0 {
                    let entry = book.positions.get_mut(&request.symbol).unwrap();
                    entry.quantity = remaining;
                    entry.current_price = price;
                    entry.market_value = price * Decimal::from(remaining);
                } else {
                    book.positions.remove(&request.symbol);
                }
            }
        }

        let order = BrokerOrder {
            order_id: order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            method: request.method,
            price: Some(price),
            status: "FILLED".to_string(),
            filled_quantity: request.quantity,
            filled_price: Some(price),
            created_at: now.clone(),
            updated_at: Some(now),
        };
        book.orders.insert(order_id.clone(), order);

        info!(
            order_id = %order_id,
            symbol = %request.symbol,
            side = %request.side,
            quantity = request.quantity,
            price = %price,
            cash_remaining = %book.cash,
            "paper order filled"
        );

        Ok(OrderResponse {
            success: true,
            order_id: Some(order_id),
            message: "order filled".to_string(),
            raw_response: None,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<OrderResponse> {
        let mut book = self.book.write();
        let Some(order) = book.orders.get_mut(order_id) else {
            return Ok(OrderResponse::rejected("order not found"));
        };
        if order.status == "FILLED" {
            return Ok(OrderResponse::rejected("cannot cancel filled order"));
        }
        order.status = "CANCELLED".to_string();
        order.updated_at = Some(Utc::now().to_rfc3339());
        Ok(OrderResponse {
            success: true,
            order_id: Some(order_id.to_string()),
            message: "order cancelled".to_string(),
            raw_response: None,
        })
    }

    async fn get_order_status(&self, order_id: &str) -> Result<Option<BrokerOrder>> {
        Ok(self.book.read().orders.get(order_id).cloned())
    }

    async fn open_orders(&self) -> Result<Vec<BrokerOrder>> {
        Ok(self
            .book
            .read()
            .orders
            .values()
            .filter(|o| o.status != "FILLED" && o.status != "CANCELLED")
            .cloned()
            .collect())
    }

    fn is_paper_trading(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for PaperBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let book = self.book.read();
        f.debug_struct("PaperBroker")
            .field("cash", &book.cash)
            .field("positions", &book.positions.len())
            .field("orders", &book.orders.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn broker() -> PaperBroker {
        let b = PaperBroker::new(dec!(100000000));
        b.set_price("005930", dec!(50000));
        b
    }

    #[tokio::test]
    async fn buy_debits_cash_and_opens_position() {
        let b = broker();
        let resp = b.buy_market("005930", 100).await.unwrap();
        assert!(resp.success);
        assert!(resp.order_id.is_some());

        let balance = b.get_balance().await.unwrap();
        assert_eq!(balance.cash_balance, dec!(95000000));
        assert_eq!(balance.securities_value, dec!(5000000));
        assert_eq!(balance.total_value, dec!(100000000));

        let position = b.get_position("005930").await.unwrap().unwrap();
        assert_eq!(position.quantity, 100);
        assert_eq!(position.avg_price, dec!(50000));
    }

    #[tokio::test]
    async fn second_buy_averages_in() {
        let b = broker();
        b.buy_market("005930", 100).await.unwrap();
        b.set_price("005930", dec!(50600));
        b.buy_market("005930", 100).await.unwrap();

        let position = b.get_position("005930").await.unwrap().unwrap();
        assert_eq!(position.quantity, 200);
        assert_eq!(position.avg_price, dec!(50300));
    }

    #[tokio::test]
    async fn sell_credits_cash_and_shrinks_position() {
        let b = broker();
        b.buy_market("005930", 100).await.unwrap();
        b.set_price("005930", dec!(55000));

        let resp = b.sell_market("005930", 40).await.unwrap();
        assert!(resp.success);

        let position = b.get_position("005930").await.unwrap().unwrap();
        assert_eq!(position.quantity, 60);

        let balance = b.get_balance().await.unwrap();
        assert_eq!(balance.cash_balance, dec!(95000000) + dec!(2200000));

        // Selling the rest removes the position entirely.
        b.sell_market("005930", 60).await.unwrap();
        assert!(b.get_position("005930").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn buy_rejected_on_insufficient_funds() {
        let b = PaperBroker::new(dec!(1000000));
        b.set_price("005930", dec!(50000));
        let resp = b.buy_market("005930", 100).await.unwrap();
        assert!(!resp.success);
        assert!(resp.message.contains("insufficient funds"));
        // Nothing changed.
        let balance = b.get_balance().await.unwrap();
        assert_eq!(balance.cash_balance, dec!(1000000));
        assert!(b.get_position("005930").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sell_rejected_without_position() {
        let b = broker();
        let resp = b.sell_market("005930", 10).await.unwrap();
        assert!(!resp.success);
        assert!(resp.message.contains("no position"));
    }

    #[tokio::test]
    async fn oversell_rejected() {
        let b = broker();
        b.buy_market("005930", 10).await.unwrap();
        let resp = b.sell_market("005930", 20).await.unwrap();
        assert!(!resp.success);
        assert!(resp.message.contains("insufficient shares"));
    }

    #[tokio::test]
    async fn market_order_without_price_rejected() {
        let b = PaperBroker::new(dec!(100000000));
        let resp = b.buy_market("UNKNOWN", 10).await.unwrap();
        assert!(!resp.success);
        assert!(resp.message.contains("invalid price"));
    }

    #[tokio::test]
    async fn order_status_reports_synthetic_fill() {
        let b = broker();
        let resp = b.buy_market("005930", 10).await.unwrap();
        let order = b
            .get_order_status(resp.order_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, "FILLED");
        assert_eq!(order.filled_quantity, 10);
        assert_eq!(order.filled_price, Some(dec!(50000)));
        // Synthetic fills cannot be cancelled.
        let cancel = b.cancel_order(&order.order_id).await.unwrap();
        assert!(!cancel.success);
    }

    #[tokio::test]
    async fn price_provider_overrides_set_price() {
        struct Fixed;
        impl PriceProvider for Fixed {
            fn price_of(&self, _symbol: &str) -> Option<Decimal> {
                Some(dec!(42000))
            }
        }
        let b = PaperBroker::with_price_provider(dec!(100000000), Arc::new(Fixed));
        b.set_price("005930", dec!(50000));
        assert_eq!(b.get_current_price("005930").await.unwrap(), dec!(42000));
    }

    #[tokio::test]
    async fn reset_restores_initial_cash() {
        let b = broker();
        b.buy_market("005930", 100).await.unwrap();
        b.reset();
        let balance = b.get_balance().await.unwrap();
        assert_eq!(balance.cash_balance, dec!(100000000));
        assert!(b.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn is_paper() {
        assert!(broker().is_paper_trading());
    }
}

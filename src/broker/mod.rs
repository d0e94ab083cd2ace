// =============================================================================
// Broker contract — one narrow trait over live venue client and paper broker
// =============================================================================
//
// The paper broker is a peer implementation, not a subtype: both variants
// share exactly this surface and nothing else. All methods are async and
// non-blocking from the caller's perspective; responses carry the raw venue
// payload for audit.

pub mod live;
pub mod paper;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{OrderMethod, Side};

pub use live::LiveBroker;
pub use paper::PaperBroker;

/// Account snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub total_value: Decimal,
    pub cash_balance: Decimal,
    pub securities_value: Decimal,
    pub buying_power: Decimal,
}

/// A holding as the venue reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: u64,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: Decimal,
}

/// Order state as the venue reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: u64,
    pub method: OrderMethod,
    pub price: Option<Decimal>,
    pub status: String,
    pub filled_quantity: u64,
    pub filled_price: Option<Decimal>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

/// Outbound order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: u64,
    pub method: OrderMethod,
    pub price: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: Side, quantity: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            method: OrderMethod::Market,
            price: None,
        }
    }

    pub fn limit(symbol: &str, side: Side, quantity: u64, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            method: OrderMethod::Limit,
            price: Some(price),
        }
    }
}

/// Venue response to an order submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub success: bool,
    pub order_id: Option<String>,
    pub message: String,
    /// Raw venue payload, kept verbatim for the audit trail.
    pub raw_response: Option<serde_json::Value>,
}

impl OrderResponse {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            message: message.into(),
            raw_response: None,
        }
    }
}

/// The whole broker surface. `LiveBroker` and `PaperBroker` are the two
/// implementations.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;

    async fn get_balance(&self) -> Result<AccountBalance>;
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>>;
    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>>;
    async fn get_current_price(&self, symbol: &str) -> Result<Decimal>;

    async fn place_order(&self, request: OrderRequest) -> Result<OrderResponse>;
    async fn cancel_order(&self, order_id: &str) -> Result<OrderResponse>;
    async fn get_order_status(&self, order_id: &str) -> Result<Option<BrokerOrder>>;
    async fn open_orders(&self) -> Result<Vec<BrokerOrder>>;

    fn is_paper_trading(&self) -> bool;

    // Convenience wrappers shared by both implementations.

    async fn buy_market(&self, symbol: &str, quantity: u64) -> Result<OrderResponse> {
        self.place_order(OrderRequest::market(symbol, Side::Buy, quantity))
            .await
    }

    async fn sell_market(&self, symbol: &str, quantity: u64) -> Result<OrderResponse> {
        self.place_order(OrderRequest::market(symbol, Side::Sell, quantity))
            .await
    }

    async fn buy_limit(&self, symbol: &str, quantity: u64, price: Decimal) -> Result<OrderResponse> {
        self.place_order(OrderRequest::limit(symbol, Side::Buy, quantity, price))
            .await
    }

    async fn sell_limit(
        &self,
        symbol: &str,
        quantity: u64,
        price: Decimal,
    ) -> Result<OrderResponse> {
        self.place_order(OrderRequest::limit(symbol, Side::Sell, quantity, price))
            .await
    }
}

// =============================================================================
// Live broker — venue REST client with token auth and signed order payloads
// =============================================================================
//
// One client serves both venue accounts: the `paper_trading` flag selects the
// venue's simulated host instead of the live one, and the `overseas` flag
// selects the overseas-equity endpoint family for U.S. symbols.
//
// SECURITY: the app secret is used exclusively for HMAC-SHA256 signing of
// order payloads and is never logged or serialized. Every order submission
// emits an audit event before and after the venue call.
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use sha2::Sha256;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::VenueCredentials;
use crate::error::{Result, TradingError};
use crate::types::{Market, OrderMethod, Side};

use super::{
    AccountBalance, Broker, BrokerOrder, BrokerPosition, OrderRequest, OrderResponse,
};

type HmacSha256 = Hmac<Sha256>;

const LIVE_HOST: &str = "https://api.breakwater-gateway.net";
const PAPER_HOST: &str = "https://sandbox.breakwater-gateway.net";

/// Venue HTTP timeout. A pending call is allowed to complete on shutdown to
/// avoid leaking a live order, so this also bounds shutdown latency.
const HTTP_TIMEOUT_SECS: u64 = 30;

pub struct LiveBroker {
    credentials: VenueCredentials,
    market: Market,
    paper_trading: bool,
    base_url: String,
    client: reqwest::Client,
    access_token: RwLock<Option<String>>,
}

impl LiveBroker {
    pub fn new(credentials: VenueCredentials, market: Market, paper_trading: bool) -> Self {
        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&credentials.app_key) {
            default_headers.insert("X-BW-APPKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        let base_url = if paper_trading { PAPER_HOST } else { LIVE_HOST };
        debug!(market = %market, paper = paper_trading, "live broker client initialised");

        Self {
            credentials,
            market,
            paper_trading,
            base_url: base_url.to_string(),
            client,
            access_token: RwLock::new(None),
        }
    }

    fn overseas(&self) -> bool {
        self.market == Market::Us
    }

    /// Endpoint family: domestic and overseas equities live under different
    /// path prefixes on the venue gateway.
    fn path(&self, tail: &str) -> String {
        let family = if self.overseas() {
            "overseas-stock"
        } else {
            "domestic-stock"
        };
        format!("{}/{}/v1/{}", self.base_url, family, tail)
    }

    /// HMAC-SHA256 hex signature of an order payload.
    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.credentials.app_secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn token(&self) -> Result<String> {
        self.access_token
            .read()
            .clone()
            .ok_or_else(|| TradingError::Broker("not connected: no access token".into()))
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let token = self.token()?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| TradingError::Broker(format!("GET {url} failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TradingError::Broker(format!("bad JSON from {url}: {e}")))?;

        if !status.is_success() {
            return Err(TradingError::Broker(format!(
                "venue returned {status} for {url}: {body}"
            )));
        }
        Ok(body)
    }

    /// Parse a venue field that may arrive as a JSON string or number.
    fn parse_decimal(val: &serde_json::Value) -> Result<Decimal> {
        if let Some(s) = val.as_str() {
            Decimal::from_str(s)
                .map_err(|e| TradingError::Broker(format!("cannot parse '{s}' as decimal: {e}")))
        } else if let Some(n) = val.as_f64() {
            Decimal::try_from(n)
                .map_err(|e| TradingError::Broker(format!("cannot convert {n}: {e}")))
        } else {
            Err(TradingError::Broker(format!(
                "expected string or number, got: {val}"
            )))
        }
    }

    fn parse_u64(val: &serde_json::Value) -> u64 {
        val.as_u64()
            .or_else(|| val.as_str().and_then(|s| s.parse().ok()))
            .unwrap_or(0)
    }

    fn position_from_json(holding: &serde_json::Value) -> Result<BrokerPosition> {
        let quantity = Self::parse_u64(&holding["quantity"]);
        let avg_price = Self::parse_decimal(&holding["avg_price"])?;
        let current_price = Self::parse_decimal(&holding["current_price"])?;
        let market_value = current_price * Decimal::from(quantity);
        let cost_basis = avg_price * Decimal::from(quantity);
        let unrealized_pnl = market_value - cost_basis;
        Ok(BrokerPosition {
            symbol: holding["symbol"].as_str().unwrap_or_default().to_string(),
            quantity,
            avg_price,
            current_price,
            market_value,
            unrealized_pnl,
            unrealized_pnl_pct: if cost_basis > Decimal::ZERO {
                unrealized_pnl / cost_basis
            } else {
                Decimal::ZERO
            },
        })
    }
}

#[async_trait]
impl Broker for LiveBroker {
    /// Exchange the app key/secret for an access token.
    async fn connect(&self) -> Result<()> {
        let url = format!("{}/oauth2/token", self.base_url);
        let body = serde_json::json!({
            "grant_type": "client_credentials",
            "app_key": self.credentials.app_key,
            "app_secret": self.credentials.app_secret,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TradingError::Broker(format!("token request failed: {e}")))?;

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TradingError::Broker(format!("bad token response: {e}")))?;

        if !status.is_success() {
            return Err(TradingError::Broker(format!(
                "token endpoint returned {status}: {payload}"
            )));
        }

        let token = payload["access_token"]
            .as_str()
            .ok_or_else(|| TradingError::Broker("token response missing access_token".into()))?
            .to_string();
        *self.access_token.write() = Some(token);

        info!(
            market = %self.market,
            paper = self.paper_trading,
            "live broker connected"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.access_token.write() = None;
        info!(market = %self.market, "live broker disconnected");
        Ok(())
    }

    async fn get_balance(&self) -> Result<AccountBalance> {
        let url = self.path(&format!(
            "accounts/{}/balance",
            self.credentials.account
        ));
        let body = self.get_json(&url).await?;

        Ok(AccountBalance {
            total_value: Self::parse_decimal(&body["total_value"])?,
            cash_balance: Self::parse_decimal(&body["cash_balance"])?,
            securities_value: Self::parse_decimal(&body["securities_value"])?,
            buying_power: Self::parse_decimal(&body["buying_power"])?,
        })
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        let url = self.path(&format!(
            "accounts/{}/holdings",
            self.credentials.account
        ));
        let body = self.get_json(&url).await?;

        let holdings = body["holdings"]
            .as_array()
            .ok_or_else(|| TradingError::Broker("holdings response is not an array".into()))?;

        let mut positions = Vec::with_capacity(holdings.len());
        for holding in holdings {
            match Self::position_from_json(holding) {
                Ok(p) if p.quantity > 0 => positions.push(p),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping malformed holding"),
            }
        }
        debug!(count = positions.len(), "holdings retrieved");
        Ok(positions)
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>> {
        let positions = self.get_positions().await?;
        Ok(positions.into_iter().find(|p| p.symbol == symbol))
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Decimal> {
        let url = self.path(&format!("quotations/price?symbol={symbol}"));
        let body = self.get_json(&url).await?;
        let price = Self::parse_decimal(&body["price"])?;
        debug!(symbol, price = %price, market = %self.market, "live price fetched");
        Ok(price)
    }

    async fn place_order(&self, request: OrderRequest) -> Result<OrderResponse> {
        // Audit event BEFORE the call: if the process dies mid-flight there
        // is evidence an order may exist at the venue.
        info!(
            symbol = %request.symbol,
            side = %request.side,
            quantity = request.quantity,
            method = %request.method,
            market = %self.market,
            paper = self.paper_trading,
            "live order submitting"
        );

        let payload = serde_json::json!({
            "account": self.credentials.account,
            "symbol": request.symbol,
            "side": request.side.as_str(),
            "method": request.method.as_str(),
            "quantity": request.quantity,
            "price": request.price.map(|p| p.to_string()),
            "timestamp": Utc::now().timestamp_millis(),
        });
        let signature = self.sign(&payload.to_string());
        let token = self.token()?;

        let url = self.path("orders");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .header("X-BW-SIGNATURE", signature)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TradingError::Broker(format!("order submission failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TradingError::Broker(format!("bad order response: {e}")))?;

        let success = status.is_success() && body["success"].as_bool().unwrap_or(false);
        let order_id = body["order_id"].as_str().map(|s| s.to_string());
        let message = body["message"]
            .as_str()
            .unwrap_or(if success { "order accepted" } else { "order rejected" })
            .to_string();

        if success {
            info!(
                order_id = order_id.as_deref().unwrap_or(""),
                symbol = %request.symbol,
                side = %request.side,
                quantity = request.quantity,
                market = %self.market,
                "live order accepted"
            );
        } else {
            warn!(
                symbol = %request.symbol,
                side = %request.side,
                quantity = request.quantity,
                status = %status,
                message = %message,
                "live order rejected"
            );
        }

        Ok(OrderResponse {
            success,
            order_id,
            message,
            raw_response: Some(body),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<OrderResponse> {
        let token = self.token()?;
        let url = self.path(&format!("orders/{order_id}"));

        debug!(order_id, market = %self.market, "cancelling order");

        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| TradingError::Broker(format!("cancel failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TradingError::Broker(format!("bad cancel response: {e}")))?;

        Ok(OrderResponse {
            success: status.is_success(),
            order_id: Some(order_id.to_string()),
            message: body["message"].as_str().unwrap_or("cancelled").to_string(),
            raw_response: Some(body),
        })
    }

    async fn get_order_status(&self, order_id: &str) -> Result<Option<BrokerOrder>> {
        let url = self.path(&format!("orders/{order_id}"));
        let body = match self.get_json(&url).await {
            Ok(body) => body,
            Err(TradingError::Broker(msg)) if msg.contains("404") => return Ok(None),
            Err(e) => return Err(e),
        };

        let side = Side::parse(body["side"].as_str().unwrap_or("")).unwrap_or(Side::Buy);
        let method =
            OrderMethod::parse(body["method"].as_str().unwrap_or("")).unwrap_or(OrderMethod::Market);
        let filled_price = if body["filled_price"].is_null() {
            None
        } else {
            Some(Self::parse_decimal(&body["filled_price"])?)
        };

        Ok(Some(BrokerOrder {
            order_id: order_id.to_string(),
            symbol: body["symbol"].as_str().unwrap_or_default().to_string(),
            side,
            quantity: Self::parse_u64(&body["quantity"]),
            method,
            price: filled_price,
            status: body["status"].as_str().unwrap_or("UNKNOWN").to_string(),
            filled_quantity: Self::parse_u64(&body["filled_quantity"]),
            filled_price,
            created_at: body["created_at"].as_str().unwrap_or_default().to_string(),
            updated_at: body["updated_at"].as_str().map(|s| s.to_string()),
        }))
    }

    async fn open_orders(&self) -> Result<Vec<BrokerOrder>> {
        let url = self.path(&format!(
            "accounts/{}/open-orders",
            self.credentials.account
        ));
        let body = self.get_json(&url).await?;
        let raw = body["orders"].as_array().cloned().unwrap_or_default();

        let mut orders = Vec::with_capacity(raw.len());
        for entry in &raw {
            if let Some(id) = entry["order_id"].as_str() {
                if let Ok(Some(order)) = self.get_order_status(id).await {
                    orders.push(order);
                }
            }
        }
        Ok(orders)
    }

    fn is_paper_trading(&self) -> bool {
        self.paper_trading
    }
}

impl std::fmt::Debug for LiveBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveBroker")
            .field("market", &self.market)
            .field("paper_trading", &self.paper_trading)
            .field("base_url", &self.base_url)
            .field("credentials", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Error taxonomy for the trading engine
// =============================================================================
//
// One variant per failure kind. The bot catches per-stock errors inside the
// cycle loop and per-cycle errors at the orchestrator; only configuration
// errors and repeated heartbeat failures are fatal to the process.
// =============================================================================

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TradingError {
    /// Missing or inconsistent configuration for the requested mode. Fatal at
    /// startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A calculation could not run because the store holds too little
    /// history. The affected stock is skipped for the cycle.
    #[error("insufficient data for {symbol}: required {required}, available {available}")]
    InsufficientData {
        symbol: String,
        required: usize,
        available: usize,
    },

    /// A referenced stock row does not exist.
    #[error("stock not found: {0}")]
    StockNotFound(String),

    /// Venue API failure (network, rate limit, auth). The affected signal is
    /// recorded FAILED and the cycle continues.
    #[error("broker error: {0}")]
    Broker(String),

    /// Not enough buying power even after quantity reduction. Not retried in
    /// the same cycle.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    /// A unit cap (total / per-stock / sector) blocked the trade.
    #[error("{limit_kind} unit limit exceeded: {current}/{maximum}")]
    UnitLimitExceeded {
        limit_kind: &'static str,
        current: u32,
        maximum: u32,
    },

    /// An exit signal referenced a stock with no open position.
    #[error("no open position: {0}")]
    PositionNotFound(String),

    /// Entry price drifted too far above the breakout level.
    #[error("slippage exceeded for {symbol}: {slippage_pct}% over breakout {breakout_level}")]
    SlippageExceeded {
        symbol: String,
        slippage_pct: Decimal,
        breakout_level: Decimal,
    },

    /// Store failure. Fatal to the current cycle; the session is rolled back
    /// and the orchestrator survives.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("order error: {0}")]
    Order(String),
}

pub type Result<T> = std::result::Result<T, TradingError>;

impl TradingError {
    /// Errors that should terminate the process rather than the cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn display_carries_context() {
        let err = TradingError::InsufficientFunds {
            required: dec!(5_000_000),
            available: dec!(1_000_000),
        };
        let msg = err.to_string();
        assert!(msg.contains("5000000"));
        assert!(msg.contains("1000000"));

        let err = TradingError::UnitLimitExceeded {
            limit_kind: "total",
            current: 20,
            maximum: 20,
        };
        assert_eq!(err.to_string(), "total unit limit exceeded: 20/20");
    }

    #[test]
    fn only_configuration_is_fatal() {
        assert!(TradingError::Configuration("missing key".into()).is_fatal());
        assert!(!TradingError::Broker("timeout".into()).is_fatal());
        assert!(!TradingError::PositionNotFound("005930".into()).is_fatal());
    }
}

// =============================================================================
// Shared types used across the Breakwater trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Listing venue of a stock. The engine trades two markets, each covering two
/// venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    #[serde(rename = "KOSPI")]
    Kospi,
    #[serde(rename = "KOSDAQ")]
    Kosdaq,
    #[serde(rename = "NYSE")]
    Nyse,
    #[serde(rename = "NASDAQ")]
    Nasdaq,
}

impl Venue {
    /// The market session a venue belongs to.
    pub fn market(&self) -> Market {
        match self {
            Self::Kospi | Self::Kosdaq => Market::Krx,
            Self::Nyse | Self::Nasdaq => Market::Us,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kospi => "KOSPI",
            Self::Kosdaq => "KOSDAQ",
            Self::Nyse => "NYSE",
            Self::Nasdaq => "NASDAQ",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "KOSPI" => Some(Self::Kospi),
            "KOSDAQ" => Some(Self::Kosdaq),
            "NYSE" => Some(Self::Nyse),
            "NASDAQ" => Some(Self::Nasdaq),
            _ => None,
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the two market sessions the engine runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Krx,
    Us,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Krx => "krx",
            Self::Us => "us",
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which markets a bot process is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketSelection {
    Krx,
    Us,
    Both,
}

impl MarketSelection {
    pub fn markets(&self) -> Vec<Market> {
        match self {
            Self::Krx => vec![Market::Krx],
            Self::Us => vec![Market::Us],
            Self::Both => vec![Market::Krx, Market::Us],
        }
    }

    pub fn includes(&self, market: Market) -> bool {
        self.markets().contains(&market)
    }
}

impl Default for MarketSelection {
    fn default() -> Self {
        Self::Krx
    }
}

impl std::fmt::Display for MarketSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Krx => write!(f, "krx"),
            Self::Us => write!(f, "us"),
            Self::Both => write!(f, "both"),
        }
    }
}

/// Whether orders go to the venue's simulated account or to real funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Paper,
    Live,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "paper"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Closed set of signal variants emitted by the turtle engine. The order
/// manager dispatches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    EntryS1,
    EntryS2,
    ExitS1,
    ExitS2,
    StopLoss,
    Pyramid,
}

impl SignalKind {
    pub fn is_entry(&self) -> bool {
        matches!(self, Self::EntryS1 | Self::EntryS2)
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, Self::ExitS1 | Self::ExitS2 | Self::StopLoss)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntryS1 => "ENTRY_S1",
            Self::EntryS2 => "ENTRY_S2",
            Self::ExitS1 => "EXIT_S1",
            Self::ExitS2 => "EXIT_S2",
            Self::StopLoss => "STOP_LOSS",
            Self::Pyramid => "PYRAMID",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ENTRY_S1" => Some(Self::EntryS1),
            "ENTRY_S2" => Some(Self::EntryS2),
            "EXIT_S1" => Some(Self::ExitS1),
            "EXIT_S2" => Some(Self::ExitS2),
            "STOP_LOSS" => Some(Self::StopLoss),
            "PYRAMID" => Some(Self::Pyramid),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an order is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderMethod {
    Market,
    Limit,
}

impl OrderMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MARKET" => Some(Self::Market),
            "LIMIT" => Some(Self::Limit),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle. Append-only aside from PENDING -> terminal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    Partial,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Filled => "FILLED",
            Self::Partial => "PARTIAL",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "FILLED" => Some(Self::Filled),
            "PARTIAL" => Some(Self::Partial),
            "CANCELLED" => Some(Self::Cancelled),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stop rule produced a position's stop price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopLossKind {
    /// 2·N below the entry (volatility stop).
    TwoN,
    /// Hard 8 % below the entry.
    MaxPercent,
}

impl StopLossKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TwoN => "2N",
            Self::MaxPercent => "8%",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "2N" => Some(Self::TwoN),
            "8%" => Some(Self::MaxPercent),
            _ => None,
        }
    }
}

impl std::fmt::Display for StopLossKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Settings — engine configuration with serde defaults and env credentials
// =============================================================================
//
// Every tunable lives here. Strategy parameters load from an optional JSON
// file; broker credentials and the notifier token come exclusively from the
// environment (loaded via dotenv in the binaries) and are never serialized.
//
// All fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::TradingError;
use crate::types::{MarketSelection, TradingMode};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_s1_entry_period() -> usize {
    20
}

fn default_s1_exit_period() -> usize {
    10
}

fn default_s2_entry_period() -> usize {
    55
}

fn default_s2_exit_period() -> usize {
    20
}

fn default_atr_period() -> usize {
    20
}

fn default_pyramid_unit_interval() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_signal_check_interval_minutes() -> u64 {
    1
}

fn default_breakout_proximity_pct() -> Decimal {
    Decimal::new(3, 2) // 0.03
}

fn default_fast_poll_interval_seconds() -> u64 {
    3
}

fn default_risk_per_unit() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_max_units_per_stock() -> u32 {
    4
}

fn default_max_units_correlated() -> u32 {
    10
}

fn default_max_units_loosely_correlated() -> u32 {
    16
}

fn default_max_units_total() -> u32 {
    20
}

fn default_stop_loss_atr_multiplier() -> Decimal {
    Decimal::TWO
}

fn default_stop_loss_max_percent() -> Decimal {
    Decimal::new(8, 2) // 0.08
}

fn default_max_entry_slippage_pct() -> Decimal {
    Decimal::new(15, 3) // 0.015
}

fn default_min_candidate_score() -> i64 {
    5
}

fn default_krx_schedule() -> MarketSchedule {
    MarketSchedule {
        premarket_time: "08:00".to_string(),
        market_open: "09:00".to_string(),
        market_close: "15:30".to_string(),
    }
}

fn default_us_schedule() -> MarketSchedule {
    MarketSchedule {
        premarket_time: "08:30".to_string(),
        market_open: "09:30".to_string(),
        market_close: "16:00".to_string(),
    }
}

fn default_database_path() -> String {
    "breakwater.db".to_string()
}

// =============================================================================
// TurtleConfig
// =============================================================================

/// Breakout-system parameters (channel windows, polling cadence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurtleConfig {
    /// System 1 entry channel window (days).
    #[serde(default = "default_s1_entry_period")]
    pub s1_entry_period: usize,

    /// System 1 exit channel window (days).
    #[serde(default = "default_s1_exit_period")]
    pub s1_exit_period: usize,

    /// System 2 entry channel window (days).
    #[serde(default = "default_s2_entry_period")]
    pub s2_entry_period: usize,

    /// System 2 exit channel window (days).
    #[serde(default = "default_s2_exit_period")]
    pub s2_exit_period: usize,

    /// ATR look-back. This is the "N" of the position-sizing rules.
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,

    /// Pyramid spacing in N (0.5 = add a unit every half-N above entry).
    #[serde(default = "default_pyramid_unit_interval")]
    pub pyramid_unit_interval: Decimal,

    /// Cadence of the outer real-time signal cycle.
    #[serde(default = "default_signal_check_interval_minutes")]
    pub signal_check_interval_minutes: u64,

    /// A stock within this fraction below its breakout level is fast-polled.
    #[serde(default = "default_breakout_proximity_pct")]
    pub breakout_proximity_pct: Decimal,

    /// Sleep between fast-poll ticks.
    #[serde(default = "default_fast_poll_interval_seconds")]
    pub fast_poll_interval_seconds: u64,
}

impl Default for TurtleConfig {
    fn default() -> Self {
        Self {
            s1_entry_period: default_s1_entry_period(),
            s1_exit_period: default_s1_exit_period(),
            s2_entry_period: default_s2_entry_period(),
            s2_exit_period: default_s2_exit_period(),
            atr_period: default_atr_period(),
            pyramid_unit_interval: default_pyramid_unit_interval(),
            signal_check_interval_minutes: default_signal_check_interval_minutes(),
            breakout_proximity_pct: default_breakout_proximity_pct(),
            fast_poll_interval_seconds: default_fast_poll_interval_seconds(),
        }
    }
}

// =============================================================================
// RiskConfig
// =============================================================================

/// Position sizing and unit-cap parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of account value risked per unit (0.02 = 2 %).
    #[serde(default = "default_risk_per_unit")]
    pub risk_per_unit: Decimal,

    #[serde(default = "default_max_units_per_stock")]
    pub max_units_per_stock: u32,

    /// Sector-level cap on closely correlated units.
    #[serde(default = "default_max_units_correlated")]
    pub max_units_correlated: u32,

    #[serde(default = "default_max_units_loosely_correlated")]
    pub max_units_loosely_correlated: u32,

    #[serde(default = "default_max_units_total")]
    pub max_units_total: u32,

    /// Stop distance in N for the volatility stop.
    #[serde(default = "default_stop_loss_atr_multiplier")]
    pub stop_loss_atr_multiplier: Decimal,

    /// Hard stop as a fraction below entry (0.08 = 8 %).
    #[serde(default = "default_stop_loss_max_percent")]
    pub stop_loss_max_percent: Decimal,

    /// Entries more than this fraction above the breakout level are dropped.
    #[serde(default = "default_max_entry_slippage_pct")]
    pub max_entry_slippage_pct: Decimal,

    /// Minimum CANSLIM total score for a stock to be an entry candidate.
    #[serde(default = "default_min_candidate_score")]
    pub min_candidate_score: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_unit: default_risk_per_unit(),
            max_units_per_stock: default_max_units_per_stock(),
            max_units_correlated: default_max_units_correlated(),
            max_units_loosely_correlated: default_max_units_loosely_correlated(),
            max_units_total: default_max_units_total(),
            stop_loss_atr_multiplier: default_stop_loss_atr_multiplier(),
            stop_loss_max_percent: default_stop_loss_max_percent(),
            max_entry_slippage_pct: default_max_entry_slippage_pct(),
            min_candidate_score: default_min_candidate_score(),
        }
    }
}

// =============================================================================
// ScheduleConfig
// =============================================================================

/// Session times for one market, local to its exchange timezone, "HH:MM".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSchedule {
    pub premarket_time: String,
    pub market_open: String,
    pub market_close: String,
}

impl MarketSchedule {
    pub fn premarket(&self) -> Result<NaiveTime, TradingError> {
        parse_hhmm(&self.premarket_time)
    }

    pub fn open(&self) -> Result<NaiveTime, TradingError> {
        parse_hhmm(&self.market_open)
    }

    pub fn close(&self) -> Result<NaiveTime, TradingError> {
        parse_hhmm(&self.market_close)
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime, TradingError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|e| TradingError::Configuration(format!("bad time '{s}': {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_krx_schedule")]
    pub krx: MarketSchedule,
    #[serde(default = "default_us_schedule")]
    pub us: MarketSchedule,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            krx: default_krx_schedule(),
            us: default_us_schedule(),
        }
    }
}

// =============================================================================
// Credentials (environment only — never serialized)
// =============================================================================

/// One venue credential triple. Loaded per {paper, live} x {domestic,
/// overseas} from the environment.
#[derive(Clone, Default)]
pub struct VenueCredentials {
    pub app_key: String,
    pub app_secret: String,
    pub account: String,
}

impl VenueCredentials {
    fn from_env(prefix: &str) -> Self {
        let var = |suffix: &str| std::env::var(format!("{prefix}_{suffix}")).unwrap_or_default();
        Self {
            app_key: var("APP_KEY"),
            app_secret: var("APP_SECRET"),
            account: var("ACCOUNT"),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.app_key.is_empty() && !self.app_secret.is_empty() && !self.account.is_empty()
    }
}

impl std::fmt::Debug for VenueCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueCredentials")
            .field("app_key", &"<redacted>")
            .field("app_secret", &"<redacted>")
            .field("account", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub paper_domestic: VenueCredentials,
    pub paper_overseas: VenueCredentials,
    pub live_domestic: VenueCredentials,
    pub live_overseas: VenueCredentials,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            paper_domestic: VenueCredentials::from_env("BW_PAPER_KR"),
            paper_overseas: VenueCredentials::from_env("BW_PAPER_US"),
            live_domestic: VenueCredentials::from_env("BW_LIVE_KR"),
            live_overseas: VenueCredentials::from_env("BW_LIVE_US"),
        }
    }

    /// Credentials for the given mode and market leg.
    pub fn select(&self, mode: TradingMode, overseas: bool) -> &VenueCredentials {
        match (mode, overseas) {
            (TradingMode::Paper, false) => &self.paper_domestic,
            (TradingMode::Paper, true) => &self.paper_overseas,
            (TradingMode::Live, false) => &self.live_domestic,
            (TradingMode::Live, true) => &self.live_overseas,
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Top-level settings. Immutable after load; constructed once in the binary
/// and shared behind `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub trading_mode: TradingMode,

    #[serde(default)]
    pub market: MarketSelection,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default)]
    pub turtle: TurtleConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(skip, default)]
    pub credentials: Credentials,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paper,
            market: MarketSelection::Krx,
            database_path: default_database_path(),
            turtle: TurtleConfig::default(),
            risk: RiskConfig::default(),
            schedule: ScheduleConfig::default(),
            credentials: Credentials::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, then apply environment overrides.
    ///
    /// A missing file is not an error: defaults are used so a fresh checkout
    /// runs in paper mode out of the box.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut settings: Self = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read settings from {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse settings from {}", path.display()))?
        } else {
            Self::default()
        };

        settings.apply_env();

        info!(
            path = %path.display(),
            trading_mode = %settings.trading_mode,
            market = %settings.market,
            database = %settings.database_path,
            "settings loaded"
        );

        Ok(settings)
    }

    fn apply_env(&mut self) {
        self.credentials = Credentials::from_env();

        if let Ok(mode) = std::env::var("BW_TRADING_MODE") {
            match mode.to_lowercase().as_str() {
                "live" => self.trading_mode = TradingMode::Live,
                "paper" => self.trading_mode = TradingMode::Paper,
                _ => {}
            }
        }
        if let Ok(db) = std::env::var("BW_DATABASE_PATH") {
            if !db.is_empty() {
                self.database_path = db;
            }
        }
    }

    /// Live mode without live credentials is a startup-fatal configuration
    /// error. Paper mode with no credentials silently uses the in-process
    /// paper broker.
    pub fn validate(&self) -> Result<(), TradingError> {
        if self.trading_mode == TradingMode::Live {
            let need_domestic = self.market.includes(crate::types::Market::Krx);
            let need_overseas = self.market.includes(crate::types::Market::Us);
            if need_domestic && !self.credentials.live_domestic.is_complete() {
                return Err(TradingError::Configuration(
                    "LIVE mode requires BW_LIVE_KR_APP_KEY / _APP_SECRET / _ACCOUNT".to_string(),
                ));
            }
            if need_overseas && !self.credentials.live_overseas.is_complete() {
                return Err(TradingError::Configuration(
                    "LIVE mode requires BW_LIVE_US_APP_KEY / _APP_SECRET / _ACCOUNT".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Whether any venue credentials exist for the selected mode. Without
    /// them the bot falls back to the in-process paper broker.
    pub fn has_venue_credentials(&self, overseas: bool) -> bool {
        self.credentials
            .select(self.trading_mode, overseas)
            .is_complete()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_settings_have_expected_values() {
        let s = Settings::default();
        assert_eq!(s.trading_mode, TradingMode::Paper);
        assert_eq!(s.turtle.s1_entry_period, 20);
        assert_eq!(s.turtle.s2_entry_period, 55);
        assert_eq!(s.turtle.atr_period, 20);
        assert_eq!(s.turtle.pyramid_unit_interval, dec!(0.5));
        assert_eq!(s.risk.risk_per_unit, dec!(0.02));
        assert_eq!(s.risk.max_units_per_stock, 4);
        assert_eq!(s.risk.max_units_total, 20);
        assert_eq!(s.risk.stop_loss_max_percent, dec!(0.08));
        assert_eq!(s.risk.max_entry_slippage_pct, dec!(0.015));
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.trading_mode, TradingMode::Paper);
        assert_eq!(s.turtle.fast_poll_interval_seconds, 3);
        assert_eq!(s.risk.max_units_correlated, 10);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "trading_mode": "live", "turtle": { "s1_entry_period": 30 } }"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.trading_mode, TradingMode::Live);
        assert_eq!(s.turtle.s1_entry_period, 30);
        assert_eq!(s.turtle.s2_entry_period, 55);
    }

    #[test]
    fn schedule_times_parse() {
        let sched = ScheduleConfig::default();
        assert_eq!(
            sched.krx.open().unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap()
        );
        assert_eq!(
            sched.krx.close().unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap()
        );
        assert_eq!(
            sched.us.open().unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert!(parse_hhmm("not-a-time").is_err());
    }

    #[test]
    fn live_mode_without_credentials_is_rejected() {
        let mut s = Settings::default();
        s.trading_mode = TradingMode::Live;
        s.market = MarketSelection::Krx;
        assert!(s.validate().is_err());

        s.credentials.live_domestic = VenueCredentials {
            app_key: "k".into(),
            app_secret: "s".into(),
            account: "a".into(),
        };
        assert!(s.validate().is_ok());
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = VenueCredentials {
            app_key: "supersecret".into(),
            app_secret: "topsecret".into(),
            account: "12345678".into(),
        };
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("supersecret"));
        assert!(!dbg.contains("12345678"));
    }
}

// =============================================================================
// Breakout proximity watcher — the fast-poll watch list
// =============================================================================
//
// The minute cycle identifies stocks trading within `proximity_pct` of a
// breakout level and registers them here with a full snapshot of their price
// history. The fast-poll loop then feeds fresh quotes into `check_breakout`
// at seconds granularity.
//
// A stock leaves the set in one of three ways: its breakout fires (the
// result is returned and the stock auto-unregisters), it drifts away from
// every target, or the next cycle rebuilds the set without it.
// =============================================================================

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::info;

use crate::config::TurtleConfig;
use crate::signals::breakout::{BreakoutDetector, BreakoutResult, ProximityTarget};

/// Snapshot of one watched stock.
#[derive(Debug, Clone)]
pub struct WatchedStock {
    pub stock_id: i64,
    pub symbol: String,
    pub name: String,
    pub targets: Vec<ProximityTarget>,
    pub highs: Vec<Decimal>,
    pub lows: Vec<Decimal>,
    pub closes: Vec<Decimal>,
    pub atr_n: Decimal,
    pub previous_s1_winner: bool,
    pub last_price: Option<Decimal>,
}

/// Registry of near-breakout stocks, keyed by stock id. Owned by a single
/// market task; no interior locking needed.
pub struct ProximityWatcher {
    detector: BreakoutDetector,
    proximity_pct: Decimal,
    watched: HashMap<i64, WatchedStock>,
}

impl ProximityWatcher {
    pub fn new(config: &TurtleConfig) -> Self {
        Self {
            detector: BreakoutDetector::new(config),
            proximity_pct: config.breakout_proximity_pct,
            watched: HashMap::new(),
        }
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    pub fn has_targets(&self) -> bool {
        !self.watched.is_empty()
    }

    pub fn watched_symbols(&self) -> Vec<String> {
        self.watched.values().map(|w| w.symbol.clone()).collect()
    }

    pub fn get(&self, stock_id: i64) -> Option<&WatchedStock> {
        self.watched.get(&stock_id)
    }

    pub fn watched_list(&self) -> Vec<&WatchedStock> {
        self.watched.values().collect()
    }

    /// Register a stock. Idempotent by stock id: re-registering replaces the
    /// stored snapshot.
    pub fn register(&mut self, stock: WatchedStock) {
        let closest = stock
            .targets
            .iter()
            .map(|t| t.distance_pct)
            .min()
            .unwrap_or(Decimal::ZERO);
        info!(
            symbol = %stock.symbol,
            stock_id = stock.stock_id,
            targets = stock.targets.len(),
            closest_pct = %closest,
            "proximity watch registered"
        );
        self.watched.insert(stock.stock_id, stock);
    }

    pub fn unregister(&mut self, stock_id: i64) {
        if let Some(stock) = self.watched.remove(&stock_id) {
            info!(symbol = %stock.symbol, stock_id, "proximity watch removed");
        }
    }

    pub fn clear(&mut self) {
        self.watched.clear();
    }

    /// Record the latest quote without running detection.
    pub fn update_price(&mut self, stock_id: i64, price: Decimal) {
        if let Some(stock) = self.watched.get_mut(&stock_id) {
            stock.last_price = Some(price);
        }
    }

    /// Run the breakout detector for a fresh quote.
    ///
    /// On a positive entry the stock is auto-unregistered and the result
    /// returned. If the stock has drifted outside every proximity band it is
    /// silently unregistered and `None` returned.
    pub fn check_breakout(&mut self, stock_id: i64, price: Decimal) -> Option<BreakoutResult> {
        let stock = self.watched.get_mut(&stock_id)?;
        stock.last_price = Some(price);

        let mut highs = stock.highs.clone();
        highs.push(price);

        let result = self
            .detector
            .check_entry(price, &highs, stock.previous_s1_winner);

        if result.is_entry() {
            self.unregister(stock_id);
            return Some(result);
        }

        let still_near = self.detector.check_proximity(
            price,
            &highs,
            self.proximity_pct,
            stock.previous_s1_winner,
        );
        if still_near.is_empty() {
            info!(
                symbol = %stock.symbol,
                stock_id,
                price = %price,
                reason = "moved away from breakout",
                "proximity watch expired"
            );
            self.unregister(stock_id);
        }

        None
    }
}

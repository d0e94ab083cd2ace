// =============================================================================
// Turtle signal engine — per-cycle exit / pyramid / entry evaluation
// =============================================================================
//
// Produces three signal lists per invocation. Callers MUST execute them in
// this order: exits first (stop-loss sells are never delayed by new buys),
// then pyramids, then entries. Per-stock failures are logged and skipped so
// one bad stock never halts a cycle.
//
// Detected signals are persisted immediately with is_executed = false; the
// flag flips inside the order manager's fill transaction. An unexecuted
// signal is informational and does not carry forward.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::signals::atr::AtrCalculator;
use crate::signals::breakout::BreakoutDetector;
use crate::signals::pyramid::PyramidManager;
use crate::signals::watcher::WatchedStock;
use crate::store::{PositionRow, Store};
use crate::types::{Market, SignalKind};

/// Bars loaded for exit and pyramid checks (ATR-20 needs 21).
const EXIT_LOOKBACK_DAYS: usize = 25;
const EXIT_MIN_BARS: usize = 21;
/// Bars loaded for entry checks (System 2 needs 55 + the current bar).
const ENTRY_LOOKBACK_DAYS: usize = 60;
const ENTRY_MIN_BARS: usize = 56;

/// One actionable signal, carrying everything the order manager needs.
#[derive(Debug, Clone)]
pub struct TurtleSignal {
    pub stock_id: i64,
    pub symbol: String,
    pub name: String,
    pub kind: SignalKind,
    pub system: Option<u8>,
    pub price: Decimal,
    pub atr_n: Decimal,
    /// For entries: the initial stop. For pyramids: the new unified stop.
    pub stop_loss: Option<Decimal>,
    pub breakout_level: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    /// Persisted signal row, flipped to executed on fill.
    pub signal_id: Option<i64>,
}

pub struct TurtleSignalEngine {
    store: Store,
    atr: AtrCalculator,
    detector: BreakoutDetector,
    pyramid: PyramidManager,
    stop_atr_multiplier: Decimal,
    proximity_pct: Decimal,
    /// stock_id -> (symbol, name). Invalidated when stock metadata is
    /// refreshed at ingestion time.
    stock_cache: HashMap<i64, (String, String)>,
}

impl TurtleSignalEngine {
    pub fn new(settings: &Settings, store: Store) -> Self {
        Self {
            store,
            atr: AtrCalculator::new(settings.turtle.atr_period),
            detector: BreakoutDetector::new(&settings.turtle),
            pyramid: PyramidManager::new(&settings.turtle, &settings.risk),
            stop_atr_multiplier: settings.risk.stop_loss_atr_multiplier,
            proximity_pct: settings.turtle.breakout_proximity_pct,
            stock_cache: HashMap::new(),
        }
    }

    /// Drop the metadata cache (after a universe refresh).
    pub fn invalidate_stock_cache(&mut self) {
        self.stock_cache.clear();
    }

    // -------------------------------------------------------------------------
    // Exit signals
    // -------------------------------------------------------------------------

    /// At most one exit signal per open position: stop-loss takes precedence
    /// over the channel exit.
    pub async fn check_exit_signals(
        &mut self,
        market: Market,
        realtime_prices: &HashMap<i64, Decimal>,
    ) -> Vec<TurtleSignal> {
        let positions = match self.store.open_positions_for_market(market).await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, %market, "failed to load open positions");
                return Vec::new();
            }
        };

        let mut signals = Vec::new();
        for position in &positions {
            let rt_price = realtime_prices.get(&position.stock_id).copied();
            match self.check_single_exit(position, rt_price).await {
                Ok(Some(signal)) => signals.push(signal),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        position_id = position.id,
                        stock_id = position.stock_id,
                        error = %e,
                        "exit check failed"
                    );
                }
            }
        }

        info!(count = signals.len(), %market, "exit signals evaluated");
        signals
    }

    async fn check_single_exit(
        &mut self,
        position: &PositionRow,
        realtime_price: Option<Decimal>,
    ) -> Result<Option<TurtleSignal>> {
        let bars = self
            .store
            .get_period(position.stock_id, EXIT_LOOKBACK_DAYS)
            .await?;
        if bars.len() < EXIT_MIN_BARS {
            return Ok(None);
        }

        let highs: Vec<Decimal> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<Decimal> = bars.iter().map(|b| b.low).collect();
        let closes: Vec<Decimal> = bars.iter().map(|b| b.close).collect();
        let current_price = realtime_price.unwrap_or(closes[closes.len() - 1]);
        let atr_n = self
            .atr
            .calculate_n(&highs, &lows, &closes)
            .unwrap_or(Decimal::ZERO);

        // Stop-loss first.
        if let Some(stop) = position.stop_loss_price {
            if current_price <= stop {
                let (symbol, name) = self.stock_info(position.stock_id).await;
                warn!(
                    symbol = %symbol,
                    stock_id = position.stock_id,
                    current_price = %current_price,
                    stop_loss = %stop,
                    entry_price = %position.entry_price,
                    quantity = position.quantity,
                    is_realtime = realtime_price.is_some(),
                    "stop loss triggered"
                );
                return Ok(Some(
                    self.persist(TurtleSignal {
                        stock_id: position.stock_id,
                        symbol,
                        name,
                        kind: SignalKind::StopLoss,
                        system: position.entry_system,
                        price: current_price,
                        atr_n,
                        stop_loss: Some(stop),
                        breakout_level: Some(stop),
                        timestamp: Utc::now(),
                        signal_id: None,
                    })
                    .await,
                ));
            }
        }

        // Channel exit for the position's system.
        let entry_system = position.entry_system.unwrap_or(1);
        let result = self.detector.check_exit(current_price, &lows, entry_system);
        let Some(kind) = result.kind else {
            return Ok(None);
        };

        let (symbol, name) = self.stock_info(position.stock_id).await;
        info!(
            symbol = %symbol,
            stock_id = position.stock_id,
            signal_type = %kind,
            system = entry_system,
            current_price = %current_price,
            breakout_level = ?result.breakout_level,
            entry_price = %position.entry_price,
            quantity = position.quantity,
            is_realtime = realtime_price.is_some(),
            "channel exit detected"
        );

        Ok(Some(
            self.persist(TurtleSignal {
                stock_id: position.stock_id,
                symbol,
                name,
                kind,
                system: Some(entry_system),
                price: current_price,
                atr_n,
                stop_loss: None,
                breakout_level: result.breakout_level,
                timestamp: Utc::now(),
                signal_id: None,
            })
            .await,
        ))
    }

    // -------------------------------------------------------------------------
    // Pyramid signals
    // -------------------------------------------------------------------------

    pub async fn check_pyramid_signals(
        &mut self,
        market: Market,
        realtime_prices: &HashMap<i64, Decimal>,
    ) -> Vec<TurtleSignal> {
        let positions = match self.store.open_positions_for_market(market).await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, %market, "failed to load open positions");
                return Vec::new();
            }
        };

        let mut signals = Vec::new();
        for position in &positions {
            let rt_price = realtime_prices.get(&position.stock_id).copied();
            match self.check_single_pyramid(position, rt_price).await {
                Ok(Some(signal)) => signals.push(signal),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        position_id = position.id,
                        stock_id = position.stock_id,
                        error = %e,
                        "pyramid check failed"
                    );
                }
            }
        }

        info!(count = signals.len(), %market, "pyramid signals evaluated");
        signals
    }

    async fn check_single_pyramid(
        &mut self,
        position: &PositionRow,
        realtime_price: Option<Decimal>,
    ) -> Result<Option<TurtleSignal>> {
        let bars = self
            .store
            .get_period(position.stock_id, EXIT_LOOKBACK_DAYS)
            .await?;
        if bars.len() < EXIT_MIN_BARS {
            return Ok(None);
        }

        let highs: Vec<Decimal> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<Decimal> = bars.iter().map(|b| b.low).collect();
        let closes: Vec<Decimal> = bars.iter().map(|b| b.close).collect();
        let current_price = realtime_price.unwrap_or(closes[closes.len() - 1]);

        let Some(atr_n) = self.atr.calculate_n(&highs, &lows, &closes) else {
            return Ok(None);
        };

        let pyramid = self.pyramid.check_pyramid_signal(
            current_price,
            position.entry_price,
            atr_n,
            position.units,
            None,
        );
        if !pyramid.should_pyramid {
            return Ok(None);
        }

        let (symbol, name) = self.stock_info(position.stock_id).await;
        info!(
            symbol = %symbol,
            stock_id = position.stock_id,
            current_price = %current_price,
            initial_entry = %position.entry_price,
            atr = %atr_n,
            current_units = position.units,
            next_entry_price = %pyramid.next_entry_price,
            new_stop_loss = ?pyramid.new_stop_loss,
            is_realtime = realtime_price.is_some(),
            "pyramid signal detected"
        );

        Ok(Some(
            self.persist(TurtleSignal {
                stock_id: position.stock_id,
                symbol,
                name,
                kind: SignalKind::Pyramid,
                system: position.entry_system,
                price: current_price,
                atr_n,
                stop_loss: pyramid.new_stop_loss,
                breakout_level: Some(pyramid.next_entry_price),
                timestamp: Utc::now(),
                signal_id: None,
            })
            .await,
        ))
    }

    // -------------------------------------------------------------------------
    // Entry signals
    // -------------------------------------------------------------------------

    pub async fn check_entry_signals(
        &mut self,
        candidate_ids: &[i64],
        realtime_prices: &HashMap<i64, Decimal>,
    ) -> Vec<TurtleSignal> {
        let mut signals = Vec::new();
        for &stock_id in candidate_ids {
            let rt_price = realtime_prices.get(&stock_id).copied();
            match self.check_single_entry(stock_id, rt_price).await {
                Ok(Some(signal)) => signals.push(signal),
                Ok(None) => {}
                Err(e) => {
                    error!(stock_id, error = %e, "entry check failed");
                }
            }
        }

        info!(count = signals.len(), "entry signals evaluated");
        signals
    }

    async fn check_single_entry(
        &mut self,
        stock_id: i64,
        realtime_price: Option<Decimal>,
    ) -> Result<Option<TurtleSignal>> {
        if self.store.open_position_by_stock(stock_id).await?.is_some() {
            return Ok(None);
        }

        let bars = self.store.get_period(stock_id, ENTRY_LOOKBACK_DAYS).await?;
        if bars.len() < ENTRY_MIN_BARS {
            return Ok(None);
        }

        let highs: Vec<Decimal> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<Decimal> = bars.iter().map(|b| b.low).collect();
        let closes: Vec<Decimal> = bars.iter().map(|b| b.close).collect();
        let current_price = realtime_price.unwrap_or(closes[closes.len() - 1]);
        if current_price <= Decimal::ZERO {
            return Ok(None);
        }

        let Some(atr_result) = self.atr.calculate(&highs, &lows, &closes) else {
            return Ok(None);
        };

        let previous_s1_winner = self.previous_s1_winner(stock_id).await?;
        let breakout = self
            .detector
            .check_entry(current_price, &highs, previous_s1_winner);
        let Some(kind) = breakout.kind else {
            return Ok(None);
        };

        let stop_loss = current_price - atr_result.atr * self.stop_atr_multiplier;
        let (symbol, name) = self.stock_info(stock_id).await;

        info!(
            symbol = %symbol,
            name = %name,
            stock_id,
            signal_type = %kind,
            system = ?breakout.system,
            current_price = %current_price,
            breakout_level = ?breakout.breakout_level,
            atr = %atr_result.atr,
            atr_pct = %atr_result.atr_percent,
            stop_loss = %stop_loss,
            is_realtime = realtime_price.is_some(),
            prev_s1_winner = previous_s1_winner,
            "entry breakout detected"
        );

        Ok(Some(
            self.persist(TurtleSignal {
                stock_id,
                symbol,
                name,
                kind,
                system: breakout.system,
                price: current_price,
                atr_n: atr_result.atr,
                stop_loss: Some(stop_loss),
                breakout_level: breakout.breakout_level,
                timestamp: Utc::now(),
                signal_id: None,
            })
            .await,
        ))
    }

    // -------------------------------------------------------------------------
    // Proximity snapshots (for the fast-poll watcher)
    // -------------------------------------------------------------------------

    /// Build a watch-list snapshot for a candidate, or `None` when it holds a
    /// position, lacks history, or trades nowhere near a breakout.
    pub async fn proximity_snapshot(
        &mut self,
        stock_id: i64,
        realtime_price: Option<Decimal>,
    ) -> Result<Option<WatchedStock>> {
        if self.store.open_position_by_stock(stock_id).await?.is_some() {
            return Ok(None);
        }

        let bars = self.store.get_period(stock_id, ENTRY_LOOKBACK_DAYS).await?;
        if bars.len() < ENTRY_MIN_BARS {
            return Ok(None);
        }

        let highs: Vec<Decimal> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<Decimal> = bars.iter().map(|b| b.low).collect();
        let closes: Vec<Decimal> = bars.iter().map(|b| b.close).collect();
        let current_price = realtime_price.unwrap_or(closes[closes.len() - 1]);

        let Some(atr_n) = self.atr.calculate_n(&highs, &lows, &closes) else {
            return Ok(None);
        };

        let previous_s1_winner = self.previous_s1_winner(stock_id).await?;
        let targets = self.detector.check_proximity(
            current_price,
            &highs,
            self.proximity_pct,
            previous_s1_winner,
        );
        if targets.is_empty() {
            return Ok(None);
        }

        let (symbol, name) = self.stock_info(stock_id).await;
        Ok(Some(WatchedStock {
            stock_id,
            symbol,
            name,
            targets,
            highs,
            lows,
            closes,
            atr_n,
            previous_s1_winner,
            last_price: Some(current_price),
        }))
    }

    /// Persist an entry signal synthesized from a fast-poll breakout.
    pub async fn record_breakout_signal(
        &mut self,
        watched: &WatchedStock,
        kind: SignalKind,
        system: Option<u8>,
        price: Decimal,
        breakout_level: Option<Decimal>,
    ) -> TurtleSignal {
        let stop_loss = price - watched.atr_n * self.stop_atr_multiplier;
        self.persist(TurtleSignal {
            stock_id: watched.stock_id,
            symbol: watched.symbol.clone(),
            name: watched.name.clone(),
            kind,
            system,
            price,
            atr_n: watched.atr_n,
            stop_loss: Some(stop_loss),
            breakout_level,
            timestamp: Utc::now(),
            signal_id: None,
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Did this stock's last completed System-1 trade win? Defaults to `true`
    /// when no such trade exists, which suppresses S1 entries until a losing
    /// S1 trade is on record. Derived from closed positions so it survives
    /// restarts.
    pub async fn previous_s1_winner(&self, stock_id: i64) -> Result<bool> {
        match self.store.last_closed_s1_position(stock_id).await? {
            Some(position) => Ok(position.pnl.unwrap_or(Decimal::ZERO) > Decimal::ZERO),
            None => Ok(true),
        }
    }

    async fn stock_info(&mut self, stock_id: i64) -> (String, String) {
        if let Some(cached) = self.stock_cache.get(&stock_id) {
            return cached.clone();
        }
        let info = match self.store.get_stock(stock_id).await {
            Ok(Some(stock)) => (stock.symbol, stock.name),
            _ => (stock_id.to_string(), String::new()),
        };
        self.stock_cache.insert(stock_id, info.clone());
        info
    }

    async fn persist(&self, mut signal: TurtleSignal) -> TurtleSignal {
        match self
            .store
            .create_signal(
                signal.stock_id,
                signal.kind,
                signal.system,
                signal.price,
                Some(signal.atr_n),
            )
            .await
        {
            Ok(id) => signal.signal_id = Some(id),
            Err(e) => {
                // Signal rows are informational; a failed write must not
                // block execution of the signal itself.
                warn!(stock_id = signal.stock_id, error = %e, "signal persist failed");
            }
        }
        signal
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DailyBar;
    use crate::types::{OrderMethod, Side, StopLossKind, Venue};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn bars_ascending(n: usize, step: i64) -> Vec<DailyBar> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        (0..n)
            .map(|i| {
                let base = Decimal::from(50_000 + i as i64 * step);
                DailyBar {
                    date: start + chrono::Days::new(i as u64),
                    open: base - dec!(100),
                    high: base,
                    low: base - dec!(1000),
                    close: base - dec!(200),
                    volume: 10_000,
                }
            })
            .collect()
    }

    async fn engine_with_stock(bars: Vec<DailyBar>) -> (TurtleSignalEngine, Store, i64) {
        let store = Store::open_in_memory().unwrap();
        let stock_id = store
            .insert_stock("005930", "Samsung Electronics", Venue::Kospi, Some("Tech"))
            .await
            .unwrap();
        store.insert_daily_bars(stock_id, &bars).await.unwrap();
        let engine = TurtleSignalEngine::new(&Settings::default(), store.clone());
        (engine, store, stock_id)
    }

    async fn open_position(
        store: &Store,
        stock_id: i64,
        entry: Decimal,
        stop: Decimal,
        system: u8,
    ) -> i64 {
        let order = store
            .create_order(stock_id, None, Side::Buy, OrderMethod::Market, 100, None)
            .await
            .unwrap();
        store
            .record_entry_fill(
                order, None, None, stock_id, 100, entry, Some(system), stop,
                StopLossKind::TwoN,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn entry_fires_on_breakout_with_s1_loss_history() {
        let (mut engine, store, stock_id) = engine_with_stock(bars_ascending(60, 0)).await;

        // Seed a losing S1 trade so the winner filter allows S1.
        let pos = open_position(&store, stock_id, dec!(50000), dec!(48000), 1).await;
        let sell = store
            .create_order(stock_id, Some(pos), Side::Sell, OrderMethod::Market, 100, None)
            .await
            .unwrap();
        store
            .record_exit_fill(sell, None, None, pos, dec!(47000), "STOP_LOSS")
            .await
            .unwrap();

        let mut prices = HashMap::new();
        prices.insert(stock_id, dec!(50001));
        let signals = engine.check_entry_signals(&[stock_id], &prices).await;

        assert_eq!(signals.len(), 1);
        let sig = &signals[0];
        // Flat highs at 50000: both systems break, S2 takes precedence.
        assert_eq!(sig.kind, SignalKind::EntryS2);
        assert_eq!(sig.breakout_level, Some(dec!(50000)));
        assert_eq!(sig.symbol, "005930");
        assert!(sig.signal_id.is_some());
        // Signal persisted unexecuted.
        let rows = store.recent_signals(1).await.unwrap();
        assert!(!rows[0].is_executed);
    }

    #[tokio::test]
    async fn entry_suppressed_without_history() {
        let (mut engine, _store, stock_id) = engine_with_stock(bars_ascending(30, 0)).await;
        let mut prices = HashMap::new();
        prices.insert(stock_id, dec!(60000));
        // Only 30 bars: below the 56-bar entry minimum.
        let signals = engine.check_entry_signals(&[stock_id], &prices).await;
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn entry_skipped_when_position_open() {
        let (mut engine, store, stock_id) = engine_with_stock(bars_ascending(60, 0)).await;
        open_position(&store, stock_id, dec!(50000), dec!(48000), 2).await;

        let mut prices = HashMap::new();
        prices.insert(stock_id, dec!(60000));
        let signals = engine.check_entry_signals(&[stock_id], &prices).await;
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn s1_winner_defaults_to_true() {
        let (engine, _store, stock_id) = engine_with_stock(bars_ascending(60, 0)).await;
        assert!(engine.previous_s1_winner(stock_id).await.unwrap());
    }

    #[tokio::test]
    async fn s1_winner_follows_last_closed_trade() {
        let (engine, store, stock_id) = engine_with_stock(bars_ascending(60, 0)).await;

        let pos = open_position(&store, stock_id, dec!(50000), dec!(48000), 1).await;
        let sell = store
            .create_order(stock_id, Some(pos), Side::Sell, OrderMethod::Market, 100, None)
            .await
            .unwrap();
        store
            .record_exit_fill(sell, None, None, pos, dec!(55000), "EXIT_S1")
            .await
            .unwrap();
        assert!(engine.previous_s1_winner(stock_id).await.unwrap());

        let pos = open_position(&store, stock_id, dec!(56000), dec!(54000), 1).await;
        let sell = store
            .create_order(stock_id, Some(pos), Side::Sell, OrderMethod::Market, 100, None)
            .await
            .unwrap();
        store
            .record_exit_fill(sell, None, None, pos, dec!(53000), "STOP_LOSS")
            .await
            .unwrap();
        assert!(!engine.previous_s1_winner(stock_id).await.unwrap());
    }

    #[tokio::test]
    async fn stop_loss_beats_channel_exit() {
        let (mut engine, store, stock_id) = engine_with_stock(bars_ascending(25, 0)).await;
        open_position(&store, stock_id, dec!(50000), dec!(47000), 1).await;

        let mut prices = HashMap::new();
        prices.insert(stock_id, dec!(46500));
        let signals = engine.check_exit_signals(Market::Krx, &prices).await;

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::StopLoss);
        assert_eq!(signals[0].stop_loss, Some(dec!(47000)));
    }

    #[tokio::test]
    async fn channel_exit_when_stop_unharmed() {
        let (mut engine, store, stock_id) = engine_with_stock(bars_ascending(25, 0)).await;
        // Stop far below, but price under the 10-day low (49000 flat).
        open_position(&store, stock_id, dec!(50000), dec!(40000), 1).await;

        let mut prices = HashMap::new();
        prices.insert(stock_id, dec!(48500));
        let signals = engine.check_exit_signals(Market::Krx, &prices).await;

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::ExitS1);
        assert_eq!(signals[0].breakout_level, Some(dec!(49000)));
    }

    #[tokio::test]
    async fn no_stop_loss_paired_with_pyramid_same_cycle() {
        // A position at its stop cannot simultaneously be above its next
        // pyramid trigger: verify exit and pyramid lists never share it.
        let (mut engine, store, stock_id) = engine_with_stock(bars_ascending(25, 0)).await;
        open_position(&store, stock_id, dec!(50000), dec!(47000), 1).await;

        let mut prices = HashMap::new();
        prices.insert(stock_id, dec!(46500));
        let exits = engine.check_exit_signals(Market::Krx, &prices).await;
        let pyramids = engine.check_pyramid_signals(Market::Krx, &prices).await;

        assert_eq!(exits.len(), 1);
        assert!(pyramids.is_empty());
    }

    #[tokio::test]
    async fn pyramid_fires_above_trigger() {
        let (mut engine, store, stock_id) = engine_with_stock(bars_ascending(25, 0)).await;
        open_position(&store, stock_id, dec!(50000), dec!(47000), 1).await;

        // Flat series: TR = 1000, ATR = 1000. Trigger = 50000 + 0.5*1000.
        let mut prices = HashMap::new();
        prices.insert(stock_id, dec!(50600));
        let signals = engine.check_pyramid_signals(Market::Krx, &prices).await;

        assert_eq!(signals.len(), 1);
        let sig = &signals[0];
        assert_eq!(sig.kind, SignalKind::Pyramid);
        assert_eq!(sig.breakout_level, Some(dec!(50500)));
        assert_eq!(sig.stop_loss, Some(dec!(48600)));
    }

    #[tokio::test]
    async fn proximity_snapshot_requires_nearness() {
        let (mut engine, _store, stock_id) = engine_with_stock(bars_ascending(60, 0)).await;

        // 0.4 % below the 50000 level: watchable.
        let snapshot = engine
            .proximity_snapshot(stock_id, Some(dec!(49800)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.stock_id, stock_id);
        assert!(!snapshot.targets.is_empty());
        assert_eq!(snapshot.atr_n, dec!(1000));
        assert_eq!(snapshot.highs.len(), 60);

        // 10 % below: not watchable.
        let none = engine
            .proximity_snapshot(stock_id, Some(dec!(45000)))
            .await
            .unwrap();
        assert!(none.is_none());
    }
}

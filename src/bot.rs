// =============================================================================
// Trading bot orchestrator — cycles, fast-poll sub-loop, heartbeat
// =============================================================================
//
// One broker per market, one scheduler, one heartbeat task. The real-time
// cycle is the hot path:
//
//   positions + candidates -> batched quote fetch -> exits, pyramids,
//   entries (in that order) -> rebuild proximity watcher -> fast-poll until
//   the cycle window closes.
//
// Per-signal and per-stock failures are logged and skipped; a cycle-level
// failure aborts only that cycle. The process dies only on initialization
// failure or repeated heartbeat failures.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Timelike;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, LiveBroker, PaperBroker};
use crate::config::Settings;
use crate::error::{Result, TradingError};
use crate::execution::{OrderManager, PerformanceTracker, PortfolioManager};
use crate::journal::{JournalEvent, TradeJournal};
use crate::scheduler::{market_tz, MinuteSpec, TradingScheduler};
use crate::signals::{ProximityWatcher, TurtleSignal, TurtleSignalEngine};
use crate::store::Store;
use crate::types::Market;

/// Quotes are fetched concurrently in batches of this size; the batch is
/// awaited before the next begins, bounding venue load.
const QUOTE_BATCH_SIZE: usize = 20;

/// Heartbeat cadence; readers tolerate up to this much staleness.
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Consecutive heartbeat failures that kill the process.
const MAX_HEARTBEAT_FAILURES: u32 = 5;

/// Paper-broker starting cash when no venue credentials exist.
const DEFAULT_PAPER_CASH: i64 = 100_000_000;

#[derive(Clone)]
pub struct TradingBot {
    settings: Arc<Settings>,
    store: Store,
    journal: Arc<TradeJournal>,
    brokers: HashMap<Market, Arc<dyn Broker>>,
    shutdown: watch::Receiver<bool>,
}

impl TradingBot {
    /// Build the bot with one broker per selected market. Venue credentials
    /// for the active mode select the live client; their absence falls back
    /// to the in-process paper broker.
    pub fn new(
        settings: Arc<Settings>,
        store: Store,
        journal: Arc<TradeJournal>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let mut brokers: HashMap<Market, Arc<dyn Broker>> = HashMap::new();
        for market in settings.market.markets() {
            let overseas = market == Market::Us;
            let broker: Arc<dyn Broker> = if settings.has_venue_credentials(overseas) {
                let creds = settings
                    .credentials
                    .select(settings.trading_mode, overseas)
                    .clone();
                let paper = settings.trading_mode == crate::types::TradingMode::Paper;
                Arc::new(LiveBroker::new(creds, market, paper))
            } else {
                Arc::new(PaperBroker::new(Decimal::from(DEFAULT_PAPER_CASH)))
            };
            brokers.insert(market, broker);
        }

        Self::with_brokers(settings, store, journal, shutdown, brokers)
    }

    /// Wire explicit broker instances (tests, backtests).
    pub fn with_brokers(
        settings: Arc<Settings>,
        store: Store,
        journal: Arc<TradeJournal>,
        shutdown: watch::Receiver<bool>,
        brokers: HashMap<Market, Arc<dyn Broker>>,
    ) -> Self {
        Self {
            settings,
            store,
            journal,
            brokers,
            shutdown,
        }
    }

    pub fn broker_for(&self, market: Market) -> Arc<dyn Broker> {
        self.brokers
            .get(&market)
            .expect("broker exists for every selected market")
            .clone()
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    pub async fn initialize(&self) -> Result<()> {
        info!(
            mode = %self.settings.trading_mode,
            market = %self.settings.market,
            "trading bot initializing"
        );

        for (market, broker) in &self.brokers {
            broker.connect().await?;
            self.store.set_active(*market, true).await?;

            let balance = broker.get_balance().await?;
            info!(
                market = %market,
                paper = broker.is_paper_trading(),
                total_value = %balance.total_value,
                cash_balance = %balance.cash_balance,
                securities_value = %balance.securities_value,
                buying_power = %balance.buying_power,
                "session start"
            );
            self.journal.record(&JournalEvent::SessionStart {
                timestamp: chrono::Utc::now(),
                mode: self.settings.trading_mode.to_string(),
                market: market.to_string(),
                total_value: balance.total_value,
                cash_balance: balance.cash_balance,
            });
        }

        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        for (market, broker) in &self.brokers {
            let total_value = broker.get_balance().await.ok().map(|b| b.total_value);
            self.journal.record(&JournalEvent::SessionEnd {
                timestamp: chrono::Utc::now(),
                market: market.to_string(),
                total_value,
            });
            self.store.set_active(*market, false).await.ok();
            broker.disconnect().await.ok();
        }
        info!("trading bot shut down");
        Ok(())
    }

    /// One premarket + one cycle + one report per market, then return.
    pub async fn run_once(&self) -> Result<()> {
        for market in self.settings.market.markets() {
            self.run_premarket(market).await;
            self.run_realtime_cycle(market).await;
            self.run_daily_report(market).await;
        }
        Ok(())
    }

    /// Register the standard schedule and run until shutdown. Fatal only on
    /// repeated heartbeat failures.
    pub async fn run_scheduled(&self) -> Result<()> {
        let mut scheduler = TradingScheduler::new(self.settings.clone());

        for market in self.settings.market.markets() {
            self.register_market_jobs(&mut scheduler, market)?;
        }

        let handle = scheduler.start();
        info!("trading bot running");

        let result = self.heartbeat_loop().await;

        handle.stop();
        handle.join().await;
        result
    }

    fn register_market_jobs(
        &self,
        scheduler: &mut TradingScheduler,
        market: Market,
    ) -> Result<()> {
        let schedule = match market {
            Market::Krx => &self.settings.schedule.krx,
            Market::Us => &self.settings.schedule.us,
        };
        let tz = market_tz(market);
        let premarket = schedule.premarket()?;
        let open = schedule.open()?;
        let close = schedule.close()?;
        let interval = self.settings.turtle.signal_check_interval_minutes as u32;

        let bot = self.clone();
        scheduler.add_job(
            &format!("{market}_premarket"),
            premarket.hour()..=premarket.hour(),
            MinuteSpec::At(premarket.minute()),
            tz,
            move || {
                let bot = bot.clone();
                Box::pin(async move { bot.run_premarket(market).await })
            },
        );

        // Session jobs are bounded minute-precise by [open, close]: the US
        // 09:30 open and the KRX 15:30 close sit mid-hour, so an hour range
        // alone would fire them outside trading hours.
        let bot = self.clone();
        scheduler.add_session_job(
            &format!("{market}_realtime_signals"),
            open,
            close,
            MinuteSpec::Every(interval.max(1)),
            tz,
            move || {
                let bot = bot.clone();
                Box::pin(async move { bot.run_realtime_cycle(market).await })
            },
        );

        let bot = self.clone();
        scheduler.add_session_job(
            &format!("{market}_monitoring"),
            open,
            close,
            MinuteSpec::Every(5),
            tz,
            move || {
                let bot = bot.clone();
                Box::pin(async move { bot.run_monitoring(market).await })
            },
        );

        let report = close + chrono::Duration::minutes(30);
        let bot = self.clone();
        scheduler.add_job(
            &format!("{market}_daily_report"),
            report.hour()..=report.hour(),
            MinuteSpec::At(report.minute()),
            tz,
            move || {
                let bot = bot.clone();
                Box::pin(async move { bot.run_daily_report(market).await })
            },
        );

        info!(%market, signal_interval_minutes = interval, "market schedule configured");
        Ok(())
    }

    async fn heartbeat_loop(&self) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown signal observed by heartbeat loop");
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(HEARTBEAT_INTERVAL_SECS)) => {
                    let mut tick_failed = false;
                    for market in self.settings.market.markets() {
                        if let Err(e) = self.store.touch_heartbeat(market).await {
                            tick_failed = true;
                            error!(%market, error = %e, "heartbeat update failed");
                        }
                    }
                    if tick_failed {
                        failures += 1;
                        if failures >= MAX_HEARTBEAT_FAILURES {
                            return Err(TradingError::Configuration(
                                "repeated heartbeat failures; store unavailable".to_string(),
                            ));
                        }
                    } else {
                        failures = 0;
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Scheduled jobs
    // -------------------------------------------------------------------------

    /// Premarket: verify data freshness and surface today's candidate count.
    /// The ingestion and screening pipelines themselves run out of process.
    pub async fn run_premarket(&self, market: Market) {
        match self.store.get_latest_period().await {
            Ok(Some((year, quarter))) => {
                info!(%market, fiscal_year = year, fiscal_quarter = ?quarter, "fundamental data freshness");
            }
            Ok(None) => warn!(%market, "no fundamental data on file"),
            Err(e) => error!(%market, error = %e, "freshness check failed"),
        }

        match self
            .store
            .get_candidates(self.settings.risk.min_candidate_score, market)
            .await
        {
            Ok(candidates) => {
                info!(%market, candidates = candidates.len(), "premarket screen loaded")
            }
            Err(e) => error!(%market, error = %e, "candidate load failed"),
        }
    }

    /// Lightweight stop-loss scan; execution happens through the signal
    /// engine on the next cycle.
    pub async fn run_monitoring(&self, market: Market) {
        let portfolio = PortfolioManager::new(
            self.broker_for(market),
            self.store.clone(),
            market,
            self.settings.risk.max_units_total,
        );
        match portfolio.check_stop_losses().await {
            Ok(triggered) => {
                for position in &triggered {
                    warn!(
                        %market,
                        symbol = %position.symbol,
                        current_price = %position.current_price,
                        stop_loss = ?position.stop_loss_price,
                        "stop loss alert"
                    );
                }
            }
            Err(e) => error!(%market, error = %e, "monitoring scan failed"),
        }
    }

    pub async fn run_daily_report(&self, market: Market) {
        let portfolio = PortfolioManager::new(
            self.broker_for(market),
            self.store.clone(),
            market,
            self.settings.risk.max_units_total,
        );

        let summary = match portfolio.summary().await {
            Ok(summary) => summary,
            Err(e) => {
                error!(%market, error = %e, "daily report failed");
                return;
            }
        };

        println!("\n{}", PortfolioManager::format_summary(&summary));

        let closed = self.store.closed_positions().await.unwrap_or_default();
        let open = self.store.open_positions().await.unwrap_or_default();
        let stats = PerformanceTracker::calculate(&closed, Some(&open));

        self.journal.record(&JournalEvent::DailySummary {
            timestamp: chrono::Utc::now(),
            market: market.to_string(),
            total_value: summary.total_value,
            unrealized_pnl: summary.total_unrealized_pnl,
            open_positions: summary.position_count,
            total_units: summary.total_units,
            stats,
        });
    }

    // -------------------------------------------------------------------------
    // The real-time cycle (hot path)
    // -------------------------------------------------------------------------

    pub async fn run_realtime_cycle(&self, market: Market) {
        if self.is_shutdown() {
            return;
        }
        match self.store.is_active(market).await {
            Ok(true) => {}
            Ok(false) => {
                info!(%market, "trading deactivated externally; skipping cycle");
                return;
            }
            Err(e) => {
                error!(%market, error = %e, "active-flag check failed; skipping cycle");
                return;
            }
        }

        let cycle_start = Instant::now();
        let deadline = cycle_start
            + Duration::from_secs(self.settings.turtle.signal_check_interval_minutes * 60);

        info!(%market, "signal cycle start");
        match self.cycle_inner(market, deadline).await {
            Ok((exits, pyramids, entries, fast_entries)) => {
                info!(
                    %market,
                    exits,
                    pyramids,
                    entries,
                    fast_entries,
                    elapsed_secs = cycle_start.elapsed().as_secs(),
                    "signal cycle complete"
                );
            }
            Err(e) => {
                // A cycle-level failure (usually the store) aborts this
                // cycle only; the next scheduled invocation proceeds.
                error!(%market, error = %e, "signal cycle aborted");
            }
        }
    }

    async fn cycle_inner(
        &self,
        market: Market,
        deadline: Instant,
    ) -> Result<(usize, usize, usize, usize)> {
        let broker = self.broker_for(market);
        let mut engine = TurtleSignalEngine::new(&self.settings, self.store.clone());
        let order_manager = OrderManager::new(
            &self.settings,
            broker.clone(),
            self.store.clone(),
            Some(self.journal.clone()),
        );

        // 1. Open positions and today's candidates.
        let positions = self.store.open_positions_for_market(market).await?;
        let candidates = self
            .store
            .get_candidates(self.settings.risk.min_candidate_score, market)
            .await?;
        let candidate_ids: Vec<i64> = candidates.iter().map(|c| c.stock_id).collect();

        let mut all_ids: HashSet<i64> = positions.iter().map(|p| p.stock_id).collect();
        all_ids.extend(&candidate_ids);
        if all_ids.is_empty() {
            debug!(%market, "no stocks to monitor");
            return Ok((0, 0, 0, 0));
        }

        // 2. Live quotes, concurrently in bounded batches.
        let symbols = self.symbols_for(&all_ids).await?;
        let prices = Self::fetch_realtime_prices(broker.as_ref(), &symbols).await;
        if prices.is_empty() {
            warn!(%market, "no realtime prices available");
            return Ok((0, 0, 0, 0));
        }

        // 3. Evaluate and execute: exits, then pyramids, then entries.
        let exit_signals = engine.check_exit_signals(market, &prices).await;
        let exits = self
            .execute_signals(&order_manager, &exit_signals, "exit")
            .await;

        let pyramid_signals = engine.check_pyramid_signals(market, &prices).await;
        let pyramids = self
            .execute_signals(&order_manager, &pyramid_signals, "pyramid")
            .await;

        let entry_signals = engine.check_entry_signals(&candidate_ids, &prices).await;
        let entries = self
            .execute_signals(&order_manager, &entry_signals, "entry")
            .await;

        // 4. Rebuild the proximity watcher from today's candidates.
        let mut watcher = ProximityWatcher::new(&self.settings.turtle);
        for &stock_id in &candidate_ids {
            match engine
                .proximity_snapshot(stock_id, prices.get(&stock_id).copied())
                .await
            {
                Ok(Some(snapshot)) => watcher.register(snapshot),
                Ok(None) => {}
                Err(e) => debug!(stock_id, error = %e, "proximity snapshot failed"),
            }
        }

        // 5. Fast-poll until the cycle window closes.
        let mut fast_entries = 0;
        if watcher.has_targets() {
            fast_entries = self
                .fast_poll_loop(market, &mut engine, &order_manager, &mut watcher, deadline)
                .await;
        }

        Ok((exits, pyramids, entries, fast_entries))
    }

    async fn symbols_for(&self, ids: &HashSet<i64>) -> Result<Vec<(i64, String)>> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(stock) = self.store.get_stock(id).await? {
                out.push((id, stock.symbol));
            }
        }
        Ok(out)
    }

    /// Concurrent quote fetch, QUOTE_BATCH_SIZE at a time. Failures never
    /// halt the cycle; they are always surfaced as one structured warning.
    async fn fetch_realtime_prices(
        broker: &dyn Broker,
        symbols: &[(i64, String)],
    ) -> HashMap<i64, Decimal> {
        let mut prices = HashMap::with_capacity(symbols.len());
        let mut failed_count = 0usize;

        for chunk in symbols.chunks(QUOTE_BATCH_SIZE) {
            let quotes = join_all(chunk.iter().map(|(stock_id, symbol)| async move {
                (*stock_id, broker.get_current_price(symbol).await)
            }))
            .await;

            for (stock_id, result) in quotes {
                match result {
                    Ok(price) if price > Decimal::ZERO => {
                        prices.insert(stock_id, price);
                    }
                    Ok(_) => failed_count += 1,
                    Err(e) => {
                        failed_count += 1;
                        debug!(stock_id, error = %e, "quote fetch failed");
                    }
                }
            }
        }

        if failed_count > 0 {
            warn!(
                failed_count,
                total_requested = symbols.len(),
                "realtime price fetch failures"
            );
        }
        prices
    }

    async fn execute_signals(
        &self,
        order_manager: &OrderManager,
        signals: &[TurtleSignal],
        stage: &str,
    ) -> usize {
        let mut executed = 0;
        for signal in signals {
            if self.is_shutdown() {
                break;
            }
            match order_manager.process_signal(signal).await {
                Ok(result) => {
                    info!(
                        stage,
                        symbol = %signal.symbol,
                        signal_type = %signal.kind,
                        success = result.success,
                        quantity = result.quantity,
                        filled_price = ?result.filled_price,
                        order_id = ?result.order_id,
                        message = %result.message,
                        "signal execution result"
                    );
                    if result.success {
                        executed += 1;
                    }
                }
                Err(e) => {
                    error!(
                        stage,
                        symbol = %signal.symbol,
                        signal_type = %signal.kind,
                        error = %e,
                        "signal execution failed"
                    );
                }
            }
        }
        executed
    }

    /// Seconds-granularity polling of near-breakout stocks until `deadline`.
    /// Interruptible by shutdown and by external deactivation.
    async fn fast_poll_loop(
        &self,
        market: Market,
        engine: &mut TurtleSignalEngine,
        order_manager: &OrderManager,
        watcher: &mut ProximityWatcher,
        deadline: Instant,
    ) -> usize {
        info!(
            %market,
            watched = watcher.watched_count(),
            symbols = ?watcher.watched_symbols(),
            "fast poll loop start"
        );

        let tick = Duration::from_secs(self.settings.turtle.fast_poll_interval_seconds.max(1));
        let mut shutdown = self.shutdown.clone();
        let mut entries = 0;

        while Instant::now() < deadline && watcher.has_targets() {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(%market, "fast poll interrupted by shutdown");
                        break;
                    }
                }
                _ = tokio::time::sleep(tick) => {}
            }
            if self.is_shutdown() || Instant::now() >= deadline {
                break;
            }
            if !self.store.is_active(market).await.unwrap_or(false) {
                info!(%market, "fast poll stopped: trading deactivated");
                break;
            }

            entries += self
                .fast_poll_pass(market, engine, order_manager, watcher)
                .await;
        }

        info!(%market, entries, "fast poll loop end");
        entries
    }

    /// One pass over the watch list: fresh quote, breakout check, and
    /// immediate entry on a hit.
    async fn fast_poll_pass(
        &self,
        market: Market,
        engine: &mut TurtleSignalEngine,
        order_manager: &OrderManager,
        watcher: &mut ProximityWatcher,
    ) -> usize {
        let broker = self.broker_for(market);
        let watched_ids: Vec<(i64, String)> = watcher
            .watched_list()
            .iter()
            .map(|w| (w.stock_id, w.symbol.clone()))
            .collect();

        let mut entries = 0;
        for (stock_id, symbol) in watched_ids {
            if self.is_shutdown() {
                break;
            }

            let price = match broker.get_current_price(&symbol).await {
                Ok(price) if price > Decimal::ZERO => price,
                Ok(_) => continue,
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "fast poll quote failed");
                    continue;
                }
            };

            // Snapshot before the check: a breakout auto-unregisters.
            let Some(snapshot) = watcher.get(stock_id).cloned() else {
                continue;
            };
            let Some(result) = watcher.check_breakout(stock_id, price) else {
                continue;
            };
            let Some(kind) = result.kind else { continue };

            info!(
                %market,
                symbol = %symbol,
                signal_type = %kind,
                price = %price,
                breakout_level = ?result.breakout_level,
                "fast poll breakout"
            );

            let signal = engine
                .record_breakout_signal(&snapshot, kind, result.system, price, result.breakout_level)
                .await;
            match order_manager.execute_entry(&signal).await {
                Ok(result) if result.success => {
                    entries += 1;
                    info!(
                        symbol = %symbol,
                        quantity = result.quantity,
                        filled_price = ?result.filled_price,
                        "fast poll entry executed"
                    );
                }
                Ok(result) => {
                    warn!(symbol = %symbol, message = %result.message, "fast poll entry rejected");
                }
                Err(e) => {
                    error!(symbol = %symbol, error = %e, "fast poll entry failed");
                }
            }
        }
        entries
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DailyBar;
    use crate::types::Venue;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn flat_bars(n: usize, high: Decimal) -> Vec<DailyBar> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        (0..n)
            .map(|i| DailyBar {
                date: start + chrono::Days::new(i as u64),
                open: high - dec!(300),
                high,
                low: high - dec!(1000),
                close: high - dec!(200),
                volume: 10_000,
            })
            .collect()
    }

    struct BotFixture {
        bot: TradingBot,
        store: Store,
        stock_id: i64,
        broker: Arc<PaperBroker>,
        _tx: watch::Sender<bool>,
    }

    async fn bot_fixture() -> BotFixture {
        let store = Store::open_in_memory().unwrap();
        let stock_id = store
            .insert_stock("005930", "Samsung Electronics", Venue::Kospi, Some("Tech"))
            .await
            .unwrap();
        store
            .insert_daily_bars(stock_id, &flat_bars(60, dec!(50000)))
            .await
            .unwrap();
        store
            .upsert_canslim_score(
                stock_id,
                NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
                6,
                Some(92),
                true,
            )
            .await
            .unwrap();
        store.set_active(Market::Krx, true).await.unwrap();

        let dir = std::env::temp_dir().join(format!("bw-bot-{}", uuid::Uuid::new_v4()));
        let journal = Arc::new(TradeJournal::open(&dir).unwrap());
        let (tx, rx) = watch::channel(false);

        let broker = Arc::new(PaperBroker::new(dec!(100000000)));
        let mut brokers: HashMap<Market, Arc<dyn Broker>> = HashMap::new();
        brokers.insert(Market::Krx, broker.clone());

        let bot = TradingBot::with_brokers(
            Arc::new(Settings::default()),
            store.clone(),
            journal,
            rx,
            brokers,
        );
        BotFixture {
            bot,
            store,
            stock_id,
            broker,
            _tx: tx,
        }
    }

    #[tokio::test]
    async fn paper_broker_used_without_credentials() {
        // The default constructor (no env credentials) must fall back to the
        // in-process paper broker.
        let store = Store::open_in_memory().unwrap();
        let dir = std::env::temp_dir().join(format!("bw-bot-{}", uuid::Uuid::new_v4()));
        let journal = Arc::new(TradeJournal::open(&dir).unwrap());
        let (_tx, rx) = watch::channel(false);
        let bot = TradingBot::new(Arc::new(Settings::default()), store, journal, rx);
        assert!(bot.broker_for(Market::Krx).is_paper_trading());
    }

    #[tokio::test]
    async fn cycle_executes_breakout_entry() {
        let fx = bot_fixture().await;
        fx.bot.initialize().await.unwrap();
        fx.broker.set_price("005930", dec!(50001));

        // Price above the flat 50000 channel: System 2 entry fills.
        let (exits, pyramids, entries, _) = fx
            .bot
            .cycle_inner(Market::Krx, Instant::now())
            .await
            .unwrap();
        assert_eq!((exits, pyramids), (0, 0));
        assert_eq!(entries, 1);

        let position = fx
            .store
            .open_position_by_stock(fx.stock_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.entry_system, Some(2));
        assert!(position.quantity > 0);
    }

    #[tokio::test]
    async fn cycle_skips_when_deactivated() {
        let fx = bot_fixture().await;
        fx.bot.initialize().await.unwrap();
        fx.store.set_active(Market::Krx, false).await.unwrap();
        fx.broker.set_price("005930", dec!(50001));

        fx.bot.run_realtime_cycle(Market::Krx).await;
        assert!(fx
            .store
            .open_position_by_stock(fx.stock_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn cycle_tolerates_missing_quotes() {
        let fx = bot_fixture().await;
        fx.bot.initialize().await.unwrap();
        // No price set at all: the cycle completes without signals.
        let (exits, pyramids, entries, fast) = fx
            .bot
            .cycle_inner(Market::Krx, Instant::now())
            .await
            .unwrap();
        assert_eq!((exits, pyramids, entries, fast), (0, 0, 0, 0));
        assert!(fx
            .store
            .open_position_by_stock(fx.stock_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn fast_poll_pass_fires_proximity_entry() {
        let fx = bot_fixture().await;
        fx.bot.initialize().await.unwrap();

        // Just below the 50000 channel: watched, no immediate entry.
        fx.broker.set_price("005930", dec!(49800));
        let mut engine = TurtleSignalEngine::new(&fx.bot.settings, fx.store.clone());
        let order_manager = OrderManager::new(
            &fx.bot.settings,
            fx.bot.broker_for(Market::Krx),
            fx.store.clone(),
            None,
        );
        let mut watcher = ProximityWatcher::new(&fx.bot.settings.turtle);
        let snapshot = engine
            .proximity_snapshot(fx.stock_id, Some(dec!(49800)))
            .await
            .unwrap()
            .unwrap();
        watcher.register(snapshot);

        // Tick 1: still below, stays watched.
        let entries = fx
            .bot
            .fast_poll_pass(Market::Krx, &mut engine, &order_manager, &mut watcher)
            .await;
        assert_eq!(entries, 0);
        assert_eq!(watcher.watched_count(), 1);

        // Tick 2: the quote crosses the level, entry executes, watch drops.
        fx.broker.set_price("005930", dec!(50001));
        let entries = fx
            .bot
            .fast_poll_pass(Market::Krx, &mut engine, &order_manager, &mut watcher)
            .await;
        assert_eq!(entries, 1);
        assert_eq!(watcher.watched_count(), 0);

        let position = fx
            .store
            .open_position_by_stock(fx.stock_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.entry_system, Some(2));
    }

    #[tokio::test]
    async fn run_once_completes_and_reports() {
        let fx = bot_fixture().await;
        fx.bot.initialize().await.unwrap();
        // Far below the channel: no entry and nothing close enough to watch,
        // so the cycle returns without entering the fast-poll loop.
        fx.broker.set_price("005930", dec!(45000));
        fx.bot.run_once().await.unwrap();
        fx.bot.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_touches_trading_state() {
        let fx = bot_fixture().await;
        fx.bot.initialize().await.unwrap();
        fx.store.touch_heartbeat(Market::Krx).await.unwrap();
        let hb = fx.store.heartbeat_at(Market::Krx).await.unwrap();
        assert!(hb.is_some());
    }
}

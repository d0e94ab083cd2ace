// =============================================================================
// Backtester — historical replay through the production signal path
// =============================================================================
//
// The replay drives the SAME TurtleSignalEngine and OrderManager as live
// trading, against an in-memory store and a paper broker whose quote source
// is the replay cursor. Each trading day appends that day's bars, publishes
// closes as the "realtime" price map, and executes the three signal lists in
// order. What differs from live is only the clock.
//
// Commission is applied at report time (the paper broker fills at the raw
// price); all aggregate statistics are computed over commission-adjusted
// trades. CAGR and Sharpe are report-time f64 — everything on the trading
// path stays Decimal.
// =============================================================================

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::broker::paper::PriceProvider;
use crate::broker::{Broker, PaperBroker};
use crate::config::Settings;
use crate::error::Result;
use crate::execution::OrderManager;
use crate::signals::TurtleSignalEngine;
use crate::store::{DailyBar, Store};
use crate::types::{Market, Venue};

/// One symbol's OHLCV history to replay.
#[derive(Debug, Clone)]
pub struct BacktestSeries {
    pub symbol: String,
    pub name: String,
    pub venue: Venue,
    pub bars: Vec<DailyBar>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: u64,
    pub units: u32,
    /// Net of commission.
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub exit_reason: String,
    pub holding_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    pub total_return: Decimal,
    pub total_return_pct: Decimal,
    pub cagr: f64,
    pub max_drawdown_pct: Decimal,
    pub sharpe: f64,
    pub win_rate: Decimal,
    pub profit_factor: Decimal,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub avg_holding_days: f64,
    pub trades: Vec<BacktestTrade>,
}

/// Quote source shared between the replay loop and the paper broker.
#[derive(Default)]
struct ReplayPrices {
    prices: RwLock<HashMap<String, Decimal>>,
}

impl PriceProvider for ReplayPrices {
    fn price_of(&self, symbol: &str) -> Option<Decimal> {
        self.prices.read().get(symbol).copied()
    }
}

pub struct Backtester {
    settings: Arc<Settings>,
    initial_capital: Decimal,
    commission_rate: Decimal,
}

impl Backtester {
    pub fn new(settings: Arc<Settings>, initial_capital: Decimal, commission_rate: Decimal) -> Self {
        Self {
            settings,
            initial_capital,
            commission_rate,
        }
    }

    pub async fn run(&self, market: Market, series: Vec<BacktestSeries>) -> Result<BacktestReport> {
        let store = Store::open_in_memory()?;
        let prices = Arc::new(ReplayPrices::default());
        let broker: Arc<dyn Broker> = Arc::new(PaperBroker::with_price_provider(
            self.initial_capital,
            prices.clone(),
        ));
        broker.connect().await?;

        let mut engine = TurtleSignalEngine::new(&self.settings, store.clone());
        let order_manager =
            OrderManager::new(&self.settings, broker.clone(), store.clone(), None);

        // Register the universe; every symbol is a standing candidate.
        let mut bars_by_stock: HashMap<i64, (String, HashMap<NaiveDate, DailyBar>)> =
            HashMap::new();
        let mut all_dates: BTreeSet<NaiveDate> = BTreeSet::new();
        for s in &series {
            let stock_id = store
                .insert_stock(&s.symbol, &s.name, s.venue, None)
                .await?;
            all_dates.extend(s.bars.iter().map(|b| b.date));
            let by_date: HashMap<NaiveDate, DailyBar> =
                s.bars.iter().map(|b| (b.date, b.clone())).collect();
            bars_by_stock.insert(stock_id, (s.symbol.clone(), by_date));
        }
        let candidate_ids: Vec<i64> = bars_by_stock.keys().copied().collect();

        info!(
            symbols = series.len(),
            days = all_dates.len(),
            initial_capital = %self.initial_capital,
            "backtest start"
        );

        let mut equity_curve: Vec<Decimal> = vec![self.initial_capital];

        for date in &all_dates {
            // Append the day's bars and publish closes as live quotes.
            let mut realtime: HashMap<i64, Decimal> = HashMap::new();
            for (&stock_id, (symbol, by_date)) in &bars_by_stock {
                if let Some(bar) = by_date.get(date) {
                    store
                        .insert_daily_bars(stock_id, std::slice::from_ref(bar))
                        .await?;
                    prices
                        .prices
                        .write()
                        .insert(symbol.clone(), bar.close);
                }
                // A stock without a bar today is still quoted at its last
                // known close, like a halted symbol on a live feed.
                if let Some(price) = prices.price_of(symbol) {
                    realtime.insert(stock_id, price);
                }
            }

            // Same evaluation order as the live cycle.
            for signal in engine.check_exit_signals(market, &realtime).await {
                if let Err(e) = order_manager.execute_exit(&signal).await {
                    debug!(symbol = %signal.symbol, error = %e, "backtest exit skipped");
                }
            }
            for signal in engine.check_pyramid_signals(market, &realtime).await {
                if let Err(e) = order_manager.execute_pyramid(&signal).await {
                    debug!(symbol = %signal.symbol, error = %e, "backtest pyramid skipped");
                }
            }
            for signal in engine.check_entry_signals(&candidate_ids, &realtime).await {
                if let Err(e) = order_manager.execute_entry(&signal).await {
                    debug!(symbol = %signal.symbol, error = %e, "backtest entry skipped");
                }
            }

            equity_curve.push(broker.get_balance().await?.total_value);
        }

        let report = self
            .build_report(&store, &bars_by_stock, equity_curve, &all_dates)
            .await?;

        info!(
            final_capital = %report.final_capital,
            total_trades = report.total_trades,
            win_rate = %report.win_rate,
            "backtest complete"
        );
        Ok(report)
    }

    async fn build_report(
        &self,
        store: &Store,
        bars_by_stock: &HashMap<i64, (String, HashMap<NaiveDate, DailyBar>)>,
        equity_curve: Vec<Decimal>,
        all_dates: &BTreeSet<NaiveDate>,
    ) -> Result<BacktestReport> {
        let closed = store.closed_positions().await?;

        let mut trades = Vec::with_capacity(closed.len());
        let mut total_commission = Decimal::ZERO;
        for position in &closed {
            let symbol = bars_by_stock
                .get(&position.stock_id)
                .map(|(s, _)| s.clone())
                .unwrap_or_else(|| position.stock_id.to_string());
            let exit_price = position.exit_price.unwrap_or(Decimal::ZERO);
            let turnover = (position.entry_price + exit_price) * Decimal::from(position.quantity);
            let commission = turnover * self.commission_rate;
            total_commission += commission;

            let pnl = position.pnl.unwrap_or(Decimal::ZERO) - commission;
            trades.push(BacktestTrade {
                symbol,
                entry_date: position.entry_date.date_naive(),
                exit_date: position
                    .exit_date
                    .map(|d| d.date_naive())
                    .unwrap_or(position.entry_date.date_naive()),
                entry_price: position.entry_price,
                exit_price,
                quantity: position.quantity,
                units: position.units,
                pnl,
                pnl_pct: position.pnl_percent.unwrap_or(Decimal::ZERO),
                exit_reason: position.exit_reason.clone().unwrap_or_default(),
                holding_days: position
                    .exit_date
                    .map(|d| (d - position.entry_date).num_days().max(1))
                    .unwrap_or(1),
            });
        }

        let final_capital = equity_curve
            .last()
            .copied()
            .unwrap_or(self.initial_capital)
            - total_commission;
        let total_return = final_capital - self.initial_capital;
        let total_return_pct = if self.initial_capital > Decimal::ZERO {
            total_return / self.initial_capital
        } else {
            Decimal::ZERO
        };

        let wins: Vec<&BacktestTrade> = trades.iter().filter(|t| t.pnl > Decimal::ZERO).collect();
        let losses: Vec<&BacktestTrade> = trades.iter().filter(|t| t.pnl <= Decimal::ZERO).collect();

        let win_rate = if trades.is_empty() {
            Decimal::ZERO
        } else {
            Decimal::from(wins.len() as u64) / Decimal::from(trades.len() as u64)
        };
        let gross_profit: Decimal = wins.iter().map(|t| t.pnl).sum();
        let gross_loss: Decimal = losses.iter().map(|t| t.pnl.abs()).sum();
        let profit_factor = if gross_loss > Decimal::ZERO {
            gross_profit / gross_loss
        } else {
            Decimal::ZERO
        };
        let avg_win = if wins.is_empty() {
            Decimal::ZERO
        } else {
            gross_profit / Decimal::from(wins.len() as u64)
        };
        let avg_loss = if losses.is_empty() {
            Decimal::ZERO
        } else {
            -(gross_loss / Decimal::from(losses.len() as u64))
        };
        let avg_holding_days = if trades.is_empty() {
            0.0
        } else {
            trades.iter().map(|t| t.holding_days).sum::<i64>() as f64 / trades.len() as f64
        };

        Ok(BacktestReport {
            initial_capital: self.initial_capital,
            final_capital,
            total_return,
            total_return_pct,
            cagr: Self::cagr(self.initial_capital, final_capital, all_dates),
            max_drawdown_pct: Self::max_drawdown(&equity_curve),
            sharpe: Self::sharpe(&equity_curve),
            win_rate,
            profit_factor,
            total_trades: trades.len(),
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            avg_win,
            avg_loss,
            avg_holding_days,
            trades,
        })
    }

    fn cagr(initial: Decimal, final_capital: Decimal, dates: &BTreeSet<NaiveDate>) -> f64 {
        let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
            return 0.0;
        };
        let days = (*last - *first).num_days().max(1) as f64;
        let initial = initial.to_f64().unwrap_or(0.0);
        let final_f = final_capital.to_f64().unwrap_or(0.0);
        if initial <= 0.0 || final_f <= 0.0 {
            return 0.0;
        }
        (final_f / initial).powf(365.0 / days) - 1.0
    }

    /// Largest peak-to-trough decline as a fraction of the peak.
    fn max_drawdown(equity_curve: &[Decimal]) -> Decimal {
        let mut peak = Decimal::MIN;
        let mut max_dd = Decimal::ZERO;
        for &equity in equity_curve {
            if equity > peak {
                peak = equity;
            }
            if peak > Decimal::ZERO {
                let dd = (peak - equity) / peak;
                if dd > max_dd {
                    max_dd = dd;
                }
            }
        }
        max_dd
    }

    /// Annualized Sharpe over daily equity returns (zero risk-free rate).
    fn sharpe(equity_curve: &[Decimal]) -> f64 {
        if equity_curve.len() < 3 {
            return 0.0;
        }
        let returns: Vec<f64> = equity_curve
            .windows(2)
            .filter_map(|w| {
                let prev = w[0].to_f64()?;
                let next = w[1].to_f64()?;
                (prev > 0.0).then(|| (next - prev) / prev)
            })
            .collect();
        if returns.len() < 2 {
            return 0.0;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (returns.len() - 1) as f64;
        let std = var.sqrt();
        if std == 0.0 {
            return 0.0;
        }
        mean / std * 252f64.sqrt()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(date: NaiveDate, high: Decimal, low: Decimal, close: Decimal) -> DailyBar {
        DailyBar {
            date,
            open: close,
            high,
            low,
            close,
            volume: 10_000,
        }
    }

    /// 60 flat days at 50000, a breakout run to 53000, then a collapse
    /// through the stop. Produces exactly one round trip.
    fn breakout_then_bust() -> Vec<DailyBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut bars = Vec::new();
        for i in 0..60u64 {
            let d = start + chrono::Days::new(i);
            bars.push(bar(d, dec!(50000), dec!(49000), dec!(49800)));
        }
        // Breakout day and follow-through.
        for (i, close) in [dec!(50500), dec!(51500), dec!(52500), dec!(53000)]
            .into_iter()
            .enumerate()
        {
            let d = start + chrono::Days::new(60 + i as u64);
            bars.push(bar(d, close + dec!(200), close - dec!(500), close));
        }
        // Collapse far below any stop.
        for (i, close) in [dec!(47000), dec!(44000)].into_iter().enumerate() {
            let d = start + chrono::Days::new(64 + i as u64);
            bars.push(bar(d, close + dec!(300), close - dec!(500), close));
        }
        bars
    }

    fn backtester() -> Backtester {
        Backtester::new(Arc::new(Settings::default()), dec!(100000000), Decimal::ZERO)
    }

    #[tokio::test]
    async fn replay_produces_a_round_trip() {
        let series = vec![BacktestSeries {
            symbol: "005930".into(),
            name: "Samsung Electronics".into(),
            venue: Venue::Kospi,
            bars: breakout_then_bust(),
        }];

        let report = backtester().run(Market::Krx, series).await.unwrap();

        assert_eq!(report.total_trades, 1);
        let trade = &report.trades[0];
        assert_eq!(trade.symbol, "005930");
        // Entered on the breakout above the 50000 channel, exited on the
        // collapse through the stop.
        assert!(trade.entry_price >= dec!(50000));
        assert!(trade.exit_price < trade.entry_price);
        assert!(trade.pnl < Decimal::ZERO);
        assert_eq!(report.losing_trades, 1);
        assert_eq!(report.win_rate, Decimal::ZERO);

        // Equity accounting closes: final = initial + sum of trade pnl +
        // unrealized (none left open after the bust exit).
        assert_eq!(
            report.final_capital,
            report.initial_capital + report.trades.iter().map(|t| t.pnl).sum::<Decimal>()
        );
        assert!(report.max_drawdown_pct > Decimal::ZERO);
    }

    #[tokio::test]
    async fn no_history_means_no_trades() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars: Vec<DailyBar> = (0..30u64)
            .map(|i| {
                bar(
                    start + chrono::Days::new(i),
                    dec!(50000),
                    dec!(49000),
                    dec!(49800),
                )
            })
            .collect();
        let series = vec![BacktestSeries {
            symbol: "000660".into(),
            name: "SK Hynix".into(),
            venue: Venue::Kospi,
            bars,
        }];

        let report = backtester().run(Market::Krx, series).await.unwrap();
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.final_capital, report.initial_capital);
        assert_eq!(report.cagr, 0.0);
    }

    #[tokio::test]
    async fn commission_reduces_reported_pnl() {
        let series = vec![BacktestSeries {
            symbol: "005930".into(),
            name: "Samsung Electronics".into(),
            venue: Venue::Kospi,
            bars: breakout_then_bust(),
        }];

        let free = backtester().run(Market::Krx, series.clone()).await.unwrap();
        let taxed = Backtester::new(
            Arc::new(Settings::default()),
            dec!(100000000),
            dec!(0.00015),
        )
        .run(Market::Krx, series)
        .await
        .unwrap();

        assert!(taxed.trades[0].pnl < free.trades[0].pnl);
        assert!(taxed.final_capital < free.final_capital);
    }

    #[test]
    fn drawdown_over_known_curve() {
        let curve = vec![
            dec!(100),
            dec!(110),
            dec!(99),
            dec!(120),
            dec!(90),
            dec!(130),
        ];
        // Worst: 120 -> 90 = 25 %.
        assert_eq!(Backtester::max_drawdown(&curve), dec!(0.25));
    }

    #[test]
    fn sharpe_of_flat_curve_is_zero() {
        let curve = vec![dec!(100); 10];
        assert_eq!(Backtester::sharpe(&curve), 0.0);
    }
}

// =============================================================================
// Breakwater — backtest entry point
// =============================================================================
//
// Replays stored daily bars for a market's active stocks through the live
// signal engine and order manager against a paper broker, then prints the
// summary report.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use breakwater::backtest::{BacktestReport, BacktestSeries, Backtester};
use breakwater::config::Settings;
use breakwater::types::Market;
use breakwater::Store;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MarketArg {
    Krx,
    Us,
}

impl From<MarketArg> for Market {
    fn from(value: MarketArg) -> Self {
        match value {
            MarketArg::Krx => Self::Krx,
            MarketArg::Us => Self::Us,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "backtest", about = "Replay historical bars through the trading engine")]
struct Cli {
    /// Database holding stocks and daily prices.
    #[arg(long, default_value = "breakwater.db")]
    db: String,

    #[arg(short, long, value_enum, default_value = "krx")]
    market: MarketArg,

    /// First replay date (inclusive), YYYY-MM-DD.
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last replay date (inclusive), YYYY-MM-DD.
    #[arg(long)]
    to: Option<NaiveDate>,

    #[arg(long, default_value = "100000000")]
    capital: Decimal,

    /// Per-side commission rate applied at report time.
    #[arg(long, default_value = "0.00015")]
    commission: Decimal,

    /// Replay only stocks on the latest candidate list with at least this
    /// CANSLIM score. Without it every active stock is replayed.
    #[arg(long)]
    min_score: Option<i64>,

    /// Cap on the number of symbols replayed (0 = all).
    #[arg(long, default_value = "0")]
    limit: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let market: Market = cli.market.into();
    let settings = Arc::new(Settings::default());

    let store = Store::open(&cli.db)?;
    let stocks = store.active_stocks(market).await?;
    anyhow::ensure!(!stocks.is_empty(), "no active stocks for {market} in {}", cli.db);

    let candidate_ids: Option<HashSet<i64>> = match cli.min_score {
        Some(min_score) => {
            let candidates = store.get_candidates(min_score, market).await?;
            anyhow::ensure!(
                !candidates.is_empty(),
                "no candidates with score >= {min_score} for {market}"
            );
            Some(candidates.iter().map(|c| c.stock_id).collect())
        }
        None => None,
    };

    let mut series = Vec::new();
    for stock in &stocks {
        if cli.limit > 0 && series.len() >= cli.limit {
            break;
        }
        if let Some(ids) = &candidate_ids {
            if !ids.contains(&stock.id) {
                continue;
            }
        }
        let bar_count = store.bar_count(stock.id).await?;
        let mut bars = store.get_period(stock.id, bar_count).await?;
        if let Some(from) = cli.from {
            bars.retain(|b| b.date >= from);
        }
        if let Some(to) = cli.to {
            bars.retain(|b| b.date <= to);
        }
        if bars.is_empty() {
            continue;
        }
        series.push(BacktestSeries {
            symbol: stock.symbol.clone(),
            name: stock.name.clone(),
            venue: stock.venue,
            bars,
        });
    }
    anyhow::ensure!(!series.is_empty(), "no bars in the selected date range");

    info!(symbols = series.len(), %market, "starting backtest");
    let backtester = Backtester::new(settings, cli.capital, cli.commission);
    let report = backtester.run(market, series).await?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &BacktestReport) {
    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULT");
    println!("{}", "=".repeat(60));
    println!("Initial capital:  {:>18}", report.initial_capital.round_dp(0));
    println!("Final capital:    {:>18}", report.final_capital.round_dp(0));
    println!(
        "Total return:     {:>18} ({:.2}%)",
        report.total_return.round_dp(0),
        report.total_return_pct * Decimal::ONE_HUNDRED
    );
    println!("CAGR:             {:>17.2}%", report.cagr * 100.0);
    println!(
        "Max drawdown:     {:>17.2}%",
        report.max_drawdown_pct * Decimal::ONE_HUNDRED
    );
    println!("Sharpe:           {:>18.2}", report.sharpe);
    println!(
        "Win rate:         {:>17.1}% ({} wins / {} losses)",
        report.win_rate * Decimal::ONE_HUNDRED,
        report.winning_trades,
        report.losing_trades
    );
    println!("Profit factor:    {:>18.2}", report.profit_factor);
    println!("Avg holding days: {:>18.1}", report.avg_holding_days);
    println!("{}", "-".repeat(60));

    if !report.trades.is_empty() {
        println!(
            "{:<10} {:>11} {:>11} {:>10} {:>10} {:>6} {:<10}",
            "Symbol", "Entry", "Exit", "EntryPx", "ExitPx", "Days", "Reason"
        );
        println!("{}", "-".repeat(60));
        for trade in &report.trades {
            println!(
                "{:<10} {:>11} {:>11} {:>10} {:>10} {:>6} {:<10}",
                trade.symbol,
                trade.entry_date,
                trade.exit_date,
                trade.entry_price.round_dp(2),
                trade.exit_price.round_dp(2),
                trade.holding_days,
                trade.exit_reason,
            );
        }
    }
    println!("{}", "=".repeat(60));
}

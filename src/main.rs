// =============================================================================
// Breakwater — trading entry point
// =============================================================================
//
// Paper mode needs nothing but a database path. LIVE mode requires venue
// credentials in the environment and an interactive YES confirmation (unless
// --once --dry-run).
//
// Exit codes: 0 normal shutdown, 1 fatal error, 130 interrupted.
// =============================================================================

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use breakwater::config::Settings;
use breakwater::journal::TradeJournal;
use breakwater::types::{MarketSelection, TradingMode};
use breakwater::{Store, TradingBot};

const EXIT_OK: i32 = 0;
const EXIT_FATAL: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MarketArg {
    Krx,
    Us,
    Both,
}

impl From<MarketArg> for MarketSelection {
    fn from(value: MarketArg) -> Self {
        match value {
            MarketArg::Krx => Self::Krx,
            MarketArg::Us => Self::Us,
            MarketArg::Both => Self::Both,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "UPPER")]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "trading", about = "Run the breakout trading bot")]
struct Cli {
    /// Market(s) to trade.
    #[arg(short, long, value_enum, default_value = "krx")]
    market: MarketArg,

    /// Run one premarket + one cycle + one report, then exit.
    #[arg(long)]
    once: bool,

    /// Force the in-process paper broker regardless of credentials.
    #[arg(long)]
    dry_run: bool,

    #[arg(short = 'l', long, value_enum, default_value = "INFO")]
    log_level: LogLevel,

    /// Settings file (JSON). Missing file means defaults.
    #[arg(long, default_value = "config/settings.json")]
    config: String,

    /// Override the database path from settings.
    #[arg(long)]
    db: Option<String>,
}

fn main() {
    let code = run();
    std::process::exit(code);
}

fn run() -> i32 {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let mut settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "failed to load settings");
            return EXIT_FATAL;
        }
    };
    settings.market = cli.market.into();
    if let Some(db) = &cli.db {
        settings.database_path = db.clone();
    }
    if cli.dry_run {
        settings.trading_mode = TradingMode::Paper;
    }

    if let Err(e) = settings.validate() {
        error!(error = %e, "invalid configuration");
        return EXIT_FATAL;
    }

    let broker_desc = match settings.trading_mode {
        TradingMode::Live => "venue API (live account)",
        TradingMode::Paper if settings.has_venue_credentials(false)
            || settings.has_venue_credentials(true) =>
        {
            "venue API (simulated account)"
        }
        TradingMode::Paper => "in-process paper broker",
    };

    println!("\n{}", "=".repeat(60));
    println!("Breakwater Trading Bot");
    println!("{}", "=".repeat(60));
    println!("Mode:   {}", settings.trading_mode.to_string().to_uppercase());
    println!("Broker: {broker_desc}");
    println!("Market: {}", settings.market.to_string().to_uppercase());
    println!("{}\n", "=".repeat(60));

    if settings.trading_mode == TradingMode::Live && !(cli.once && cli.dry_run) {
        println!("WARNING: running in LIVE mode with real money.");
        print!("Type 'YES' to confirm: ");
        std::io::stdout().flush().ok();
        let mut confirm = String::new();
        if std::io::stdin().read_line(&mut confirm).is_err() || confirm.trim() != "YES" {
            println!("Aborted.");
            return EXIT_OK;
        }
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return EXIT_FATAL;
        }
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    match runtime.block_on(run_bot(settings, cli.once, interrupted.clone())) {
        Ok(()) => {
            if interrupted.load(Ordering::SeqCst) {
                EXIT_INTERRUPTED
            } else {
                EXIT_OK
            }
        }
        Err(e) => {
            error!(error = %e, "trading bot failed");
            eprintln!("Error: {e}");
            EXIT_FATAL
        }
    }
}

async fn run_bot(
    settings: Settings,
    once: bool,
    interrupted: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let settings = Arc::new(settings);
    let store = Store::open(&settings.database_path)?;
    let journal = Arc::new(TradeJournal::open("logs")?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("shutdown signal received");
                interrupted.store(true, Ordering::SeqCst);
                let _ = shutdown_tx.send(true);
            }
        });
    }

    let bot = TradingBot::new(settings, store, journal, shutdown_rx);
    bot.initialize().await?;

    let result = if once {
        bot.run_once().await
    } else {
        info!("trading bot running; press Ctrl+C to stop");
        bot.run_scheduled().await
    };

    bot.shutdown().await.ok();
    result?;
    Ok(())
}

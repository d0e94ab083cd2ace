// =============================================================================
// SQLite store — single ACID home for every persisted entity
// =============================================================================
//
// One connection behind an async mutex; WAL journaling; schema created with
// CREATE TABLE IF NOT EXISTS at startup. Decimal values are stored as TEXT
// (canonical renderings round-trip exactly), timestamps as RFC 3339 TEXT,
// dates as ISO dates.
//
// The orchestrator is the only writer of signals / positions / orders /
// trading_state. Multi-row trade transitions commit inside a single
// transaction (see trading.rs).
// =============================================================================

pub mod market;
pub mod trading;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::types::Market;

pub use market::{CandidateRow, DailyBar, StockRow};
pub use trading::{OrderRow, PositionRow, SignalRow};

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        Self::init_schema(&conn)?;
        info!(path, "store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests and backtests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS stocks (
                id INTEGER PRIMARY KEY,
                symbol TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                market TEXT NOT NULL,
                sector TEXT,
                industry TEXT,
                shares_outstanding INTEGER,
                institutional_ownership TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_stocks_market ON stocks(market);

            CREATE TABLE IF NOT EXISTS daily_prices (
                id INTEGER PRIMARY KEY,
                stock_id INTEGER NOT NULL REFERENCES stocks(id),
                date TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume INTEGER NOT NULL,
                UNIQUE (stock_id, date)
            );
            CREATE INDEX IF NOT EXISTS idx_daily_prices_stock_date
                ON daily_prices(stock_id, date DESC);

            CREATE TABLE IF NOT EXISTS fundamentals (
                id INTEGER PRIMARY KEY,
                stock_id INTEGER NOT NULL REFERENCES stocks(id),
                fiscal_year INTEGER NOT NULL,
                fiscal_quarter INTEGER,
                revenue TEXT,
                net_income TEXT,
                eps TEXT,
                total_equity TEXT,
                roe TEXT,
                UNIQUE (stock_id, fiscal_year, fiscal_quarter)
            );

            CREATE TABLE IF NOT EXISTS canslim_scores (
                id INTEGER PRIMARY KEY,
                stock_id INTEGER NOT NULL REFERENCES stocks(id),
                date TEXT NOT NULL,
                total_score INTEGER NOT NULL DEFAULT 0,
                rs_rating INTEGER,
                is_candidate INTEGER NOT NULL DEFAULT 0,
                UNIQUE (stock_id, date)
            );
            CREATE INDEX IF NOT EXISTS idx_canslim_date ON canslim_scores(date DESC);

            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY,
                stock_id INTEGER NOT NULL REFERENCES stocks(id),
                timestamp TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                system INTEGER,
                price TEXT NOT NULL,
                atr_n TEXT,
                is_executed INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_signals_stock ON signals(stock_id, timestamp DESC);

            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY,
                stock_id INTEGER NOT NULL REFERENCES stocks(id),
                entry_date TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                entry_system INTEGER,
                quantity INTEGER NOT NULL,
                units INTEGER NOT NULL DEFAULT 1,
                stop_loss_price TEXT,
                stop_loss_type TEXT,
                status TEXT NOT NULL DEFAULT 'OPEN',
                exit_date TEXT,
                exit_price TEXT,
                exit_reason TEXT,
                pnl TEXT,
                pnl_percent TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);
            CREATE INDEX IF NOT EXISTS idx_positions_stock ON positions(stock_id, entry_date DESC);

            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY,
                position_id INTEGER REFERENCES positions(id),
                stock_id INTEGER NOT NULL REFERENCES stocks(id),
                side TEXT NOT NULL,
                method TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price TEXT,
                status TEXT NOT NULL DEFAULT 'PENDING',
                filled_quantity INTEGER NOT NULL DEFAULT 0,
                filled_price TEXT,
                broker_order_id TEXT,
                created_at TEXT NOT NULL,
                filled_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_orders_stock ON orders(stock_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS trading_state (
                market TEXT PRIMARY KEY,
                is_active INTEGER NOT NULL DEFAULT 0,
                heartbeat_at TEXT
            );",
        )
    }

    // -------------------------------------------------------------------------
    // Trading state (cross-process liveness)
    // -------------------------------------------------------------------------

    /// Mark a market's orchestrator active or inactive.
    pub async fn set_active(&self, market: Market, active: bool) -> Result<()> {
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO trading_state (market, is_active, heartbeat_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (market) DO UPDATE SET is_active = excluded.is_active",
            rusqlite::params![market.as_str(), active as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn is_active(&self, market: Market) -> Result<bool> {
        let conn = self.lock().await;
        let mut stmt =
            conn.prepare_cached("SELECT is_active FROM trading_state WHERE market = ?1")?;
        let mut rows = stmt.query([market.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(row.get::<_, i64>(0)? != 0),
            None => Ok(false),
        }
    }

    /// Refresh the liveness heartbeat. Readers may observe up to 30 s of
    /// staleness.
    pub async fn touch_heartbeat(&self, market: Market) -> Result<()> {
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO trading_state (market, is_active, heartbeat_at)
             VALUES (?1, 1, ?2)
             ON CONFLICT (market) DO UPDATE SET heartbeat_at = excluded.heartbeat_at",
            rusqlite::params![market.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn heartbeat_at(&self, market: Market) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock().await;
        let mut stmt =
            conn.prepare_cached("SELECT heartbeat_at FROM trading_state WHERE market = ?1")?;
        let mut rows = stmt.query([market.as_str()])?;
        match rows.next()? {
            Some(row) => {
                let raw: Option<String> = row.get(0)?;
                Ok(raw
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|dt| dt.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trading_state_roundtrip() {
        let store = Store::open_in_memory().unwrap();

        assert!(!store.is_active(Market::Krx).await.unwrap());

        store.set_active(Market::Krx, true).await.unwrap();
        assert!(store.is_active(Market::Krx).await.unwrap());
        assert!(!store.is_active(Market::Us).await.unwrap());

        store.set_active(Market::Krx, false).await.unwrap();
        assert!(!store.is_active(Market::Krx).await.unwrap());
    }

    #[tokio::test]
    async fn heartbeat_updates() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.heartbeat_at(Market::Us).await.unwrap().is_none());

        store.touch_heartbeat(Market::Us).await.unwrap();
        let hb = store.heartbeat_at(Market::Us).await.unwrap().unwrap();
        assert!((Utc::now() - hb).num_seconds() < 5);
        // touch on a fresh row also marks the market active
        assert!(store.is_active(Market::Us).await.unwrap());
    }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.lock().await;
        // Re-running the schema must not fail.
        Store::init_schema(&conn).unwrap();
    }
}

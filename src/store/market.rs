// =============================================================================
// Market-data side of the store: stocks, daily bars, scores, fundamentals
// =============================================================================
//
// Read-only from the trading core's perspective; the ingestion and screening
// pipelines own the writes. Insert helpers exist for those pipelines, for
// backtests, and for test fixtures.
// =============================================================================

use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use rusqlite::params;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::types::{Market, Venue};

use super::Store;

/// One stock row. The trading core reads symbol, name, market tag, and
/// sector; the screener's institutional fields ride along opaquely.
#[derive(Debug, Clone)]
pub struct StockRow {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub venue: Venue,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub shares_outstanding: Option<i64>,
    pub institutional_ownership: Option<Decimal>,
    pub is_active: bool,
}

impl StockRow {
    pub fn market(&self) -> Market {
        self.venue.market()
    }
}

/// One daily OHLCV bar. Append-only, unique per (stock, date).
#[derive(Debug, Clone, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

/// A screener candidate for a given day.
#[derive(Debug, Clone)]
pub struct CandidateRow {
    pub stock_id: i64,
    pub total_score: i64,
    pub rs_rating: Option<i64>,
}

fn venues_for(market: Market) -> [&'static str; 2] {
    match market {
        Market::Krx => ["KOSPI", "KOSDAQ"],
        Market::Us => ["NYSE", "NASDAQ"],
    }
}

pub(crate) fn decimal_from_sql(raw: String) -> rusqlite::Result<Decimal> {
    Decimal::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

fn row_to_stock(row: &rusqlite::Row<'_>) -> rusqlite::Result<StockRow> {
    let venue_raw: String = row.get("market")?;
    let venue = Venue::parse(&venue_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown venue: {venue_raw}").into(),
        )
    })?;
    let inst: Option<String> = row.get("institutional_ownership")?;
    Ok(StockRow {
        id: row.get("id")?,
        symbol: row.get("symbol")?,
        name: row.get("name")?,
        venue,
        sector: row.get("sector")?,
        industry: row.get("industry")?,
        shares_outstanding: row.get("shares_outstanding")?,
        institutional_ownership: inst.map(decimal_from_sql).transpose()?,
        is_active: row.get::<_, i64>("is_active")? != 0,
    })
}

impl Store {
    // -------------------------------------------------------------------------
    // Stocks
    // -------------------------------------------------------------------------

    pub async fn insert_stock(
        &self,
        symbol: &str,
        name: &str,
        venue: Venue,
        sector: Option<&str>,
    ) -> Result<i64> {
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO stocks (symbol, name, market, sector, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (symbol) DO NOTHING",
            params![symbol, name, venue.as_str(), sector, Utc::now().to_rfc3339()],
        )?;
        let mut stmt = conn.prepare_cached("SELECT id FROM stocks WHERE symbol = ?1")?;
        let id: i64 = stmt.query_row([symbol], |row| row.get(0))?;
        Ok(id)
    }

    pub async fn get_stock(&self, stock_id: i64) -> Result<Option<StockRow>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare_cached("SELECT * FROM stocks WHERE id = ?1")?;
        let mut rows = stmt.query([stock_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_stock(row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_stock_by_symbol(&self, symbol: &str) -> Result<Option<StockRow>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare_cached("SELECT * FROM stocks WHERE symbol = ?1")?;
        let mut rows = stmt.query([symbol])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_stock(row)?)),
            None => Ok(None),
        }
    }

    pub async fn active_stocks(&self, market: Market) -> Result<Vec<StockRow>> {
        let conn = self.lock().await;
        let [v1, v2] = venues_for(market);
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM stocks WHERE is_active = 1 AND market IN (?1, ?2) ORDER BY symbol",
        )?;
        let rows = stmt.query_map([v1, v2], row_to_stock)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -------------------------------------------------------------------------
    // Daily prices
    // -------------------------------------------------------------------------

    /// Append-only upsert; duplicate (stock, date) rows are ignored. Returns
    /// the number of rows actually inserted.
    pub async fn insert_daily_bars(&self, stock_id: i64, bars: &[DailyBar]) -> Result<usize> {
        let mut conn = self.lock().await;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO daily_prices (stock_id, date, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (stock_id, date) DO NOTHING",
            )?;
            for bar in bars {
                inserted += stmt.execute(params![
                    stock_id,
                    bar.date.to_string(),
                    bar.open.to_string(),
                    bar.high.to_string(),
                    bar.low.to_string(),
                    bar.close.to_string(),
                    bar.volume,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Last `days` bars ascending by date.
    pub async fn get_period(&self, stock_id: i64, days: usize) -> Result<Vec<DailyBar>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT date, open, high, low, close, volume FROM daily_prices
             WHERE stock_id = ?1 ORDER BY date DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![stock_id, days as i64], |row| {
            let date_raw: String = row.get(0)?;
            let date = NaiveDate::from_str(&date_raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Ok(DailyBar {
                date,
                open: decimal_from_sql(row.get(1)?)?,
                high: decimal_from_sql(row.get(2)?)?,
                low: decimal_from_sql(row.get(3)?)?,
                close: decimal_from_sql(row.get(4)?)?,
                volume: row.get(5)?,
            })
        })?;
        let mut bars = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        bars.reverse();
        Ok(bars)
    }

    pub async fn bar_count(&self, stock_id: i64) -> Result<usize> {
        let conn = self.lock().await;
        let mut stmt =
            conn.prepare_cached("SELECT COUNT(*) FROM daily_prices WHERE stock_id = ?1")?;
        let count: i64 = stmt.query_row([stock_id], |row| row.get(0))?;
        Ok(count as usize)
    }

    // -------------------------------------------------------------------------
    // Fundamentals (freshness only — the screener owns the content)
    // -------------------------------------------------------------------------

    pub async fn upsert_fundamental(
        &self,
        stock_id: i64,
        fiscal_year: i32,
        fiscal_quarter: Option<i32>,
        eps: Option<Decimal>,
        roe: Option<Decimal>,
    ) -> Result<()> {
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO fundamentals (stock_id, fiscal_year, fiscal_quarter, eps, roe)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (stock_id, fiscal_year, fiscal_quarter) DO UPDATE
             SET eps = excluded.eps, roe = excluded.roe",
            params![
                stock_id,
                fiscal_year,
                fiscal_quarter,
                eps.map(|d| d.to_string()),
                roe.map(|d| d.to_string()),
            ],
        )?;
        Ok(())
    }

    /// Most recent (year, quarter) on file, for data-freshness checks.
    pub async fn get_latest_period(&self) -> Result<Option<(i32, Option<i32>)>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT fiscal_year, fiscal_quarter FROM fundamentals
             ORDER BY fiscal_year DESC, fiscal_quarter DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
            None => Ok(None),
        }
    }

    // -------------------------------------------------------------------------
    // CANSLIM scores
    // -------------------------------------------------------------------------

    pub async fn upsert_canslim_score(
        &self,
        stock_id: i64,
        date: NaiveDate,
        total_score: i64,
        rs_rating: Option<i64>,
        is_candidate: bool,
    ) -> Result<()> {
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO canslim_scores (stock_id, date, total_score, rs_rating, is_candidate)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (stock_id, date) DO UPDATE
             SET total_score = excluded.total_score,
                 rs_rating = excluded.rs_rating,
                 is_candidate = excluded.is_candidate",
            params![
                stock_id,
                date.to_string(),
                total_score,
                rs_rating,
                is_candidate as i64,
            ],
        )?;
        Ok(())
    }

    /// Today's candidates with at least `min_score`, filtered by market,
    /// strongest first. "Today" is the latest score date on file.
    pub async fn get_candidates(
        &self,
        min_score: i64,
        market: Market,
    ) -> Result<Vec<CandidateRow>> {
        let conn = self.lock().await;
        let [v1, v2] = venues_for(market);
        let mut stmt = conn.prepare_cached(
            "SELECT c.stock_id, c.total_score, c.rs_rating
             FROM canslim_scores c
             JOIN stocks s ON s.id = c.stock_id
             WHERE c.is_candidate = 1
               AND c.total_score >= ?1
               AND s.market IN (?2, ?3)
               AND c.date = (SELECT MAX(date) FROM canslim_scores)
             ORDER BY c.total_score DESC, c.rs_rating DESC",
        )?;
        let rows = stmt.query_map(params![min_score, v1, v2], |row| {
            Ok(CandidateRow {
                stock_id: row.get(0)?,
                total_score: row.get(1)?,
                rs_rating: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

// =============================================================================
// Trading side of the store: signals, positions, orders
// =============================================================================
//
// Plain reads and single-row writes live alongside three composite fill
// transitions (entry / pyramid / exit). Each transition mutates an order, a
// position, and a signal's executed flag inside ONE transaction so a crash
// can never leave a fill half-recorded.
// =============================================================================

use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};
use rust_decimal::Decimal;

use crate::error::{Result, TradingError};
use crate::types::{OrderMethod, OrderStatus, PositionStatus, Side, SignalKind, StopLossKind};

use super::market::decimal_from_sql;
use super::Store;

#[derive(Debug, Clone)]
pub struct SignalRow {
    pub id: i64,
    pub stock_id: i64,
    pub timestamp: DateTime<Utc>,
    pub kind: SignalKind,
    pub system: Option<u8>,
    pub price: Decimal,
    pub atr_n: Option<Decimal>,
    pub is_executed: bool,
}

#[derive(Debug, Clone)]
pub struct PositionRow {
    pub id: i64,
    pub stock_id: i64,
    pub entry_date: DateTime<Utc>,
    /// Quantity-weighted average across all fills.
    pub entry_price: Decimal,
    pub entry_system: Option<u8>,
    pub quantity: u64,
    pub units: u32,
    pub stop_loss_price: Option<Decimal>,
    pub stop_loss_kind: Option<StopLossKind>,
    pub status: PositionStatus,
    pub exit_date: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<String>,
    pub pnl: Option<Decimal>,
    pub pnl_percent: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct OrderRow {
    pub id: i64,
    pub position_id: Option<i64>,
    pub stock_id: i64,
    pub side: Side,
    pub method: OrderMethod,
    pub quantity: u64,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: u64,
    pub filled_price: Option<Decimal>,
    pub broker_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

fn parse_ts(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn parse_enum<T>(raw: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown enum value: {raw}").into(),
        )
    })
}

fn row_to_position(row: &rusqlite::Row<'_>) -> rusqlite::Result<PositionRow> {
    let stop_raw: Option<String> = row.get("stop_loss_price")?;
    let stop_kind_raw: Option<String> = row.get("stop_loss_type")?;
    let exit_date_raw: Option<String> = row.get("exit_date")?;
    let exit_price_raw: Option<String> = row.get("exit_price")?;
    let pnl_raw: Option<String> = row.get("pnl")?;
    let pnl_pct_raw: Option<String> = row.get("pnl_percent")?;
    let system: Option<i64> = row.get("entry_system")?;

    Ok(PositionRow {
        id: row.get("id")?,
        stock_id: row.get("stock_id")?,
        entry_date: parse_ts(row.get("entry_date")?)?,
        entry_price: decimal_from_sql(row.get("entry_price")?)?,
        entry_system: system.map(|s| s as u8),
        quantity: row.get::<_, i64>("quantity")? as u64,
        units: row.get::<_, i64>("units")? as u32,
        stop_loss_price: stop_raw.map(decimal_from_sql).transpose()?,
        stop_loss_kind: stop_kind_raw
            .map(|s| parse_enum(s, StopLossKind::parse))
            .transpose()?,
        status: parse_enum(row.get("status")?, PositionStatus::parse)?,
        exit_date: exit_date_raw.map(parse_ts).transpose()?,
        exit_price: exit_price_raw.map(decimal_from_sql).transpose()?,
        exit_reason: row.get("exit_reason")?,
        pnl: pnl_raw.map(decimal_from_sql).transpose()?,
        pnl_percent: pnl_pct_raw.map(decimal_from_sql).transpose()?,
    })
}

fn row_to_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrderRow> {
    let price_raw: Option<String> = row.get("price")?;
    let filled_price_raw: Option<String> = row.get("filled_price")?;
    let filled_at_raw: Option<String> = row.get("filled_at")?;
    Ok(OrderRow {
        id: row.get("id")?,
        position_id: row.get("position_id")?,
        stock_id: row.get("stock_id")?,
        side: parse_enum(row.get("side")?, Side::parse)?,
        method: parse_enum(row.get("method")?, OrderMethod::parse)?,
        quantity: row.get::<_, i64>("quantity")? as u64,
        price: price_raw.map(decimal_from_sql).transpose()?,
        status: parse_enum(row.get("status")?, OrderStatus::parse)?,
        filled_quantity: row.get::<_, i64>("filled_quantity")? as u64,
        filled_price: filled_price_raw.map(decimal_from_sql).transpose()?,
        broker_order_id: row.get("broker_order_id")?,
        created_at: parse_ts(row.get("created_at")?)?,
        filled_at: filled_at_raw.map(parse_ts).transpose()?,
    })
}

fn row_to_signal(row: &rusqlite::Row<'_>) -> rusqlite::Result<SignalRow> {
    let atr_raw: Option<String> = row.get("atr_n")?;
    let system: Option<i64> = row.get("system")?;
    Ok(SignalRow {
        id: row.get("id")?,
        stock_id: row.get("stock_id")?,
        timestamp: parse_ts(row.get("timestamp")?)?,
        kind: parse_enum(row.get("signal_type")?, SignalKind::parse)?,
        system: system.map(|s| s as u8),
        price: decimal_from_sql(row.get("price")?)?,
        atr_n: atr_raw.map(decimal_from_sql).transpose()?,
        is_executed: row.get::<_, i64>("is_executed")? != 0,
    })
}

impl Store {
    // -------------------------------------------------------------------------
    // Signals
    // -------------------------------------------------------------------------

    /// Write-once signal row. Duplicates across adjacent cycles are cheap and
    /// acceptable; only orders and positions must not double-execute.
    pub async fn create_signal(
        &self,
        stock_id: i64,
        kind: SignalKind,
        system: Option<u8>,
        price: Decimal,
        atr_n: Option<Decimal>,
    ) -> Result<i64> {
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO signals (stock_id, timestamp, signal_type, system, price, atr_n)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stock_id,
                Utc::now().to_rfc3339(),
                kind.as_str(),
                system.map(|s| s as i64),
                price.to_string(),
                atr_n.map(|a| a.to_string()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn recent_signals(&self, limit: usize) -> Result<Vec<SignalRow>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM signals ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], row_to_signal)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -------------------------------------------------------------------------
    // Positions (reads)
    // -------------------------------------------------------------------------

    pub async fn open_positions(&self) -> Result<Vec<PositionRow>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM positions WHERE status = 'OPEN' ORDER BY entry_date",
        )?;
        let rows = stmt.query_map([], row_to_position)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Open positions restricted to one market, joined through stocks.
    pub async fn open_positions_for_market(
        &self,
        market: crate::types::Market,
    ) -> Result<Vec<PositionRow>> {
        let venues = match market {
            crate::types::Market::Krx => ["KOSPI", "KOSDAQ"],
            crate::types::Market::Us => ["NYSE", "NASDAQ"],
        };
        let conn = self.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT p.* FROM positions p JOIN stocks s ON s.id = p.stock_id
             WHERE p.status = 'OPEN' AND s.market IN (?1, ?2) ORDER BY p.entry_date",
        )?;
        let rows = stmt.query_map([venues[0], venues[1]], row_to_position)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Latest OPEN position for a stock (at most one exists by invariant).
    pub async fn open_position_by_stock(&self, stock_id: i64) -> Result<Option<PositionRow>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM positions WHERE stock_id = ?1 AND status = 'OPEN'
             ORDER BY entry_date DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([stock_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_position(row)?)),
            None => Ok(None),
        }
    }

    pub async fn closed_positions(&self) -> Result<Vec<PositionRow>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM positions WHERE status = 'CLOSED' ORDER BY exit_date",
        )?;
        let rows = stmt.query_map([], row_to_position)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Most recent CLOSED System-1 position for a stock. Feeds the
    /// previous-S1-winner filter; `None` when the stock has never completed
    /// an S1 trade.
    pub async fn last_closed_s1_position(&self, stock_id: i64) -> Result<Option<PositionRow>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM positions
             WHERE stock_id = ?1 AND status = 'CLOSED' AND entry_system = 1
             ORDER BY exit_date DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([stock_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_position(row)?)),
            None => Ok(None),
        }
    }

    /// Sum of units over OPEN positions.
    pub async fn total_open_units(&self) -> Result<u32> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT COALESCE(SUM(units), 0) FROM positions WHERE status = 'OPEN'",
        )?;
        let total: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(total as u32)
    }

    /// (stock_id, units, sector) for every OPEN position, for unit-cap
    /// accounting.
    pub async fn open_position_units(&self) -> Result<Vec<(i64, u32, Option<String>)>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT p.stock_id, p.units, s.sector
             FROM positions p JOIN stocks s ON s.id = p.stock_id
             WHERE p.status = 'OPEN'",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)? as u32,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// New PENDING order row, written before the broker call so a crash
    /// leaves evidence of the attempt.
    pub async fn create_order(
        &self,
        stock_id: i64,
        position_id: Option<i64>,
        side: Side,
        method: OrderMethod,
        quantity: u64,
        price: Option<Decimal>,
    ) -> Result<i64> {
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO orders (position_id, stock_id, side, method, quantity, price, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                position_id,
                stock_id,
                side.as_str(),
                method.as_str(),
                quantity as i64,
                price.map(|p| p.to_string()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn get_order(&self, order_id: i64) -> Result<Option<OrderRow>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare_cached("SELECT * FROM orders WHERE id = ?1")?;
        let mut rows = stmt.query([order_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_order(row)?)),
            None => Ok(None),
        }
    }

    /// PENDING -> FAILED. Used when the broker rejects or errors.
    pub async fn fail_order(&self, order_id: i64) -> Result<()> {
        let conn = self.lock().await;
        conn.execute(
            "UPDATE orders SET status = 'FAILED' WHERE id = ?1",
            [order_id],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Composite fill transitions (single-transaction boundaries)
    // -------------------------------------------------------------------------

    /// Entry fill: order FILLED + new OPEN position + signal executed, in one
    /// transaction. Returns the new position id.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_entry_fill(
        &self,
        order_id: i64,
        broker_order_id: Option<&str>,
        signal_id: Option<i64>,
        stock_id: i64,
        quantity: u64,
        filled_price: Decimal,
        entry_system: Option<u8>,
        stop_loss_price: Decimal,
        stop_loss_kind: StopLossKind,
    ) -> Result<i64> {
        let mut conn = self.lock().await;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        fill_order(&tx, order_id, broker_order_id, quantity, filled_price, &now)?;

        tx.execute(
            "INSERT INTO positions
               (stock_id, entry_date, entry_price, entry_system, quantity, units,
                stop_loss_price, stop_loss_type, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, 'OPEN')",
            params![
                stock_id,
                now,
                filled_price.to_string(),
                entry_system.map(|s| s as i64),
                quantity as i64,
                stop_loss_price.to_string(),
                stop_loss_kind.as_str(),
            ],
        )?;
        let position_id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE orders SET position_id = ?1 WHERE id = ?2",
            params![position_id, order_id],
        )?;
        mark_signal_executed(&tx, signal_id)?;

        tx.commit()?;
        Ok(position_id)
    }

    /// Pyramid fill: order FILLED + quantity/average/units update + the new
    /// unified stop + signal executed, in one transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_pyramid_fill(
        &self,
        order_id: i64,
        broker_order_id: Option<&str>,
        signal_id: Option<i64>,
        position_id: i64,
        additional_quantity: u64,
        filled_price: Decimal,
        new_stop_loss: Option<Decimal>,
    ) -> Result<PositionRow> {
        let mut conn = self.lock().await;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        fill_order(
            &tx,
            order_id,
            broker_order_id,
            additional_quantity,
            filled_price,
            &now,
        )?;

        let position = {
            let mut stmt = tx.prepare_cached("SELECT * FROM positions WHERE id = ?1")?;
            let mut rows = stmt.query([position_id])?;
            match rows.next()? {
                Some(row) => row_to_position(row)?,
                None => return Err(TradingError::PositionNotFound(position_id.to_string())),
            }
        };

        // Weighted-average invariant: entry_price * quantity equals the sum
        // of fill costs across all units.
        let total_cost = position.entry_price * Decimal::from(position.quantity)
            + filled_price * Decimal::from(additional_quantity);
        let new_quantity = position.quantity + additional_quantity;
        let new_avg = total_cost / Decimal::from(new_quantity);

        tx.execute(
            "UPDATE positions
             SET quantity = ?1,
                 entry_price = ?2,
                 units = units + 1,
                 stop_loss_price = COALESCE(?3, stop_loss_price)
             WHERE id = ?4",
            params![
                new_quantity as i64,
                new_avg.to_string(),
                new_stop_loss.map(|s| s.to_string()),
                position_id,
            ],
        )?;
        mark_signal_executed(&tx, signal_id)?;

        let updated = {
            let mut stmt = tx.prepare_cached("SELECT * FROM positions WHERE id = ?1")?;
            stmt.query_row([position_id], row_to_position)?
        };

        tx.commit()?;
        Ok(updated)
    }

    /// Exit fill: order FILLED + position CLOSED with realized P&L + signal
    /// executed, in one transaction. Returns the closed position.
    pub async fn record_exit_fill(
        &self,
        order_id: i64,
        broker_order_id: Option<&str>,
        signal_id: Option<i64>,
        position_id: i64,
        exit_price: Decimal,
        exit_reason: &str,
    ) -> Result<PositionRow> {
        let mut conn = self.lock().await;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let position = {
            let mut stmt = tx.prepare_cached("SELECT * FROM positions WHERE id = ?1")?;
            let mut rows = stmt.query([position_id])?;
            match rows.next()? {
                Some(row) => row_to_position(row)?,
                None => return Err(TradingError::PositionNotFound(position_id.to_string())),
            }
        };

        fill_order(
            &tx,
            order_id,
            broker_order_id,
            position.quantity,
            exit_price,
            &now,
        )?;

        let pnl = (exit_price - position.entry_price) * Decimal::from(position.quantity);
        let pnl_percent = if position.entry_price > Decimal::ZERO {
            (exit_price - position.entry_price) / position.entry_price
        } else {
            Decimal::ZERO
        };

        tx.execute(
            "UPDATE positions
             SET status = 'CLOSED', exit_date = ?1, exit_price = ?2, exit_reason = ?3,
                 pnl = ?4, pnl_percent = ?5
             WHERE id = ?6",
            params![
                now,
                exit_price.to_string(),
                exit_reason,
                pnl.to_string(),
                pnl_percent.to_string(),
                position_id,
            ],
        )?;
        mark_signal_executed(&tx, signal_id)?;

        let closed = {
            let mut stmt = tx.prepare_cached("SELECT * FROM positions WHERE id = ?1")?;
            stmt.query_row([position_id], row_to_position)?
        };

        tx.commit()?;
        Ok(closed)
    }
}

fn fill_order(
    tx: &Transaction<'_>,
    order_id: i64,
    broker_order_id: Option<&str>,
    filled_quantity: u64,
    filled_price: Decimal,
    now: &str,
) -> rusqlite::Result<usize> {
    tx.execute(
        "UPDATE orders
         SET status = 'FILLED', broker_order_id = ?1, filled_quantity = ?2,
             filled_price = ?3, filled_at = ?4
         WHERE id = ?5",
        params![
            broker_order_id,
            filled_quantity as i64,
            filled_price.to_string(),
            now,
            order_id,
        ],
    )
}

fn mark_signal_executed(tx: &Transaction<'_>, signal_id: Option<i64>) -> rusqlite::Result<()> {
    if let Some(id) = signal_id {
        tx.execute("UPDATE signals SET is_executed = 1 WHERE id = ?1", [id])?;
    }
    Ok(())
}

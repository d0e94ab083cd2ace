// =============================================================================
// Order manager — turns signals into broker orders and store transitions
// =============================================================================
//
// Three paths: entry, pyramid, exit. Entries and pyramids pass a slippage
// guard and the unit caps before any money moves; exits skip both because
// getting out always takes priority over price.
//
// Every path follows the same discipline: write a PENDING order row, call
// the broker, then commit the fill (order + position + signal flag) in one
// store transaction — or mark the order FAILED. Structured rejections come
// back as an unsuccessful ExecutionResult; broker and store failures
// propagate as errors for the cycle loop to log.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::broker::Broker;
use crate::config::Settings;
use crate::error::{Result, TradingError};
use crate::journal::{JournalEvent, TradeJournal};
use crate::risk::{PositionSizer, UnitLimitManager};
use crate::signals::TurtleSignal;
use crate::store::Store;
use crate::types::{OrderMethod, Side};

use super::performance::PerformanceTracker;

/// Outcome of one signal execution. Exit metadata is populated only on
/// successful exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub quantity: u64,
    pub filled_price: Option<Decimal>,
    pub message: String,

    pub entry_price: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub pnl_percent: Option<Decimal>,
    pub holding_days: Option<i64>,
    pub win_rate: Option<Decimal>,
    pub total_trades: Option<usize>,
}

impl ExecutionResult {
    fn rejected(symbol: &str, side: Side, message: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            symbol: symbol.to_string(),
            side,
            quantity: 0,
            filled_price: None,
            message: message.into(),
            entry_price: None,
            pnl: None,
            pnl_percent: None,
            holding_days: None,
            win_rate: None,
            total_trades: None,
        }
    }
}

pub struct OrderManager {
    broker: Arc<dyn Broker>,
    store: Store,
    sizer: PositionSizer,
    units: UnitLimitManager,
    journal: Option<Arc<TradeJournal>>,
    max_entry_slippage: Decimal,
    stop_atr_multiplier: Decimal,
    stop_max_percent: Decimal,
}

impl OrderManager {
    pub fn new(
        settings: &Settings,
        broker: Arc<dyn Broker>,
        store: Store,
        journal: Option<Arc<TradeJournal>>,
    ) -> Self {
        Self {
            sizer: PositionSizer::new(&settings.risk),
            units: UnitLimitManager::new(&settings.risk, store.clone()),
            broker,
            store,
            journal,
            max_entry_slippage: settings.risk.max_entry_slippage_pct,
            stop_atr_multiplier: settings.risk.stop_loss_atr_multiplier,
            stop_max_percent: settings.risk.stop_loss_max_percent,
        }
    }

    /// Dispatch on the signal variant.
    pub async fn process_signal(&self, signal: &TurtleSignal) -> Result<ExecutionResult> {
        if signal.kind.is_entry() {
            self.execute_entry(signal).await
        } else if signal.kind.is_exit() {
            self.execute_exit(signal).await
        } else {
            self.execute_pyramid(signal).await
        }
    }

    // -------------------------------------------------------------------------
    // Entry
    // -------------------------------------------------------------------------

    pub async fn execute_entry(&self, signal: &TurtleSignal) -> Result<ExecutionResult> {
        info!(
            symbol = %signal.symbol,
            signal_type = %signal.kind,
            price = %signal.price,
            breakout_level = ?signal.breakout_level,
            "entry execution start"
        );

        if let Some(reason) = self.entry_slippage_violation(signal) {
            warn!(symbol = %signal.symbol, reason = %reason, "entry slippage rejected");
            return Ok(ExecutionResult::rejected(&signal.symbol, Side::Buy, reason));
        }

        let stock = self.store.get_stock(signal.stock_id).await?;
        let sector = stock.as_ref().and_then(|s| s.sector.clone());
        let market_tag = stock
            .as_ref()
            .map(|s| s.market().to_string())
            .unwrap_or_default();

        let check = self
            .units
            .can_add_unit(signal.stock_id, sector.as_deref())
            .await?;
        if !check.can_add {
            warn!(symbol = %signal.symbol, reason = %check.reason, "unit limit blocked");
            return Ok(ExecutionResult::rejected(
                &signal.symbol,
                Side::Buy,
                check.reason,
            ));
        }

        let balance = self.broker.get_balance().await?;
        let Some(mut sized) = self
            .sizer
            .size_position(balance.total_value, signal.price, signal.atr_n)
        else {
            return Ok(ExecutionResult::rejected(
                &signal.symbol,
                Side::Buy,
                "position sizing failed (non-positive stop distance)",
            ));
        };

        info!(
            symbol = %signal.symbol,
            account_value = %balance.total_value,
            buying_power = %balance.buying_power,
            entry_price = %signal.price,
            atr_n = %signal.atr_n,
            calculated_qty = sized.quantity,
            position_value = %sized.position_value,
            risk_amount = %sized.risk_amount,
            stop_loss = %sized.stop_loss_price,
            stop_loss_type = %sized.stop_loss_kind,
            "entry position sizing"
        );

        let required = signal.price * Decimal::from(sized.quantity);
        if required > balance.buying_power {
            let affordable = (balance.buying_power / signal.price)
                .trunc()
                .to_u64()
                .unwrap_or(0);
            if affordable < 1 {
                warn!(
                    symbol = %signal.symbol,
                    required = %required,
                    available = %balance.buying_power,
                    "entry rejected: insufficient funds"
                );
                return Err(TradingError::InsufficientFunds {
                    required,
                    available: balance.buying_power,
                });
            }
            info!(
                symbol = %signal.symbol,
                original_qty = sized.quantity,
                reduced_qty = affordable,
                "entry quantity reduced to buying power"
            );
            sized.quantity = affordable;
        }

        let order_id = self
            .store
            .create_order(
                signal.stock_id,
                None,
                Side::Buy,
                OrderMethod::Market,
                sized.quantity,
                None,
            )
            .await?;

        let response = match self.broker.buy_market(&signal.symbol, sized.quantity).await {
            Ok(response) => response,
            Err(e) => {
                self.store.fail_order(order_id).await?;
                return Err(e);
            }
        };

        if !response.success {
            self.store.fail_order(order_id).await?;
            return Ok(ExecutionResult {
                quantity: sized.quantity,
                ..ExecutionResult::rejected(&signal.symbol, Side::Buy, response.message)
            });
        }

        let filled_price = self
            .actual_fill_price(response.order_id.as_deref(), signal.price)
            .await;

        let slippage = signal
            .breakout_level
            .filter(|level| *level > Decimal::ZERO)
            .map(|level| (filled_price - level) / level);

        // Effective stop anchored to the actual fill, not the signal price.
        let stop_2n = filled_price - signal.atr_n * self.stop_atr_multiplier;
        let stop_pct = filled_price * (Decimal::ONE - self.stop_max_percent);
        let effective_stop = stop_2n.max(stop_pct);

        let position_id = self
            .store
            .record_entry_fill(
                order_id,
                response.order_id.as_deref(),
                signal.signal_id,
                signal.stock_id,
                sized.quantity,
                filled_price,
                signal.system,
                effective_stop,
                sized.stop_loss_kind,
            )
            .await?;

        info!(
            symbol = %signal.symbol,
            position_id,
            order_id = response.order_id.as_deref().unwrap_or(""),
            quantity = sized.quantity,
            signal_price = %signal.price,
            filled_price = %filled_price,
            actual_slippage_pct = ?slippage,
            stop_loss = %effective_stop,
            system = ?signal.system,
            "position opened"
        );

        if let Some(journal) = &self.journal {
            journal.record(&JournalEvent::EntryFilled {
                timestamp: Utc::now(),
                symbol: signal.symbol.clone(),
                name: signal.name.clone(),
                market: market_tag,
                system: signal.system,
                entry_price: filled_price,
                breakout_level: signal.breakout_level,
                quantity: sized.quantity,
                position_value: filled_price * Decimal::from(sized.quantity),
                stop_loss: effective_stop,
                stop_loss_type: sized.stop_loss_kind.to_string(),
                slippage_pct: slippage,
            });
        }

        Ok(ExecutionResult {
            success: true,
            order_id: response.order_id,
            symbol: signal.symbol.clone(),
            side: Side::Buy,
            quantity: sized.quantity,
            filled_price: Some(filled_price),
            message: "entry order executed".to_string(),
            entry_price: None,
            pnl: None,
            pnl_percent: None,
            holding_days: None,
            win_rate: None,
            total_trades: None,
        })
    }

    // -------------------------------------------------------------------------
    // Pyramid
    // -------------------------------------------------------------------------

    pub async fn execute_pyramid(&self, signal: &TurtleSignal) -> Result<ExecutionResult> {
        info!(
            symbol = %signal.symbol,
            price = %signal.price,
            breakout_level = ?signal.breakout_level,
            "pyramid execution start"
        );

        if let Some(reason) = self.entry_slippage_violation(signal) {
            warn!(symbol = %signal.symbol, reason = %reason, "pyramid slippage rejected");
            return Ok(ExecutionResult::rejected(&signal.symbol, Side::Buy, reason));
        }

        let Some(position) = self.store.open_position_by_stock(signal.stock_id).await? else {
            return Ok(ExecutionResult::rejected(
                &signal.symbol,
                Side::Buy,
                "no open position for pyramiding",
            ));
        };

        let stock = self.store.get_stock(signal.stock_id).await?;
        let sector = stock.as_ref().and_then(|s| s.sector.clone());
        let market_tag = stock
            .as_ref()
            .map(|s| s.market().to_string())
            .unwrap_or_default();

        let check = self
            .units
            .can_add_unit(signal.stock_id, sector.as_deref())
            .await?;
        if !check.can_add {
            warn!(symbol = %signal.symbol, reason = %check.reason, "pyramid unit limit blocked");
            return Ok(ExecutionResult::rejected(
                &signal.symbol,
                Side::Buy,
                check.reason,
            ));
        }

        let balance = self.broker.get_balance().await?;
        let Some(sized) = self
            .sizer
            .size_position(balance.total_value, signal.price, signal.atr_n)
        else {
            return Ok(ExecutionResult::rejected(
                &signal.symbol,
                Side::Buy,
                "position sizing failed (non-positive stop distance)",
            ));
        };

        let required = signal.price * Decimal::from(sized.quantity);
        if required > balance.buying_power {
            // A pyramid is an optional add-on: no quantity reduction, no
            // retry this cycle.
            return Ok(ExecutionResult::rejected(
                &signal.symbol,
                Side::Buy,
                "insufficient funds for pyramiding",
            ));
        }

        let order_id = self
            .store
            .create_order(
                signal.stock_id,
                Some(position.id),
                Side::Buy,
                OrderMethod::Market,
                sized.quantity,
                None,
            )
            .await?;

        let response = match self.broker.buy_market(&signal.symbol, sized.quantity).await {
            Ok(response) => response,
            Err(e) => {
                self.store.fail_order(order_id).await?;
                return Err(e);
            }
        };

        if !response.success {
            self.store.fail_order(order_id).await?;
            return Ok(ExecutionResult {
                quantity: sized.quantity,
                ..ExecutionResult::rejected(&signal.symbol, Side::Buy, response.message)
            });
        }

        let filled_price = self
            .actual_fill_price(response.order_id.as_deref(), signal.price)
            .await;

        let updated = self
            .store
            .record_pyramid_fill(
                order_id,
                response.order_id.as_deref(),
                signal.signal_id,
                position.id,
                sized.quantity,
                filled_price,
                signal.stop_loss,
            )
            .await?;

        info!(
            symbol = %signal.symbol,
            additional_qty = sized.quantity,
            signal_price = %signal.price,
            filled_price = %filled_price,
            new_units = updated.units,
            avg_entry_price = %updated.entry_price,
            new_stop_loss = ?updated.stop_loss_price,
            "pyramid executed"
        );

        if let Some(journal) = &self.journal {
            journal.record(&JournalEvent::PyramidFilled {
                timestamp: Utc::now(),
                symbol: signal.symbol.clone(),
                name: signal.name.clone(),
                market: market_tag,
                price: filled_price,
                additional_quantity: sized.quantity,
                new_units: updated.units,
                avg_entry_price: updated.entry_price,
                new_stop_loss: updated.stop_loss_price,
            });
        }

        Ok(ExecutionResult {
            success: true,
            order_id: response.order_id,
            symbol: signal.symbol.clone(),
            side: Side::Buy,
            quantity: sized.quantity,
            filled_price: Some(filled_price),
            message: format!("pyramid order executed (unit {})", updated.units),
            entry_price: Some(updated.entry_price),
            pnl: None,
            pnl_percent: None,
            holding_days: None,
            win_rate: None,
            total_trades: None,
        })
    }

    // -------------------------------------------------------------------------
    // Exit
    // -------------------------------------------------------------------------

    /// No slippage guard here: exits prioritize execution over price.
    pub async fn execute_exit(&self, signal: &TurtleSignal) -> Result<ExecutionResult> {
        info!(
            symbol = %signal.symbol,
            signal_type = %signal.kind,
            "exit execution start"
        );

        let Some(position) = self.store.open_position_by_stock(signal.stock_id).await? else {
            warn!(
                symbol = %signal.symbol,
                signal_type = %signal.kind,
                "exit signal with no open position"
            );
            return Ok(ExecutionResult::rejected(
                &signal.symbol,
                Side::Sell,
                "no open position found",
            ));
        };

        let order_id = self
            .store
            .create_order(
                signal.stock_id,
                Some(position.id),
                Side::Sell,
                OrderMethod::Market,
                position.quantity,
                None,
            )
            .await?;

        let response = match self
            .broker
            .sell_market(&signal.symbol, position.quantity)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.store.fail_order(order_id).await?;
                return Err(e);
            }
        };

        if !response.success {
            self.store.fail_order(order_id).await?;
            return Ok(ExecutionResult {
                quantity: position.quantity,
                ..ExecutionResult::rejected(&signal.symbol, Side::Sell, response.message)
            });
        }

        let filled_price = self
            .actual_fill_price(response.order_id.as_deref(), signal.price)
            .await;

        let closed = self
            .store
            .record_exit_fill(
                order_id,
                response.order_id.as_deref(),
                signal.signal_id,
                position.id,
                filled_price,
                signal.kind.as_str(),
            )
            .await?;

        let pnl = closed.pnl.unwrap_or(Decimal::ZERO);
        let pnl_percent = closed.pnl_percent.unwrap_or(Decimal::ZERO);
        let holding_days = (Utc::now() - position.entry_date).num_days().max(1);

        info!(
            symbol = %signal.symbol,
            position_id = position.id,
            entry_price = %position.entry_price,
            exit_price = %filled_price,
            quantity = position.quantity,
            pnl = %pnl,
            pnl_pct = %pnl_percent,
            exit_reason = %signal.kind,
            order_id = response.order_id.as_deref().unwrap_or(""),
            "position closed"
        );

        let closed_positions = self.store.closed_positions().await?;
        let stats = PerformanceTracker::calculate(&closed_positions, None);

        let stock = self.store.get_stock(signal.stock_id).await?;
        let market_tag = stock
            .as_ref()
            .map(|s| s.market().to_string())
            .unwrap_or_default();

        if let Some(journal) = &self.journal {
            journal.record(&JournalEvent::PositionClosed {
                timestamp: Utc::now(),
                symbol: signal.symbol.clone(),
                name: signal.name.clone(),
                market: market_tag,
                exit_reason: signal.kind.as_str().to_string(),
                entry_price: position.entry_price,
                exit_price: filled_price,
                quantity: position.quantity,
                pnl,
                pnl_percent,
                holding_days,
                win_rate: (stats.total_trades > 0).then_some(stats.win_rate),
                total_trades: Some(stats.total_trades),
            });
        }

        Ok(ExecutionResult {
            success: true,
            order_id: response.order_id,
            symbol: signal.symbol.clone(),
            side: Side::Sell,
            quantity: position.quantity,
            filled_price: Some(filled_price),
            message: format!("exit order executed ({})", signal.kind),
            entry_price: Some(position.entry_price),
            pnl: Some(pnl),
            pnl_percent: Some(pnl_percent),
            holding_days: Some(holding_days),
            win_rate: (stats.total_trades > 0).then_some(stats.win_rate),
            total_trades: Some(stats.total_trades),
        })
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Entry slippage guard: how far above the breakout level did the signal
    /// price drift?
    fn entry_slippage_violation(&self, signal: &TurtleSignal) -> Option<String> {
        let level = signal.breakout_level.filter(|l| *l > Decimal::ZERO)?;
        let slippage = (signal.price - level) / level;
        (slippage > self.max_entry_slippage).then(|| {
            format!(
                "entry slippage {slippage} exceeds max {} (price={}, breakout={level})",
                self.max_entry_slippage, signal.price
            )
        })
    }

    /// Actual fill price from the broker's order status; the signal price is
    /// the fallback when the venue reports nothing usable.
    async fn actual_fill_price(&self, order_id: Option<&str>, fallback: Decimal) -> Decimal {
        let Some(order_id) = order_id else {
            return fallback;
        };
        match self.broker.get_order_status(order_id).await {
            Ok(Some(order)) => match order.filled_price {
                Some(price) if price > Decimal::ZERO => price,
                _ => fallback,
            },
            Ok(None) => fallback,
            Err(e) => {
                warn!(order_id, error = %e, "fill price lookup failed");
                fallback
            }
        }
    }
}

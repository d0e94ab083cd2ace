// =============================================================================
// Portfolio manager — open positions joined with live quotes
// =============================================================================
//
// Read-only views used by the monitoring job and the daily report. The
// stop-loss scan here never executes anything; execution always flows
// through the signal engine and order manager on the next cycle.
// =============================================================================

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::Broker;
use crate::error::Result;
use crate::store::Store;
use crate::types::Market;

/// One open position valued at the current market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioPosition {
    pub symbol: String,
    pub stock_id: i64,
    pub quantity: u64,
    pub units: u32,
    pub entry_price: Decimal,
    pub entry_system: Option<u8>,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: Decimal,
    pub stop_loss_price: Option<Decimal>,
    /// Fraction of current price above the stop; small values mean the stop
    /// is close.
    pub distance_to_stop: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_value: Decimal,
    pub cash_balance: Decimal,
    pub securities_value: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub total_unrealized_pnl_pct: Decimal,
    pub total_units: u32,
    pub available_units: u32,
    pub max_units: u32,
    pub position_count: usize,
    pub positions: Vec<PortfolioPosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRisk {
    /// Loss if every open position stopped out at its stop price.
    pub total_risk_amount: Decimal,
    pub total_risk_pct: Decimal,
    pub max_drawdown_potential: Decimal,
    /// Positions trading within 5 % of their stop.
    pub positions_at_risk: usize,
}

pub struct PortfolioManager {
    broker: Arc<dyn Broker>,
    store: Store,
    market: Market,
    max_units: u32,
}

impl PortfolioManager {
    pub fn new(broker: Arc<dyn Broker>, store: Store, market: Market, max_units: u32) -> Self {
        Self {
            broker,
            store,
            market,
            max_units,
        }
    }

    /// Join stored open positions with live quotes. A failed quote falls
    /// back to the entry price rather than dropping the position from the
    /// report.
    pub async fn summary(&self) -> Result<PortfolioSummary> {
        let balance = self.broker.get_balance().await?;
        let db_positions = self.store.open_positions_for_market(self.market).await?;

        let mut positions = Vec::with_capacity(db_positions.len());
        let mut total_unrealized_pnl = Decimal::ZERO;
        let mut securities_value = Decimal::ZERO;
        let mut total_units = 0u32;

        for db_pos in &db_positions {
            let stock = self.store.get_stock(db_pos.stock_id).await?;
            let symbol = stock
                .map(|s| s.symbol)
                .unwrap_or_else(|| db_pos.stock_id.to_string());

            let current_price = match self.broker.get_current_price(&symbol).await {
                Ok(price) if price > Decimal::ZERO => price,
                Ok(_) => db_pos.entry_price,
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "quote failed, valuing at entry");
                    db_pos.entry_price
                }
            };

            let market_value = current_price * Decimal::from(db_pos.quantity);
            let cost_basis = db_pos.entry_price * Decimal::from(db_pos.quantity);
            let unrealized_pnl = market_value - cost_basis;
            let unrealized_pnl_pct = if cost_basis > Decimal::ZERO {
                unrealized_pnl / cost_basis
            } else {
                Decimal::ZERO
            };

            let distance_to_stop = db_pos.stop_loss_price.and_then(|stop| {
                (current_price > Decimal::ZERO).then(|| (current_price - stop) / current_price)
            });

            total_unrealized_pnl += unrealized_pnl;
            securities_value += market_value;
            total_units += db_pos.units;

            positions.push(PortfolioPosition {
                symbol,
                stock_id: db_pos.stock_id,
                quantity: db_pos.quantity,
                units: db_pos.units,
                entry_price: db_pos.entry_price,
                entry_system: db_pos.entry_system,
                current_price,
                market_value,
                unrealized_pnl,
                unrealized_pnl_pct,
                stop_loss_price: db_pos.stop_loss_price,
                distance_to_stop,
            });
        }

        let total_value = balance.cash_balance + securities_value;
        let cost_total = total_value - total_unrealized_pnl;
        let total_unrealized_pnl_pct = if cost_total > Decimal::ZERO {
            total_unrealized_pnl / cost_total
        } else {
            Decimal::ZERO
        };

        Ok(PortfolioSummary {
            total_value,
            cash_balance: balance.cash_balance,
            securities_value,
            total_unrealized_pnl,
            total_unrealized_pnl_pct,
            total_units,
            available_units: self.max_units.saturating_sub(total_units),
            max_units: self.max_units,
            position_count: positions.len(),
            positions,
        })
    }

    pub async fn risk_analysis(&self) -> Result<PortfolioRisk> {
        let summary = self.summary().await?;

        let mut total_risk_amount = Decimal::ZERO;
        let mut positions_at_risk = 0;

        for position in &summary.positions {
            if let Some(stop) = position.stop_loss_price {
                total_risk_amount +=
                    (position.current_price - stop) * Decimal::from(position.quantity);
                if let Some(distance) = position.distance_to_stop {
                    if distance < Decimal::new(5, 2) {
                        positions_at_risk += 1;
                    }
                }
            }
        }

        let total_risk_pct = if summary.total_value > Decimal::ZERO {
            total_risk_amount / summary.total_value
        } else {
            Decimal::ZERO
        };

        let max_drawdown_potential =
            total_risk_amount + summary.total_unrealized_pnl.min(Decimal::ZERO).abs();

        Ok(PortfolioRisk {
            total_risk_amount,
            total_risk_pct,
            max_drawdown_potential,
            positions_at_risk,
        })
    }

    /// Positions trading at or below their stop. Monitoring only — the
    /// signal engine fires the actual STOP_LOSS on its next cycle.
    pub async fn check_stop_losses(&self) -> Result<Vec<PortfolioPosition>> {
        let summary = self.summary().await?;
        let mut triggered = Vec::new();

        for position in summary.positions {
            if let Some(stop) = position.stop_loss_price {
                if position.current_price <= stop {
                    warn!(
                        symbol = %position.symbol,
                        current_price = %position.current_price,
                        stop_loss = %stop,
                        "stop loss level breached"
                    );
                    triggered.push(position);
                }
            }
        }

        Ok(triggered)
    }

    /// Plain-text daily report body.
    pub fn format_summary(summary: &PortfolioSummary) -> String {
        let mut lines = vec![
            "=".repeat(60),
            "PORTFOLIO SUMMARY".to_string(),
            "=".repeat(60),
            format!("Total Value:      {:>18}", summary.total_value.round_dp(0)),
            format!("Cash Balance:     {:>18}", summary.cash_balance.round_dp(0)),
            format!("Securities:       {:>18}", summary.securities_value.round_dp(0)),
            format!(
                "Unrealized P&L:   {:>18} ({:.2}%)",
                summary.total_unrealized_pnl.round_dp(0),
                summary.total_unrealized_pnl_pct * Decimal::ONE_HUNDRED
            ),
            format!(
                "Units:            {:>18}",
                format!("{} / {}", summary.total_units, summary.max_units)
            ),
            format!("Positions:        {:>18}", summary.position_count),
            "-".repeat(60),
        ];

        if !summary.positions.is_empty() {
            lines.push(format!(
                "{:<10} {:>8} {:>12} {:>12} {:>9}",
                "Symbol", "Qty", "Entry", "Current", "P&L%"
            ));
            lines.push("-".repeat(60));
            for position in &summary.positions {
                lines.push(format!(
                    "{:<10} {:>8} {:>12} {:>12} {:>8.2}%",
                    position.symbol,
                    position.quantity,
                    position.entry_price.round_dp(2),
                    position.current_price.round_dp(2),
                    position.unrealized_pnl_pct * Decimal::ONE_HUNDRED
                ));
            }
        }

        lines.push("=".repeat(60));
        lines.join("\n")
    }
}

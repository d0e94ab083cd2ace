// =============================================================================
// Performance tracker — win rate, profit factor, holding statistics
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::store::PositionRow;

/// Aggregated statistics over closed trades, plus a view of what is still
/// open. Percentages are fractions (0.6 = 60 %).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_trades: usize,
    pub win_count: usize,
    pub loss_count: usize,
    pub win_rate: Decimal,

    pub total_pnl: Decimal,
    pub avg_win_pct: Decimal,
    pub avg_loss_pct: Decimal,
    pub max_win_pct: Decimal,
    pub max_loss_pct: Decimal,

    pub avg_holding_days: f64,
    pub max_holding_days: i64,
    pub min_holding_days: i64,

    /// Gross profit / gross loss. Zero when no losing trade exists yet.
    pub profit_factor: Decimal,

    pub open_positions: usize,
    pub open_units: u32,
}

impl PerformanceStats {
    pub fn loss_rate(&self) -> Decimal {
        if self.total_trades == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.loss_count as u64) / Decimal::from(self.total_trades as u64)
    }
}

pub struct PerformanceTracker;

impl PerformanceTracker {
    /// Compute statistics from position history. Zero-P&L trades count as
    /// losses (they consumed a unit without paying for it).
    pub fn calculate(
        closed_positions: &[PositionRow],
        open_positions: Option<&[PositionRow]>,
    ) -> PerformanceStats {
        let mut stats = PerformanceStats::default();

        if let Some(open) = open_positions {
            stats.open_positions = open.len();
            stats.open_units = open.iter().map(|p| p.units).sum();
        }

        if closed_positions.is_empty() {
            return stats;
        }

        stats.total_trades = closed_positions.len();

        let mut wins: Vec<Decimal> = Vec::new();
        let mut losses: Vec<Decimal> = Vec::new();
        let mut holding_days: Vec<i64> = Vec::new();
        let mut gross_profit = Decimal::ZERO;
        let mut gross_loss = Decimal::ZERO;

        for position in closed_positions {
            let pnl_pct = position.pnl_percent.unwrap_or(Decimal::ZERO);
            let pnl_abs = position.pnl.unwrap_or(Decimal::ZERO);

            if pnl_pct > Decimal::ZERO {
                wins.push(pnl_pct);
                gross_profit += pnl_abs;
            } else {
                losses.push(pnl_pct);
                gross_loss += pnl_abs.abs();
            }

            stats.total_pnl += pnl_abs;

            if let Some(exit_date) = position.exit_date {
                let days = (exit_date - position.entry_date).num_days().max(1);
                holding_days.push(days);
            }
        }

        stats.win_count = wins.len();
        stats.loss_count = losses.len();
        stats.win_rate =
            Decimal::from(stats.win_count as u64) / Decimal::from(stats.total_trades as u64);

        if !wins.is_empty() {
            stats.avg_win_pct = wins.iter().copied().sum::<Decimal>() / Decimal::from(wins.len() as u64);
            stats.max_win_pct = wins.iter().copied().max().unwrap_or(Decimal::ZERO);
        }
        if !losses.is_empty() {
            stats.avg_loss_pct =
                losses.iter().copied().sum::<Decimal>() / Decimal::from(losses.len() as u64);
            // Most negative.
            stats.max_loss_pct = losses.iter().copied().min().unwrap_or(Decimal::ZERO);
        }

        if !holding_days.is_empty() {
            stats.avg_holding_days =
                holding_days.iter().sum::<i64>() as f64 / holding_days.len() as f64;
            stats.max_holding_days = holding_days.iter().copied().max().unwrap_or(0);
            stats.min_holding_days = holding_days.iter().copied().min().unwrap_or(0);
        }

        if gross_loss > Decimal::ZERO {
            stats.profit_factor = gross_profit / gross_loss;
        }

        stats
    }
}

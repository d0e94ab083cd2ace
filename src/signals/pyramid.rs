// =============================================================================
// Pyramid manager — sequential add-on entries at fixed N intervals
// =============================================================================
//
// Level i (i = 0 is the initial entry) triggers at
//   initial_entry + i * interval * N.
// A fill at any level moves the unified stop for ALL units to
//   fill_price - stop_multiplier * N.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{RiskConfig, TurtleConfig};

/// One rung of the pyramid ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidLevel {
    /// 1-based unit number.
    pub level: u32,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
}

/// Decision for a single position on a single price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidSignal {
    pub should_pyramid: bool,
    /// Trigger price of the next unit (zero when maxed out).
    pub next_entry_price: Decimal,
    pub current_units: u32,
    pub max_units: u32,
    /// Unified stop to apply to the whole position after the add-on fill.
    pub new_stop_loss: Option<Decimal>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PyramidManager {
    unit_interval: Decimal,
    max_units_per_stock: u32,
    stop_loss_multiplier: Decimal,
}

impl PyramidManager {
    pub fn new(turtle: &TurtleConfig, risk: &RiskConfig) -> Self {
        Self {
            unit_interval: turtle.pyramid_unit_interval,
            max_units_per_stock: risk.max_units_per_stock,
            stop_loss_multiplier: risk.stop_loss_atr_multiplier,
        }
    }

    /// Full ladder for a position, level 1 at the initial entry.
    pub fn pyramid_levels(
        &self,
        initial_entry: Decimal,
        atr_n: Decimal,
        max_units: Option<u32>,
    ) -> Vec<PyramidLevel> {
        let max_u = max_units.unwrap_or(self.max_units_per_stock);
        (0..max_u)
            .map(|i| {
                let entry_price = initial_entry + atr_n * self.unit_interval * Decimal::from(i);
                PyramidLevel {
                    level: i + 1,
                    entry_price,
                    stop_loss: entry_price - atr_n * self.stop_loss_multiplier,
                }
            })
            .collect()
    }

    /// Should the position add unit `current_units + 1` at `current_price`?
    pub fn check_pyramid_signal(
        &self,
        current_price: Decimal,
        initial_entry: Decimal,
        atr_n: Decimal,
        current_units: u32,
        max_units: Option<u32>,
    ) -> PyramidSignal {
        let max_u = max_units.unwrap_or(self.max_units_per_stock);

        if current_units >= max_u {
            return PyramidSignal {
                should_pyramid: false,
                next_entry_price: Decimal::ZERO,
                current_units,
                max_units: max_u,
                new_stop_loss: None,
                reason: format!("maximum units reached ({current_units}/{max_u})"),
            };
        }

        let next_entry =
            initial_entry + atr_n * self.unit_interval * Decimal::from(current_units);
        let should_pyramid = current_price >= next_entry;

        let new_stop_loss = should_pyramid
            .then(|| current_price - atr_n * self.stop_loss_multiplier);

        let reason = if should_pyramid {
            format!("price {current_price} >= pyramid level {next_entry}")
        } else {
            format!("price {current_price} < next pyramid level {next_entry}")
        };

        PyramidSignal {
            should_pyramid,
            next_entry_price: next_entry,
            current_units,
            max_units: max_u,
            new_stop_loss,
            reason,
        }
    }

    /// Unified stop after filling the last level of a ladder.
    pub fn unified_stop_loss(&self, levels: &[PyramidLevel], atr_n: Decimal) -> Option<Decimal> {
        levels
            .last()
            .map(|l| l.entry_price - atr_n * self.stop_loss_multiplier)
    }

    /// Quantity-weighted average entry across fills.
    pub fn average_entry_price(entries: &[(Decimal, u64)]) -> Option<Decimal> {
        let total_qty: u64 = entries.iter().map(|(_, q)| q).sum();
        if total_qty == 0 {
            return None;
        }
        let total_cost: Decimal = entries
            .iter()
            .map(|(price, qty)| *price * Decimal::from(*qty))
            .sum();
        Some(total_cost / Decimal::from(total_qty))
    }
}

// =============================================================================
// Stop-loss calculator — initial, trailing, and breakeven variants
// =============================================================================
//
// Initial stop: max(entry - 2N, entry * (1 - 8%)).
// Trailing stop: highest seen price - 2N, never lowered.
// Breakeven stop: entry price, armed once unrealized profit reaches 1N.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;

/// Which rule produced a stop price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Atr2N,
    Percent8,
    Trailing,
    Breakeven,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossResult {
    pub price: Decimal,
    pub reason: StopReason,
    pub distance: Decimal,
    pub distance_percent: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct StopLossCalculator {
    atr_multiplier: Decimal,
    max_percent: Decimal,
}

impl StopLossCalculator {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            atr_multiplier: config.stop_loss_atr_multiplier,
            max_percent: config.stop_loss_max_percent,
        }
    }

    pub fn initial_stop(&self, entry_price: Decimal, atr_n: Decimal) -> StopLossResult {
        let stop_2n = entry_price - self.atr_multiplier * atr_n;
        let stop_percent = entry_price * (Decimal::ONE - self.max_percent);

        let (price, reason) = if stop_2n >= stop_percent {
            (stop_2n, StopReason::Atr2N)
        } else {
            (stop_percent, StopReason::Percent8)
        };

        let distance = entry_price - price;
        StopLossResult {
            price,
            reason,
            distance,
            distance_percent: if entry_price > Decimal::ZERO {
                distance / entry_price
            } else {
                Decimal::ZERO
            },
        }
    }

    /// Raise the stop toward `highest_price - 2N`; a trailing stop never
    /// moves down.
    pub fn trailing_stop(
        &self,
        highest_price: Decimal,
        atr_n: Decimal,
        current_stop: Decimal,
    ) -> StopLossResult {
        let trailing = highest_price - self.atr_multiplier * atr_n;

        let (price, reason) = if trailing > current_stop {
            (trailing, StopReason::Trailing)
        } else {
            (current_stop, StopReason::Atr2N)
        };

        let distance = highest_price - price;
        StopLossResult {
            price,
            reason,
            distance,
            distance_percent: if highest_price > Decimal::ZERO {
                distance / highest_price
            } else {
                Decimal::ZERO
            },
        }
    }

    /// Move the stop to breakeven once profit reaches `threshold` N.
    /// Returns `None` while the position has not earned the move.
    pub fn breakeven_stop(
        &self,
        entry_price: Decimal,
        current_price: Decimal,
        atr_n: Decimal,
        threshold: Decimal,
    ) -> Option<StopLossResult> {
        if atr_n <= Decimal::ZERO {
            return None;
        }
        let profit_in_atr = (current_price - entry_price) / atr_n;
        if profit_in_atr < threshold {
            return None;
        }

        let distance = current_price - entry_price;
        Some(StopLossResult {
            price: entry_price,
            reason: StopReason::Breakeven,
            distance,
            distance_percent: if current_price > Decimal::ZERO {
                distance / current_price
            } else {
                Decimal::ZERO
            },
        })
    }

    /// Stop trigger test: long positions exit at or below the stop.
    pub fn should_trigger(current_price: Decimal, stop_price: Decimal) -> bool {
        current_price <= stop_price
    }

    /// Stop to apply after a pyramid fill (same rules, anchored to the new
    /// fill price).
    pub fn pyramid_stop(&self, fill_price: Decimal, atr_n: Decimal) -> StopLossResult {
        self.initial_stop(fill_price, atr_n)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn calc() -> StopLossCalculator {
        StopLossCalculator::new(&RiskConfig::default())
    }

    #[test]
    fn initial_stop_picks_tighter_rule() {
        let result = calc().initial_stop(dec!(50000), dec!(1000));
        assert_eq!(result.price, dec!(48000));
        assert_eq!(result.reason, StopReason::Atr2N);
        assert_eq!(result.distance, dec!(2000));
        assert_eq!(result.distance_percent, dec!(0.04));

        let result = calc().initial_stop(dec!(50000), dec!(3000));
        assert_eq!(result.price, dec!(46000));
        assert_eq!(result.reason, StopReason::Percent8);
    }

    #[test]
    fn trailing_stop_only_rises() {
        let raised = calc().trailing_stop(dec!(55000), dec!(1000), dec!(48000));
        assert_eq!(raised.price, dec!(53000));
        assert_eq!(raised.reason, StopReason::Trailing);

        // Price fell back: the trailing candidate is below the current stop.
        let held = calc().trailing_stop(dec!(51000), dec!(2000), dec!(48000));
        assert_eq!(held.price, dec!(48000));
        assert_eq!(held.reason, StopReason::Atr2N);
    }

    #[test]
    fn breakeven_arms_at_one_n_profit() {
        let c = calc();
        assert!(c
            .breakeven_stop(dec!(50000), dec!(50500), dec!(1000), Decimal::ONE)
            .is_none());

        let armed = c
            .breakeven_stop(dec!(50000), dec!(51000), dec!(1000), Decimal::ONE)
            .unwrap();
        assert_eq!(armed.price, dec!(50000));
        assert_eq!(armed.reason, StopReason::Breakeven);
    }

    #[test]
    fn breakeven_rejects_zero_atr() {
        assert!(calc()
            .breakeven_stop(dec!(50000), dec!(60000), Decimal::ZERO, Decimal::ONE)
            .is_none());
    }

    #[test]
    fn trigger_at_or_below_stop() {
        assert!(StopLossCalculator::should_trigger(dec!(46999), dec!(47000)));
        assert!(StopLossCalculator::should_trigger(dec!(47000), dec!(47000)));
        assert!(!StopLossCalculator::should_trigger(dec!(47001), dec!(47000)));
    }

    #[test]
    fn pyramid_stop_follows_fill_price() {
        let result = calc().pyramid_stop(dec!(50600), dec!(1000));
        assert_eq!(result.price, dec!(48600));
        assert_eq!(result.reason, StopReason::Atr2N);
    }
}

// =============================================================================
// Position sizer — quantity from risk-per-unit and stop distance
// =============================================================================
//
// One unit risks `risk_per_unit` of account value on the distance between
// entry and initial stop. The initial stop is the tighter of the 2N
// volatility stop and the hard 8 % stop.
// =============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;
use crate::types::StopLossKind;

/// Full sizing output for one prospective unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSizeResult {
    pub quantity: u64,
    pub position_value: Decimal,
    pub risk_amount: Decimal,
    pub risk_per_share: Decimal,
    pub stop_loss_price: Decimal,
    pub stop_loss_kind: StopLossKind,
}

#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    risk_per_unit: Decimal,
    stop_loss_atr_multiplier: Decimal,
    stop_loss_max_percent: Decimal,
}

impl PositionSizer {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            risk_per_unit: config.risk_per_unit,
            stop_loss_atr_multiplier: config.stop_loss_atr_multiplier,
            stop_loss_max_percent: config.stop_loss_max_percent,
        }
    }

    /// Initial stop: max(entry - 2N, entry * 0.92) — whichever sits closer to
    /// the entry wins, and the dominating rule is recorded.
    pub fn initial_stop(&self, entry_price: Decimal, atr_n: Decimal) -> (Decimal, StopLossKind) {
        let stop_2n = entry_price - self.stop_loss_atr_multiplier * atr_n;
        let stop_pct = entry_price * (Decimal::ONE - self.stop_loss_max_percent);

        if stop_2n >= stop_pct {
            (stop_2n, StopLossKind::TwoN)
        } else {
            (stop_pct, StopLossKind::MaxPercent)
        }
    }

    /// Share count for one unit given account value and the stop distance.
    /// Floored at one share; affordability against buying power is the order
    /// manager's concern.
    pub fn quantity(
        &self,
        account_value: Decimal,
        entry_price: Decimal,
        stop_loss_price: Decimal,
    ) -> Option<u64> {
        if entry_price <= Decimal::ZERO || stop_loss_price >= entry_price {
            return None;
        }

        let max_risk = account_value * self.risk_per_unit;
        let risk_per_share = entry_price - stop_loss_price;

        let quantity = (max_risk / risk_per_share).trunc().to_u64()?;
        Some(quantity.max(1))
    }

    /// Stop, quantity, and risk numbers in one call.
    pub fn size_position(
        &self,
        account_value: Decimal,
        entry_price: Decimal,
        atr_n: Decimal,
    ) -> Option<PositionSizeResult> {
        let (stop_loss_price, stop_loss_kind) = self.initial_stop(entry_price, atr_n);
        let quantity = self.quantity(account_value, entry_price, stop_loss_price)?;

        let risk_per_share = entry_price - stop_loss_price;
        Some(PositionSizeResult {
            quantity,
            position_value: entry_price * Decimal::from(quantity),
            risk_amount: risk_per_share * Decimal::from(quantity),
            risk_per_share,
            stop_loss_price,
            stop_loss_kind,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sizer() -> PositionSizer {
        PositionSizer::new(&RiskConfig::default())
    }

    #[test]
    fn two_n_stop_dominates_when_tighter() {
        // entry 50000, N 1500: 2N stop 47000, 8% stop 46000 -> 2N wins.
        let (stop, kind) = sizer().initial_stop(dec!(50000), dec!(1500));
        assert_eq!(stop, dec!(47000));
        assert_eq!(kind, StopLossKind::TwoN);
    }

    #[test]
    fn percent_stop_dominates_in_high_volatility() {
        // entry 50000, N 2500: 2N stop 45000 is below the 8% floor 46000.
        let (stop, kind) = sizer().initial_stop(dec!(50000), dec!(2500));
        assert_eq!(stop, dec!(46000));
        assert_eq!(kind, StopLossKind::MaxPercent);
    }

    #[test]
    fn sizing_matches_risk_budget() {
        // A = 100M, E = 50000, N = 1500, risk 2 %: 2M / 3000 = 666 shares.
        let result = sizer()
            .size_position(dec!(100000000), dec!(50000), dec!(1500))
            .unwrap();
        assert_eq!(result.quantity, 666);
        assert_eq!(result.stop_loss_price, dec!(47000));
        assert_eq!(result.stop_loss_kind, StopLossKind::TwoN);
        assert_eq!(result.risk_per_share, dec!(3000));
        assert_eq!(result.risk_amount, dec!(1998000));
        assert_eq!(result.position_value, dec!(33300000));
    }

    #[test]
    fn sized_risk_never_exceeds_budget_by_more_than_one_share() {
        for (account, entry, n) in [
            (dec!(100000000), dec!(50000), dec!(1500)),
            (dec!(50000000), dec!(123456), dec!(2345)),
            (dec!(10000000), dec!(777), dec!(31)),
        ] {
            let sizer = sizer();
            let result = sizer.size_position(account, entry, n).unwrap();
            let budget = account * dec!(0.02);
            // quantity * risk_per_share <= budget + one share of risk
            assert!(
                Decimal::from(result.quantity) * result.risk_per_share
                    <= budget + result.risk_per_share
            );
        }
    }

    #[test]
    fn quantity_floors_at_one_share() {
        // Tiny account: budget smaller than one share of risk.
        let qty = sizer().quantity(dec!(10000), dec!(50000), dec!(47000));
        assert_eq!(qty, Some(1));
    }

    #[test]
    fn invalid_inputs_rejected() {
        let s = sizer();
        assert_eq!(s.quantity(dec!(100000000), dec!(0), dec!(-1)), None);
        // Stop at or above entry is meaningless.
        assert_eq!(s.quantity(dec!(100000000), dec!(50000), dec!(50000)), None);
        assert_eq!(s.quantity(dec!(100000000), dec!(50000), dec!(51000)), None);
    }

    #[test]
    fn stop_is_always_below_entry() {
        for n in [dec!(100), dec!(1000), dec!(3000), dec!(10000)] {
            let (stop, _) = sizer().initial_stop(dec!(50000), n);
            assert!(stop < dec!(50000));
        }
    }
}

// =============================================================================
// Donchian-channel breakout detector
// =============================================================================
//
// The breakout reference for a window of `period` days is the extreme of the
// `period` bars PRECEDING the current one: the window always excludes the
// final element of the series. A system with fewer than `period + 1` bars of
// history has no reference and cannot fire.
//
// Entry precedence: System 2 (55-day) wins over System 1 (20-day). System 1
// additionally skips the trade when the stock's previous System-1 breakout
// was profitable, preserving the bias of only trading the skipped setups.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::TurtleConfig;
use crate::types::SignalKind;

/// Outcome of an entry or exit classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutResult {
    pub kind: Option<SignalKind>,
    pub price: Decimal,
    pub breakout_level: Option<Decimal>,
    pub system: Option<u8>,
}

impl BreakoutResult {
    fn none(price: Decimal, system: Option<u8>) -> Self {
        Self {
            kind: None,
            price,
            breakout_level: None,
            system,
        }
    }

    pub fn is_entry(&self) -> bool {
        self.kind.map(|k| k.is_entry()).unwrap_or(false)
    }

    pub fn is_exit(&self) -> bool {
        self.kind.map(|k| k.is_exit()).unwrap_or(false)
    }
}

/// A breakout level the current price sits just below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityTarget {
    pub breakout_level: Decimal,
    pub system: u8,
    /// Distance below the level as a fraction of it.
    pub distance_pct: Decimal,
}

/// Stateless classifier over price series.
#[derive(Debug, Clone, Copy)]
pub struct BreakoutDetector {
    s1_entry_period: usize,
    s1_exit_period: usize,
    s2_entry_period: usize,
    s2_exit_period: usize,
}

impl BreakoutDetector {
    pub fn new(config: &TurtleConfig) -> Self {
        Self {
            s1_entry_period: config.s1_entry_period,
            s1_exit_period: config.s1_exit_period,
            s2_entry_period: config.s2_entry_period,
            s2_exit_period: config.s2_exit_period,
        }
    }

    /// Highest high of the `period` bars preceding the current (last) bar.
    /// `None` when the series is too short to fill the window.
    pub fn channel_high(highs: &[Decimal], period: usize) -> Option<Decimal> {
        if period == 0 || highs.len() < period + 1 {
            return None;
        }
        let window = &highs[highs.len() - 1 - period..highs.len() - 1];
        window.iter().copied().max()
    }

    /// Lowest low of the `period` bars preceding the current (last) bar.
    pub fn channel_low(lows: &[Decimal], period: usize) -> Option<Decimal> {
        if period == 0 || lows.len() < period + 1 {
            return None;
        }
        let window = &lows[lows.len() - 1 - period..lows.len() - 1];
        window.iter().copied().min()
    }

    /// Classify an entry for `current_price` against the high series.
    ///
    /// `highs` must include the current bar as its last element (a live quote
    /// is appended by the caller before invoking this).
    pub fn check_entry(
        &self,
        current_price: Decimal,
        highs: &[Decimal],
        previous_s1_winner: bool,
    ) -> BreakoutResult {
        if let Some(s2_high) = Self::channel_high(highs, self.s2_entry_period) {
            if current_price > s2_high {
                return BreakoutResult {
                    kind: Some(SignalKind::EntryS2),
                    price: current_price,
                    breakout_level: Some(s2_high),
                    system: Some(2),
                };
            }
        }

        if let Some(s1_high) = Self::channel_high(highs, self.s1_entry_period) {
            if current_price > s1_high && !previous_s1_winner {
                return BreakoutResult {
                    kind: Some(SignalKind::EntryS1),
                    price: current_price,
                    breakout_level: Some(s1_high),
                    system: Some(1),
                };
            }
        }

        BreakoutResult::none(current_price, None)
    }

    /// Classify a channel exit for a position entered under `entry_system`.
    pub fn check_exit(
        &self,
        current_price: Decimal,
        lows: &[Decimal],
        entry_system: u8,
    ) -> BreakoutResult {
        let (exit_period, exit_kind) = if entry_system == 1 {
            (self.s1_exit_period, SignalKind::ExitS1)
        } else {
            (self.s2_exit_period, SignalKind::ExitS2)
        };

        if let Some(period_low) = Self::channel_low(lows, exit_period) {
            if current_price < period_low {
                return BreakoutResult {
                    kind: Some(exit_kind),
                    price: current_price,
                    breakout_level: Some(period_low),
                    system: Some(entry_system),
                };
            }
        }

        BreakoutResult::none(current_price, Some(entry_system))
    }

    /// Targets the price is within `proximity_pct` below. System 1 obeys the
    /// same winner filter as entries; a price already above a level produces
    /// no target for it (that is a breakout, not a proximity).
    pub fn check_proximity(
        &self,
        current_price: Decimal,
        highs: &[Decimal],
        proximity_pct: Decimal,
        previous_s1_winner: bool,
    ) -> Vec<ProximityTarget> {
        let mut targets = Vec::new();

        if let Some(s2_high) = Self::channel_high(highs, self.s2_entry_period) {
            if current_price <= s2_high && s2_high > Decimal::ZERO {
                let distance = (s2_high - current_price) / s2_high;
                if distance <= proximity_pct {
                    targets.push(ProximityTarget {
                        breakout_level: s2_high,
                        system: 2,
                        distance_pct: distance,
                    });
                }
            }
        }

        if !previous_s1_winner {
            if let Some(s1_high) = Self::channel_high(highs, self.s1_entry_period) {
                if current_price <= s1_high && s1_high > Decimal::ZERO {
                    let distance = (s1_high - current_price) / s1_high;
                    if distance <= proximity_pct {
                        targets.push(ProximityTarget {
                            breakout_level: s1_high,
                            system: 1,
                            distance_pct: distance,
                        });
                    }
                }
            }
        }

        targets
    }

    /// Current entry references for both systems, for diagnostics.
    pub fn entry_levels(&self, highs: &[Decimal]) -> (Option<Decimal>, Option<Decimal>) {
        (
            Self::channel_high(highs, self.s1_entry_period),
            Self::channel_high(highs, self.s2_entry_period),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn detector() -> BreakoutDetector {
        BreakoutDetector::new(&TurtleConfig::default())
    }

    fn ascending(n: usize, step: i64) -> Vec<Decimal> {
        (0..n).map(|i| Decimal::from(50_000 + i as i64 * step)).collect()
    }

    fn descending(n: usize, step: i64) -> Vec<Decimal> {
        (0..n).map(|i| Decimal::from(50_000 - i as i64 * step)).collect()
    }

    #[test]
    fn channel_reference_excludes_current_bar() {
        // 25 bars, highs 50000..51200 in steps of 50. Window of 20 ending
        // before the last bar covers indices 4..=23, max = 51150.
        let highs = ascending(25, 50);
        assert_eq!(
            BreakoutDetector::channel_high(&highs, 20),
            Some(dec!(51150))
        );
    }

    #[test]
    fn channel_reference_requires_full_window() {
        let highs = ascending(25, 50);
        // 55-day window needs 56 bars; only 25 available.
        assert_eq!(BreakoutDetector::channel_high(&highs, 55), None);
        assert_eq!(BreakoutDetector::channel_high(&highs, 0), None);
    }

    #[test]
    fn system1_entry_when_s2_has_no_reference() {
        // 25 ascending bars: S2 cannot fire (no reference), S1 fires at
        // level 51150 when the previous S1 trade lost.
        let highs = ascending(25, 50);
        let result = detector().check_entry(dec!(60000), &highs, false);
        assert_eq!(result.kind, Some(SignalKind::EntryS1));
        assert_eq!(result.system, Some(1));
        assert_eq!(result.breakout_level, Some(dec!(51150)));
    }

    #[test]
    fn system2_entry_preempts_system1() {
        // 60 ascending bars with step 30: S2 reference = max of indices
        // 4..=58 = 50000 + 58*30 = 51740. S2 wins regardless of the S1
        // winner filter.
        let highs = ascending(60, 30);
        let result = detector().check_entry(dec!(60000), &highs, true);
        assert_eq!(result.kind, Some(SignalKind::EntryS2));
        assert_eq!(result.system, Some(2));
        assert_eq!(result.breakout_level, Some(dec!(51740)));
    }

    #[test]
    fn s1_blocked_when_previous_winner() {
        let highs = ascending(25, 50);
        // Above the S1 level but the previous S1 trade won -> no entry.
        let result = detector().check_entry(dec!(51300), &highs, true);
        assert_eq!(result.kind, None);
    }

    #[test]
    fn no_entry_below_channel() {
        let highs = vec![dec!(50000); 60];
        let result = detector().check_entry(dec!(48000), &highs, false);
        assert_eq!(result.kind, None);
        assert!(!result.is_entry());
    }

    #[test]
    fn entry_positive_iff_price_exceeds_prior_high() {
        // check_entry(p, H + [p]) fires exactly when p > max of the prior
        // `period` highs.
        let highs = ascending(25, 50);
        let reference = highs[5..25].iter().copied().max().unwrap();

        let mut at_level = highs.clone();
        at_level.push(reference);
        let result = detector().check_entry(reference, &at_level, false);
        assert_eq!(result.kind, None);

        let above = reference + dec!(1);
        let mut above_series = highs.clone();
        above_series.push(above);
        let result = detector().check_entry(above, &above_series, false);
        assert_eq!(result.kind, Some(SignalKind::EntryS1));
        assert_eq!(result.breakout_level, Some(reference));
    }

    #[test]
    fn system1_exit_on_ten_day_low() {
        let lows = descending(15, 50);
        let result = detector().check_exit(dec!(48000), &lows, 1);
        assert_eq!(result.kind, Some(SignalKind::ExitS1));
        assert_eq!(result.system, Some(1));
    }

    #[test]
    fn system2_exit_on_twenty_day_low() {
        let lows = descending(25, 30);
        let result = detector().check_exit(dec!(48000), &lows, 2);
        assert_eq!(result.kind, Some(SignalKind::ExitS2));
        assert_eq!(result.system, Some(2));
    }

    #[test]
    fn no_exit_above_channel_low() {
        let lows = vec![dec!(48000); 15];
        let result = detector().check_exit(dec!(50000), &lows, 1);
        assert_eq!(result.kind, None);
        assert!(!result.is_exit());
    }

    #[test]
    fn proximity_within_threshold() {
        // Flat 20-day high at 50000, price 49800: distance 0.4 %.
        let mut highs = vec![dec!(50000); 56];
        let price = dec!(49800);
        highs.push(price);
        let targets = detector().check_proximity(price, &highs, dec!(0.03), false);
        assert_eq!(targets.len(), 2); // both systems share the 50000 level
        assert!(targets.iter().any(|t| t.system == 1));
        assert!(targets.iter().any(|t| t.system == 2));
        assert_eq!(targets[0].breakout_level, dec!(50000));
        assert_eq!(targets[0].distance_pct, dec!(200) / dec!(50000));
    }

    #[test]
    fn proximity_s1_respects_winner_filter() {
        let mut highs = vec![dec!(50000); 56];
        highs.push(dec!(49800));
        let targets = detector().check_proximity(dec!(49800), &highs, dec!(0.03), true);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].system, 2);
    }

    #[test]
    fn proximity_excludes_distant_price() {
        let mut highs = vec![dec!(50000); 56];
        highs.push(dec!(45000));
        let targets = detector().check_proximity(dec!(45000), &highs, dec!(0.03), false);
        assert!(targets.is_empty());
    }
}

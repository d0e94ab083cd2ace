// =============================================================================
// Average True Range (ATR) — the "N" of the breakout systems
// =============================================================================
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the arithmetic mean of the last `period` TR values. The result
// doubles as the volatility unit N: stop distances and pyramid intervals are
// expressed in multiples of it.
//
// Default period: 20
// =============================================================================

use rust_decimal::Decimal;

/// ATR output for one series.
#[derive(Debug, Clone, PartialEq)]
pub struct AtrResult {
    /// Mean of the last `period` true ranges.
    pub atr: Decimal,
    /// ATR as a percentage of the last close.
    pub atr_percent: Decimal,
    pub period: usize,
}

/// ATR calculator with a fixed look-back period.
#[derive(Debug, Clone, Copy)]
pub struct AtrCalculator {
    period: usize,
}

impl AtrCalculator {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    /// True range of a single bar given the previous close.
    pub fn true_range(high: Decimal, low: Decimal, previous_close: Decimal) -> Decimal {
        let hl = high - low;
        let hc = (high - previous_close).abs();
        let lc = (low - previous_close).abs();
        hl.max(hc).max(lc)
    }

    /// Compute ATR over equal-length H/L/C series ordered oldest first.
    ///
    /// Returns `None` when:
    /// - the period is zero, or
    /// - fewer than `period + 1` bars are available (each TR needs a previous
    ///   close, so `period` TR values require `period + 1` bars).
    pub fn calculate(
        &self,
        highs: &[Decimal],
        lows: &[Decimal],
        closes: &[Decimal],
    ) -> Option<AtrResult> {
        if self.period == 0 {
            return None;
        }
        let len = highs.len().min(lows.len()).min(closes.len());
        if len < self.period + 1 {
            return None;
        }

        let mut true_ranges: Vec<Decimal> = Vec::with_capacity(len - 1);
        for i in 1..len {
            true_ranges.push(Self::true_range(highs[i], lows[i], closes[i - 1]));
        }

        let recent = &true_ranges[true_ranges.len() - self.period..];
        let sum: Decimal = recent.iter().copied().sum();
        let atr = sum / Decimal::from(self.period);

        let last_close = closes[len - 1];
        let atr_percent = if last_close > Decimal::ZERO {
            atr / last_close * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        Some(AtrResult {
            atr,
            atr_percent,
            period: self.period,
        })
    }

    /// Just the N value, for callers that do not need the percentage.
    pub fn calculate_n(
        &self,
        highs: &[Decimal],
        lows: &[Decimal],
        closes: &[Decimal],
    ) -> Option<Decimal> {
        self.calculate(highs, lows, closes).map(|r| r.atr)
    }
}

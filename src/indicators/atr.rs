/// Average True Range (ATR) indicator
///
/// Measures volatility as the smoothed average of true ranges. True Range is
/// the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// Uses Wilder's smoothing for the moving average.
use crate::models::Bar;

/// Calculate ATR for the given bars
///
/// Returns the current ATR value, or None if insufficient data
pub fn calculate_atr(bars: &[Bar], period: usize) -> Option<f64> {
    let series = calculate_atr_series(bars, period);
    series.last().copied()
}

/// Calculate ATR and return all intermediate values
///
/// Returns ATR values aligned with bars starting from index `period`.
pub fn calculate_atr_series(bars: &[Bar], period: usize) -> Vec<f64> {
    if bars.len() < period + 1 {
        return Vec::new();
    }

    // True ranges
    let mut true_ranges = Vec::with_capacity(bars.len() - 1);
    for i in 1..bars.len() {
        let high = bars[i].high;
        let low = bars[i].low;
        let prev_close = bars[i - 1].close;

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());

        true_ranges.push(tr);
    }

    if true_ranges.len() < period {
        return Vec::new();
    }

    let mut atr_series = Vec::new();

    // First ATR is a simple average of the first `period` true ranges
    let first_atr: f64 = true_ranges.iter().take(period).sum::<f64>() / period as f64;
    atr_series.push(first_atr);

    // Wilder's smoothing for subsequent values
    let mut atr = first_atr;
    for tr in &true_ranges[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
        atr_series.push(atr);
    }

    atr_series
}

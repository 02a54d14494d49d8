use std::collections::HashMap;

use chrono::Timelike;

use crate::indicators::calculate_atr_series;
use crate::models::Bar;

const ATR_PERIOD: usize = 14;
/// Fallback volatility in pips for symbols with no usable history
const DEFAULT_VOL_PIPS: f64 = 10.0;
/// Lower bound so inverse weights stay finite
const MIN_VOL_PIPS: f64 = 0.1;

/// Realized volatility of one symbol in pips: mean 14-period ATR over the
/// active session (07:00-16:00 UTC, London+NY union) of the lookback window.
///
/// Falls back to the full day when the session filter leaves too few bars.
pub fn realized_vol_pips(bars: &[Bar], lookback_days: u32, pip: f64) -> f64 {
    if bars.is_empty() {
        return 0.0;
    }

    let cutoff = match bars.last() {
        Some(last) => last.timestamp - chrono::Duration::days(lookback_days as i64),
        None => return 0.0,
    };
    let recent: Vec<Bar> = bars
        .iter()
        .filter(|b| b.timestamp >= cutoff)
        .cloned()
        .collect();
    if recent.is_empty() {
        return 0.0;
    }

    let session: Vec<Bar> = recent
        .iter()
        .filter(|b| {
            let h = b.timestamp.hour();
            (7..16).contains(&h)
        })
        .cloned()
        .collect();
    let window = if session.len() < ATR_PERIOD {
        &recent
    } else {
        &session
    };

    let series = calculate_atr_series(window, ATR_PERIOD);
    if series.is_empty() {
        return 0.0;
    }
    let mean_atr = series.iter().sum::<f64>() / series.len() as f64;

    if pip > 0.0 {
        mean_atr / pip
    } else {
        mean_atr
    }
}

/// Inverse-volatility weights for risk-parity allocation.
///
/// weight = 1/vol, clamped to [floor, cap], renormalized to sum 1. Returns
/// (weights, vols) so callers can log the measured volatilities.
pub fn inv_vol_weights(
    symbols: &[String],
    history: &HashMap<String, Vec<Bar>>,
    lookback_days: u32,
    pip_map: &HashMap<String, f64>,
    floor: f64,
    cap: f64,
) -> (HashMap<String, f64>, HashMap<String, f64>) {
    let mut vols: HashMap<String, f64> = HashMap::new();
    for symbol in symbols {
        let pip = pip_map.get(symbol).copied().unwrap_or(0.0001);
        let vol = match history.get(symbol) {
            Some(bars) if !bars.is_empty() => {
                realized_vol_pips(bars, lookback_days, pip).max(MIN_VOL_PIPS)
            }
            _ => DEFAULT_VOL_PIPS,
        };
        vols.insert(symbol.clone(), vol);
    }

    let mut clamped: HashMap<String, f64> = HashMap::new();
    for symbol in symbols {
        let w = 1.0 / vols[symbol];
        clamped.insert(symbol.clone(), w.clamp(floor, cap));
    }

    let total: f64 = clamped.values().sum();
    let weights = if total > 0.0 {
        clamped.into_iter().map(|(s, w)| (s, w / total)).collect()
    } else {
        let equal = 1.0 / symbols.len().max(1) as f64;
        symbols.iter().map(|s| (s.clone(), equal)).collect()
    };

    (weights, vols)
}

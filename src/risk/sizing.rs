use anyhow::{bail, Result};

use crate::data::symbols::{pip_size, pip_value};

/// A fully-resolved position size
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSize {
    pub units: u32,
    pub risk_usd: f64,
    pub sl_pips: f64,
    pub pip_value: f64,
    /// True when the raw size came out below one unit and was clamped up
    pub floor_applied: bool,
}

/// Size a position so that a stop-out loses `risk_fraction` of equity.
///
/// per-unit loss = sl_pips * pip_value / 100_000, units = floor(risk / loss).
/// Pip values are quoted in USD per pip per standard lot (100k units).
pub fn units_from_risk(
    symbol: &str,
    entry: f64,
    stop_loss: f64,
    equity_usd: f64,
    risk_fraction: f64,
) -> Result<PositionSize> {
    if !(entry.is_finite() && stop_loss.is_finite()) || entry <= 0.0 {
        bail!("invalid prices for {}: entry={} sl={}", symbol, entry, stop_loss);
    }
    if equity_usd <= 0.0 || risk_fraction <= 0.0 {
        bail!(
            "invalid risk inputs: equity={} fraction={}",
            equity_usd,
            risk_fraction
        );
    }

    let pip = pip_size(symbol);
    let sl_pips = (entry - stop_loss).abs() / pip;
    if sl_pips <= 0.0 {
        bail!("zero stop distance for {} at {}", symbol, entry);
    }

    let pv = pip_value(symbol);
    let per_unit_loss = sl_pips * pv / 100_000.0;
    let risk_usd = equity_usd * risk_fraction;

    let raw = (risk_usd / per_unit_loss).floor();
    let floor_applied = raw < 1.0;
    let units = if floor_applied { 1 } else { raw as u32 };

    Ok(PositionSize {
        units,
        risk_usd,
        sl_pips,
        pip_value: pv,
        floor_applied,
    })
}

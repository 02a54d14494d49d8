use crate::models::Side;

/// Which leg of a trade is being priced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillAction {
    Open,
    Close,
}

/// Deterministic fill model: mid price adjusted by half the bid-ask spread
/// plus slippage of max(1 pip, ATR/1000), always in the adverse direction.
pub fn apply_costs(
    price: f64,
    side: Side,
    pip: f64,
    action: FillAction,
    spread_pips: f64,
    atr: Option<f64>,
) -> f64 {
    let half_spread = spread_pips * pip / 2.0;

    let mut slippage = pip;
    if let Some(atr) = atr {
        if atr.is_finite() {
            slippage = slippage.max(atr / 1000.0);
        }
    }

    let cost = half_spread + slippage;
    match (side, action) {
        // Longs buy at the ask and sell at the bid
        (Side::Long, FillAction::Open) => price + cost,
        (Side::Long, FillAction::Close) => price - cost,
        // Shorts the other way around
        (Side::Short, FillAction::Open) => price - cost,
        (Side::Short, FillAction::Close) => price + cost,
    }
}

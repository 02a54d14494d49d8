use crate::indicators::calculate_atr;
use crate::models::{Bar, Side, Signal};
use crate::strategy::Strategy;

/// Moving-average momentum strategy
///
/// Enters in the direction of a fast/slow SMA crossover, with ATR-based
/// stop and target. Holds no opinion while the averages agree; it only
/// fires on the bar where the relationship flips.
pub struct MomentumStrategy {
    symbol: String,
    fast_period: usize,
    slow_period: usize,
    atr_period: usize,
    stop_atr: f64,
    target_atr: f64,
    /// Last observed fast-above-slow relationship, updated incrementally
    fast_above: Option<bool>,
}

impl MomentumStrategy {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            fast_period: 10,
            slow_period: 30,
            atr_period: 14,
            stop_atr: 2.0,
            target_atr: 3.0,
            fast_above: None,
        }
    }

    fn sma_tail(bars: &[Bar], period: usize) -> Option<f64> {
        if bars.len() < period {
            return None;
        }
        let sum: f64 = bars[bars.len() - period..].iter().map(|b| b.close).sum();
        Some(sum / period as f64)
    }

    fn update_cross(&mut self, bars: &[Bar]) -> Option<(bool, bool)> {
        let fast = Self::sma_tail(bars, self.fast_period)?;
        let slow = Self::sma_tail(bars, self.slow_period)?;
        let now_above = fast > slow;
        let crossed = match self.fast_above {
            Some(prev) => prev != now_above,
            None => false,
        };
        self.fast_above = Some(now_above);
        Some((now_above, crossed))
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn prepare(&mut self, bars: &[Bar]) {
        // Seed the crossover state so the first live bar doesn't fire
        // spuriously off an unknown baseline.
        self.update_cross(bars);
        tracing::debug!(
            "momentum prepared for {} on {} warmup bars",
            self.symbol,
            bars.len()
        );
    }

    fn generate_signals(&mut self, bars: &[Bar]) -> Vec<Signal> {
        let Some((now_above, crossed)) = self.update_cross(bars) else {
            return Vec::new();
        };
        if !crossed {
            return Vec::new();
        }

        let Some(atr) = calculate_atr(bars, self.atr_period) else {
            return Vec::new();
        };
        if atr <= 0.0 {
            return Vec::new();
        }

        let Some(bar) = bars.last() else {
            return Vec::new();
        };
        let price = bar.close;

        let (side, stop_loss, take_profit) = if now_above {
            (
                Side::Long,
                price - self.stop_atr * atr,
                price + self.target_atr * atr,
            )
        } else {
            (
                Side::Short,
                price + self.stop_atr * atr,
                price - self.target_atr * atr,
            )
        };

        vec![Signal {
            side,
            price,
            stop_loss,
            take_profit,
            notes: format!("sma {}x{} cross", self.fast_period, self.slow_period),
        }]
    }

    fn min_bars_required(&self) -> usize {
        self.slow_period.max(self.atr_period + 1)
    }
}

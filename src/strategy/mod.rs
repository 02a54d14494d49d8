// Trading strategy module
pub mod breakout;
pub mod momentum;

use serde::{Deserialize, Serialize};

use crate::models::{Bar, Signal};

/// Base trait for all trading strategies.
///
/// Strategies are warmed up once with `prepare` and then updated one bar at
/// a time through `generate_signals`; all indicator state lives in the
/// strategy and is updated incrementally.
pub trait Strategy: Send + Sync {
    /// Strategy name (used in tags, journal rows and status output)
    fn name(&self) -> &str;

    /// Warm up internal state from historical bars (called once at startup)
    fn prepare(&mut self, bars: &[Bar]);

    /// Update state with the series ending at the newest bar and return
    /// zero or more entry signals for that bar.
    fn generate_signals(&mut self, bars: &[Bar]) -> Vec<Signal>;

    /// Minimum bars required before signals can be produced
    fn min_bars_required(&self) -> usize;
}

/// Closed set of strategy kinds.
///
/// Config names deserialize straight into this enum; there is no dynamic
/// strategy loading.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Momentum,
    Breakout,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Momentum => "momentum",
            StrategyKind::Breakout => "breakout",
        }
    }

    /// Build a fresh strategy instance for one symbol
    pub fn build(&self, symbol: &str) -> Box<dyn Strategy> {
        match self {
            StrategyKind::Momentum => Box::new(momentum::MomentumStrategy::new(symbol)),
            StrategyKind::Breakout => Box::new(breakout::BreakoutStrategy::new(symbol)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_deserializes_from_config_name() {
        let kind: StrategyKind = serde_json::from_str("\"momentum\"").unwrap();
        assert_eq!(kind, StrategyKind::Momentum);
        let kind: StrategyKind = serde_json::from_str("\"breakout\"").unwrap();
        assert_eq!(kind, StrategyKind::Breakout);
        assert!(serde_json::from_str::<StrategyKind>("\"unknown\"").is_err());
    }

    #[test]
    fn test_build_names_match_kind() {
        assert_eq!(StrategyKind::Momentum.build("EURUSD").name(), "momentum");
        assert_eq!(StrategyKind::Breakout.build("EURUSD").name(), "breakout");
    }
}

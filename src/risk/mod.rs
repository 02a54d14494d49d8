// Risk management: daily limits, budgets, sizing, vol weighting, drawdown lock
pub mod budgets;
pub mod drawdown;
pub mod sizing;
pub mod vol;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use budgets::{compute_budgets, PortfolioBudgets};
pub use drawdown::{DrawdownLock, DrawdownLockConfig};
pub use sizing::{units_from_risk, PositionSize};
pub use vol::{inv_vol_weights, realized_vol_pips};

/// Per-strategy daily risk rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRules {
    pub max_trades_per_day: u32,
    /// Stop trading for the day once cumulative R falls to this (negative)
    pub daily_loss_stop_r: f64,
    /// Lock gains after a big day
    pub daily_win_stop_r: f64,
}

impl Default for RiskRules {
    fn default() -> Self {
        Self {
            max_trades_per_day: 3,
            daily_loss_stop_r: -2.0,
            daily_win_stop_r: 6.0,
        }
    }
}

/// Risk state for one UTC day
///
/// `cum_r` is only mutated on trade close.
#[derive(Debug, Clone, Default)]
pub struct DayRiskState {
    pub trades: u32,
    pub cum_r: f64,
    pub halted: bool,
}

/// Tracks daily trade counts and cumulative R per UTC day for one
/// (symbol, strategy) engine.
#[derive(Debug, Clone)]
pub struct RiskManager {
    rules: RiskRules,
    day_states: HashMap<NaiveDate, DayRiskState>,
}

impl RiskManager {
    pub fn new(rules: RiskRules) -> Self {
        Self {
            rules,
            day_states: HashMap::new(),
        }
    }

    fn state_mut(&mut self, day: NaiveDate) -> &mut DayRiskState {
        self.day_states.entry(day).or_default()
    }

    /// Cumulative R for a day (0.0 if no trades yet)
    pub fn cum_r(&self, day: NaiveDate) -> f64 {
        self.day_states.get(&day).map(|s| s.cum_r).unwrap_or(0.0)
    }

    pub fn trades(&self, day: NaiveDate) -> u32 {
        self.day_states.get(&day).map(|s| s.trades).unwrap_or(0)
    }

    /// Whether a new trade may be opened on this day
    pub fn can_open(&mut self, day: NaiveDate) -> bool {
        let rules = self.rules.clone();
        let state = self.state_mut(day);

        if state.halted {
            return false;
        }

        if state.trades >= rules.max_trades_per_day {
            return false;
        }

        if state.cum_r <= rules.daily_loss_stop_r || state.cum_r >= rules.daily_win_stop_r {
            state.halted = true;
            return false;
        }

        true
    }

    /// Record a trade opening
    pub fn on_open(&mut self, day: NaiveDate) {
        self.state_mut(day).trades += 1;
    }

    /// Record a trade closing with its realized R-multiple
    pub fn on_close(&mut self, day: NaiveDate, r_multiple: f64) {
        let rules = self.rules.clone();
        let state = self.state_mut(day);
        state.cum_r += r_multiple;

        if state.cum_r <= rules.daily_loss_stop_r || state.cum_r >= rules.daily_win_stop_r {
            state.halted = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    #[test]
    fn test_fresh_day_allows_trading() {
        let mut rm = RiskManager::new(RiskRules::default());
        assert!(rm.can_open(day()));
        assert_eq!(rm.cum_r(day()), 0.0);
    }

    #[test]
    fn test_trade_limit_blocks() {
        let mut rm = RiskManager::new(RiskRules {
            max_trades_per_day: 2,
            ..Default::default()
        });

        rm.on_open(day());
        assert!(rm.can_open(day()));
        rm.on_open(day());
        assert!(!rm.can_open(day()));
    }

    #[test]
    fn test_loss_stop_halts_day() {
        let mut rm = RiskManager::new(RiskRules {
            daily_loss_stop_r: -2.0,
            ..Default::default()
        });

        rm.on_close(day(), -1.0);
        assert!(rm.can_open(day()));
        rm.on_close(day(), -1.2);
        assert!(!rm.can_open(day()));

        // Still halted even if a later close recovers
        rm.on_close(day(), 3.0);
        assert!(!rm.can_open(day()));
    }

    #[test]
    fn test_win_stop_halts_day() {
        let mut rm = RiskManager::new(RiskRules {
            daily_win_stop_r: 6.0,
            ..Default::default()
        });

        rm.on_close(day(), 6.5);
        assert!(!rm.can_open(day()));
    }

    #[test]
    fn test_new_day_resets() {
        let mut rm = RiskManager::new(RiskRules::default());
        rm.on_close(day(), -5.0);
        assert!(!rm.can_open(day()));

        let next = day().succ_opt().unwrap();
        assert!(rm.can_open(next));
        assert_eq!(rm.cum_r(next), 0.0);
    }
}

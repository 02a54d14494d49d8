use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::strategy::StrategyKind;

/// Portfolio-level risk budgets, derived once at startup from config.
///
/// All dollar figures are recomputed from equity and the configured
/// fractions; nothing here is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioBudgets {
    pub equity_usd: f64,
    pub daily_risk_fraction: f64,
    pub per_trade_fraction: f64,
    /// Equal-split daily dollar budget per strategy
    pub per_strategy: HashMap<String, f64>,
}

impl PortfolioBudgets {
    /// Total daily risk budget in USD
    pub fn daily_r_total(&self) -> f64 {
        self.equity_usd * self.daily_risk_fraction
    }

    /// Dollar risk of a single 1R trade
    pub fn per_trade_r(&self) -> f64 {
        self.equity_usd * self.per_trade_fraction
    }

    /// Whether a strategy's cumulative daily R has used up its budget.
    ///
    /// `cum_r` is in R-multiples; one R is `per_trade_r()` dollars. The gate
    /// uses |R| so a runaway winning day also stops adding exposure.
    pub fn exhausted(&self, strategy: &str, cum_r: f64) -> bool {
        let Some(budget_usd) = self.per_strategy.get(strategy) else {
            return true;
        };
        cum_r.abs() * self.per_trade_r() >= *budget_usd
    }
}

/// Equal-split budget allocation across strategies
pub fn compute_budgets(
    strategies: &[StrategyKind],
    equity_usd: f64,
    daily_risk_fraction: f64,
    per_trade_fraction: f64,
) -> PortfolioBudgets {
    let n = strategies.len().max(1) as f64;
    let per_strategy = strategies
        .iter()
        .map(|s| {
            (
                s.as_str().to_string(),
                equity_usd * daily_risk_fraction / n,
            )
        })
        .collect();

    PortfolioBudgets {
        equity_usd,
        daily_risk_fraction,
        per_trade_fraction,
        per_strategy,
    }
}

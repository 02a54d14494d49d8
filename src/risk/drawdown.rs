use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownLockConfig {
    /// Drawdown from peak equity, in percent, that triggers the lock
    pub threshold_pct: f64,
    /// How long new entries stay blocked once the lock trips
    pub cooloff_minutes: i64,
}

impl Default for DrawdownLockConfig {
    fn default() -> Self {
        Self {
            threshold_pct: 5.0,
            cooloff_minutes: 120,
        }
    }
}

/// Portfolio drawdown circuit breaker.
///
/// Tracks peak equity (monotonically non-decreasing) and blocks new entries
/// once drawdown from the peak reaches the threshold. The lock is
/// re-evaluated when the cooloff expires: cleared if equity has recovered to
/// within the threshold, otherwise extended by another full cooloff period.
#[derive(Debug, Clone)]
pub struct DrawdownLock {
    config: DrawdownLockConfig,
    peak_equity: f64,
    active: bool,
    cooloff_until: Option<DateTime<Utc>>,
}

impl DrawdownLock {
    pub fn new(config: DrawdownLockConfig, initial_equity: f64) -> Self {
        Self {
            config,
            peak_equity: initial_equity,
            active: false,
            cooloff_until: None,
        }
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn cooloff_until(&self) -> Option<DateTime<Utc>> {
        self.cooloff_until
    }

    pub fn drawdown_pct(&self, equity: f64) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        ((self.peak_equity - equity) / self.peak_equity * 100.0).max(0.0)
    }

    /// Feed the latest equity; returns true when the lock state changed.
    pub fn update(&mut self, equity: f64, now: DateTime<Utc>) -> bool {
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let dd = self.drawdown_pct(equity);

        if self.active {
            let expired = self
                .cooloff_until
                .map(|until| now >= until)
                .unwrap_or(true);
            if !expired {
                return false;
            }
            if dd < self.config.threshold_pct {
                self.active = false;
                self.cooloff_until = None;
                tracing::info!(drawdown_pct = dd, "drawdown lock cleared");
                return true;
            }
            // Still outside threshold: another full cooloff
            self.cooloff_until = Some(now + Duration::minutes(self.config.cooloff_minutes));
            tracing::warn!(
                drawdown_pct = dd,
                until = %self.cooloff_until.map(|t| t.to_rfc3339()).unwrap_or_default(),
                "drawdown lock extended"
            );
            return false;
        }

        if dd >= self.config.threshold_pct {
            self.active = true;
            self.cooloff_until = Some(now + Duration::minutes(self.config.cooloff_minutes));
            tracing::warn!(
                drawdown_pct = dd,
                peak = self.peak_equity,
                equity,
                "drawdown lock activated"
            );
            return true;
        }

        false
    }
}

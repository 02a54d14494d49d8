use chrono::{NaiveDate, Timelike};

use crate::models::{Bar, Side, Signal};
use crate::strategy::Strategy;

/// Opening-range breakout strategy
///
/// Builds the high/low range of the first `range_minutes` after the session
/// open each UTC day, then enters on the first close beyond the range. Stop
/// at the opposite range edge, target at one range-width beyond entry. At
/// most one entry per day.
pub struct BreakoutStrategy {
    symbol: String,
    session_open_hour: u32,
    range_minutes: u32,
    day: Option<NaiveDate>,
    range_high: f64,
    range_low: f64,
    range_done: bool,
    fired_today: bool,
}

impl BreakoutStrategy {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            session_open_hour: 7,
            range_minutes: 30,
            day: None,
            range_high: f64::MIN,
            range_low: f64::MAX,
            range_done: false,
            fired_today: false,
        }
    }

    fn reset_day(&mut self, day: NaiveDate) {
        self.day = Some(day);
        self.range_high = f64::MIN;
        self.range_low = f64::MAX;
        self.range_done = false;
        self.fired_today = false;
    }

    /// Feed one bar into the day-range state machine
    fn observe(&mut self, bar: &Bar) {
        let day = bar.timestamp.date_naive();
        if self.day != Some(day) {
            self.reset_day(day);
        }

        let minutes_since_open = bar.timestamp.hour() as i64 * 60 + bar.timestamp.minute() as i64
            - self.session_open_hour as i64 * 60;

        if minutes_since_open < 0 {
            return; // pre-session
        }

        if (minutes_since_open as u32) < self.range_minutes {
            self.range_high = self.range_high.max(bar.high);
            self.range_low = self.range_low.min(bar.low);
        } else if self.range_high > f64::MIN {
            self.range_done = true;
        }
    }
}

impl Strategy for BreakoutStrategy {
    fn name(&self) -> &str {
        "breakout"
    }

    fn prepare(&mut self, bars: &[Bar]) {
        for bar in bars {
            self.observe(bar);
        }
        tracing::debug!(
            "breakout prepared for {} on {} warmup bars",
            self.symbol,
            bars.len()
        );
    }

    fn generate_signals(&mut self, bars: &[Bar]) -> Vec<Signal> {
        let Some(bar) = bars.last() else {
            return Vec::new();
        };
        self.observe(bar);

        if !self.range_done || self.fired_today {
            return Vec::new();
        }

        let width = self.range_high - self.range_low;
        if width <= 0.0 {
            return Vec::new();
        }

        let price = bar.close;
        let signal = if price > self.range_high {
            Signal {
                side: Side::Long,
                price,
                stop_loss: self.range_low,
                take_profit: price + width,
                notes: "range break up".to_string(),
            }
        } else if price < self.range_low {
            Signal {
                side: Side::Short,
                price,
                stop_loss: self.range_high,
                take_profit: price - width,
                notes: "range break down".to_string(),
            }
        } else {
            return Vec::new();
        };

        self.fired_today = true;
        vec![signal]
    }

    fn min_bars_required(&self) -> usize {
        // One range worth of 5m bars
        (self.range_minutes / 5).max(1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar_at(hour: u32, minute: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            symbol: "EURUSD".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn test_break_above_range_goes_long() {
        let mut strategy = BreakoutStrategy::new("EURUSD");
        let mut bars = vec![
            bar_at(7, 0, 1.1000, 1.1010, 1.0990, 1.1005),
            bar_at(7, 5, 1.1005, 1.1012, 1.0995, 1.1000),
            bar_at(7, 10, 1.1000, 1.1008, 1.0992, 1.1002),
            bar_at(7, 15, 1.1002, 1.1010, 1.0994, 1.1006),
            bar_at(7, 20, 1.1006, 1.1011, 1.0996, 1.1004),
            bar_at(7, 25, 1.1004, 1.1009, 1.0993, 1.1001),
        ];

        let mut signals = Vec::new();
        for i in 0..bars.len() {
            signals.extend(strategy.generate_signals(&bars[..=i]));
        }
        assert!(signals.is_empty(), "no signal while building the range");

        // Close above the 1.1012 range high
        bars.push(bar_at(7, 30, 1.1001, 1.1025, 1.1000, 1.1020));
        signals.extend(strategy.generate_signals(&bars));

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Long);
        assert_eq!(signals[0].stop_loss, 1.0990);
    }

    #[test]
    fn test_one_entry_per_day() {
        let mut strategy = BreakoutStrategy::new("EURUSD");
        let mut bars: Vec<Bar> = (0..6)
            .map(|i| bar_at(7, i * 5, 1.1000, 1.1010, 1.0990, 1.1000))
            .collect();

        for i in 0..bars.len() {
            strategy.generate_signals(&bars[..=i]);
        }

        bars.push(bar_at(7, 30, 1.1000, 1.1025, 1.1000, 1.1020));
        assert_eq!(strategy.generate_signals(&bars).len(), 1);

        // A second breakout bar the same day produces nothing
        bars.push(bar_at(7, 35, 1.1020, 1.1040, 1.1015, 1.1035));
        assert!(strategy.generate_signals(&bars).is_empty());
    }

    #[test]
    fn test_range_resets_next_day() {
        let mut strategy = BreakoutStrategy::new("EURUSD");
        let mut bars: Vec<Bar> = (0..6)
            .map(|i| bar_at(7, i * 5, 1.1000, 1.1010, 1.0990, 1.1000))
            .collect();
        bars.push(bar_at(7, 30, 1.1000, 1.1025, 1.1000, 1.1020));

        for i in 0..bars.len() {
            strategy.generate_signals(&bars[..=i]);
        }
        assert!(strategy.fired_today);

        // First bar of the next day clears the fired flag and the range
        let next_day = Bar {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 3, 7, 0, 0).unwrap(),
            ..bars[0].clone()
        };
        bars.push(next_day);
        strategy.generate_signals(&bars);
        assert!(!strategy.fired_today);
        assert!(!strategy.range_done);
    }
}

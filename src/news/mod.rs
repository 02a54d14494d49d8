// Economic calendar guard: blocks new entries around high-impact events
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Deserialize;

use crate::data::symbols::symbol_currencies;

/// One padded no-entry window around a calendar event
#[derive(Debug, Clone)]
pub struct EventWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub currencies: Vec<String>,
    pub impact: String,
    pub title: String,
}

impl EventWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

#[derive(Debug, Deserialize)]
struct CalendarRow {
    date: String,
    time_utc: String,
    currencies: String,
    impact: String,
    title: String,
}

/// Blocks new entries for symbols whose currencies intersect an active
/// event window. Open positions are never touched.
#[derive(Debug, Clone, Default)]
pub struct NewsGuard {
    windows: Vec<EventWindow>,
}

impl NewsGuard {
    pub fn new(windows: Vec<EventWindow>) -> Self {
        Self { windows }
    }

    /// Load a calendar CSV with columns date,time_utc,currencies,impact,title
    /// and pad each event by the given minutes on both sides.
    pub fn from_csv(path: &Path, pad_before_m: i64, pad_after_m: i64) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("open calendar csv {}", path.display()))?;

        let mut windows = Vec::new();
        for row in reader.deserialize() {
            let row: CalendarRow = row.context("malformed calendar row")?;

            let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
                .with_context(|| format!("bad calendar date {}", row.date))?;
            let time = NaiveTime::parse_from_str(&row.time_utc, "%H:%M")
                .with_context(|| format!("bad calendar time {}", row.time_utc))?;
            let event_time = Utc.from_utc_datetime(&date.and_time(time));

            windows.push(EventWindow {
                start: event_time - Duration::minutes(pad_before_m),
                end: event_time + Duration::minutes(pad_after_m),
                currencies: row
                    .currencies
                    .split(',')
                    .map(|c| c.trim().to_uppercase())
                    .filter(|c| !c.is_empty())
                    .collect(),
                impact: row.impact,
                title: row.title,
            });
        }
        windows.sort_by_key(|w| w.start);

        tracing::info!(events = windows.len(), path = %path.display(), "calendar loaded");
        Ok(Self { windows })
    }

    /// The window blocking this symbol right now, if any
    pub fn blocking_window(&self, symbol: &str, at: DateTime<Utc>) -> Option<&EventWindow> {
        let pair = symbol_currencies(symbol);
        self.windows.iter().find(|w| {
            w.contains(at) && w.currencies.iter().any(|c| pair.contains(c))
        })
    }

    pub fn is_blocked(&self, symbol: &str, at: DateTime<Utc>) -> bool {
        self.blocking_window(symbol, at).is_some()
    }
}

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Timelike, Utc};

/// A daily UTC trading window in minutes-of-day, end exclusive.
///
/// Windows may wrap midnight (start > end), e.g. 22:00-02:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    start_minutes: u32,
    end_minutes: u32,
}

impl SessionWindow {
    pub fn new(start: &str, end: &str) -> Result<Self> {
        Ok(Self {
            start_minutes: parse_hhmm(start)?,
            end_minutes: parse_hhmm(end)?,
        })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let minutes = at.hour() * 60 + at.minute();
        if self.start_minutes <= self.end_minutes {
            minutes >= self.start_minutes && minutes < self.end_minutes
        } else {
            minutes >= self.start_minutes || minutes < self.end_minutes
        }
    }
}

fn parse_hhmm(value: &str) -> Result<u32> {
    let (h, m) = value
        .split_once(':')
        .with_context(|| format!("session time {value:?} is not HH:MM"))?;
    let hours: u32 = h.parse().with_context(|| format!("bad hour in {value:?}"))?;
    let minutes: u32 = m
        .parse()
        .with_context(|| format!("bad minute in {value:?}"))?;
    if hours > 23 || minutes > 59 {
        bail!("session time {value:?} out of range");
    }
    Ok(hours * 60 + minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_day_window_containment() {
        let window = SessionWindow::new("07:00", "16:00").unwrap();
        assert!(!window.contains(at(6, 59)));
        assert!(window.contains(at(7, 0)));
        assert!(window.contains(at(15, 59)));
        assert!(!window.contains(at(16, 0)));
    }

    #[test]
    fn test_overnight_window_wraps() {
        let window = SessionWindow::new("22:00", "02:00").unwrap();
        assert!(window.contains(at(23, 30)));
        assert!(window.contains(at(1, 59)));
        assert!(!window.contains(at(2, 0)));
        assert!(!window.contains(at(12, 0)));
    }

    #[test]
    fn test_bad_times_rejected() {
        assert!(SessionWindow::new("7am", "16:00").is_err());
        assert!(SessionWindow::new("25:00", "16:00").is_err());
        assert!(SessionWindow::new("07:61", "16:00").is_err());
    }
}

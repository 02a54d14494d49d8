use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

/// One status line, serialized to JSONL for offline reporting
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub ts: DateTime<Utc>,
    pub equity_usd: f64,
    pub peak_equity: f64,
    pub open_positions: usize,
    pub trades_closed: usize,
    pub total_pnl: f64,
    pub total_r: f64,
    pub global_halt: bool,
    pub dd_lock_active: bool,
    pub unmapped_trades: i64,
}

/// Append-only JSONL status log, one file per UTC day
pub struct StatusWriter {
    dir: PathBuf,
}

impl StatusWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn write(&self, snapshot: &StatusSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create status dir {}", self.dir.display()))?;
        let path = self
            .dir
            .join(format!("status_{}.jsonl", snapshot.ts.format("%Y%m%d")));

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open status log {}", path.display()))?;
        let line = serde_json::to_string(snapshot)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(ts: DateTime<Utc>) -> StatusSnapshot {
        StatusSnapshot {
            ts,
            equity_usd: 100_500.0,
            peak_equity: 101_000.0,
            open_positions: 1,
            trades_closed: 3,
            total_pnl: 500.0,
            total_r: 1.0,
            global_halt: false,
            dd_lock_active: false,
            unmapped_trades: 0,
        }
    }

    #[test]
    fn test_appends_one_line_per_snapshot_per_day() {
        let dir = std::env::temp_dir().join(format!("fxport-status-{}", uuid::Uuid::new_v4()));
        let writer = StatusWriter::new(&dir);

        let day1 = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();
        writer.write(&snapshot(day1)).unwrap();
        writer.write(&snapshot(day1)).unwrap();
        writer.write(&snapshot(day2)).unwrap();

        let file1 = std::fs::read_to_string(dir.join("status_20250602.jsonl")).unwrap();
        assert_eq!(file1.lines().count(), 2);
        let parsed: serde_json::Value = serde_json::from_str(file1.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["equity_usd"], 100_500.0);

        let file2 = std::fs::read_to_string(dir.join("status_20250603.jsonl")).unwrap();
        assert_eq!(file2.lines().count(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}

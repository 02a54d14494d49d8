use std::fs::File;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::Bar;

/// Source of historical intraday bars.
///
/// The only contract: bars come back in ascending time order, or the call
/// fails. Live websocket feeds sit behind the same seam.
pub trait DataProvider {
    /// Fetch up to `days` days of bars for `symbol` at the given interval
    /// (e.g. "5m"), oldest first.
    fn get_intraday(&self, symbol: &str, interval: &str, days: u32) -> anyhow::Result<Vec<Bar>>;
}

#[derive(Debug, Deserialize)]
struct BarRow {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Replay provider backed by per-symbol CSV files.
///
/// Expects `{dir}/{SYMBOL}_{interval}.csv` with header
/// `timestamp,open,high,low,close,volume`.
pub struct CsvBarProvider {
    dir: PathBuf,
}

impl CsvBarProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DataProvider for CsvBarProvider {
    fn get_intraday(&self, symbol: &str, interval: &str, days: u32) -> anyhow::Result<Vec<Bar>> {
        let path = self.dir.join(format!("{}_{}.csv", symbol.to_uppercase(), interval));
        let file = File::open(&path)
            .with_context(|| format!("no replay data at {}", path.display()))?;

        let mut reader = csv::Reader::from_reader(file);
        let mut bars = Vec::new();

        for row in reader.deserialize() {
            let row: BarRow = row.context("malformed bar row")?;
            bars.push(Bar {
                symbol: symbol.to_uppercase(),
                timestamp: row.timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        if bars.is_empty() {
            anyhow::bail!("replay file {} contained no bars", path.display());
        }

        // Bars must be in ascending time order
        for pair in bars.windows(2) {
            if pair[1].timestamp < pair[0].timestamp {
                anyhow::bail!("bars out of order in {}", path.display());
            }
        }

        // Trim to the last `days` of data
        if let Some(last) = bars.last() {
            let cutoff = last.timestamp - chrono::Duration::days(days as i64);
            bars.retain(|b| b.timestamp >= cutoff);
        }

        tracing::info!("Loaded {} bars for {} from {}", bars.len(), symbol, path.display());

        Ok(bars)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One OHLCV bar for a symbol at a fixed interval.
///
/// Bars are immutable once produced and appended to a per-engine series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Trade direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

/// Entry signal produced by a strategy for the current bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub side: Side,
    /// Desired entry price (mid). Costs are applied by the engine.
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub notes: String,
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    /// Session window ended while the position was still open
    TimeStop,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "SL",
            ExitReason::TakeProfit => "TP",
            ExitReason::TimeStop => "TIME",
            ExitReason::Manual => "MANUAL",
        }
    }
}

/// An open position, owned exclusively by one symbol engine.
///
/// Destroyed (set to None on the engine) when closed; the closed record
/// becomes a [`Trade`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub strategy: String,
    pub side: Side,
    pub entry_price: f64,
    /// Stop loss at entry time; R-multiples are computed against this.
    pub initial_stop: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub units: u32,
    pub entry_time: DateTime<Utc>,
    pub client_tag: Option<String>,
    pub notes: String,
}

/// Closed position record. Created exactly once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub symbol: String,
    pub strategy: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub units: u32,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl: f64,
    pub r_multiple: f64,
    pub reason: ExitReason,
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_roundtrip() {
        assert_eq!(Side::Long.as_str(), "long");
        assert_eq!(Side::Short.as_str(), "short");

        let json = serde_json::to_string(&Side::Long).unwrap();
        assert_eq!(json, "\"long\"");
        let back: Side = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Side::Long);
    }

    #[test]
    fn test_position_creation() {
        let position = Position {
            id: Uuid::new_v4(),
            symbol: "EURUSD".to_string(),
            strategy: "momentum".to_string(),
            side: Side::Long,
            entry_price: 1.1000,
            initial_stop: 1.0980,
            stop_loss: 1.0980,
            take_profit: 1.1040,
            units: 2500,
            entry_time: Utc::now(),
            client_tag: None,
            notes: String::new(),
        };

        assert_eq!(position.side, Side::Long);
        assert_eq!(position.units, 2500);
        assert!(position.stop_loss < position.entry_price);
    }
}

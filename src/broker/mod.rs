// Broker adapters: live OANDA mirroring plus an in-process simulator
pub mod mirror;
pub mod oanda;
pub mod sim;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::Side;

pub use mirror::TradeMirror;
pub use oanda::OandaClient;
pub use sim::SimBroker;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("broker api error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Result of a market order placement
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: String,
    pub filled_price: Option<f64>,
    /// True when an order with the same client tag already existed
    pub idempotent: bool,
}

/// A recent broker-side fill, used by the pending-mapping linker
#[derive(Debug, Clone)]
pub struct BrokerTrade {
    pub order_id: String,
    pub symbol: String,
    pub client_tag: Option<String>,
    pub time: DateTime<Utc>,
}

/// A net open position on the broker side (netting mode, one per instrument)
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    /// Signed: positive long, negative short
    pub units: f64,
    pub avg_price: f64,
    pub unrealized_pnl: f64,
}

/// Minimal broker surface the mirror and reconciler need.
///
/// Implementations must honor `client_tag` idempotency: placing the same tag
/// twice yields the original order, never a duplicate.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn place_market(
        &self,
        symbol: &str,
        side: Side,
        units: u32,
        sl: Option<f64>,
        tp: Option<f64>,
        client_tag: &str,
    ) -> Result<OrderResult, BrokerError>;

    async fn get_open_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Close the net position for a symbol (netting mode)
    async fn close_position(&self, symbol: &str) -> Result<(), BrokerError>;

    /// Look up a recent order by its client tag, bounded by the lookback
    async fn find_order_by_tag(&self, client_tag: &str) -> Result<Option<String>, BrokerError>;

    /// Fills placed since the given time, newest lookback window only
    async fn get_trades_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<BrokerTrade>, BrokerError>;
}

/// Build the idempotency tag carried on every mirrored order:
/// `FXP::strategy::symbol::timestamp::random-suffix`.
pub fn client_tag(strategy: &str, symbol: &str, at: DateTime<Utc>) -> String {
    let suffix: String = {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        (0..8)
            .map(|_| {
                let chars = b"abcdef0123456789";
                chars[rng.gen_range(0..chars.len())] as char
            })
            .collect()
    };
    format!(
        "FXP::{}::{}::{}::{}",
        strategy,
        symbol,
        at.format("%Y%m%d%H%M%S"),
        suffix
    )
}

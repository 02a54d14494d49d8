// SQLite journal: the durable record behind crash recovery and reconciliation
mod store;

pub use store::{BrokerOrderRow, EngineTradeRow, EventRow, JournalStore, MappingRow};

/// Event kinds written to the journal's events table
pub mod event_kind {
    pub const FLATTEN_ORPHAN: &str = "FLATTEN_ORPHAN";
    pub const MIRROR_ERROR: &str = "MIRROR_ERROR";
    pub const LINKED_PENDING: &str = "LINKED_PENDING";
    pub const RECONCILE_START: &str = "RECONCILE_START";
    pub const DRAWDOWN_LOCK: &str = "DRAWDOWN_LOCK";
    pub const GLOBAL_HALT: &str = "GLOBAL_HALT";
}

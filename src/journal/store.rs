use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// A broker-side order as the journal knows it
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BrokerOrderRow {
    pub order_id: String,
    pub client_tag: String,
    pub symbol: String,
    pub side: String,
    pub units: i64,
    pub entry: Option<f64>,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub status: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// An internal trade row; `closed_at` NULL means still open
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EngineTradeRow {
    pub trade_id: String,
    pub symbol: String,
    pub strategy: String,
    pub side: String,
    pub entry: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub r: Option<f64>,
    pub pnl: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub client_tag: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MappingRow {
    pub trade_id: String,
    pub order_id: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub level: String,
    pub kind: String,
    pub payload: Option<String>,
}

/// SQLite-backed journal.
///
/// One writer process by convention; every write is a single statement so
/// SQLite's own transaction per statement is enough for crash safety.
pub struct JournalStore {
    pool: SqlitePool,
}

impl JournalStore {
    /// Open (and create if missing) a journal database file
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        tracing::info!("Journal opened at {}", database_url);
        Ok(store)
    }

    /// In-memory journal for tests and dry runs
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS broker_orders (
                order_id TEXT PRIMARY KEY,
                client_tag TEXT UNIQUE,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                units INTEGER NOT NULL,
                entry REAL,
                sl REAL,
                tp REAL,
                status TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS engine_trades (
                trade_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                strategy TEXT NOT NULL,
                side TEXT NOT NULL,
                entry REAL NOT NULL,
                sl REAL,
                tp REAL,
                r REAL,
                pnl REAL,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                client_tag TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_map (
                trade_id TEXT NOT NULL,
                order_id TEXT NOT NULL,
                PRIMARY KEY (trade_id, order_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                level TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_broker_orders_status ON broker_orders(status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_engine_trades_closed_at ON engine_trades(closed_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn upsert_broker_order(&self, row: &BrokerOrderRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO broker_orders
                (order_id, client_tag, symbol, side, units, entry, sl, tp, status, opened_at, closed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(order_id) DO UPDATE SET
                status = excluded.status,
                closed_at = excluded.closed_at
            "#,
        )
        .bind(&row.order_id)
        .bind(&row.client_tag)
        .bind(&row.symbol)
        .bind(&row.side)
        .bind(row.units)
        .bind(row.entry)
        .bind(row.sl)
        .bind(row.tp)
        .bind(&row.status)
        .bind(row.opened_at)
        .bind(row.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_engine_trade(&self, row: &EngineTradeRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO engine_trades
                (trade_id, symbol, strategy, side, entry, sl, tp, r, pnl, opened_at, closed_at, client_tag)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(trade_id) DO UPDATE SET
                r = excluded.r,
                pnl = excluded.pnl,
                closed_at = excluded.closed_at,
                client_tag = COALESCE(excluded.client_tag, engine_trades.client_tag)
            "#,
        )
        .bind(&row.trade_id)
        .bind(&row.symbol)
        .bind(&row.strategy)
        .bind(&row.side)
        .bind(row.entry)
        .bind(row.sl)
        .bind(row.tp)
        .bind(row.r)
        .bind(row.pnl)
        .bind(row.opened_at)
        .bind(row.closed_at)
        .bind(&row.client_tag)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Link an internal trade to a broker order (idempotent)
    pub async fn link(&self, trade_id: &str, order_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO trade_map (trade_id, order_id) VALUES (?, ?)")
            .bind(trade_id)
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn log_event(&self, level: &str, kind: &str, payload: &serde_json::Value) -> Result<()> {
        sqlx::query("INSERT INTO events (ts, level, kind, payload) VALUES (?, ?, ?, ?)")
            .bind(Utc::now())
            .bind(level)
            .bind(kind)
            .bind(payload.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn find_order_by_tag(&self, client_tag: &str) -> Result<Option<BrokerOrderRow>> {
        let row = sqlx::query_as::<_, BrokerOrderRow>(
            "SELECT * FROM broker_orders WHERE client_tag = ?",
        )
        .bind(client_tag)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn has_order(&self, order_id: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM broker_orders WHERE order_id = ?")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn open_broker_orders(&self) -> Result<Vec<BrokerOrderRow>> {
        let rows = sqlx::query_as::<_, BrokerOrderRow>(
            "SELECT * FROM broker_orders WHERE status = 'open' AND closed_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn open_engine_trades(&self) -> Result<Vec<EngineTradeRow>> {
        let rows = sqlx::query_as::<_, EngineTradeRow>(
            "SELECT * FROM engine_trades WHERE closed_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Open internal trades with no broker order linked yet
    pub async fn pending_mappings(&self) -> Result<Vec<EngineTradeRow>> {
        let rows = sqlx::query_as::<_, EngineTradeRow>(
            r#"
            SELECT t.* FROM engine_trades t
            LEFT JOIN trade_map m ON t.trade_id = m.trade_id
            WHERE m.order_id IS NULL AND t.closed_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn unmapped_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM engine_trades t
            LEFT JOIN trade_map m ON t.trade_id = m.trade_id
            WHERE m.order_id IS NULL AND t.closed_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn mappings(&self) -> Result<Vec<MappingRow>> {
        let rows = sqlx::query_as::<_, MappingRow>("SELECT trade_id, order_id FROM trade_map")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn recent_events(&self, n: i64) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT id, ts, level, kind, payload FROM events ORDER BY id DESC LIMIT ?",
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn events_of_kind(&self, kind: &str) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT id, ts, level, kind, payload FROM events WHERE kind = ? ORDER BY id ASC",
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(order_id: &str, tag: &str) -> BrokerOrderRow {
        BrokerOrderRow {
            order_id: order_id.to_string(),
            client_tag: tag.to_string(),
            symbol: "EURUSD".to_string(),
            side: "long".to_string(),
            units: 2500,
            entry: Some(1.1001),
            sl: Some(1.0980),
            tp: Some(1.1040),
            status: "open".to_string(),
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    fn trade(trade_id: &str) -> EngineTradeRow {
        EngineTradeRow {
            trade_id: trade_id.to_string(),
            symbol: "EURUSD".to_string(),
            strategy: "momentum".to_string(),
            side: "long".to_string(),
            entry: 1.1001,
            sl: Some(1.0980),
            tp: Some(1.1040),
            r: None,
            pnl: None,
            opened_at: Utc::now(),
            closed_at: None,
            client_tag: None,
        }
    }

    #[tokio::test]
    async fn test_broker_order_upsert_and_lookup() {
        let store = JournalStore::in_memory().await.unwrap();
        store.upsert_broker_order(&order("o-1", "tag-1")).await.unwrap();

        let found = store.find_order_by_tag("tag-1").await.unwrap().unwrap();
        assert_eq!(found.order_id, "o-1");
        assert!(store.has_order("o-1").await.unwrap());
        assert!(!store.has_order("o-2").await.unwrap());

        // Re-upsert with a new status updates in place
        let mut closed = order("o-1", "tag-1");
        closed.status = "closed".to_string();
        closed.closed_at = Some(Utc::now());
        store.upsert_broker_order(&closed).await.unwrap();
        assert!(store.open_broker_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_mappings_and_link() {
        let store = JournalStore::in_memory().await.unwrap();
        store.upsert_engine_trade(&trade("t-1")).await.unwrap();
        store.upsert_engine_trade(&trade("t-2")).await.unwrap();

        assert_eq!(store.unmapped_count().await.unwrap(), 2);

        store.upsert_broker_order(&order("o-1", "tag-1")).await.unwrap();
        store.link("t-1", "o-1").await.unwrap();
        store.link("t-1", "o-1").await.unwrap(); // idempotent

        let pending = store.pending_mappings().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].trade_id, "t-2");
        assert_eq!(store.mappings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_trade_close_updates_row() {
        let store = JournalStore::in_memory().await.unwrap();
        let mut row = trade("t-1");
        store.upsert_engine_trade(&row).await.unwrap();
        assert_eq!(store.open_engine_trades().await.unwrap().len(), 1);

        row.r = Some(-1.0);
        row.pnl = Some(-500.0);
        row.closed_at = Some(Utc::now());
        store.upsert_engine_trade(&row).await.unwrap();
        assert!(store.open_engine_trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_are_append_only() {
        let store = JournalStore::in_memory().await.unwrap();
        store
            .log_event("ERROR", "MIRROR_ERROR", &serde_json::json!({"symbol": "EURUSD"}))
            .await
            .unwrap();
        store
            .log_event("INFO", "RECONCILE_START", &serde_json::json!({}))
            .await
            .unwrap();

        let recent = store.recent_events(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, "RECONCILE_START");

        let errors = store.events_of_kind("MIRROR_ERROR").await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].level, "ERROR");
    }
}

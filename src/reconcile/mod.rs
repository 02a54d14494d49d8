// Startup reconciliation: broker state vs journal state
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::broker::BrokerAdapter;
use crate::journal::{event_kind, JournalStore};
use crate::Result;

/// Fallback match window for (instrument, open-time) proximity linking
const PROXIMITY_SECS: i64 = 300;

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileSummary {
    pub broker_positions: usize,
    pub journal_orders: usize,
    pub orphaned: usize,
    pub flattened: usize,
    pub linked: usize,
    pub errors: Vec<String>,
}

/// Compares broker open positions against the journal and resolves drift.
///
/// Orphans (broker positions the journal never heard of) are force-flattened
/// under `flatten_on_conflict`; internal trades without a broker mapping are
/// linked by tag, then by instrument and open-time proximity.
pub struct ReconcileEngine {
    broker: Arc<dyn BrokerAdapter>,
    journal: Arc<JournalStore>,
    flatten_on_conflict: bool,
    /// How far back to scan broker fills when linking pending trades; shares
    /// the broker `tag_lookback_hours` setting
    link_lookback_hours: i64,
}

impl ReconcileEngine {
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        journal: Arc<JournalStore>,
        flatten_on_conflict: bool,
        link_lookback_hours: i64,
    ) -> Self {
        Self {
            broker,
            journal,
            flatten_on_conflict,
            link_lookback_hours,
        }
    }

    /// Full startup pass: orphan handling then pending-mapping linking
    pub async fn on_start(&self) -> Result<ReconcileSummary> {
        self.journal
            .log_event("INFO", event_kind::RECONCILE_START, &serde_json::json!({}))
            .await?;

        let broker_positions = self.broker.get_open_positions().await?;
        let journal_orders = self.journal.open_broker_orders().await?;

        let mut orphaned = Vec::new();
        for position in &broker_positions {
            let known = journal_orders.iter().any(|o| o.symbol == position.symbol);
            if !known {
                orphaned.push(position.clone());
            }
        }

        let mut flattened = 0;
        let mut errors = Vec::new();
        if self.flatten_on_conflict {
            for orphan in &orphaned {
                self.journal
                    .log_event(
                        "WARN",
                        event_kind::FLATTEN_ORPHAN,
                        &serde_json::json!({
                            "symbol": orphan.symbol,
                            "units": orphan.units,
                            "reason": "not_in_journal",
                        }),
                    )
                    .await?;

                match self.broker.close_position(&orphan.symbol).await {
                    Ok(()) => {
                        flattened += 1;
                        tracing::warn!(symbol = %orphan.symbol, units = orphan.units, "orphan flattened");
                    }
                    Err(e) => {
                        tracing::error!(symbol = %orphan.symbol, error = %e, "orphan flatten failed");
                        errors.push(format!("flatten {}: {}", orphan.symbol, e));
                        self.journal
                            .log_event(
                                "ERROR",
                                event_kind::MIRROR_ERROR,
                                &serde_json::json!({
                                    "action": "flatten",
                                    "symbol": orphan.symbol,
                                    "error": e.to_string(),
                                }),
                            )
                            .await?;
                    }
                }
            }
        }

        let linked = self.link_pending().await?;

        let summary = ReconcileSummary {
            broker_positions: broker_positions.len(),
            journal_orders: journal_orders.len(),
            orphaned: orphaned.len(),
            flattened,
            linked,
            errors,
        };
        tracing::info!(
            broker = summary.broker_positions,
            journal = summary.journal_orders,
            orphaned = summary.orphaned,
            flattened = summary.flattened,
            linked = summary.linked,
            "reconciliation complete"
        );
        Ok(summary)
    }

    /// Link journal trades that never got a broker mapping.
    ///
    /// Exact client-tag match first; failing that, same instrument with an
    /// open time within five minutes.
    pub async fn link_pending(&self) -> Result<usize> {
        let pending = self.journal.pending_mappings().await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let since = Utc::now() - Duration::hours(self.link_lookback_hours);
        let broker_trades = self.broker.get_trades_since(since).await?;

        let mut linked = 0;
        for trade in &pending {
            let by_tag = trade.client_tag.as_deref().and_then(|tag| {
                broker_trades
                    .iter()
                    .find(|bt| bt.client_tag.as_deref() == Some(tag))
            });

            let matched = by_tag.or_else(|| {
                broker_trades.iter().find(|bt| {
                    bt.symbol == trade.symbol
                        && (bt.time - trade.opened_at).num_seconds().abs() < PROXIMITY_SECS
                })
            });

            if let Some(bt) = matched {
                self.journal.link(&trade.trade_id, &bt.order_id).await?;
                self.journal
                    .log_event(
                        "INFO",
                        event_kind::LINKED_PENDING,
                        &serde_json::json!({
                            "trade_id": trade.trade_id,
                            "order_id": bt.order_id,
                        }),
                    )
                    .await?;
                linked += 1;
            }
        }

        Ok(linked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SimBroker;
    use crate::journal::{BrokerOrderRow, EngineTradeRow};
    use crate::models::Side;

    async fn setup() -> (Arc<SimBroker>, Arc<JournalStore>) {
        (
            Arc::new(SimBroker::new()),
            Arc::new(JournalStore::in_memory().await.unwrap()),
        )
    }

    #[tokio::test]
    async fn test_orphan_is_flattened_with_single_event() {
        let (broker, journal) = setup().await;
        broker.seed_position("EURUSD", 5000.0, 1.1000);

        let engine = ReconcileEngine::new(broker.clone(), journal.clone(), true, 24);
        let summary = engine.on_start().await.unwrap();

        assert_eq!(summary.orphaned, 1);
        assert_eq!(summary.flattened, 1);
        assert!(broker.get_open_positions().await.unwrap().is_empty());

        let events = journal.events_of_kind("FLATTEN_ORPHAN").await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_known_position_is_left_alone() {
        let (broker, journal) = setup().await;
        broker.seed_position("EURUSD", 5000.0, 1.1000);
        journal
            .upsert_broker_order(&BrokerOrderRow {
                order_id: "o-1".to_string(),
                client_tag: "tag-1".to_string(),
                symbol: "EURUSD".to_string(),
                side: "long".to_string(),
                units: 5000,
                entry: Some(1.1000),
                sl: None,
                tp: None,
                status: "open".to_string(),
                opened_at: Utc::now(),
                closed_at: None,
            })
            .await
            .unwrap();

        let engine = ReconcileEngine::new(broker.clone(), journal, true, 24);
        let summary = engine.on_start().await.unwrap();

        assert_eq!(summary.orphaned, 0);
        assert_eq!(summary.flattened, 0);
        assert_eq!(broker.get_open_positions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_flatten_disabled_keeps_orphans() {
        let (broker, journal) = setup().await;
        broker.seed_position("GBPUSD", -2000.0, 1.2700);

        let engine = ReconcileEngine::new(broker.clone(), journal.clone(), false, 24);
        let summary = engine.on_start().await.unwrap();

        assert_eq!(summary.orphaned, 1);
        assert_eq!(summary.flattened, 0);
        assert_eq!(broker.get_open_positions().await.unwrap().len(), 1);
        assert!(journal
            .events_of_kind("FLATTEN_ORPHAN")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_link_pending_by_tag() {
        let (broker, journal) = setup().await;
        let tag = "FXP::momentum::EURUSD::20250602::abcd1234";
        broker
            .place_market("EURUSD", Side::Long, 2500, None, None, tag)
            .await
            .unwrap();

        journal
            .upsert_engine_trade(&EngineTradeRow {
                trade_id: "t-1".to_string(),
                symbol: "EURUSD".to_string(),
                strategy: "momentum".to_string(),
                side: "long".to_string(),
                entry: 1.1001,
                sl: None,
                tp: None,
                r: None,
                pnl: None,
                opened_at: Utc::now(),
                closed_at: None,
                client_tag: Some(tag.to_string()),
            })
            .await
            .unwrap();

        let engine = ReconcileEngine::new(broker, journal.clone(), true, 24);
        let linked = engine.link_pending().await.unwrap();

        assert_eq!(linked, 1);
        assert_eq!(journal.unmapped_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_link_pending_by_proximity_fallback() {
        let (broker, journal) = setup().await;
        // Broker order placed without the journal ever learning the tag
        broker
            .place_market("EURUSD", Side::Long, 2500, None, None, "lost-tag")
            .await
            .unwrap();

        journal
            .upsert_engine_trade(&EngineTradeRow {
                trade_id: "t-1".to_string(),
                symbol: "EURUSD".to_string(),
                strategy: "momentum".to_string(),
                side: "long".to_string(),
                entry: 1.1001,
                sl: None,
                tp: None,
                r: None,
                pnl: None,
                opened_at: Utc::now(),
                closed_at: None,
                client_tag: Some("different-tag".to_string()),
            })
            .await
            .unwrap();

        let engine = ReconcileEngine::new(broker, journal.clone(), true, 24);
        let linked = engine.link_pending().await.unwrap();

        assert_eq!(linked, 1);
        assert_eq!(journal.unmapped_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_link_scan_respects_lookback_window() {
        let (broker, journal) = setup().await;
        let tag = "FXP::momentum::EURUSD::20250602::abcd1234";
        broker
            .place_market("EURUSD", Side::Long, 2500, None, None, tag)
            .await
            .unwrap();

        journal
            .upsert_engine_trade(&EngineTradeRow {
                trade_id: "t-1".to_string(),
                symbol: "EURUSD".to_string(),
                strategy: "momentum".to_string(),
                side: "long".to_string(),
                entry: 1.1001,
                sl: None,
                tp: None,
                r: None,
                pnl: None,
                opened_at: Utc::now(),
                closed_at: None,
                client_tag: Some(tag.to_string()),
            })
            .await
            .unwrap();

        // Zero-hour window starts after the fill landed, so nothing matches
        let engine = ReconcileEngine::new(broker, journal.clone(), true, 0);
        let linked = engine.link_pending().await.unwrap();

        assert_eq!(linked, 0);
        assert_eq!(journal.unmapped_count().await.unwrap(), 1);
    }
}

use chrono::Utc;
use std::sync::Arc;

use crate::broker::{client_tag, BrokerAdapter};
use crate::journal::{event_kind, BrokerOrderRow, JournalStore};
use crate::models::{Position, Trade};

/// Best-effort broker mirroring.
///
/// The internal ledger is authoritative; every failure here is journaled and
/// swallowed so the bar loop never stalls on the broker.
pub struct TradeMirror {
    broker: Arc<dyn BrokerAdapter>,
    journal: Arc<JournalStore>,
}

impl TradeMirror {
    pub fn new(broker: Arc<dyn BrokerAdapter>, journal: Arc<JournalStore>) -> Self {
        Self { broker, journal }
    }

    async fn journal_error(&self, kind: &str, payload: serde_json::Value) {
        if let Err(e) = self.journal.log_event("ERROR", kind, &payload).await {
            tracing::error!(error = %e, "journal write failed while recording mirror error");
        }
    }

    /// Mirror a freshly opened position. Returns the client tag used, which
    /// the caller attaches to the position for crash recovery.
    pub async fn on_open(&self, position: &Position) -> Option<String> {
        let tag = position
            .client_tag
            .clone()
            .unwrap_or_else(|| client_tag(&position.strategy, &position.symbol, position.entry_time));

        let placed = self
            .broker
            .place_market(
                &position.symbol,
                position.side,
                position.units,
                Some(position.stop_loss),
                Some(position.take_profit),
                &tag,
            )
            .await;

        match placed {
            Ok(result) => {
                let row = BrokerOrderRow {
                    order_id: result.order_id.clone(),
                    client_tag: tag.clone(),
                    symbol: position.symbol.clone(),
                    side: position.side.as_str().to_string(),
                    units: position.units as i64,
                    entry: result.filled_price.or(Some(position.entry_price)),
                    sl: Some(position.stop_loss),
                    tp: Some(position.take_profit),
                    status: "open".to_string(),
                    opened_at: position.entry_time,
                    closed_at: None,
                };
                if let Err(e) = self.journal.upsert_broker_order(&row).await {
                    tracing::error!(error = %e, "failed to journal broker order");
                }
                if let Err(e) = self
                    .journal
                    .link(&position.id.to_string(), &result.order_id)
                    .await
                {
                    tracing::error!(error = %e, "failed to journal trade mapping");
                }
                tracing::info!(
                    symbol = %position.symbol,
                    order_id = %result.order_id,
                    idempotent = result.idempotent,
                    "trade mirrored to broker"
                );
                Some(tag)
            }
            Err(e) => {
                tracing::error!(symbol = %position.symbol, error = %e, "broker mirror open failed");
                self.journal_error(
                    event_kind::MIRROR_ERROR,
                    serde_json::json!({
                        "action": "open",
                        "symbol": position.symbol,
                        "trade_id": position.id.to_string(),
                        "client_tag": tag,
                        "error": e.to_string(),
                    }),
                )
                .await;
                // Unmapped: link_pending picks this up on the next start
                Some(tag)
            }
        }
    }

    /// Mirror a close by flattening the broker-side net position
    pub async fn on_close(&self, trade: &Trade) {
        if let Err(e) = self.broker.close_position(&trade.symbol).await {
            tracing::error!(symbol = %trade.symbol, error = %e, "broker mirror close failed");
            self.journal_error(
                event_kind::MIRROR_ERROR,
                serde_json::json!({
                    "action": "close",
                    "symbol": trade.symbol,
                    "trade_id": trade.id.to_string(),
                    "error": e.to_string(),
                }),
            )
            .await;
            return;
        }

        // Mark any mapped orders for this trade closed
        if let Ok(mappings) = self.journal.mappings().await {
            let trade_id = trade.id.to_string();
            for mapping in mappings.iter().filter(|m| m.trade_id == trade_id) {
                if let Ok(Some(mut row)) = self.order_by_id(&mapping.order_id).await {
                    row.status = "closed".to_string();
                    row.closed_at = Some(Utc::now());
                    if let Err(e) = self.journal.upsert_broker_order(&row).await {
                        tracing::error!(error = %e, "failed to journal order close");
                    }
                }
            }
        }
    }

    async fn order_by_id(&self, order_id: &str) -> crate::Result<Option<BrokerOrderRow>> {
        let open = self.journal.open_broker_orders().await?;
        Ok(open.into_iter().find(|o| o.order_id == order_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SimBroker;
    use crate::models::{ExitReason, Side};
    use uuid::Uuid;

    fn position() -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: "EURUSD".to_string(),
            strategy: "momentum".to_string(),
            side: Side::Long,
            entry_price: 1.1001,
            initial_stop: 1.0980,
            stop_loss: 1.0980,
            take_profit: 1.1040,
            units: 2500,
            entry_time: Utc::now(),
            client_tag: None,
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn test_open_places_journals_and_links() {
        let broker = Arc::new(SimBroker::new());
        let journal = Arc::new(JournalStore::in_memory().await.unwrap());
        let mirror = TradeMirror::new(broker.clone(), journal.clone());

        let pos = position();
        let tag = mirror.on_open(&pos).await.unwrap();
        assert!(tag.starts_with("FXP::momentum::EURUSD::"));

        assert_eq!(broker.placed_count(), 1);
        assert_eq!(journal.open_broker_orders().await.unwrap().len(), 1);
        assert_eq!(journal.mappings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reusing_tag_does_not_duplicate() {
        let broker = Arc::new(SimBroker::new());
        let journal = Arc::new(JournalStore::in_memory().await.unwrap());
        let mirror = TradeMirror::new(broker.clone(), journal.clone());

        let mut pos = position();
        let tag = mirror.on_open(&pos).await.unwrap();
        pos.client_tag = Some(tag);
        mirror.on_open(&pos).await;

        assert_eq!(broker.placed_count(), 1);
        assert_eq!(journal.mappings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_broker_failure_is_journaled_not_raised() {
        let broker = Arc::new(SimBroker::new());
        broker.fail_next();
        let journal = Arc::new(JournalStore::in_memory().await.unwrap());
        let mirror = TradeMirror::new(broker.clone(), journal.clone());

        let tag = mirror.on_open(&position()).await;
        assert!(tag.is_some());
        assert_eq!(broker.placed_count(), 0);

        let errors = journal.events_of_kind("MIRROR_ERROR").await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].level, "ERROR");
    }

    #[tokio::test]
    async fn test_close_flattens_broker_position() {
        let broker = Arc::new(SimBroker::new());
        let journal = Arc::new(JournalStore::in_memory().await.unwrap());
        let mirror = TradeMirror::new(broker.clone(), journal.clone());

        let pos = position();
        mirror.on_open(&pos).await;

        let trade = Trade {
            id: pos.id,
            symbol: pos.symbol.clone(),
            strategy: pos.strategy.clone(),
            side: pos.side,
            entry_price: pos.entry_price,
            exit_price: 1.0980,
            units: pos.units,
            entry_time: pos.entry_time,
            exit_time: Utc::now(),
            pnl: -52.5,
            r_multiple: -1.0,
            reason: ExitReason::StopLoss,
            notes: String::new(),
        };
        mirror.on_close(&trade).await;

        assert!(broker.get_open_positions().await.unwrap().is_empty());
        assert!(journal.open_broker_orders().await.unwrap().is_empty());
    }
}

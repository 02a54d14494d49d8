use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::broker::{BrokerAdapter, BrokerError, BrokerPosition, BrokerTrade, OrderResult};
use crate::models::Side;

#[derive(Debug, Clone)]
struct SimOrder {
    order_id: String,
    symbol: String,
    #[allow(dead_code)]
    units: i64,
    placed_at: DateTime<Utc>,
}

/// In-process broker double with the same idempotency contract as the live
/// adapter. Used for replay runs and tests.
#[derive(Default)]
pub struct SimBroker {
    orders_by_tag: Mutex<HashMap<String, SimOrder>>,
    positions: Mutex<HashMap<String, BrokerPosition>>,
    next_id: AtomicU64,
    fail_next: AtomicBool,
}

impl SimBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct orders actually placed (idempotent hits excluded)
    pub fn placed_count(&self) -> usize {
        self.orders_by_tag.lock().map(|o| o.len()).unwrap_or(0)
    }

    /// Make the next call fail, for mirror error-path tests
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Plant a position the journal knows nothing about (orphan scenarios)
    pub fn seed_position(&self, symbol: &str, units: f64, avg_price: f64) {
        if let Ok(mut positions) = self.positions.lock() {
            positions.insert(
                symbol.to_string(),
                BrokerPosition {
                    symbol: symbol.to_string(),
                    units,
                    avg_price,
                    unrealized_pnl: 0.0,
                },
            );
        }
    }

    fn check_fault(&self) -> Result<(), BrokerError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BrokerError::Api {
                status: 503,
                body: "simulated outage".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerAdapter for SimBroker {
    async fn place_market(
        &self,
        symbol: &str,
        side: Side,
        units: u32,
        _sl: Option<f64>,
        _tp: Option<f64>,
        client_tag: &str,
    ) -> Result<OrderResult, BrokerError> {
        self.check_fault()?;

        let mut orders = self
            .orders_by_tag
            .lock()
            .map_err(|_| BrokerError::Rejected("sim state poisoned".to_string()))?;

        if let Some(existing) = orders.get(client_tag) {
            return Ok(OrderResult {
                order_id: existing.order_id.clone(),
                filled_price: None,
                idempotent: true,
            });
        }

        let signed_units = match side {
            Side::Long => units as i64,
            Side::Short => -(units as i64),
        };
        let order_id = format!("sim-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        orders.insert(
            client_tag.to_string(),
            SimOrder {
                order_id: order_id.clone(),
                symbol: symbol.to_string(),
                units: signed_units,
                placed_at: Utc::now(),
            },
        );

        if let Ok(mut positions) = self.positions.lock() {
            let entry = positions
                .entry(symbol.to_string())
                .or_insert_with(|| BrokerPosition {
                    symbol: symbol.to_string(),
                    units: 0.0,
                    avg_price: 0.0,
                    unrealized_pnl: 0.0,
                });
            entry.units += signed_units as f64;
            if entry.units == 0.0 {
                positions.remove(symbol);
            }
        }

        Ok(OrderResult {
            order_id,
            filled_price: None,
            idempotent: false,
        })
    }

    async fn get_open_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.check_fault()?;
        let positions = self
            .positions
            .lock()
            .map_err(|_| BrokerError::Rejected("sim state poisoned".to_string()))?;
        Ok(positions.values().cloned().collect())
    }

    async fn close_position(&self, symbol: &str) -> Result<(), BrokerError> {
        self.check_fault()?;
        if let Ok(mut positions) = self.positions.lock() {
            positions.remove(symbol);
        }
        Ok(())
    }

    async fn find_order_by_tag(&self, client_tag: &str) -> Result<Option<String>, BrokerError> {
        self.check_fault()?;
        let orders = self
            .orders_by_tag
            .lock()
            .map_err(|_| BrokerError::Rejected("sim state poisoned".to_string()))?;
        Ok(orders.get(client_tag).map(|o| o.order_id.clone()))
    }

    async fn get_trades_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<BrokerTrade>, BrokerError> {
        self.check_fault()?;
        let orders = self
            .orders_by_tag
            .lock()
            .map_err(|_| BrokerError::Rejected("sim state poisoned".to_string()))?;
        Ok(orders
            .iter()
            .filter(|(_, o)| o.placed_at >= since)
            .map(|(tag, o)| BrokerTrade {
                order_id: o.order_id.clone(),
                symbol: o.symbol.clone(),
                client_tag: Some(tag.clone()),
                time: o.placed_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_tag_places_once() {
        let broker = SimBroker::new();

        let first = broker
            .place_market("EURUSD", Side::Long, 2500, None, None, "tag-1")
            .await
            .unwrap();
        let second = broker
            .place_market("EURUSD", Side::Long, 2500, None, None, "tag-1")
            .await
            .unwrap();

        assert_eq!(first.order_id, second.order_id);
        assert!(!first.idempotent);
        assert!(second.idempotent);
        assert_eq!(broker.placed_count(), 1);
    }

    #[tokio::test]
    async fn test_positions_net_and_close() {
        let broker = SimBroker::new();
        broker
            .place_market("EURUSD", Side::Long, 2500, None, None, "tag-1")
            .await
            .unwrap();

        let open = broker.get_open_positions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].units, 2500.0);

        broker.close_position("EURUSD").await.unwrap();
        assert!(broker.get_open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fault_injection_fails_once() {
        let broker = SimBroker::new();
        broker.fail_next();
        assert!(broker.get_open_positions().await.is_err());
        assert!(broker.get_open_positions().await.is_ok());
    }
}

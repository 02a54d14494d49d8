use async_trait::async_trait;
use chrono::{Duration, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::broker::{BrokerAdapter, BrokerError, BrokerPosition, BrokerTrade, OrderResult};
use crate::data::symbols::{from_oanda_instrument, oanda_instrument};
use crate::models::Side;

const PRACTICE_BASE: &str = "https://api-fxpractice.oanda.com";
const LIVE_BASE: &str = "https://api-fxtrade.oanda.com";
const RATE_LIMIT_RPS: u32 = 10;
const MAX_RETRIES: u32 = 3;

type OandaRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// OANDA v20 REST client (netting mode, one position per instrument).
///
/// Rate limited and retried; every order carries a `clientExtensions.tag`
/// so retries after timeouts or crashes cannot double-fill.
#[derive(Clone)]
pub struct OandaClient {
    client: Client,
    base_url: String,
    api_key: String,
    account_id: String,
    tag_lookback_hours: i64,
    rate_limiter: Arc<OandaRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "orderFillTransaction")]
    fill: Option<Transaction>,
    #[serde(rename = "orderCreateTransaction")]
    create: Option<Transaction>,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    id: String,
    #[serde(default)]
    price: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    instrument: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(rename = "clientExtensions", default)]
    client_extensions: Option<ClientExtensions>,
}

#[derive(Debug, Deserialize)]
struct ClientExtensions {
    tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    transactions: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
struct OpenPositionsResponse {
    #[serde(default)]
    positions: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    instrument: String,
    long: PositionSideData,
    short: PositionSideData,
    #[serde(rename = "unrealizedPL", default)]
    unrealized_pl: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PositionSideData {
    #[serde(default)]
    units: Option<String>,
    #[serde(rename = "averagePrice", default)]
    average_price: Option<String>,
}

fn parse_f64(value: &Option<String>) -> f64 {
    value
        .as_deref()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0)
}

impl OandaClient {
    pub fn new(
        api_key: String,
        account_id: String,
        env: &str,
        tag_lookback_hours: i64,
    ) -> Result<Self, BrokerError> {
        let base = if env == "live" { LIVE_BASE } else { PRACTICE_BASE };
        Self::with_base_url(api_key, account_id, base.to_string(), tag_lookback_hours)
    }

    /// Used directly by tests to point at a mock server
    pub fn with_base_url(
        api_key: String,
        account_id: String,
        base_url: String,
        tag_lookback_hours: i64,
    ) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(RATE_LIMIT_RPS).unwrap_or(NonZeroU32::MIN));
        Ok(Self {
            client,
            base_url,
            api_key,
            account_id,
            tag_lookback_hours,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
    }

    /// Rate-limited request with bounded retries on 429/5xx
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BrokerError> {
        let mut last = String::new();
        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            match self.auth(build()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(
                            status = status.as_u16(),
                            attempt,
                            max = MAX_RETRIES,
                            "transient broker error, retrying"
                        );
                        last = format!("HTTP {}: {}", status, body);
                        tokio::time::sleep(std::time::Duration::from_millis(
                            250 * 2u64.pow(attempt),
                        ))
                        .await;
                        continue;
                    }
                    return Err(BrokerError::Api {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!(error = %e, attempt, "broker network error, retrying");
                    last = e.to_string();
                    tokio::time::sleep(std::time::Duration::from_millis(250 * 2u64.pow(attempt)))
                        .await;
                }
                Err(e) => return Err(BrokerError::Http(e)),
            }
        }

        Err(BrokerError::Exhausted {
            attempts: MAX_RETRIES,
            last,
        })
    }
}

#[async_trait]
impl BrokerAdapter for OandaClient {
    async fn place_market(
        &self,
        symbol: &str,
        side: Side,
        units: u32,
        sl: Option<f64>,
        tp: Option<f64>,
        client_tag: &str,
    ) -> Result<OrderResult, BrokerError> {
        // Idempotency: a crash between POST and journal write means the tag
        // may already be live on the broker.
        if let Some(order_id) = self.find_order_by_tag(client_tag).await? {
            tracing::info!(tag = client_tag, order_id = %order_id, "order already placed, skipping");
            return Ok(OrderResult {
                order_id,
                filled_price: None,
                idempotent: true,
            });
        }

        let signed_units = match side {
            Side::Long => units as i64,
            Side::Short => -(units as i64),
        };

        let mut order = json!({
            "type": "MARKET",
            "instrument": oanda_instrument(symbol),
            "units": signed_units.to_string(),
            "timeInForce": "FOK",
            "positionFill": "DEFAULT",
            "clientExtensions": {"tag": client_tag},
        });
        if let Some(sl) = sl {
            order["stopLossOnFill"] = json!({"price": format!("{:.5}", sl)});
        }
        if let Some(tp) = tp {
            order["takeProfitOnFill"] = json!({"price": format!("{:.5}", tp)});
        }
        let body = json!({ "order": order });

        let url = format!("{}/v3/accounts/{}/orders", self.base_url, self.account_id);
        let response = self
            .send_with_retry(|| self.client.post(&url).json(&body))
            .await?;

        let parsed: OrderResponse = response.json().await?;
        let txn = parsed
            .fill
            .or(parsed.create)
            .ok_or_else(|| BrokerError::Rejected("no transaction in order response".to_string()))?;

        Ok(OrderResult {
            order_id: txn.id,
            filled_price: txn.price.as_deref().and_then(|p| p.parse().ok()),
            idempotent: false,
        })
    }

    async fn get_open_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let url = format!(
            "{}/v3/accounts/{}/openPositions",
            self.base_url, self.account_id
        );
        let response = self.send_with_retry(|| self.client.get(&url)).await?;
        let parsed: OpenPositionsResponse = response.json().await?;

        let mut positions = Vec::new();
        for raw in parsed.positions {
            let long_units = parse_f64(&raw.long.units);
            let short_units = parse_f64(&raw.short.units);
            let net = long_units + short_units;
            if net == 0.0 {
                continue;
            }
            let side = if long_units != 0.0 { &raw.long } else { &raw.short };
            positions.push(BrokerPosition {
                symbol: from_oanda_instrument(&raw.instrument),
                units: net,
                avg_price: parse_f64(&side.average_price),
                unrealized_pnl: parse_f64(&raw.unrealized_pl),
            });
        }
        Ok(positions)
    }

    async fn close_position(&self, symbol: &str) -> Result<(), BrokerError> {
        let url = format!(
            "{}/v3/accounts/{}/positions/{}/close",
            self.base_url,
            self.account_id,
            oanda_instrument(symbol)
        );
        let body = json!({"longUnits": "ALL", "shortUnits": "ALL"});
        self.send_with_retry(|| self.client.put(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn find_order_by_tag(&self, client_tag: &str) -> Result<Option<String>, BrokerError> {
        let since = Utc::now() - Duration::hours(self.tag_lookback_hours);
        let url = format!(
            "{}/v3/accounts/{}/transactions",
            self.base_url, self.account_id
        );
        let since_param = since.to_rfc3339();
        let response = self
            .send_with_retry(|| self.client.get(&url).query(&[("from", since_param.as_str())]))
            .await?;
        let parsed: TransactionsResponse = response.json().await?;

        Ok(parsed
            .transactions
            .into_iter()
            .find(|t| {
                t.kind.as_deref() == Some("MARKET_ORDER")
                    && t.client_extensions
                        .as_ref()
                        .and_then(|e| e.tag.as_deref())
                        == Some(client_tag)
            })
            .map(|t| t.id))
    }

    async fn get_trades_since(
        &self,
        since: chrono::DateTime<Utc>,
    ) -> Result<Vec<BrokerTrade>, BrokerError> {
        let url = format!(
            "{}/v3/accounts/{}/transactions",
            self.base_url, self.account_id
        );
        let since_param = since.to_rfc3339();
        let response = self
            .send_with_retry(|| self.client.get(&url).query(&[("from", since_param.as_str())]))
            .await?;
        let parsed: TransactionsResponse = response.json().await?;

        Ok(parsed
            .transactions
            .into_iter()
            .filter(|t| t.kind.as_deref() == Some("MARKET_ORDER"))
            .map(|t| BrokerTrade {
                order_id: t.id,
                symbol: t
                    .instrument
                    .as_deref()
                    .map(from_oanda_instrument)
                    .unwrap_or_default(),
                client_tag: t.client_extensions.and_then(|e| e.tag),
                time: t
                    .time
                    .as_deref()
                    .and_then(|v| v.parse::<chrono::DateTime<Utc>>().ok())
                    .unwrap_or(since),
            })
            .collect())
    }
}

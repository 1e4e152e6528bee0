//! Kupo HTTP Client - Point-in-time UTxO Lookups
//!
//! Wraps reqwest with per-call timeouts and bounded retries for the two
//! Kupo endpoints the indexer uses: `/health` and
//! `/matches/{address}?unspent`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::KupoConfig;
use crate::domain::error::{IndexerError, IndexerResult};
use crate::domain::utxo::{AssetMap, CanonicalUtxo, OutputRef, Quantity};
use crate::ports::utxo_source::UtxoSource;

const CHECKPOINT_METRIC: &str = "kupo_most_recent_checkpoint";
const NODE_TIP_METRIC: &str = "kupo_most_recent_node_tip";

#[derive(Debug, Deserialize)]
struct KupoValue {
    coins: Quantity,
    #[serde(default)]
    assets: BTreeMap<String, Quantity>,
}

/// One entry of a `/matches` response.
#[derive(Debug, Deserialize)]
struct KupoMatch {
    transaction_id: String,
    output_index: u32,
    #[serde(default)]
    address: String,
    value: KupoValue,
}

impl KupoMatch {
    fn into_utxo(self) -> CanonicalUtxo {
        let mut assets = AssetMap::new();
        for (key, quantity) in &self.value.assets {
            let (policy, name) = key.split_once('.').unwrap_or((key.as_str(), ""));
            assets.add(policy, name, *quantity);
        }
        CanonicalUtxo::new(
            OutputRef::new(self.transaction_id, self.output_index),
            self.address,
            self.value.coins,
            assets,
        )
    }
}

/// Healthy iff both metrics are reported and equal.
pub fn parse_health(body: &str) -> bool {
    let mut checkpoint = None;
    let mut node_tip = None;
    for line in body.lines() {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(CHECKPOINT_METRIC), Some(value)) => checkpoint = Some(value),
            (Some(NODE_TIP_METRIC), Some(value)) => node_tip = Some(value),
            _ => {}
        }
    }
    matches!((checkpoint, node_tip), (Some(a), Some(b)) if a == b)
}

fn request_error(context: &str, err: &reqwest::Error) -> IndexerError {
    if err.is_decode() {
        IndexerError::Data(format!("{context}: {err}"))
    } else {
        IndexerError::Transport(format!("{context}: {err}"))
    }
}

/// HTTP client for a Kupo instance.
pub struct KupoClient {
    http: Client,
    base_url: String,
    health_timeout: Duration,
    matches_timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl KupoClient {
    /// Build a client from config.
    pub fn new(config: &KupoConfig) -> IndexerResult<Self> {
        let http = Client::builder()
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| IndexerError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            health_timeout: Duration::from_secs(config.health_timeout_secs),
            matches_timeout: Duration::from_secs(config.matches_timeout_secs),
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(200),
        })
    }

    /// Whether Kupo has caught up with its node.
    #[instrument(skip(self))]
    pub async fn health(&self) -> IndexerResult<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| request_error("Kupo health request failed", &e))?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Kupo health returned an error status");
            return Ok(false);
        }
        let body = response
            .text()
            .await
            .map_err(|e| request_error("Kupo health body unreadable", &e))?;
        let healthy = parse_health(&body);
        info!(healthy, "Kupo health checked");
        Ok(healthy)
    }

    /// GET `/matches/{address}?unspent` with retries on transport and 5xx errors.
    async fn matches(&self, address: &str) -> IndexerResult<Vec<KupoMatch>> {
        let url = format!("{}/matches/{address}?unspent", self.base_url);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis(), "Retrying Kupo request");
                sleep(delay).await;
            }

            match self.http.get(&url).timeout(self.matches_timeout).send().await {
                Ok(response) => match response.status() {
                    StatusCode::OK => {
                        return response
                            .json::<Vec<KupoMatch>>()
                            .await
                            .map_err(|e| request_error("Kupo matches body invalid", &e));
                    }
                    status if status.is_server_error() => {
                        warn!(status = %status, "Kupo server error, retrying");
                        last_error = Some(IndexerError::Transport(format!("Kupo returned {status}")));
                    }
                    status => {
                        let body = response.text().await.unwrap_or_default();
                        return Err(IndexerError::Data(format!("Kupo returned {status}: {body}")));
                    }
                },
                Err(e) => {
                    warn!(error = %e, attempt, "Kupo request failed");
                    last_error = Some(request_error("Kupo matches request failed", &e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| IndexerError::Transport("Kupo retries exhausted".into())))
    }
}

#[async_trait]
impl UtxoSource for KupoClient {
    async fn utxos_at(&self, address: &str) -> IndexerResult<Vec<CanonicalUtxo>> {
        let matches = self.matches(address).await?;
        Ok(matches
            .into_iter()
            .map(|m| {
                let mut utxo = m.into_utxo();
                if utxo.address.is_empty() {
                    utxo.address = address.to_string();
                }
                utxo
            })
            .collect())
    }
}

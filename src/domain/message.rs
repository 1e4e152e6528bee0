//! Price messages: per-source sub-messages, the volume-weighted aggregate
//! and its content signature.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::error;

use super::utxo::Quantity;

/// Node identity carried in every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub node_id: String,
    /// Opaque location object.
    pub location: serde_json::Value,
    /// Validator endpoint; only the submitter needs it.
    #[serde(default, skip_serializing)]
    pub validator_web_socket: Option<String>,
}

/// One source's view of a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMessage {
    pub token1_name: String,
    pub token1_decimals: u32,
    pub token2_name: String,
    pub token2_decimals: u32,
    /// Chain tip slot known to the caller.
    pub block_height: u64,
    pub source: String,
    /// Collector user agent.
    pub collector: String,
    pub address: String,
    pub feed: String,
    /// `tx_hash#index` of the pool output.
    pub utxo: String,
    pub token1_volume: f64,
    pub token2_volume: f64,
    pub price: f64,
    /// Raw amounts keyed `lovelace` or `policy.name`.
    pub amounts: BTreeMap<String, Quantity>,
}

/// Message handed to the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceMessage {
    pub timestamp: String,
    pub raw: Vec<SourceMessage>,
    /// `[token1 volumes, token2 volumes]`, one entry per source.
    pub data_points: [Vec<f64>; 2],
    pub calculated_value: String,
    pub feed: String,
    pub identity: MessageIdentity,
    pub content_signature: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageIdentity {
    pub node_id: String,
    pub location: serde_json::Value,
}

impl PriceMessage {
    /// Combine source messages into a signed aggregate.
    ///
    /// Returns `None` when [`calculate_price`] rejects the sources.
    pub fn assemble(
        feed: &str,
        identity: &NodeIdentity,
        raw: Vec<SourceMessage>,
        timestamp: &str,
    ) -> Option<Self> {
        let price = calculate_price(&raw)?;
        let token1: Vec<f64> = raw.iter().map(|m| m.token1_volume).collect();
        let token2: Vec<f64> = raw.iter().map(|m| m.token2_volume).collect();
        let content_signature = content_signature(timestamp, &token1, &token2, &identity.node_id);
        Some(Self {
            timestamp: timestamp.to_string(),
            raw,
            data_points: [token1, token2],
            calculated_value: float_repr(price),
            feed: feed.to_string(),
            identity: MessageIdentity {
                node_id: identity.node_id.clone(),
                location: identity.location.clone(),
            },
            content_signature,
            errors: Vec::new(),
        })
    }
}

/// Volume-weighted price across sources.
///
/// Fails closed: a zero volume or a source whose reported price differs
/// from its own `token2 / token1` voids the whole aggregate.
#[allow(clippy::float_cmp)]
pub fn calculate_price(raw: &[SourceMessage]) -> Option<f64> {
    if raw.is_empty() {
        return None;
    }
    let mut token1_total = 0.0;
    let mut token2_total = 0.0;
    for item in raw {
        if item.token1_volume == 0.0 || item.token2_volume == 0.0 {
            error!(source = %item.source, feed = %item.feed, "a token volume is 0");
            return None;
        }
        let price = item.token2_volume / item.token1_volume;
        if price != item.price {
            error!(
                source = %item.source,
                feed = %item.feed,
                calculated = price,
                received = item.price,
                "source price mismatch"
            );
            return None;
        }
        token1_total += item.token1_volume;
        token2_total += item.token2_volume;
    }
    Some(token2_total / token1_total)
}

/// Shortest round-trip rendering of a float with exponent style
/// `1e-05` / `1e+16` outside `[1e-4, 1e16)`.
pub fn float_repr(value: f64) -> String {
    let abs = value.abs();
    if abs != 0.0 && abs.is_finite() && !(1e-4..1e16).contains(&abs) {
        let sci = format!("{value:e}");
        if let Some((mantissa, exponent)) = sci.split_once('e') {
            let (sign, digits) = exponent
                .strip_prefix('-')
                .map_or(("+", exponent), |digits| ("-", digits));
            return format!("{mantissa}e{sign}{digits:0>2}");
        }
        return sci;
    }
    format!("{value:?}")
}

/// Render a volume list as `[a, b, c]`.
fn list_repr(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| float_repr(*v)).collect();
    format!("[{}]", items.join(", "))
}

/// Hex SHA-256 over timestamp, both volume lists and the node id.
pub fn content_signature(timestamp: &str, token1: &[f64], token2: &[f64], node_id: &str) -> String {
    let mut hasher = hmac_sha256::Hash::new();
    hasher.update(timestamp.as_bytes());
    hasher.update(list_repr(token1).as_bytes());
    hasher.update(list_repr(token2).as_bytes());
    hasher.update(node_id.as_bytes());
    hex::encode(hasher.finalize())
}

//! Ogmios JSON-RPC wire types and their conversion into domain types.
//!
//! Responses are decoded straight from the frame text into typed results:
//! native asset quantities can exceed `u64` and would lose precision
//! through an intermediate `serde_json::Value`.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::block::{Block, ChainEvent, ChainPoint, Transaction};
use crate::domain::error::{IndexerError, IndexerResult};
use crate::domain::utxo::{AssetMap, CanonicalUtxo, OutputRef, Quantity};

pub const JSONRPC_VERSION: &str = "2.0";

/// Value key holding the lovelace amount.
const ADA_POLICY: &str = "ada";

/// Outgoing request envelope.
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: u64,
}

/// Just the id of an incoming frame, used to pair it with its request.
#[derive(Debug, Deserialize)]
pub struct RpcEnvelope {
    #[serde(default)]
    id: Option<Value>,
}

impl RpcEnvelope {
    /// Whether this frame answers request `id`. Frames without an id
    /// are accepted as-is.
    pub fn answers(&self, id: u64) -> bool {
        self.id.as_ref().is_none_or(|v| v.as_u64() == Some(id))
    }
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// Decode the typed `result` of a response frame.
pub fn decode_response<T: DeserializeOwned>(text: &str, method: &str) -> IndexerResult<T> {
    let response: RpcResponse<T> = serde_json::from_str(text)
        .map_err(|e| IndexerError::Data(format!("bad {method} response: {e}")))?;
    if let Some(err) = response.error {
        return Err(IndexerError::Data(format!("{method} failed ({}): {}", err.code, err.message)));
    }
    response
        .result
        .ok_or_else(|| IndexerError::Data(format!("{method} response without result")))
}

/// A chain point or the string `"origin"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WirePoint {
    At { slot: u64, id: String },
    Origin(String),
}

impl WirePoint {
    pub fn into_point(self) -> Option<ChainPoint> {
        match self {
            Self::At { slot, id } => Some(ChainPoint { slot, id }),
            Self::Origin(_) => None,
        }
    }
}

/// `findIntersection` result.
#[derive(Debug, Deserialize)]
pub struct IntersectionResult {
    pub intersection: WirePoint,
}

/// Output value: `{ada: {lovelace: n}, <policy>: {<name>: qty}}`.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct WireValue(BTreeMap<String, BTreeMap<String, Quantity>>);

impl WireValue {
    fn split(self) -> (Quantity, AssetMap) {
        let mut lovelace = 0;
        let mut assets = AssetMap::new();
        for (policy, names) in self.0 {
            if policy.eq_ignore_ascii_case(ADA_POLICY) {
                lovelace = names.get("lovelace").copied().unwrap_or(0);
                continue;
            }
            for (name, quantity) in names {
                assets.add(&policy, &name, quantity);
            }
        }
        (lovelace, assets)
    }
}

#[derive(Debug, Deserialize)]
struct WireTxId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireInput {
    transaction: WireTxId,
    index: u32,
}

#[derive(Debug, Deserialize)]
struct WireOutput {
    address: String,
    value: WireValue,
}

#[derive(Debug, Deserialize)]
struct WireTransaction {
    id: String,
    #[serde(default)]
    inputs: Vec<WireInput>,
    #[serde(default)]
    outputs: Vec<WireOutput>,
}

impl WireTransaction {
    fn into_domain(self) -> IndexerResult<Transaction> {
        let inputs = self
            .inputs
            .into_iter()
            .map(|input| OutputRef::new(input.transaction.id, input.index))
            .collect();
        let outputs = self
            .outputs
            .into_iter()
            .enumerate()
            .map(|(index, output)| {
                let index = u32::try_from(index)
                    .map_err(|_| IndexerError::Data(format!("output index {index} overflows")))?;
                let (lovelace, assets) = output.value.split();
                Ok(CanonicalUtxo::new(OutputRef::new(self.id.clone(), index), output.address, lovelace, assets))
            })
            .collect::<IndexerResult<Vec<_>>>()?;
        Ok(Transaction { id: self.id, inputs, outputs })
    }
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    id: String,
    #[serde(default)]
    height: u64,
    #[serde(default)]
    slot: u64,
    #[serde(default)]
    transactions: Vec<WireTransaction>,
}

/// `nextBlock` result.
#[derive(Debug, Deserialize)]
pub struct NextBlockResult {
    direction: String,
    block: Option<WireBlock>,
    point: Option<WirePoint>,
}

impl NextBlockResult {
    pub fn into_event(self) -> IndexerResult<ChainEvent> {
        match self.direction.as_str() {
            "forward" => {
                let block = self
                    .block
                    .ok_or_else(|| IndexerError::Data("forward without block".into()))?;
                let transactions = block
                    .transactions
                    .into_iter()
                    .map(WireTransaction::into_domain)
                    .collect::<IndexerResult<Vec<_>>>()?;
                Ok(ChainEvent::Forward(Block {
                    id: block.id,
                    height: block.height,
                    slot: block.slot,
                    transactions,
                }))
            }
            "backward" => Ok(ChainEvent::Backward(self.point.and_then(WirePoint::into_point))),
            other => Err(IndexerError::Data(format!("unknown direction '{other}'"))),
        }
    }
}

/// One entry of a `queryLedgerState/utxo` result.
#[derive(Debug, Deserialize)]
pub struct WireUtxo {
    transaction: WireTxId,
    index: u32,
    address: String,
    value: WireValue,
}

impl WireUtxo {
    pub fn into_utxo(self) -> CanonicalUtxo {
        let (lovelace, assets) = self.value.split();
        CanonicalUtxo::new(OutputRef::new(self.transaction.id, self.index), self.address, lovelace, assets)
    }
}

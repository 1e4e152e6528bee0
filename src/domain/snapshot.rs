//! Persisted records: pool snapshot rows, price history and the watermark.

use serde::Serialize;

use super::pair::{SecurityToken, TokenSpec};
use super::utxo::{OutputRef, Quantity};

/// UTC timestamp format used for every persisted `date_time`.
pub const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Current best-known state of a pool, one per `(pair, source)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRow {
    pub id: i64,
    pub pair: String,
    pub source: String,
    pub price: f64,
    pub block_height: u64,
    pub address: String,
    pub token1: TokenSpec,
    pub token2: TokenSpec,
    pub security_token: SecurityToken,
    pub token1_amount: Quantity,
    pub token2_amount: Quantity,
    pub output: OutputRef,
    pub date_time: String,
}

/// Lookup key of a pool in the snapshot table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolKey {
    pub pair: String,
    pub source: String,
    pub address: String,
    pub security_token: SecurityToken,
}

/// Fields replaced when an existing snapshot row is superseded.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotUpdate {
    pub block_height: u64,
    pub price: f64,
    pub token1_amount: Quantity,
    pub token2_amount: Quantity,
    pub output: OutputRef,
    pub date_time: String,
}

impl From<&SnapshotRow> for SnapshotUpdate {
    fn from(row: &SnapshotRow) -> Self {
        Self {
            block_height: row.block_height,
            price: row.price,
            token1_amount: row.token1_amount,
            token2_amount: row.token2_amount,
            output: row.output.clone(),
            date_time: row.date_time.clone(),
        }
    }
}

/// One append-only price observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceRecord {
    pub pair: String,
    pub source: String,
    pub price: f64,
    pub token1_amount: Quantity,
    pub token2_amount: Quantity,
    pub epoch: u64,
    pub block_height: u64,
    pub date_time: String,
}

/// Singleton processed-slot marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub slot: u64,
    pub date_time: String,
}

//! UTxO Source Port - Point-in-time Address Queries
//!
//! Implemented by the Kupo HTTP client and, as a fallback, by the
//! Ogmios ledger-state query.

use async_trait::async_trait;

use crate::domain::error::IndexerResult;
use crate::domain::utxo::CanonicalUtxo;

/// Full unspent set lookups by address.
#[async_trait]
pub trait UtxoSource: Send + Sync + 'static {
  /// Every unspent output currently held at `address`.
  async fn utxos_at(&self, address: &str) -> IndexerResult<Vec<CanonicalUtxo>>;
}

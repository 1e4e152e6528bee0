//! Store Port - Snapshot, Price History and Watermark Persistence
//!
//! Narrow query/command API over the relational store. Only the
//! reconciliation engine issues writes through [`SnapshotStore::apply`];
//! the follower additionally advances the watermark and rebuilds the
//! snapshot table after a reconnect.

use async_trait::async_trait;

use crate::domain::error::IndexerResult;
use crate::domain::reconcile::Delta;
use crate::domain::snapshot::{PoolKey, SnapshotRow, Watermark};
use crate::domain::utxo::{AssetMap, OutputRef};

/// Persistence for pool snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
  /// Drop and recreate the snapshot table. Price history and the
  /// watermark are untouched.
  async fn rebuild_snapshots(&self) -> IndexerResult<()>;

  /// Current watermark, `None` before the first block.
  async fn watermark(&self) -> IndexerResult<Option<Watermark>>;

  /// Move the watermark to `slot`. Returns `false` (no write) when
  /// `slot` is not newer than the stored value.
  async fn advance_watermark(&self, slot: u64, date_time: &str) -> IndexerResult<bool>;

  /// Number of snapshot rows pointing at `output`.
  async fn identity_count(&self, output: &OutputRef) -> IndexerResult<u64>;

  /// Snapshot row by primary key.
  async fn snapshot_by_id(&self, id: i64) -> IndexerResult<Option<SnapshotRow>>;

  /// Latest snapshot row (highest block height) for a pool.
  async fn snapshot_for_pool(&self, key: &PoolKey) -> IndexerResult<Option<SnapshotRow>>;

  /// Ids of snapshot rows spent by `inputs` that hold any of `assets`
  /// as token1 or token2.
  async fn spent_snapshot_ids(
    &self,
    inputs: &[OutputRef],
    assets: &AssetMap,
  ) -> IndexerResult<Vec<i64>>;

  /// Apply an accepted reconciliation atomically: snapshot write, price
  /// history append and (when newer) watermark advance.
  async fn apply(&self, delta: &Delta) -> IndexerResult<()>;
}

//! Chain Port - Streaming Block Source Interface
//!
//! Request/response access to a node's chain-sync and ledger-state
//! queries. The block follower drives a [`ChainSync`]; the poller and
//! the aggregator only need the [`ChainQuery`] half.

use async_trait::async_trait;

use crate::domain::block::{ChainEvent, ChainPoint};
use crate::domain::error::IndexerResult;

/// Tip and epoch queries.
#[async_trait]
pub trait ChainQuery: Send + Sync + 'static {
  /// Current chain tip.
  async fn tip(&self) -> IndexerResult<ChainPoint>;

  /// Current epoch number.
  async fn epoch(&self) -> IndexerResult<u64>;
}

/// Block-by-block chain following.
#[async_trait]
pub trait ChainSync: ChainQuery {
  /// Set the follow cursor at `point`. Returns the intersection found.
  async fn find_intersection(&self, point: &ChainPoint) -> IndexerResult<ChainPoint>;

  /// Wait for the next chain event after the cursor.
  ///
  /// Blocks until the node produces a block; callers race it against
  /// their shutdown signal.
  async fn next_block(&self) -> IndexerResult<ChainEvent>;

  /// Drop the current session and open a fresh one.
  async fn reconnect(&self) -> IndexerResult<()>;
}

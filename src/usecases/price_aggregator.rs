//! Price Aggregator - Cross-Source Volume-Weighted Price Messages
//!
//! For each source of a feed, a sub-message is built from the stored
//! snapshot row when the store is at least as fresh as the chain tip,
//! otherwise from a live UTxO query at the pool address. The aggregator
//! never writes to the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::domain::error::{IndexerError, IndexerResult};
use crate::domain::message::{NodeIdentity, PriceMessage, SourceMessage};
use crate::domain::pair::{PairRegistry, WatchedPair};
use crate::domain::snapshot::{PoolKey, SnapshotRow, UTC_FORMAT};
use crate::domain::utxo::{OutputRef, Quantity};
use crate::domain::volume::{to_volume, PoolQuote};
use crate::ports::chain::ChainQuery;
use crate::ports::store::SnapshotStore;
use crate::ports::utxo_source::UtxoSource;

/// Builds signed price messages for configured feeds.
pub struct PriceAggregator<S: SnapshotStore, Q: ChainQuery, U: UtxoSource> {
  store: Arc<S>,
  chain: Arc<Q>,
  source: Arc<U>,
  registry: Arc<PairRegistry>,
  identity: NodeIdentity,
  collector: String,
  floor: f64,
  max_pools: usize,
}

impl<S: SnapshotStore, Q: ChainQuery, U: UtxoSource> PriceAggregator<S, Q, U> {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    store: Arc<S>,
    chain: Arc<Q>,
    source: Arc<U>,
    registry: Arc<PairRegistry>,
    identity: NodeIdentity,
    collector: impl Into<String>,
    floor: f64,
    max_pools: usize,
  ) -> Self {
    Self {
      store,
      chain,
      source,
      registry,
      identity,
      collector: collector.into(),
      floor,
      max_pools,
    }
  }

  /// One message per feed that produced a valid aggregate.
  pub async fn aggregate_all(&self) -> IndexerResult<Vec<PriceMessage>> {
    let feeds: Vec<&str> = self.registry.feeds().map(|(feed, _)| feed).collect();
    let mut messages = Vec::with_capacity(feeds.len());
    for feed in feeds {
      if let Some(message) = self.aggregate(feed).await? {
        messages.push(message);
      }
    }
    Ok(messages)
  }

  /// Aggregate one feed.
  ///
  /// A source whose live query finds too many pools is dropped on its
  /// own. `Ok(None)` means the feed produced no trustworthy price: no
  /// source had a pool, or a source disagrees with its own price. Only
  /// transport errors are `Err`.
  #[instrument(skip(self))]
  pub async fn aggregate(&self, feed: &str) -> IndexerResult<Option<PriceMessage>> {
    let Some((_, pairs)) = self.registry.feeds().find(|(name, _)| *name == feed) else {
      warn!("Unknown feed");
      return Ok(None);
    };

    let tip = self.chain.tip().await?;
    let watermark = self.store.watermark().await?;
    let fresh = watermark.as_ref().is_some_and(|w| tip.slot <= w.slot);

    let mut raw = Vec::with_capacity(pairs.len());
    for pair in pairs {
      match self.source_messages(pair, tip.slot, fresh).await {
        Ok(messages) => raw.extend(messages),
        Err(e) if e.is_transport() => return Err(e),
        Err(IndexerError::Consistency(reason)) => {
          error!(source = %pair.source, %reason, "Source rejected");
        }
        Err(e) => warn!(source = %pair.source, error = %e, "Source skipped"),
      }
    }

    if raw.is_empty() {
      warn!("No source produced a pool");
      return Ok(None);
    }

    let timestamp = chrono::Utc::now().format(UTC_FORMAT).to_string();
    let sources = raw.len();
    let message = PriceMessage::assemble(feed, &self.identity, raw, &timestamp);
    if let Some(message) = &message {
      info!(sources, value = %message.calculated_value, "Feed aggregated");
    }
    Ok(message)
  }

  async fn source_messages(
    &self,
    pair: &WatchedPair,
    tip_slot: u64,
    fresh: bool,
  ) -> IndexerResult<Vec<SourceMessage>> {
    if fresh {
      let key = PoolKey {
        pair: pair.name.clone(),
        source: pair.source.clone(),
        address: pair.address.clone(),
        security_token: pair.security_token.clone(),
      };
      if let Some(row) = self.store.snapshot_for_pool(&key).await? {
        return Ok(vec![self.from_row(pair, &row, tip_slot)]);
      }
    }
    self.from_chain(pair, tip_slot).await
  }

  fn from_row(&self, pair: &WatchedPair, row: &SnapshotRow, tip_slot: u64) -> SourceMessage {
    let mut message = self.message(pair, &row.output, row.token1_amount, row.token2_amount, tip_slot);
    message.price = row.price;
    message
  }

  /// Live fallback: valid pools at the pair's address right now.
  async fn from_chain(&self, pair: &WatchedPair, tip_slot: u64) -> IndexerResult<Vec<SourceMessage>> {
    let security = &pair.security_token;
    let utxos = self.source.utxos_at(&pair.address).await?;

    let pools: Vec<SourceMessage> = utxos
      .iter()
      .filter(|utxo| utxo.assets.holds(&security.policy, &security.name))
      .filter_map(|utxo| {
        let token1_amount = pair.token1.amount_in(utxo);
        let token2_amount = pair.token2.amount_in(utxo);
        let quote = PoolQuote::from_amounts(
          token1_amount,
          pair.token1.decimals,
          token2_amount,
          pair.token2.decimals,
        )
        .ok()?;
        quote
          .clears_floor(self.floor)
          .then(|| self.message(pair, &utxo.output, token1_amount, token2_amount, tip_slot))
      })
      .collect();

    if pools.len() > self.max_pools {
      return Err(IndexerError::Consistency(format!(
        "{} valid liquidity pools for {} on {}, at most {} allowed",
        pools.len(),
        pair.name,
        pair.source,
        self.max_pools
      )));
    }
    Ok(pools)
  }

  fn message(
    &self,
    pair: &WatchedPair,
    output: &OutputRef,
    token1_amount: Quantity,
    token2_amount: Quantity,
    tip_slot: u64,
  ) -> SourceMessage {
    let token1_volume = to_volume(token1_amount, pair.token1.decimals);
    let token2_volume = to_volume(token2_amount, pair.token2.decimals);
    let amounts = BTreeMap::from([
      (pair.token1.label(), token1_amount),
      (pair.token2.label(), token2_amount),
    ]);
    SourceMessage {
      token1_name: pair.token1.name.clone(),
      token1_decimals: pair.token1.decimals,
      token2_name: pair.token2.name.clone(),
      token2_decimals: pair.token2.decimals,
      block_height: tip_slot,
      source: pair.source.clone(),
      collector: self.collector.clone(),
      address: pair.address.clone(),
      feed: pair.name.clone(),
      utxo: output.to_string(),
      token1_volume,
      token2_volume,
      price: token2_volume / token1_volume,
      amounts,
    }
  }
}

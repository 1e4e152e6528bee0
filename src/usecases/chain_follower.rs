//! Chain Follower - Block-by-Block Snapshot Maintenance
//!
//! State machine over a [`ChainSync`] session:
//!
//! ```text
//! Connecting --intersection--> Synced --transport error--> Reconnecting
//!      ^                                                        |
//!      +---------------- snapshot table rebuilt ----------------+
//! ```
//!
//! While synced, every forward block advances the watermark and each
//! output at a watched address is matched against the pairs there;
//! matches go to the reconciliation engine in live mode. Backward
//! events are counted only; stale rows are cleared by the rebuild that
//! follows a reconnect.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::adapters::metrics::{HealthState, IndexerMetrics};
use crate::domain::block::{Block, ChainEvent, Transaction};
use crate::domain::error::IndexerResult;
use crate::domain::matcher::PairMatcher;
use crate::domain::pair::PairRegistry;
use crate::domain::reconcile::{CallerMode, ReconciliationContext};
use crate::domain::snapshot::UTC_FORMAT;
use crate::domain::utxo::CanonicalUtxo;
use crate::domain::volume::PoolQuote;
use crate::ports::chain::ChainSync;
use crate::ports::store::SnapshotStore;

use super::reconciliation::ReconciliationEngine;
use super::signals::{raised, Signals};

/// Follower lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerState {
  Connecting,
  Synced,
  Reconnecting,
}

/// Running totals, logged periodically and returned on shutdown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FollowerStats {
  pub forward_blocks: u64,
  pub backward_blocks: u64,
  pub reconnects: u64,
  pub transactions: u64,
}

/// Drives a chain-sync session and feeds matches to the engine.
pub struct ChainFollower<C: ChainSync, S: SnapshotStore> {
  chain: Arc<C>,
  engine: Arc<ReconciliationEngine<S>>,
  registry: Arc<PairRegistry>,
  matcher: PairMatcher,
  signals: Arc<Signals>,
  health: Option<Arc<HealthState>>,
  metrics: Option<Arc<IndexerMetrics>>,
  reconnect_pause: Duration,
  stats_every: u64,
  stats: FollowerStats,
}

impl<C: ChainSync, S: SnapshotStore> ChainFollower<C, S> {
  pub fn new(
    chain: Arc<C>,
    engine: Arc<ReconciliationEngine<S>>,
    registry: Arc<PairRegistry>,
    signals: Arc<Signals>,
    reconnect_pause: Duration,
  ) -> Self {
    let matcher = PairMatcher::new(engine.floor());
    Self {
      chain,
      engine,
      registry,
      matcher,
      signals,
      health: None,
      metrics: None,
      reconnect_pause,
      stats_every: 100,
      stats: FollowerStats::default(),
    }
  }

  /// Attach readiness flag and counters.
  pub fn with_observability(mut self, health: Arc<HealthState>, metrics: Arc<IndexerMetrics>) -> Self {
    self.health = Some(health);
    self.metrics = Some(metrics);
    self
  }

  /// Log statistics every `blocks` forward blocks (0 disables).
  pub fn with_stats_every(mut self, blocks: u64) -> Self {
    self.stats_every = blocks;
    self
  }

  pub fn stats(&self) -> FollowerStats {
    self.stats
  }

  /// Follow the chain until shutdown.
  #[instrument(skip(self), name = "chain_follower")]
  pub async fn run(&mut self) -> FollowerStats {
    info!(
      addresses = self.registry.address_count(),
      pairs = self.registry.pair_count(),
      "Starting chain follower"
    );

    let mut shutdown = self.signals.shutdown_rx();
    let mut state = FollowerState::Connecting;

    while !self.signals.is_shutdown() {
      state = match state {
        FollowerState::Connecting => match self.connect().await {
          Ok(()) => FollowerState::Synced,
          Err(e) => {
            warn!(error = %e, "Chain intersection failed");
            FollowerState::Reconnecting
          }
        },
        FollowerState::Synced => {
          let event = tokio::select! {
            biased;
            () = raised(&mut shutdown) => break,
            event = self.chain.next_block() => event,
          };
          self.on_event(event).await
        }
        FollowerState::Reconnecting => {
          self.set_ready(false);
          tokio::select! {
            biased;
            () = raised(&mut shutdown) => break,
            () = tokio::time::sleep(self.reconnect_pause) => {}
          }
          match self.recover().await {
            Ok(()) => FollowerState::Connecting,
            Err(e) => {
              warn!(error = %e, "Chain recovery failed, retrying");
              FollowerState::Reconnecting
            }
          }
        }
      };
    }

    self.set_ready(false);
    self.log_stats("Chain follower stopped");
    self.stats
  }

  /// Intersect at the current tip and record it as the watermark.
  async fn connect(&self) -> IndexerResult<()> {
    let tip = self.chain.tip().await?;
    let intersection = self.chain.find_intersection(&tip).await?;
    let now = chrono::Utc::now().format(UTC_FORMAT).to_string();
    self.engine.store().advance_watermark(tip.slot, &now).await?;
    self.set_ready(true);
    info!(slot = intersection.slot, id = %intersection.id, "Intersection found");
    Ok(())
  }

  /// Re-open the session and discard every snapshot row.
  async fn recover(&mut self) -> IndexerResult<()> {
    self.stats.reconnects += 1;
    if let Some(metrics) = &self.metrics {
      metrics.reconnects.inc();
    }
    self.chain.reconnect().await?;
    let generation = self.signals.bump_reconnect();
    self.engine.store().rebuild_snapshots().await?;
    warn!(generation, reconnects = self.stats.reconnects, "Snapshot table rebuilt after reconnect");
    Ok(())
  }

  async fn on_event(&mut self, event: IndexerResult<ChainEvent>) -> FollowerState {
    let outcome = match event {
      Ok(ChainEvent::Forward(block)) => self.roll_forward(&block).await,
      Ok(ChainEvent::Backward(point)) => {
        self.stats.backward_blocks += 1;
        if let Some(metrics) = &self.metrics {
          metrics.backward_blocks.inc();
        }
        info!(slot = point.as_ref().map(|p| p.slot), "Roll backward");
        Ok(())
      }
      Err(e) => Err(e),
    };

    match outcome {
      Ok(()) => FollowerState::Synced,
      Err(e) if e.is_transport() => {
        warn!(error = %e, "Chain-sync transport failure");
        FollowerState::Reconnecting
      }
      Err(e) => {
        warn!(error = %e, "Chain event skipped");
        FollowerState::Synced
      }
    }
  }

  async fn roll_forward(&mut self, block: &Block) -> IndexerResult<()> {
    self.stats.forward_blocks += 1;
    if let Some(metrics) = &self.metrics {
      metrics.forward_blocks.inc();
    }

    let now = chrono::Utc::now().format(UTC_FORMAT).to_string();
    if !self.engine.store().advance_watermark(block.slot, &now).await? {
      debug!(slot = block.slot, "Watermark not advanced");
    }

    let mut epoch = None;
    for tx in &block.transactions {
      self.stats.transactions += 1;
      if let Some(metrics) = &self.metrics {
        metrics.transactions.inc();
      }
      for output in &tx.outputs {
        if self.registry.watches(&output.address) {
          self.process_output(block, tx, output, &mut epoch).await?;
        }
      }
    }

    if self.stats_every > 0 && self.stats.forward_blocks % self.stats_every == 0 {
      self.log_stats("Chain follower statistics");
    }
    Ok(())
  }

  /// Match one watched output against every pair at its address.
  ///
  /// Only transport errors propagate; anything else is logged and the
  /// output (or pair) is skipped.
  async fn process_output(
    &self,
    block: &Block,
    tx: &Transaction,
    output: &CanonicalUtxo,
    epoch: &mut Option<u64>,
  ) -> IndexerResult<()> {
    let spent_ids = match self.engine.store().spent_snapshot_ids(&tx.inputs, &output.assets).await {
      Ok(ids) => ids,
      Err(e) => {
        warn!(error = %e, utxo = %output.output, "Spent-input search failed");
        return Ok(());
      }
    };

    for pair in self.registry.pairs_at(&output.address) {
      if let Err(reason) = self.matcher.check(output, pair) {
        debug!(pair = %pair.name, source = %pair.source, utxo = %output.output, %reason, "No match");
        continue;
      }
      let quote = match PoolQuote::from_amounts(
        pair.token1.amount_in(output),
        pair.token1.decimals,
        pair.token2.amount_in(output),
        pair.token2.decimals,
      ) {
        Ok(quote) => quote,
        Err(e) => {
          warn!(error = %e, pair = %pair.name, utxo = %output.output, "Unpriceable pool output");
          continue;
        }
      };
      let epoch = match *epoch {
        Some(epoch) => epoch,
        None => {
          let current = self.chain.epoch().await?;
          *epoch = Some(current);
          current
        }
      };

      let ctx = ReconciliationContext {
        pair: Arc::clone(pair),
        output: output.output.clone(),
        quote,
        block_height: block.slot,
        epoch,
        mode: CallerMode::Live { spent_ids: spent_ids.clone() },
      };
      if let Err(e) = self.engine.reconcile(&ctx).await {
        if e.is_transport() {
          return Err(e);
        }
        warn!(error = %e, pair = %pair.name, utxo = %output.output, "Reconciliation failed");
      }
    }
    Ok(())
  }

  fn set_ready(&self, ready: bool) {
    if let Some(health) = &self.health {
      health.set_synced(ready);
    }
  }

  fn log_stats(&self, message: &str) {
    let FollowerStats { forward_blocks, backward_blocks, reconnects, transactions } = self.stats;
    info!(forward_blocks, backward_blocks, reconnects, transactions, "{message}");
  }
}

//! Snapshot Poller - Periodic Full Rescan of Watched Addresses
//!
//! Each cycle queries every watched address, folds matching pools into a
//! cycle-local [`BestPools`] reducer and flushes one candidate per
//! `(pair, source)` through the reconciliation engine in poll mode.
//! Nothing survives between cycles.
//!
//! A new reconnect generation from the chain follower aborts the scan in
//! flight and starts over from the first address.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::adapters::metrics::IndexerMetrics;
use crate::domain::error::IndexerResult;
use crate::domain::matcher::PairMatcher;
use crate::domain::pair::PairRegistry;
use crate::domain::reducer::{BestPools, Candidate};
use crate::domain::volume::PoolQuote;
use crate::ports::chain::ChainQuery;
use crate::ports::store::SnapshotStore;
use crate::ports::utxo_source::UtxoSource;

use super::reconciliation::ReconciliationEngine;
use super::signals::{raised, Signals};

/// Timer-driven rescanner.
pub struct SnapshotPoller<Q: ChainQuery, U: UtxoSource, S: SnapshotStore> {
  chain: Arc<Q>,
  source: Arc<U>,
  engine: Arc<ReconciliationEngine<S>>,
  registry: Arc<PairRegistry>,
  matcher: PairMatcher,
  signals: Arc<Signals>,
  interval: Duration,
  retry_pause: Duration,
  metrics: Option<Arc<IndexerMetrics>>,
}

impl<Q: ChainQuery, U: UtxoSource, S: SnapshotStore> SnapshotPoller<Q, U, S> {
  pub fn new(
    chain: Arc<Q>,
    source: Arc<U>,
    engine: Arc<ReconciliationEngine<S>>,
    registry: Arc<PairRegistry>,
    signals: Arc<Signals>,
    interval: Duration,
  ) -> Self {
    let matcher = PairMatcher::new(engine.floor());
    Self {
      chain,
      source,
      engine,
      registry,
      matcher,
      signals,
      interval,
      retry_pause: Duration::from_secs(5),
      metrics: None,
    }
  }

  pub fn with_retry_pause(mut self, pause: Duration) -> Self {
    self.retry_pause = pause;
    self
  }

  pub fn with_metrics(mut self, metrics: Arc<IndexerMetrics>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Poll until poller-stop or shutdown. Returns the completed cycle count.
  #[instrument(skip(self), name = "snapshot_poller")]
  pub async fn run(&self) -> u64 {
    info!(
      addresses = self.registry.address_count(),
      interval_secs = self.interval.as_secs(),
      "Starting snapshot poller"
    );

    let mut stop = self.signals.poller_stop_rx();
    let mut shutdown = self.signals.shutdown_rx();
    let mut reconnect = self.signals.reconnect_rx();
    let mut cycles = 0;

    loop {
      reconnect.mark_unchanged();

      let scanned = tokio::select! {
        biased;
        () = raised(&mut stop) => break,
        () = raised(&mut shutdown) => break,
        _ = reconnect.changed() => {
          info!("Reconnect signalled, restarting poller cycle");
          continue;
        }
        scanned = self.scan() => scanned,
      };

      let pause = match scanned {
        Ok(best) => {
          let written = self.flush(best).await;
          cycles += 1;
          if let Some(metrics) = &self.metrics {
            metrics.poller_cycles.inc();
          }
          info!(cycle = cycles, written, "Poller cycle complete");
          self.interval
        }
        Err(e) => {
          warn!(error = %e, "Poller cycle failed, retrying");
          self.retry_pause
        }
      };

      tokio::select! {
        biased;
        () = raised(&mut stop) => break,
        () = raised(&mut shutdown) => break,
        _ = reconnect.changed() => info!("Reconnect signalled, polling early"),
        () = tokio::time::sleep(pause) => {}
      }
    }

    info!(cycles, "Snapshot poller stopped");
    cycles
  }

  /// One pass over every watched address.
  ///
  /// Transport errors abort the pass; other per-address errors skip the
  /// address.
  pub async fn scan(&self) -> IndexerResult<BestPools> {
    let mut best = BestPools::new();

    for address in self.registry.addresses() {
      let epoch = self.chain.epoch().await?;
      let tip = self.chain.tip().await?;
      let utxos = match self.source.utxos_at(address).await {
        Ok(utxos) => utxos,
        Err(e) if e.is_transport() => return Err(e),
        Err(e) => {
          warn!(error = %e, address, "UTxO query failed, skipping address");
          continue;
        }
      };

      for utxo in &utxos {
        for pair in self.registry.pairs_at(address) {
          if !self.matcher.matches(utxo, pair) {
            continue;
          }
          let Ok(quote) = PoolQuote::from_amounts(
            pair.token1.amount_in(utxo),
            pair.token1.decimals,
            pair.token2.amount_in(utxo),
            pair.token2.decimals,
          ) else {
            continue;
          };
          let kept = best.offer(Candidate {
            pair: Arc::clone(pair),
            output: utxo.output.clone(),
            quote,
            block_height: tip.slot,
            epoch,
          });
          debug!(pair = %pair.name, source = %pair.source, utxo = %utxo.output, kept, "Pool candidate");
        }
      }
    }

    Ok(best)
  }

  /// Reconcile each cycle winner. Returns the number of writes.
  pub async fn flush(&self, best: BestPools) -> usize {
    let mut written = 0;
    for candidate in best.into_candidates() {
      let ctx = candidate.into_context();
      match self.engine.reconcile(&ctx).await {
        Ok(outcome) if outcome.is_write() => written += 1,
        Ok(_) => {}
        Err(e) => warn!(error = %e, pair = %ctx.pair.name, source = %ctx.pair.source, "Flush failed"),
      }
    }
    written
  }
}

//! Reconciliation Engine - Single Writer of Snapshots and Price History
//!
//! Gathers what [`decide`] needs from the store (identity count, the
//! stored row for the pool), turns the decision into a [`Delta`] and
//! applies it atomically. Both the chain follower and the snapshot
//! poller go through here; nothing else writes snapshot or price rows.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::adapters::metrics::IndexerMetrics;
use crate::domain::error::IndexerResult;
use crate::domain::reconcile::{decide, CallerMode, Decision, ReconciliationContext, SkipReason};
use crate::domain::snapshot::{SnapshotRow, UTC_FORMAT};
use crate::ports::store::SnapshotStore;

/// Result of one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Inserted,
  Updated,
  Skipped(SkipReason),
}

impl Outcome {
  pub fn is_write(&self) -> bool {
    !matches!(self, Self::Skipped(_))
  }

  fn label(&self) -> &'static str {
    match self {
      Self::Inserted => "inserted",
      Self::Updated => "updated",
      Self::Skipped(_) => "skipped",
    }
  }
}

/// Applies reconciliation decisions to a [`SnapshotStore`].
pub struct ReconciliationEngine<S: SnapshotStore> {
  store: Arc<S>,
  floor: f64,
  metrics: Option<Arc<IndexerMetrics>>,
}

impl<S: SnapshotStore> ReconciliationEngine<S> {
  pub fn new(store: Arc<S>, floor: f64) -> Self {
    Self { store, floor, metrics: None }
  }

  pub fn with_metrics(mut self, metrics: Arc<IndexerMetrics>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  pub fn floor(&self) -> f64 {
    self.floor
  }

  /// Reconcile one observation against the store.
  ///
  /// Skips are normal outcomes, not errors. Errors come from the store
  /// only; nothing is written when one occurs.
  #[instrument(
    skip(self, ctx),
    fields(pair = %ctx.pair.name, source = %ctx.pair.source, utxo = %ctx.output, height = ctx.block_height)
  )]
  pub async fn reconcile(&self, ctx: &ReconciliationContext) -> IndexerResult<Outcome> {
    let (identity_count, existing) = match &ctx.mode {
      CallerMode::Live { spent_ids } => {
        let count = self.store.identity_count(&ctx.output).await?;
        let existing = match self.spent_row(ctx, spent_ids).await? {
          Some(row) => Some(row),
          None => self.store.snapshot_for_pool(&ctx.pool_key()).await?,
        };
        (count, existing)
      }
      CallerMode::Poll => (0, self.store.snapshot_for_pool(&ctx.pool_key()).await?),
    };

    let decision = decide(ctx, identity_count, existing.as_ref(), self.floor);
    let outcome = match decision {
      Decision::Skip(reason) => {
        debug!(reason = %reason, "Reconciliation skipped");
        Outcome::Skipped(reason)
      }
      Decision::Insert | Decision::Update { .. } => {
        let date_time = chrono::Utc::now().format(UTC_FORMAT).to_string();
        if let Some(delta) = ctx.delta(&decision, &date_time) {
          self.store.apply(&delta).await?;
        }
        let outcome = if decision == Decision::Insert {
          Outcome::Inserted
        } else {
          Outcome::Updated
        };
        info!(
          outcome = outcome.label(),
          price = ctx.quote.price,
          token1_amount = %ctx.quote.token1_amount,
          token2_amount = %ctx.quote.token2_amount,
          "Snapshot reconciled"
        );
        outcome
      }
    };

    if let Some(metrics) = &self.metrics {
      metrics.record_outcome(outcome.label());
    }
    Ok(outcome)
  }

  /// First row among `spent_ids` that belongs to the same pool.
  async fn spent_row(
    &self,
    ctx: &ReconciliationContext,
    spent_ids: &[i64],
  ) -> IndexerResult<Option<SnapshotRow>> {
    for id in spent_ids {
      if let Some(row) = self.store.snapshot_by_id(*id).await? {
        if ctx.same_pool(&row) {
          return Ok(Some(row));
        }
      }
    }
    Ok(None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::adapters::persistence::SqliteStore;
  use crate::domain::pair::{SecurityToken, TokenSpec, WatchedPair, LOVELACE};
  use crate::domain::utxo::OutputRef;
  use crate::domain::volume::PoolQuote;
  use crate::ports::store::SnapshotStore;

  fn pair() -> Arc<WatchedPair> {
    Arc::new(WatchedPair {
      name: "ADA-iUSD".into(),
      token1: TokenSpec { policy: String::new(), name: LOVELACE.into(), decimals: 6 },
      token2: TokenSpec {
        policy: "f66d78b4a3cb3d37afa0ec36461e51ecbde00f26c8f0a68f94b69880".into(),
        name: "69555344".into(),
        decimals: 6,
      },
      source: "SundaeSwapV3".into(),
      address: "addr1_sundae".into(),
      security_token: SecurityToken { policy: "e0302560".into(), name: "000de140".into() },
    })
  }

  fn ctx(tx: &str, height: u64, t1: u128, t2: u128, mode: CallerMode) -> ReconciliationContext {
    ReconciliationContext {
      pair: pair(),
      output: OutputRef::new(tx, 0),
      quote: PoolQuote::from_amounts(t1, 6, t2, 6).unwrap(),
      block_height: height,
      epoch: 510,
      mode,
    }
  }

  fn engine() -> ReconciliationEngine<SqliteStore> {
    ReconciliationEngine::new(Arc::new(SqliteStore::open_in_memory().unwrap()), 5.0)
  }

  #[tokio::test]
  async fn test_first_sighting_inserts_row_and_price() {
    let engine = engine();
    let observed = ctx("aa", 100, 23_813_086_544, 15_887_438_632, CallerMode::Poll);

    assert_eq!(engine.reconcile(&observed).await.unwrap(), Outcome::Inserted);

    let store = engine.store();
    assert_eq!(store.snapshot_count().unwrap(), 1);
    let history = store.price_history("ADA-iUSD").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].price, 0.667_172_590_274_864_4);
    assert_eq!(history[0].token1_amount, 23_813_086_544);
    assert_eq!(store.watermark().await.unwrap().unwrap().slot, 100);
  }

  #[tokio::test]
  async fn test_live_replay_is_noop() {
    let engine = engine();
    let first = ctx("aa", 100, 23_813_086_544, 15_887_438_632, CallerMode::Live { spent_ids: vec![] });
    assert_eq!(engine.reconcile(&first).await.unwrap(), Outcome::Inserted);

    let outcome = engine.reconcile(&first).await.unwrap();
    assert_eq!(outcome, Outcome::Skipped(SkipReason::AlreadyProcessed));
    assert_eq!(engine.store().price_history("ADA-iUSD").unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_live_update_follows_spent_input() {
    let engine = engine();
    engine.reconcile(&ctx("aa", 100, 30_000_000, 20_000_000, CallerMode::Poll)).await.unwrap();
    let row = engine
      .store()
      .snapshot_for_pool(&ctx("aa", 0, 1, 1, CallerMode::Poll).pool_key())
      .await
      .unwrap()
      .unwrap();

    let next = ctx("bb", 120, 31_000_000, 19_500_000, CallerMode::Live { spent_ids: vec![row.id] });
    assert_eq!(engine.reconcile(&next).await.unwrap(), Outcome::Updated);
    assert_eq!(engine.store().snapshot_count().unwrap(), 1);

    let stored = engine.store().snapshot_by_id(row.id).await.unwrap().unwrap();
    assert_eq!(stored.output, OutputRef::new("bb", 0));
    assert_eq!(stored.block_height, 120);
  }

  #[tokio::test]
  async fn test_older_height_never_overwrites() {
    let engine = engine();
    engine.reconcile(&ctx("aa", 200, 30_000_000, 20_000_000, CallerMode::Poll)).await.unwrap();

    let stale = ctx("bb", 150, 40_000_000, 25_000_000, CallerMode::Poll);
    assert_eq!(
      engine.reconcile(&stale).await.unwrap(),
      Outcome::Skipped(SkipReason::StaleHeight { stored: 200, observed: 150 })
    );
    assert_eq!(engine.store().price_history("ADA-iUSD").unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_update_below_floor_is_skipped() {
    let engine = engine();
    engine.reconcile(&ctx("aa", 100, 30_000_000, 20_000_000, CallerMode::Poll)).await.unwrap();

    let thin = ctx("bb", 110, 5_000_000, 20_000_000, CallerMode::Poll);
    assert_eq!(
      engine.reconcile(&thin).await.unwrap(),
      Outcome::Skipped(SkipReason::BelowFloor)
    );
  }

  #[test]
  fn test_outcome_labels() {
    assert!(Outcome::Inserted.is_write());
    assert!(!Outcome::Skipped(SkipReason::SameIdentity).is_write());
    assert_eq!(Outcome::Updated.label(), "updated");
  }
}

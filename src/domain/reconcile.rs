//! Reconciliation rules for the snapshot table.
//!
//! [`decide`] is pure: it looks at one observation, the identity count of
//! the observed output and the stored row (if any) and returns a
//! [`Decision`]. [`ReconciliationContext::delta`] turns an accepted
//! decision into the explicit set of writes the store applies in one
//! transaction.

use std::fmt;
use std::sync::Arc;

use super::pair::WatchedPair;
use super::snapshot::{PoolKey, PriceRecord, SnapshotRow, SnapshotUpdate};
use super::utxo::OutputRef;
use super::volume::PoolQuote;

/// Who is asking for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerMode {
    /// Block follower, once per matching output. `spent_ids` are the
    /// snapshot rows this transaction spends.
    Live { spent_ids: Vec<i64> },
    /// Snapshot poller flushing its best candidate for a pool.
    Poll,
}

/// Immutable description of one matched, quoted output.
#[derive(Debug, Clone)]
pub struct ReconciliationContext {
    pub pair: Arc<WatchedPair>,
    pub output: OutputRef,
    pub quote: PoolQuote,
    /// Slot of the block (live) or of the chain tip (poll).
    pub block_height: u64,
    pub epoch: u64,
    pub mode: CallerMode,
}

/// Why an observation produced no write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The output is already stored exactly once.
    AlreadyProcessed,
    /// Observed height is below the stored height.
    StaleHeight { stored: u64, observed: u64 },
    /// Stored row already points at this output.
    SameIdentity,
    /// A leg does not clear the volume floor.
    BelowFloor,
    /// Live update without any spent snapshot input.
    NoSpentInput,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyProcessed => f.write_str("output already processed"),
            Self::StaleHeight { stored, observed } => {
                write!(f, "block height {observed} below stored {stored}")
            }
            Self::SameIdentity => f.write_str("identity unchanged"),
            Self::BelowFloor => f.write_str("volume below floor"),
            Self::NoSpentInput => f.write_str("no spent snapshot input"),
        }
    }
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Insert,
    Update { row_id: i64 },
    Skip(SkipReason),
}

/// How the snapshot table changes.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotWrite {
    /// New row; its `id` is assigned by the store.
    Insert(Box<SnapshotRow>),
    Update { row_id: i64, update: SnapshotUpdate },
}

/// Every write produced by one accepted reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub snapshot: SnapshotWrite,
    pub price: PriceRecord,
    /// Slot the watermark should advance to (ignored when not newer).
    pub watermark: u64,
}

impl ReconciliationContext {
    /// Store key of the pool this observation belongs to.
    pub fn pool_key(&self) -> PoolKey {
        PoolKey {
            pair: self.pair.name.clone(),
            source: self.pair.source.clone(),
            address: self.pair.address.clone(),
            security_token: self.pair.security_token.clone(),
        }
    }

    /// Whether a stored row describes the same pool as this observation.
    pub fn same_pool(&self, row: &SnapshotRow) -> bool {
        row.pair == self.pair.name && row.source == self.pair.source
    }

    /// Writes for an accepted decision, `None` for a skip.
    pub fn delta(&self, decision: &Decision, date_time: &str) -> Option<Delta> {
        let snapshot = match decision {
            Decision::Skip(_) => return None,
            Decision::Insert => SnapshotWrite::Insert(Box::new(self.new_row(date_time))),
            Decision::Update { row_id } => SnapshotWrite::Update {
                row_id: *row_id,
                update: SnapshotUpdate {
                    block_height: self.block_height,
                    price: self.quote.price,
                    token1_amount: self.quote.token1_amount,
                    token2_amount: self.quote.token2_amount,
                    output: self.output.clone(),
                    date_time: date_time.to_string(),
                },
            },
        };
        Some(Delta {
            snapshot,
            price: PriceRecord {
                pair: self.pair.name.clone(),
                source: self.pair.source.clone(),
                price: self.quote.price,
                token1_amount: self.quote.token1_amount,
                token2_amount: self.quote.token2_amount,
                epoch: self.epoch,
                block_height: self.block_height,
                date_time: date_time.to_string(),
            },
            watermark: self.block_height,
        })
    }

    fn new_row(&self, date_time: &str) -> SnapshotRow {
        let pair = &self.pair;
        SnapshotRow {
            id: 0,
            pair: pair.name.clone(),
            source: pair.source.clone(),
            price: self.quote.price,
            block_height: self.block_height,
            address: pair.address.clone(),
            token1: pair.token1.clone(),
            token2: pair.token2.clone(),
            security_token: pair.security_token.clone(),
            token1_amount: self.quote.token1_amount,
            token2_amount: self.quote.token2_amount,
            output: self.output.clone(),
            date_time: date_time.to_string(),
        }
    }
}

/// Decide what to do with an observation.
///
/// * `identity_count`: snapshot rows already pointing at the observed
///   output (only consulted for live calls).
/// * `existing`: the stored row for this pool, if the caller found one.
pub fn decide(
    ctx: &ReconciliationContext,
    identity_count: u64,
    existing: Option<&SnapshotRow>,
    floor: f64,
) -> Decision {
    if matches!(ctx.mode, CallerMode::Live { .. }) && identity_count == 1 {
        return Decision::Skip(SkipReason::AlreadyProcessed);
    }

    let Some(row) = existing else {
        return Decision::Insert;
    };

    if ctx.block_height < row.block_height {
        return Decision::Skip(SkipReason::StaleHeight {
            stored: row.block_height,
            observed: ctx.block_height,
        });
    }
    if row.output == ctx.output {
        return Decision::Skip(SkipReason::SameIdentity);
    }
    if !ctx.quote.clears_floor(floor) {
        return Decision::Skip(SkipReason::BelowFloor);
    }
    if matches!(&ctx.mode, CallerMode::Live { spent_ids } if spent_ids.is_empty()) {
        return Decision::Skip(SkipReason::NoSpentInput);
    }

    Decision::Update { row_id: row.id }
}

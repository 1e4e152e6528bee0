//! Per-cycle "biggest pool wins" reducer used by the snapshot poller.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::pair::WatchedPair;
use super::reconcile::{CallerMode, ReconciliationContext};
use super::utxo::OutputRef;
use super::volume::PoolQuote;

/// A matched pool seen during a poller cycle.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub pair: Arc<WatchedPair>,
    pub output: OutputRef,
    pub quote: PoolQuote,
    /// Chain tip slot when the address was scanned.
    pub block_height: u64,
    pub epoch: u64,
}

impl Candidate {
    /// True when both raw legs are strictly larger than `other`'s.
    pub fn dominates(&self, other: &Self) -> bool {
        self.quote.token1_amount > other.quote.token1_amount
            && self.quote.token2_amount > other.quote.token2_amount
    }

    pub fn into_context(self) -> ReconciliationContext {
        ReconciliationContext {
            pair: self.pair,
            output: self.output,
            quote: self.quote,
            block_height: self.block_height,
            epoch: self.epoch,
            mode: CallerMode::Poll,
        }
    }
}

/// Best candidate per `(pair, source)` for one cycle.
///
/// Owned by a single cycle and consumed on flush.
#[derive(Debug, Default)]
pub struct BestPools {
    best: BTreeMap<(String, String), Candidate>,
}

impl BestPools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a candidate in. Returns whether it became the incumbent.
    ///
    /// A challenger replaces the incumbent only when it is larger on
    /// both legs; ties and partial improvements keep the incumbent.
    pub fn offer(&mut self, candidate: Candidate) -> bool {
        let key = (candidate.pair.name.clone(), candidate.pair.source.clone());
        match self.best.get(&key) {
            Some(incumbent) if !candidate.dominates(incumbent) => false,
            _ => {
                self.best.insert(key, candidate);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.best.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }

    /// Consume the reducer, yielding one candidate per pool.
    pub fn into_candidates(self) -> impl Iterator<Item = Candidate> {
        self.best.into_values()
    }
}

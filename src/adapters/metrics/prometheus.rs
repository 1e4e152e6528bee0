//! Prometheus Metrics Registry - Indexer Observability
//!
//! Counters for chain-sync progress, reconciliation outcomes and poller
//! cycles. All metrics use the `cnt_indexer_*` prefix and are rendered
//! in text format by the health server's `/metrics` route.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

/// Centralized Prometheus metrics for the indexer.
pub struct IndexerMetrics {
    registry: Registry,
    /// Roll-forward blocks processed.
    pub forward_blocks: IntCounter,
    /// Roll-backward events observed.
    pub backward_blocks: IntCounter,
    /// Chain-sync reconnects.
    pub reconnects: IntCounter,
    /// Transactions scanned in forward blocks.
    pub transactions: IntCounter,
    /// Reconciliation decisions by `outcome` (inserted, updated, skipped).
    pub reconciliations: IntCounterVec,
    /// Completed snapshot poller cycles.
    pub poller_cycles: IntCounter,
}

impl IndexerMetrics {
    /// Create and register all metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let forward_blocks = IntCounter::new(
            "cnt_indexer_forward_blocks_total",
            "Blocks received with direction forward",
        )?;
        let backward_blocks = IntCounter::new(
            "cnt_indexer_backward_blocks_total",
            "Roll-backward events received",
        )?;
        let reconnects =
            IntCounter::new("cnt_indexer_reconnects_total", "Chain-sync reconnects")?;
        let transactions = IntCounter::new(
            "cnt_indexer_transactions_total",
            "Transactions scanned in forward blocks",
        )?;
        let reconciliations = IntCounterVec::new(
            Opts::new(
                "cnt_indexer_reconciliations_total",
                "Reconciliation decisions by outcome",
            ),
            &["outcome"],
        )?;
        let poller_cycles =
            IntCounter::new("cnt_indexer_poller_cycles_total", "Completed poller cycles")?;

        registry.register(Box::new(forward_blocks.clone()))?;
        registry.register(Box::new(backward_blocks.clone()))?;
        registry.register(Box::new(reconnects.clone()))?;
        registry.register(Box::new(transactions.clone()))?;
        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(poller_cycles.clone()))?;

        Ok(Self {
            registry,
            forward_blocks,
            backward_blocks,
            reconnects,
            transactions,
            reconciliations,
            poller_cycles,
        })
    }

    /// Count one reconciliation outcome.
    pub fn record_outcome(&self, outcome: &str) {
        self.reconciliations.with_label_values(&[outcome]).inc();
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %e, "Metrics encoding failed");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

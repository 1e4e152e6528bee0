//! CNT Indexer - Entry Point
//!
//! Wiring sequence:
//! 1. Load config (CNT_INDEXER_CONFIG or config.toml) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Load pairs file and log its checksum
//! 4. Open the SQLite store (snapshot table recreated, history kept),
//!    with a second connection for the poller
//! 5. Gate on Kupo health when Kupo is enabled
//! 6. Spawn health/metrics server
//! 7. Spawn the snapshot poller on its own Ogmios session
//! 8. Run the chain follower until SIGINT
//! 9. Raise poller-stop and wait (bounded) for the poller

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use cnt_indexer::adapters::kupo::KupoClient;
use cnt_indexer::adapters::metrics::{HealthServer, HealthState, IndexerMetrics};
use cnt_indexer::adapters::ogmios::OgmiosClient;
use cnt_indexer::adapters::persistence::SqliteStore;
use cnt_indexer::config::{self, AppConfig};
use cnt_indexer::domain::pair::PairRegistry;
use cnt_indexer::ports::store::SnapshotStore;
use cnt_indexer::ports::utxo_source::UtxoSource;
use cnt_indexer::usecases::{ChainFollower, ReconciliationEngine, Signals, SnapshotPoller};

const POLLER_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = config::loader::config_path();
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.indexer.log_level)),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path,
        ogmios = %config.ogmios.url,
        kupo_enabled = config.kupo.enabled,
        "Starting CNT indexer"
    );

    // ── 3. Pairs ────────────────────────────────────────────
    let pairs = config::loader::load_pairs(&config.indexer.pairs_path)
        .context("Failed to load pairs")?;
    let registry = Arc::new(pairs.registry);

    // ── 4. Store: one connection per loop ──────────────────
    let store = Arc::new(
        SqliteStore::open(&config.indexer.database_path).context("Failed to open database")?,
    );
    store
        .rebuild_snapshots()
        .await
        .context("Failed to reset snapshot table")?;
    let poller_store = Arc::new(
        SqliteStore::open(&config.indexer.database_path).context("Failed to open database")?,
    );

    // ── 5. Kupo health gate ─────────────────────────────────
    let kupo = if config.kupo.enabled {
        let client = KupoClient::new(&config.kupo).context("Failed to create Kupo client")?;
        let healthy = client.health().await.context("Kupo health check failed")?;
        anyhow::ensure!(healthy, "Kupo is not synchronized with its node");
        Some(Arc::new(client))
    } else {
        None
    };

    // ── 6. Observability ────────────────────────────────────
    let signals = Arc::new(Signals::new());
    let health = Arc::new(HealthState::new());
    let metrics = Arc::new(IndexerMetrics::new().context("Failed to register metrics")?);

    let health_handle = if config.health.enabled {
        let server = HealthServer::new(Arc::clone(&health), Arc::clone(&metrics), config.health.port);
        let shutdown = signals.shutdown_rx();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(shutdown).await {
                error!(error = %e, "Health server failed");
            }
        }))
    } else {
        None
    };

    let engine = Arc::new(
        ReconciliationEngine::new(store, config.indexer.min_volume)
            .with_metrics(Arc::clone(&metrics)),
    );
    let poller_engine = Arc::new(
        ReconciliationEngine::new(poller_store, config.indexer.min_volume)
            .with_metrics(Arc::clone(&metrics)),
    );

    // ── 7. Snapshot poller on a dedicated session ───────────
    let poller_chain = Arc::new(OgmiosClient::new(&config.ogmios));
    let poller_handle = match kupo {
        Some(kupo) => spawn_poller(&config, poller_chain, kupo, &poller_engine, &registry, &signals, &metrics),
        None => {
            let source = Arc::clone(&poller_chain);
            spawn_poller(&config, poller_chain, source, &poller_engine, &registry, &signals, &metrics)
        }
    };

    // ── 8. Chain follower until SIGINT ──────────────────────
    let chain = Arc::new(OgmiosClient::new(&config.ogmios));
    chain.connect().await.context("Failed to connect to Ogmios")?;

    let mut follower = ChainFollower::new(
        chain,
        Arc::clone(&engine),
        Arc::clone(&registry),
        Arc::clone(&signals),
        Duration::from_millis(config.indexer.reconnect_pause_ms),
    )
    .with_observability(Arc::clone(&health), Arc::clone(&metrics))
    .with_stats_every(config.indexer.stats_every_blocks);

    let follower_signals = Arc::clone(&signals);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("SIGINT received, initiating graceful shutdown"),
            Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
        }
        follower_signals.shutdown();
    });

    let stats = follower.run().await;

    // ── 9. Graceful shutdown ────────────────────────────────
    signals.stop_poller();
    match tokio::time::timeout(POLLER_STOP_TIMEOUT, poller_handle).await {
        Ok(Ok(cycles)) => info!(cycles, "Poller finished"),
        Ok(Err(e)) => warn!(error = %e, "Poller task panicked"),
        Err(_) => warn!("Poller did not stop in time"),
    }
    if let Some(handle) = health_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!(
        forward_blocks = stats.forward_blocks,
        backward_blocks = stats.backward_blocks,
        reconnects = stats.reconnects,
        "CNT indexer shut down cleanly"
    );
    Ok(())
}

fn spawn_poller<U: UtxoSource>(
    config: &AppConfig,
    chain: Arc<OgmiosClient>,
    source: Arc<U>,
    engine: &Arc<ReconciliationEngine<SqliteStore>>,
    registry: &Arc<PairRegistry>,
    signals: &Arc<Signals>,
    metrics: &Arc<IndexerMetrics>,
) -> JoinHandle<u64> {
    let poller = SnapshotPoller::new(
        chain,
        source,
        Arc::clone(engine),
        Arc::clone(registry),
        Arc::clone(signals),
        Duration::from_secs(config.indexer.poll_interval_secs),
    )
    .with_retry_pause(Duration::from_millis(config.indexer.reconnect_pause_ms))
    .with_metrics(Arc::clone(metrics));
    tokio::spawn(async move { poller.run().await })
}

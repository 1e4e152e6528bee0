//! CNT Submitter - One Aggregation Pass
//!
//! Builds a price message for every configured feed and either delivers
//! each one to the validator named in the node identity file or, with
//! `--print`, writes them to stdout as JSON lines.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use cnt_indexer::adapters::delivery::ValidatorSink;
use cnt_indexer::adapters::identity::load_identity;
use cnt_indexer::adapters::kupo::KupoClient;
use cnt_indexer::adapters::ogmios::OgmiosClient;
use cnt_indexer::adapters::persistence::SqliteStore;
use cnt_indexer::config::{self, AppConfig};
use cnt_indexer::domain::message::{NodeIdentity, PriceMessage};
use cnt_indexer::domain::pair::PairRegistry;
use cnt_indexer::ports::delivery::MessageSink;
use cnt_indexer::ports::utxo_source::UtxoSource;
use cnt_indexer::usecases::PriceAggregator;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let print_only = std::env::args().skip(1).any(|arg| arg == "--print");

    let config_path = config::loader::config_path();
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.indexer.log_level)),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let identity = load_identity(&config.identity.path).context("Failed to load node identity")?;
    let registry = Arc::new(
        config::loader::load_pairs(&config.indexer.pairs_path)
            .context("Failed to load pairs")?
            .registry,
    );
    let store = Arc::new(
        SqliteStore::open(&config.indexer.database_path).context("Failed to open database")?,
    );
    let chain = Arc::new(OgmiosClient::new(&config.ogmios));

    let messages = if config.kupo.enabled {
        let kupo = Arc::new(KupoClient::new(&config.kupo).context("Failed to create Kupo client")?);
        collect(&config, store, chain, kupo, registry, identity.clone()).await?
    } else {
        let source = Arc::clone(&chain);
        collect(&config, store, chain, source, registry, identity.clone()).await?
    };
    info!(messages = messages.len(), "Aggregation pass complete");

    if print_only {
        for message in &messages {
            println!("{}", serde_json::to_string(message)?);
        }
        return Ok(());
    }

    let url = identity
        .validator_web_socket
        .clone()
        .context("Node identity has no validator_web_socket")?;
    let sink = ValidatorSink::new(url, identity.node_id.clone(), DELIVERY_TIMEOUT);
    let mut rejected = 0;
    for message in &messages {
        match sink.deliver(message).await {
            Ok(true) => {}
            Ok(false) => rejected += 1,
            Err(e) => {
                warn!(feed = %message.feed, error = %e, "Delivery failed");
                rejected += 1;
            }
        }
    }
    info!(delivered = messages.len() - rejected, rejected, "Submission finished");
    Ok(())
}

async fn collect<U: UtxoSource>(
    config: &AppConfig,
    store: Arc<SqliteStore>,
    chain: Arc<OgmiosClient>,
    source: Arc<U>,
    registry: Arc<PairRegistry>,
    identity: NodeIdentity,
) -> Result<Vec<PriceMessage>> {
    let aggregator = PriceAggregator::new(
        store,
        chain,
        source,
        registry,
        identity,
        config::loader::user_agent(),
        config.indexer.min_volume,
        config.indexer.max_liquidity_pools,
    );
    aggregator
        .aggregate_all()
        .await
        .context("Aggregation pass failed")
}

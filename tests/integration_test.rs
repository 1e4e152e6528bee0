//! Integration Tests - Follower, Poller and Aggregator against Mock Sources
//!
//! Chain and UTxO sources are mockall mocks; the store is a real SQLite
//! database (in memory) so every test observes the rows actually written.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mockall::mock;

use cnt_indexer::adapters::persistence::SqliteStore;
use cnt_indexer::domain::block::{Block, ChainEvent, ChainPoint, Transaction};
use cnt_indexer::domain::error::{IndexerError, IndexerResult};
use cnt_indexer::domain::message::NodeIdentity;
use cnt_indexer::domain::pair::{PairDefinition, PairRegistry, SourceDefinition, WatchedPair};
use cnt_indexer::domain::snapshot::PoolKey;
use cnt_indexer::domain::utxo::{AssetMap, CanonicalUtxo, OutputRef};
use cnt_indexer::ports::store::SnapshotStore;
use cnt_indexer::ports::utxo_source::UtxoSource;
use cnt_indexer::usecases::{ChainFollower, PriceAggregator, ReconciliationEngine, Signals, SnapshotPoller};

// ---- Mock Definitions ----

mock! {
    pub Chain {}

    #[async_trait::async_trait]
    impl cnt_indexer::ports::chain::ChainQuery for Chain {
        async fn tip(&self) -> IndexerResult<ChainPoint>;
        async fn epoch(&self) -> IndexerResult<u64>;
    }

    #[async_trait::async_trait]
    impl cnt_indexer::ports::chain::ChainSync for Chain {
        async fn find_intersection(&self, point: &ChainPoint) -> IndexerResult<ChainPoint>;
        async fn next_block(&self) -> IndexerResult<ChainEvent>;
        async fn reconnect(&self) -> IndexerResult<()>;
    }
}

mock! {
    pub Utxos {}

    #[async_trait::async_trait]
    impl cnt_indexer::ports::utxo_source::UtxoSource for Utxos {
        async fn utxos_at(&self, address: &str) -> IndexerResult<Vec<CanonicalUtxo>>;
    }
}

// ---- Fixtures ----

const ADDRESS: &str = "addr1x8srqftqemf0mjlukfszd97ljuxdp44r372txfcr75wrz26rnxqnmtv3hdu2t6chcfhl2zzjh36a87nmd6dwsu3jenqsslnz7e";
const IUSD_POLICY: &str = "f66d78b4a3cb3d37afa0ec36461e51ecbde00f26c8f0a68f94b69880";
const IUSD_NAME: &str = "69555344";
const SECURITY_POLICY: &str = "e0302560ced2fdcbfcb2602697df970cd0d6a38f94b32703f51c312b";
const SECURITY_NAME: &str = "000de140b141";
const FLOOR: f64 = 5.0;

const SECOND_ADDRESS: &str = "addr1z8snz7c4974vzdpxu65ruphl3zjdvtxw8strf2c2tmqnxz2j2c79gy9l76sdg0xwhd7r0c0kna0tycz4y5s6mlenh8pq0xmsha";

fn source(name: &str, address: &str) -> SourceDefinition {
    SourceDefinition {
        source: name.into(),
        address: address.into(),
        security_token_policy: SECURITY_POLICY.into(),
        security_token_name: SECURITY_NAME.into(),
    }
}

fn registry_with(sources: Vec<SourceDefinition>) -> Arc<PairRegistry> {
    let definition = PairDefinition {
        name: "ADA-iUSD".into(),
        token1_policy: String::new(),
        token1_name: "lovelace".into(),
        token1_decimals: 6,
        token2_policy: IUSD_POLICY.into(),
        token2_name: IUSD_NAME.into(),
        token2_decimals: 6,
        sources,
    };
    Arc::new(PairRegistry::from_definitions(&[definition]).unwrap())
}

fn registry() -> Arc<PairRegistry> {
    registry_with(vec![source("SundaeSwapV3", ADDRESS)])
}

/// Same pair quoted on two DEXes at different addresses.
fn two_source_registry() -> Arc<PairRegistry> {
    registry_with(vec![source("SundaeSwapV3", ADDRESS), source("MinSwapV2", SECOND_ADDRESS)])
}

fn key_of(pair: &WatchedPair) -> PoolKey {
    PoolKey {
        pair: pair.name.clone(),
        source: pair.source.clone(),
        address: pair.address.clone(),
        security_token: pair.security_token.clone(),
    }
}

fn pool_key() -> PoolKey {
    key_of(&registry().pairs_at(ADDRESS)[0])
}

fn pool_utxo(tx: &str, lovelace: u128, iusd: u128) -> CanonicalUtxo {
    let assets = AssetMap::new()
        .with(IUSD_POLICY, IUSD_NAME, iusd)
        .with(SECURITY_POLICY, SECURITY_NAME, 1);
    CanonicalUtxo::new(OutputRef::new(tx, 0), ADDRESS, lovelace, assets)
}

fn block(slot: u64, tx: &str, inputs: Vec<OutputRef>, output: CanonicalUtxo) -> ChainEvent {
    ChainEvent::Forward(Block {
        id: format!("block-{slot}"),
        height: slot / 20,
        slot,
        transactions: vec![Transaction { id: tx.into(), inputs, outputs: vec![output] }],
    })
}

fn tip(slot: u64) -> ChainPoint {
    ChainPoint { slot, id: format!("tip-{slot}") }
}

fn identity() -> NodeIdentity {
    NodeIdentity {
        node_id: "UUIDV4".into(),
        location: serde_json::json!({"city": "STADT"}),
        validator_web_socket: None,
    }
}

/// Chain mock replaying `events`; raises shutdown once they run out.
fn scripted_chain(events: Vec<IndexerResult<ChainEvent>>, signals: &Arc<Signals>) -> MockChain {
    let queue = Arc::new(Mutex::new(VecDeque::from(events)));
    let signals = Arc::clone(signals);

    let mut chain = MockChain::new();
    chain.expect_tip().returning(|| Ok(tip(100)));
    chain.expect_epoch().returning(|| Ok(510));
    chain.expect_find_intersection().returning(|point| Ok(point.clone()));
    chain.expect_reconnect().returning(|| Ok(()));
    chain.expect_next_block().returning(move || {
        queue.lock().unwrap().pop_front().unwrap_or_else(|| {
            signals.shutdown();
            Err(IndexerError::Data("script exhausted".into()))
        })
    });
    chain
}

fn engine() -> Arc<ReconciliationEngine<SqliteStore>> {
    Arc::new(ReconciliationEngine::new(Arc::new(SqliteStore::open_in_memory().unwrap()), FLOOR))
}

fn follower(
    chain: MockChain,
    engine: &Arc<ReconciliationEngine<SqliteStore>>,
    signals: &Arc<Signals>,
) -> ChainFollower<MockChain, SqliteStore> {
    ChainFollower::new(
        Arc::new(chain),
        Arc::clone(engine),
        registry(),
        Arc::clone(signals),
        Duration::from_millis(1),
    )
}

// ---- Chain Follower ----

#[tokio::test]
async fn test_follower_inserts_matched_pool_and_price() {
    let signals = Arc::new(Signals::new());
    let engine = engine();
    let events = vec![Ok(block(101, "tx1", vec![], pool_utxo("tx1", 23_813_086_544, 15_887_438_632)))];

    let stats = follower(scripted_chain(events, &signals), &engine, &signals).run().await;

    assert_eq!(stats.forward_blocks, 1);
    assert_eq!(stats.transactions, 1);
    let store = engine.store();
    assert_eq!(store.snapshot_count().unwrap(), 1);
    let row = store.snapshot_for_pool(&pool_key()).await.unwrap().unwrap();
    assert_eq!(row.price, 0.667_172_590_274_864_4);
    assert_eq!(row.block_height, 101);
    assert_eq!(row.output, OutputRef::new("tx1", 0));

    let history = store.price_history("ADA-iUSD").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].price, row.price);
    assert_eq!(history[0].token1_amount, 23_813_086_544);
    assert_eq!(history[0].token2_amount, 15_887_438_632);
    assert_eq!(history[0].epoch, 510);
    assert_eq!(store.watermark().await.unwrap().unwrap().slot, 101);
}

#[tokio::test]
async fn test_follower_ignores_pool_with_empty_leg() {
    let signals = Arc::new(Signals::new());
    let engine = engine();
    let events = vec![Ok(block(101, "tx1", vec![], pool_utxo("tx1", 0, 15_887_438_632)))];

    follower(scripted_chain(events, &signals), &engine, &signals).run().await;

    assert_eq!(engine.store().snapshot_count().unwrap(), 0);
    assert!(engine.store().price_history("ADA-iUSD").unwrap().is_empty());
}

#[tokio::test]
async fn test_follower_replay_is_idempotent() {
    let signals = Arc::new(Signals::new());
    let engine = engine();
    let output = pool_utxo("tx1", 23_813_086_544, 15_887_438_632);
    let events = vec![
        Ok(block(101, "tx1", vec![], output.clone())),
        Ok(block(101, "tx1", vec![], output)),
    ];

    follower(scripted_chain(events, &signals), &engine, &signals).run().await;

    assert_eq!(engine.store().snapshot_count().unwrap(), 1);
    assert_eq!(engine.store().price_history("ADA-iUSD").unwrap().len(), 1);
    assert_eq!(engine.store().watermark().await.unwrap().unwrap().slot, 101);
}

#[tokio::test]
async fn test_follower_updates_pool_that_spends_stored_output() {
    let signals = Arc::new(Signals::new());
    let engine = engine();
    let events = vec![
        Ok(block(101, "tx1", vec![], pool_utxo("tx1", 30_000_000_000, 20_000_000_000))),
        Ok(block(
            140,
            "tx2",
            vec![OutputRef::new("tx1", 0)],
            pool_utxo("tx2", 30_100_000_000, 19_950_000_000),
        )),
    ];

    follower(scripted_chain(events, &signals), &engine, &signals).run().await;

    let store = engine.store();
    assert_eq!(store.snapshot_count().unwrap(), 1);
    let row = store.snapshot_for_pool(&pool_key()).await.unwrap().unwrap();
    assert_eq!(row.output, OutputRef::new("tx2", 0));
    assert_eq!(row.block_height, 140);
    assert_eq!(store.price_history("ADA-iUSD").unwrap().len(), 2);
}

#[tokio::test]
async fn test_reconnect_rebuilds_snapshots_and_keeps_history() {
    let signals = Arc::new(Signals::new());
    let mut reconnects = signals.reconnect_rx();
    let engine = engine();
    let events = vec![
        Ok(block(101, "tx1", vec![], pool_utxo("tx1", 23_813_086_544, 15_887_438_632))),
        Err(IndexerError::Transport("socket reset".into())),
    ];

    let stats = follower(scripted_chain(events, &signals), &engine, &signals).run().await;

    assert_eq!(stats.reconnects, 1);
    assert!(reconnects.has_changed().unwrap());
    assert_eq!(*reconnects.borrow_and_update(), 1);

    let store = engine.store();
    assert_eq!(store.snapshot_count().unwrap(), 0);
    assert_eq!(store.price_history("ADA-iUSD").unwrap().len(), 1);
    assert_eq!(store.watermark().await.unwrap().unwrap().slot, 101);
}

#[tokio::test]
async fn test_backward_event_only_counts() {
    let signals = Arc::new(Signals::new());
    let engine = engine();
    let events = vec![
        Ok(block(101, "tx1", vec![], pool_utxo("tx1", 23_813_086_544, 15_887_438_632))),
        Ok(ChainEvent::Backward(Some(tip(90)))),
    ];

    let stats = follower(scripted_chain(events, &signals), &engine, &signals).run().await;

    assert_eq!(stats.backward_blocks, 1);
    assert_eq!(engine.store().snapshot_count().unwrap(), 1);
    assert_eq!(engine.store().watermark().await.unwrap().unwrap().slot, 101);
}

// ---- Snapshot Poller ----

fn query_chain(slot: u64) -> MockChain {
    let mut chain = MockChain::new();
    chain.expect_tip().returning(move || Ok(tip(slot)));
    chain.expect_epoch().returning(|| Ok(510));
    chain
}

fn poller(
    chain: MockChain,
    utxos: MockUtxos,
    engine: &Arc<ReconciliationEngine<SqliteStore>>,
    signals: &Arc<Signals>,
) -> SnapshotPoller<MockChain, MockUtxos, SqliteStore> {
    SnapshotPoller::new(
        Arc::new(chain),
        Arc::new(utxos),
        Arc::clone(engine),
        registry(),
        Arc::clone(signals),
        Duration::from_secs(3600),
    )
    .with_retry_pause(Duration::from_millis(1))
}

#[tokio::test]
async fn test_poller_keeps_incumbent_on_partial_improvement() {
    let signals = Arc::new(Signals::new());
    let engine = engine();
    let mut utxos = MockUtxos::new();
    utxos.expect_utxos_at().returning(|_| {
        Ok(vec![
            pool_utxo("incumbent", 10_000_000_000, 20_000_000_000),
            pool_utxo("challenger", 15_000_000_000, 18_000_000_000),
        ])
    });

    let poller = poller(query_chain(300), utxos, &engine, &signals);
    let best = poller.scan().await.unwrap();
    assert_eq!(best.len(), 1);
    assert_eq!(poller.flush(best).await, 1);

    let row = engine.store().snapshot_for_pool(&pool_key()).await.unwrap().unwrap();
    assert_eq!(row.output, OutputRef::new("incumbent", 0));
    assert_eq!(row.block_height, 300);
}

#[tokio::test]
async fn test_poller_scan_surfaces_transport_errors() {
    let signals = Arc::new(Signals::new());
    let engine = engine();
    let mut utxos = MockUtxos::new();
    utxos
        .expect_utxos_at()
        .returning(|_| Err(IndexerError::Transport("connection refused".into())));

    let poller = poller(query_chain(300), utxos, &engine, &signals);
    assert!(poller.scan().await.unwrap_err().is_transport());
}

#[tokio::test]
async fn test_poller_runs_until_stopped() {
    let signals = Arc::new(Signals::new());
    let engine = engine();
    let mut utxos = MockUtxos::new();
    utxos
        .expect_utxos_at()
        .returning(|_| Ok(vec![pool_utxo("tx1", 23_813_086_544, 15_887_438_632)]));

    let poller = poller(query_chain(300), utxos, &engine, &signals);
    let handle = tokio::spawn(async move { poller.run().await });

    let store = Arc::clone(engine.store());
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.snapshot_count().unwrap() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    signals.stop_poller();
    let cycles = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(cycles, 1);
}

/// UTxO source whose second query never answers, so a scan stalls
/// midway until it is abandoned.
struct StallingUtxos {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl UtxoSource for StallingUtxos {
    async fn utxos_at(&self, _address: &str) -> IndexerResult<Vec<CanonicalUtxo>> {
        match self.calls.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(vec![pool_utxo("abandoned", 40_000_000_000, 30_000_000_000)]),
            1 => std::future::pending().await,
            _ => Ok(vec![pool_utxo("rescanned", 23_813_086_544, 15_887_438_632)]),
        }
    }
}

#[tokio::test]
async fn test_reconnect_restarts_poller_scan_from_the_top() {
    let signals = Arc::new(Signals::new());
    let engine = engine();
    let registry = two_source_registry();
    let utxos = Arc::new(StallingUtxos { calls: AtomicUsize::new(0) });

    let poller = SnapshotPoller::new(
        Arc::new(query_chain(300)),
        Arc::clone(&utxos),
        Arc::clone(&engine),
        Arc::clone(&registry),
        Arc::clone(&signals),
        Duration::from_secs(3600),
    );
    let handle = tokio::spawn(async move { poller.run().await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while utxos.calls.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(engine.store().snapshot_count().unwrap(), 0);

    signals.bump_reconnect();

    let store = Arc::clone(engine.store());
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.snapshot_count().unwrap() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(utxos.calls.load(Ordering::SeqCst), 4);
    for address in [ADDRESS, SECOND_ADDRESS] {
        let pair = &registry.pairs_at(address)[0];
        let row = store.snapshot_for_pool(&key_of(pair)).await.unwrap().unwrap();
        assert_eq!(row.output, OutputRef::new("rescanned", 0));
    }
    assert_eq!(store.price_history("ADA-iUSD").unwrap().len(), 2);

    signals.stop_poller();
    let cycles = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(cycles, 1);
}

// ---- Price Aggregator ----

fn aggregator(
    chain: MockChain,
    utxos: MockUtxos,
    engine: &Arc<ReconciliationEngine<SqliteStore>>,
) -> PriceAggregator<SqliteStore, MockChain, MockUtxos> {
    aggregator_for(registry(), chain, utxos, engine)
}

fn aggregator_for(
    registry: Arc<PairRegistry>,
    chain: MockChain,
    utxos: MockUtxos,
    engine: &Arc<ReconciliationEngine<SqliteStore>>,
) -> PriceAggregator<SqliteStore, MockChain, MockUtxos> {
    PriceAggregator::new(
        Arc::clone(engine.store()),
        Arc::new(chain),
        Arc::new(utxos),
        registry,
        identity(),
        "cnt-indexer/test",
        FLOOR,
        1,
    )
}

async fn seed_snapshot(engine: &Arc<ReconciliationEngine<SqliteStore>>, slot: u64) {
    let mut utxos = MockUtxos::new();
    utxos
        .expect_utxos_at()
        .returning(|_| Ok(vec![pool_utxo("seed", 23_813_086_544, 15_887_438_632)]));
    let signals = Arc::new(Signals::new());
    let poller = poller(query_chain(slot), utxos, engine, &signals);
    let best = poller.scan().await.unwrap();
    poller.flush(best).await;
    engine.store().advance_watermark(slot, "2026-01-01T00:00:00Z").await.unwrap();
}

#[tokio::test]
async fn test_aggregator_reads_fresh_snapshot() {
    let engine = engine();
    seed_snapshot(&engine, 100).await;

    let mut utxos = MockUtxos::new();
    utxos.expect_utxos_at().times(0);
    let message = aggregator(query_chain(100), utxos, &engine)
        .aggregate("ADA-iUSD")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(message.raw.len(), 1);
    assert_eq!(message.raw[0].utxo, "seed#0");
    assert_eq!(message.raw[0].collector, "cnt-indexer/test");
    assert_eq!(message.calculated_value, "0.6671725902748644");
    assert_eq!(message.identity.node_id, "UUIDV4");
    assert_eq!(message.content_signature.len(), 64);
}

#[tokio::test]
async fn test_aggregator_falls_back_to_live_query_without_writing() {
    let engine = engine();
    let mut utxos = MockUtxos::new();
    utxos
        .expect_utxos_at()
        .times(1)
        .returning(|_| Ok(vec![pool_utxo("live", 23_813_086_544, 15_887_438_632)]));

    let message = aggregator(query_chain(200), utxos, &engine)
        .aggregate("ADA-iUSD")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(message.raw[0].utxo, "live#0");
    assert_eq!(message.raw[0].block_height, 200);
    assert_eq!(engine.store().snapshot_count().unwrap(), 0);
    assert!(engine.store().price_history("ADA-iUSD").unwrap().is_empty());
}

#[tokio::test]
async fn test_aggregator_single_source_with_too_many_pools_is_empty() {
    let engine = engine();
    let mut utxos = MockUtxos::new();
    utxos.expect_utxos_at().returning(|_| {
        Ok(vec![
            pool_utxo("a", 23_813_086_544, 15_887_438_632),
            pool_utxo("b", 10_000_000_000, 6_000_000_000),
        ])
    });

    let message = aggregator(query_chain(200), utxos, &engine).aggregate("ADA-iUSD").await.unwrap();
    assert!(message.is_none());
}

#[tokio::test]
async fn test_aggregator_drops_only_the_source_with_too_many_pools() {
    let engine = engine();
    let mut utxos = MockUtxos::new();
    utxos.expect_utxos_at().returning(|address| {
        if address == ADDRESS {
            Ok(vec![pool_utxo("sundae", 23_813_086_544, 15_887_438_632)])
        } else {
            Ok(vec![
                pool_utxo("minswap_a", 30_000_000_000, 20_000_000_000),
                pool_utxo("minswap_b", 10_000_000_000, 6_000_000_000),
            ])
        }
    });

    let message = aggregator_for(two_source_registry(), query_chain(200), utxos, &engine)
        .aggregate("ADA-iUSD")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(message.raw.len(), 1);
    assert_eq!(message.raw[0].source, "SundaeSwapV3");
    assert_eq!(message.raw[0].utxo, "sundae#0");
    assert_eq!(message.calculated_value, "0.6671725902748644");
}

#[tokio::test]
async fn test_aggregator_unknown_feed_is_empty() {
    let engine = engine();
    let message = aggregator(MockChain::new(), MockUtxos::new(), &engine)
        .aggregate("ADA-NOPE")
        .await
        .unwrap();
    assert!(message.is_none());
}

//! Property-Based Tests - Domain Layer Invariants
//!
//! Uses `proptest` to check the pricing, matching and reduction rules
//! across random pool sizes.

use std::sync::Arc;

use proptest::prelude::*;

use cnt_indexer::domain::matcher::PairMatcher;
use cnt_indexer::domain::message::{calculate_price, SourceMessage};
use cnt_indexer::domain::pair::{SecurityToken, TokenSpec, WatchedPair, LOVELACE};
use cnt_indexer::domain::reducer::{BestPools, Candidate};
use cnt_indexer::domain::utxo::{AssetMap, CanonicalUtxo, OutputRef};
use cnt_indexer::domain::volume::{clears_floor, to_volume, PoolQuote};

const TOKEN_POLICY: &str = "f66d78b4a3cb3d37afa0ec36461e51ecbde00f26c8f0a68f94b69880";
const SEC_POLICY: &str = "e0302560ced2fdcbfcb2602697df970cd0d6a38f94b32703f51c312b";

fn ada_pair() -> Arc<WatchedPair> {
    Arc::new(WatchedPair {
        name: "ADA-iUSD".into(),
        token1: TokenSpec { policy: String::new(), name: LOVELACE.into(), decimals: 6 },
        token2: TokenSpec { policy: TOKEN_POLICY.into(), name: "69555344".into(), decimals: 6 },
        source: "MinswapV2".into(),
        address: "addr1pool".into(),
        security_token: SecurityToken { policy: SEC_POLICY.into(), name: "4c51".into() },
    })
}

fn pool(lovelace: u128, iusd: u128) -> CanonicalUtxo {
    let assets = AssetMap::new()
        .with(TOKEN_POLICY, "69555344", iusd)
        .with(SEC_POLICY, "4c51", 1);
    CanonicalUtxo::new(OutputRef::new("tx", 0), "addr1pool", lovelace, assets)
}

fn source(t1: f64, t2: f64) -> SourceMessage {
    SourceMessage {
        token1_name: LOVELACE.into(),
        token1_decimals: 6,
        token2_name: "69555344".into(),
        token2_decimals: 6,
        block_height: 1,
        source: "MinswapV2".into(),
        collector: "cnt-indexer/test".into(),
        address: "addr1pool".into(),
        feed: "ADA-iUSD".into(),
        utxo: "tx#0".into(),
        token1_volume: t1,
        token2_volume: t2,
        price: t2 / t1,
        amounts: Default::default(),
    }
}

fn candidate(t1: u128, t2: u128, tx: &str) -> Candidate {
    Candidate {
        pair: ada_pair(),
        output: OutputRef::new(tx, 0),
        quote: PoolQuote::from_amounts(t1, 6, t2, 6).unwrap(),
        block_height: 10,
        epoch: 500,
    }
}

// ── Volume Floor ────────────────────────────────────────────

proptest! {
    /// The floor is strict: exactly-at-floor volumes never clear it.
    #[test]
    fn floor_is_strict(whole in 0u128..1_000_000, decimals in 0u32..10) {
        let raw = whole * 10u128.pow(decimals);
        let volume = to_volume(raw, decimals);
        prop_assert!(!clears_floor(raw, decimals, volume));
        prop_assert!(clears_floor(raw + 10u128.pow(decimals), decimals, volume));
    }

    /// The comparison stays exact for amounts far beyond 2^53.
    #[test]
    fn floor_is_exact_for_large_amounts(
        whole in 1u128..1_000_000_000_000,
        dust in 1u128..1_000_000_000,
        decimals in 9u32..=18,
    ) {
        let unit = 10u128.pow(decimals);
        #[allow(clippy::cast_precision_loss)]
        let floor = whole as f64;
        let at_floor = whole * unit;
        prop_assert!(!clears_floor(at_floor, decimals, floor));
        prop_assert!(!clears_floor(at_floor - 1, decimals, floor));
        prop_assert!(clears_floor(at_floor + dust, decimals, floor));
    }

    /// A pool matches only when both legs clear the floor.
    #[test]
    fn matcher_requires_both_legs_above_floor(
        lovelace in 1u128..100_000_000,
        iusd in 1u128..100_000_000,
    ) {
        let matcher = PairMatcher::new(5.0);
        let expected = to_volume(lovelace, 6) > 5.0 && to_volume(iusd, 6) > 5.0;
        prop_assert_eq!(matcher.matches(&pool(lovelace, iusd), &ada_pair()), expected);
    }
}

// ── Pool Prices ─────────────────────────────────────────────

proptest! {
    /// Same decimals on both legs: the price is the raw amount ratio.
    #[test]
    fn quote_price_is_volume_ratio(t1 in 1u128..u128::from(u64::MAX), t2 in 1u128..u128::from(u64::MAX)) {
        let quote = PoolQuote::from_amounts(t1, 6, t2, 6).unwrap();
        prop_assert!(quote.price > 0.0);
        prop_assert_eq!(quote.price, quote.token2_volume / quote.token1_volume);
    }

    /// The aggregate of one source is that source's own price.
    #[test]
    fn single_source_aggregate_is_its_price(t1 in 1.0f64..1e9, t2 in 1.0f64..1e9) {
        let price = calculate_price(&[source(t1, t2)]).unwrap();
        prop_assert_eq!(price, t2 / t1);
    }

    /// The weighted aggregate lies between the cheapest and dearest source.
    #[test]
    fn aggregate_within_source_bounds(
        a1 in 1.0f64..1e6, a2 in 1.0f64..1e6,
        b1 in 1.0f64..1e6, b2 in 1.0f64..1e6,
    ) {
        let price = calculate_price(&[source(a1, a2), source(b1, b2)]).unwrap();
        let (lo, hi) = if a2 / a1 < b2 / b1 { (a2 / a1, b2 / b1) } else { (b2 / b1, a2 / a1) };
        prop_assert!(price >= lo * (1.0 - 1e-12));
        prop_assert!(price <= hi * (1.0 + 1e-12));
    }

    /// One tampered source price voids the whole aggregate.
    #[test]
    fn tampered_source_fails_closed(t1 in 1.0f64..1e6, t2 in 1.0f64..1e6, bump in 1.0f64..10.0) {
        let mut tampered = source(t1, t2);
        tampered.price *= 1.0 + bump;
        prop_assert!(calculate_price(&[source(t1, t2), tampered]).is_none());
    }
}

// ── Poller Reduction ────────────────────────────────────────

proptest! {
    /// The kept candidate is never dominated by any offered candidate.
    #[test]
    fn reducer_keeps_undominated_pool(
        pools in prop::collection::vec((1u128..1_000_000, 1u128..1_000_000), 1..20),
    ) {
        let mut best = BestPools::new();
        for (i, (t1, t2)) in pools.iter().enumerate() {
            best.offer(candidate(*t1, *t2, &format!("tx{i}")));
        }
        prop_assert_eq!(best.len(), 1);

        let kept = best.into_candidates().next().unwrap();
        let first = candidate(pools[0].0, pools[0].1, "tx0");
        prop_assert!(!first.dominates(&kept));
    }

    /// Offering the same pool twice never replaces it.
    #[test]
    fn reducer_ties_keep_incumbent(t1 in 1u128..1_000_000, t2 in 1u128..1_000_000) {
        let mut best = BestPools::new();
        prop_assert!(best.offer(candidate(t1, t2, "first")));
        prop_assert!(!best.offer(candidate(t1, t2, "second")));
        let kept = best.into_candidates().next().unwrap();
        prop_assert_eq!(kept.output, OutputRef::new("first", 0));
    }
}

//! Watched pairs and the registry built from the pairs file.
//!
//! A pair definition lists one or more sources (DEXes). Each source has
//! its own pool address and security token, so the registry expands every
//! definition into one [`WatchedPair`] per source and indexes them by
//! address for the block follower and the poller.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::{IndexerError, IndexerResult};
use super::utxo::{CanonicalUtxo, Quantity};

/// Asset name used for the chain's base asset in pair definitions.
pub const LOVELACE: &str = "lovelace";

/// One leg of a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSpec {
    pub policy: String,
    pub name: String,
    pub decimals: u32,
}

impl TokenSpec {
    pub fn is_lovelace(&self) -> bool {
        self.name == LOVELACE
    }

    /// Raw amount of this token held by `utxo`; zero when absent.
    pub fn amount_in(&self, utxo: &CanonicalUtxo) -> Quantity {
        if self.is_lovelace() {
            utxo.lovelace
        } else {
            utxo.assets.quantity(&self.policy, &self.name).unwrap_or(0)
        }
    }

    /// Whether `utxo` carries an entry for this token at all.
    pub fn present_in(&self, utxo: &CanonicalUtxo) -> bool {
        self.is_lovelace() || utxo.assets.quantity(&self.policy, &self.name).is_some()
    }

    /// Key used in message amount maps: `lovelace` or `policy.name`.
    pub fn label(&self) -> String {
        if self.is_lovelace() {
            LOVELACE.to_string()
        } else {
            format!("{}.{}", self.policy, self.name)
        }
    }
}

/// Token that uniquely marks a pool for one pair on one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityToken {
    pub policy: String,
    pub name: String,
}

/// Validation rules selected by the pair name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairShape {
    /// `ADA-X`: token1 is lovelace.
    AdaFirst,
    /// `X-ADA`: token2 is lovelace.
    AdaSecond,
    /// Neither leg is the base asset.
    Native,
    /// Name mentions ADA in a position no rule covers.
    Misconfigured,
}

impl PairShape {
    pub fn of(name: &str) -> Self {
        if name.starts_with("ADA-") {
            Self::AdaFirst
        } else if name.ends_with("-ADA") {
            Self::AdaSecond
        } else if name.contains("ADA-") || name.contains("-ADA") {
            Self::Misconfigured
        } else {
            Self::Native
        }
    }
}

/// A configured pair on one source. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedPair {
    /// Feed name, e.g. `ADA-SNEK`.
    pub name: String,
    pub token1: TokenSpec,
    pub token2: TokenSpec,
    /// DEX name, e.g. `SundaeSwapV3`.
    pub source: String,
    /// Pool address on this source.
    pub address: String,
    pub security_token: SecurityToken,
}

impl WatchedPair {
    pub fn shape(&self) -> PairShape {
        PairShape::of(&self.name)
    }
}

/// Per-source entry of a pair definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceDefinition {
    pub source: String,
    pub address: String,
    pub security_token_policy: String,
    pub security_token_name: String,
}

/// One entry of the pairs file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PairDefinition {
    pub name: String,
    pub token1_policy: String,
    pub token1_name: String,
    pub token1_decimals: u32,
    pub token2_policy: String,
    pub token2_name: String,
    pub token2_decimals: u32,
    pub sources: Vec<SourceDefinition>,
}

impl PairDefinition {
    fn token1(&self) -> TokenSpec {
        TokenSpec {
            policy: self.token1_policy.clone(),
            name: self.token1_name.clone(),
            decimals: self.token1_decimals,
        }
    }

    fn token2(&self) -> TokenSpec {
        TokenSpec {
            policy: self.token2_policy.clone(),
            name: self.token2_name.clone(),
            decimals: self.token2_decimals,
        }
    }

    fn validate(&self) -> IndexerResult<()> {
        let fail = |what: &str| Err(IndexerError::Config(format!("pair '{}': {what}", self.name)));
        if self.name.is_empty() {
            return Err(IndexerError::Config("pair with empty name".into()));
        }
        if self.sources.is_empty() {
            return fail("no sources configured");
        }
        if self.token1_decimals > 30 || self.token2_decimals > 30 {
            return fail("token decimals out of range");
        }
        for source in &self.sources {
            if source.address.is_empty() || source.security_token_policy.is_empty() {
                return fail("source without address or security token policy");
            }
        }
        Ok(())
    }
}

/// All watched pairs, indexed by pool address and by feed.
#[derive(Debug, Clone, Default)]
pub struct PairRegistry {
    by_address: BTreeMap<String, Vec<Arc<WatchedPair>>>,
    by_feed: BTreeMap<String, Vec<Arc<WatchedPair>>>,
}

impl PairRegistry {
    /// Expand pair definitions into one watched pair per source.
    ///
    /// # Errors
    /// Returns [`IndexerError::Config`] when a definition is incomplete.
    pub fn from_definitions(definitions: &[PairDefinition]) -> IndexerResult<Self> {
        let mut registry = Self::default();
        for definition in definitions {
            definition.validate()?;
            for source in &definition.sources {
                let pair = Arc::new(WatchedPair {
                    name: definition.name.clone(),
                    token1: definition.token1(),
                    token2: definition.token2(),
                    source: source.source.clone(),
                    address: source.address.clone(),
                    security_token: SecurityToken {
                        policy: source.security_token_policy.clone(),
                        name: source.security_token_name.clone(),
                    },
                });
                registry
                    .by_address
                    .entry(pair.address.clone())
                    .or_default()
                    .push(Arc::clone(&pair));
                registry.by_feed.entry(pair.name.clone()).or_default().push(pair);
            }
        }
        Ok(registry)
    }

    /// Whether outputs at `address` should be inspected.
    pub fn watches(&self, address: &str) -> bool {
        self.by_address.contains_key(address)
    }

    /// Pairs whose pool lives at `address`.
    pub fn pairs_at(&self, address: &str) -> &[Arc<WatchedPair>] {
        self.by_address.get(address).map_or(&[], Vec::as_slice)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.by_address.keys().map(String::as_str)
    }

    /// Feeds with the per-source pairs that make them up.
    pub fn feeds(&self) -> impl Iterator<Item = (&str, &[Arc<WatchedPair>])> {
        self.by_feed.iter().map(|(name, pairs)| (name.as_str(), pairs.as_slice()))
    }

    pub fn address_count(&self) -> usize {
        self.by_address.len()
    }

    pub fn pair_count(&self) -> usize {
        self.by_address.values().map(Vec::len).sum()
    }
}

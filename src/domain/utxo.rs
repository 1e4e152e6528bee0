//! Canonical UTxO shape shared by both source adapters.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw on-chain quantity. Native asset quantities can exceed `u64`.
pub type Quantity = u128;

/// Asset holdings of an output: policy id -> asset name -> quantity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMap(BTreeMap<String, BTreeMap<String, Quantity>>);

impl AssetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `quantity` of `policy.name`, summing with any existing entry.
    pub fn add(&mut self, policy: &str, name: &str, quantity: Quantity) {
        let slot = self
            .0
            .entry(policy.to_string())
            .or_default()
            .entry(name.to_string())
            .or_insert(0);
        *slot = slot.saturating_add(quantity);
    }

    /// Builder form of [`AssetMap::add`].
    #[must_use]
    pub fn with(mut self, policy: &str, name: &str, quantity: Quantity) -> Self {
        self.add(policy, name, quantity);
        self
    }

    /// Quantity held for `policy.name`, `None` when absent.
    pub fn quantity(&self, policy: &str, name: &str) -> Option<Quantity> {
        self.0.get(policy).and_then(|names| names.get(name)).copied()
    }

    /// True when `policy.name` is held with a non-zero quantity.
    pub fn holds(&self, policy: &str, name: &str) -> bool {
        self.quantity(policy, name).is_some_and(|q| q > 0)
    }

    /// True when the policy appears with any asset name.
    pub fn has_policy(&self, policy: &str) -> bool {
        self.0.contains_key(policy)
    }

    /// Every `(policy, name)` pair in the map.
    pub fn tokens(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(policy, names)| {
            names.keys().map(move |name| (policy.as_str(), name.as_str()))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Reference to a transaction output: `(tx_hash, output_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    pub tx_hash: String,
    pub output_index: u32,
}

impl OutputRef {
    pub fn new(tx_hash: impl Into<String>, output_index: u32) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            output_index,
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.output_index)
    }
}

/// A single unspent output as produced by a source adapter.
///
/// Immutable once built; both the streaming and the point-query adapter
/// normalize into this shape before anything else sees the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalUtxo {
    /// Identity of the output.
    pub output: OutputRef,
    /// Address holding the output.
    pub address: String,
    /// Lovelace amount.
    pub lovelace: Quantity,
    /// Native assets.
    pub assets: AssetMap,
}

impl CanonicalUtxo {
    pub fn new(output: OutputRef, address: impl Into<String>, lovelace: Quantity, assets: AssetMap) -> Self {
        Self {
            output,
            address: address.into(),
            lovelace,
            assets,
        }
    }
}

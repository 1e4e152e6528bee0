//! Domain layer - Core indexing rules and models.
//!
//! Pure types and decisions: pairs, UTxOs, matching, pricing,
//! reconciliation and message assembly. No I/O happens here.

pub mod block;
pub mod error;
pub mod matcher;
pub mod message;
pub mod pair;
pub mod reconcile;
pub mod reducer;
pub mod snapshot;
pub mod utxo;
pub mod volume;

pub use error::{IndexerError, IndexerResult};
pub use matcher::PairMatcher;
pub use pair::{PairRegistry, WatchedPair};
pub use utxo::{AssetMap, CanonicalUtxo, OutputRef};
pub use volume::PoolQuote;

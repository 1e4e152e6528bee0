//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Traits the use cases require from the outside world.
//!
//! Port categories:
//! - `ChainQuery` / `ChainSync`: tip, epoch and block-by-block following
//! - `UtxoSource`: point-in-time UTxO lookups by address
//! - `SnapshotStore`: snapshot, price history and watermark persistence
//! - `MessageSink`: delivery of finished price messages

pub mod chain;
pub mod delivery;
pub mod store;
pub mod utxo_source;

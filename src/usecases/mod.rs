//! Use Cases Layer - Indexer Workflows
//!
//! Orchestrates domain rules with the port interfaces.
//!
//! Use cases:
//! - `ReconciliationEngine`: sole writer of snapshots and price history
//! - `ChainFollower`: block-by-block live indexing with reconnect recovery
//! - `SnapshotPoller`: periodic full rescan of watched addresses
//! - `PriceAggregator`: per-feed volume-weighted price messages
//! - `Signals`: shutdown, poller-stop and reconnect coordination

pub mod chain_follower;
pub mod price_aggregator;
pub mod reconciliation;
pub mod signals;
pub mod snapshot_poller;

pub use chain_follower::{ChainFollower, FollowerStats};
pub use price_aggregator::PriceAggregator;
pub use reconciliation::{Outcome, ReconciliationEngine};
pub use signals::Signals;
pub use snapshot_poller::SnapshotPoller;

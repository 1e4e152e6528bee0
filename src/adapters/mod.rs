//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits with concrete infrastructure.
//!
//! Adapter categories:
//! - `ogmios`: JSON-RPC WebSocket client (chain-sync, tip, epoch, UTxOs)
//! - `kupo`: HTTP client for indexed UTxO lookups
//! - `persistence`: SQLite snapshot store
//! - `delivery`: validator WebSocket sink
//! - `identity`: node identity file
//! - `metrics`: Prometheus counters and health endpoints

pub mod delivery;
pub mod identity;
pub mod kupo;
pub mod metrics;
pub mod ogmios;
pub mod persistence;

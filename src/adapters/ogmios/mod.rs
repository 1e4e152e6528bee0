//! Ogmios adapter: chain-sync, tip/epoch queries and ledger UTxO lookups
//! over one JSON-RPC WebSocket.

pub mod client;
pub mod types;

pub use client::OgmiosClient;

//! Kupo adapter: health gate and `/matches` UTxO queries.

pub mod client;

pub use client::KupoClient;

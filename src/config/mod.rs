//! Configuration Module - TOML-based Indexer Configuration
//!
//! Loads and validates `config.toml` (path overridable through
//! `CNT_INDEXER_CONFIG`). Watched pairs live in a separate JSON file
//! referenced by `indexer.pairs_path`.

pub mod loader;

use serde::Deserialize;

/// Top-level indexer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Process-wide settings.
  #[serde(default)]
  pub indexer: IndexerConfig,
  /// Ogmios endpoint (chain-sync and ledger queries).
  pub ogmios: OgmiosConfig,
  /// Optional Kupo endpoint for poller lookups.
  #[serde(default)]
  pub kupo: KupoConfig,
  /// Node identity file.
  #[serde(default)]
  pub identity: IdentityConfig,
  /// Health and metrics server.
  #[serde(default)]
  pub health: HealthConfig,
}

/// Indexer behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// SQLite database file.
  #[serde(default = "default_database_path")]
  pub database_path: String,
  /// JSON pairs file.
  #[serde(default = "default_pairs_path")]
  pub pairs_path: String,
  /// Pause between snapshot poller cycles.
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,
  /// Minimum volume, in decimal units, each pool leg must exceed.
  #[serde(default = "default_min_volume")]
  pub min_volume: f64,
  /// Valid pools allowed per source in the aggregator's live fallback.
  #[serde(default = "default_max_liquidity_pools")]
  pub max_liquidity_pools: usize,
  /// Pause before re-opening a dropped chain-sync session.
  #[serde(default = "default_reconnect_pause")]
  pub reconnect_pause_ms: u64,
  /// Follower statistics cadence in forward blocks.
  #[serde(default = "default_stats_every")]
  pub stats_every_blocks: u64,
}

impl Default for IndexerConfig {
  fn default() -> Self {
    Self {
      log_level: default_log_level(),
      database_path: default_database_path(),
      pairs_path: default_pairs_path(),
      poll_interval_secs: default_poll_interval(),
      min_volume: default_min_volume(),
      max_liquidity_pools: default_max_liquidity_pools(),
      reconnect_pause_ms: default_reconnect_pause(),
      stats_every_blocks: default_stats_every(),
    }
  }
}

/// Ogmios WebSocket endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OgmiosConfig {
  /// `ws://` or `wss://` URL.
  pub url: String,
  /// Deadline for request/response calls (not `nextBlock`).
  #[serde(default = "default_request_timeout")]
  pub request_timeout_secs: u64,
}

/// Kupo HTTP endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct KupoConfig {
  #[serde(default)]
  pub url: String,
  /// When false the poller queries Ogmios instead.
  #[serde(default)]
  pub enabled: bool,
  #[serde(default = "default_health_timeout")]
  pub health_timeout_secs: u64,
  #[serde(default = "default_matches_timeout")]
  pub matches_timeout_secs: u64,
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
}

impl Default for KupoConfig {
  fn default() -> Self {
    Self {
      url: String::new(),
      enabled: false,
      health_timeout_secs: default_health_timeout(),
      matches_timeout_secs: default_matches_timeout(),
      max_retries: default_max_retries(),
    }
  }
}

/// Node identity location.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
  #[serde(default = "default_identity_path")]
  pub path: String,
}

impl Default for IdentityConfig {
  fn default() -> Self {
    Self { path: default_identity_path() }
  }
}

/// Health and metrics server.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Port serving `/live`, `/ready` and `/metrics`.
  #[serde(default = "default_health_port")]
  pub port: u16,
}

impl Default for HealthConfig {
  fn default() -> Self {
    Self { enabled: true, port: default_health_port() }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_database_path() -> String {
  "cnt.db".to_string()
}

fn default_pairs_path() -> String {
  "pairs.json".to_string()
}

fn default_poll_interval() -> u64 {
  300
}

fn default_min_volume() -> f64 {
  5.0
}

fn default_max_liquidity_pools() -> usize {
  1
}

fn default_reconnect_pause() -> u64 {
  1000
}

fn default_stats_every() -> u64 {
  100
}

fn default_request_timeout() -> u64 {
  60
}

fn default_health_timeout() -> u64 {
  30
}

fn default_matches_timeout() -> u64 {
  120
}

fn default_max_retries() -> u32 {
  2
}

fn default_identity_path() -> String {
  "/var/tmp/.node-identity.json".to_string()
}

fn default_true() -> bool {
  true
}

fn default_health_port() -> u16 {
  9090
}

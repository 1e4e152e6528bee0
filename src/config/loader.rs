//! Configuration Loader - File Loading and Validation
//!
//! Loads `config.toml` and the pairs file, validates both and reports
//! misconfiguration with context.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;
use crate::domain::pair::{PairDefinition, PairRegistry};

/// Environment variable overriding the config path.
pub const CONFIG_ENV: &str = "CNT_INDEXER_CONFIG";

/// Config path from the environment, falling back to `config.toml`.
pub fn config_path() -> String {
  std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.toml".to_string())
}

/// Collector user agent carried in every source message.
pub fn user_agent() -> String {
  format!("cnt-indexer/{}", env!("CARGO_PKG_VERSION"))
}

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    ogmios = %config.ogmios.url,
    kupo_enabled = config.kupo.enabled,
    database = %config.indexer.database_path,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content)
    .with_context(|| "Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

fn validate_config(config: &AppConfig) -> Result<()> {
  let url = &config.ogmios.url;
  anyhow::ensure!(!url.is_empty(), "Ogmios URL must not be empty");
  anyhow::ensure!(
    url.starts_with("ws://") || url.starts_with("wss://"),
    "Ogmios URL must use ws:// or wss://, got {url}"
  );

  anyhow::ensure!(
    !config.kupo.enabled || !config.kupo.url.is_empty(),
    "Kupo is enabled but kupo.url is empty"
  );

  let indexer = &config.indexer;
  anyhow::ensure!(
    indexer.poll_interval_secs > 0,
    "poll_interval_secs must be positive"
  );
  anyhow::ensure!(
    indexer.min_volume.is_finite() && indexer.min_volume >= 0.0,
    "min_volume must be a non-negative number, got {}",
    indexer.min_volume
  );
  anyhow::ensure!(
    indexer.max_liquidity_pools > 0,
    "max_liquidity_pools must be positive"
  );

  Ok(())
}

/// Pairs loaded from disk with the checksum of the raw file.
#[derive(Debug)]
pub struct LoadedPairs {
  pub registry: PairRegistry,
  /// Hex SHA-256 of the file bytes.
  pub checksum: String,
}

/// Load the JSON pairs file into a registry.
pub fn load_pairs(path: &str) -> Result<LoadedPairs> {
  let bytes = std::fs::read(path)
    .with_context(|| format!("Failed to read pairs file: {path}"))?;
  let loaded = parse_pairs(&bytes)
    .with_context(|| format!("Invalid pairs file: {path}"))?;

  info!(
    version = env!("CARGO_PKG_VERSION"),
    checksum = %loaded.checksum,
    pairs = loaded.registry.pair_count(),
    addresses = loaded.registry.address_count(),
    "Pairs loaded"
  );

  Ok(loaded)
}

/// Parse pairs JSON and compute its checksum.
pub fn parse_pairs(bytes: &[u8]) -> Result<LoadedPairs> {
  let definitions: Vec<PairDefinition> = serde_json::from_slice(bytes)?;
  let registry = PairRegistry::from_definitions(&definitions)?;
  let checksum = hex::encode(hmac_sha256::Hash::hash(bytes));
  Ok(LoadedPairs { registry, checksum })
}

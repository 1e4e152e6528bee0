//! Indexer error taxonomy.
//!
//! Every fallible port and use case returns [`IndexerError`]. The
//! variant decides what the calling loop does next: transport errors
//! trigger a pause and reconnect, data and consistency errors skip the
//! single record, configuration errors are fatal at startup.

use thiserror::Error;

/// Errors surfaced by adapters and use cases.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Socket reset or closed, HTTP connection refused, request timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// A block, UTxO or response is missing an expected field.
    #[error("malformed data: {0}")]
    Data(String),

    /// Watermark regression, duplicate identity, too many pools.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// The embedded store rejected a statement.
    #[error("store error: {0}")]
    Store(String),

    /// Missing or malformed configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl IndexerError {
    /// Whether the failure should trigger a reconnect.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Result alias used across ports and use cases.
pub type IndexerResult<T> = Result<T, IndexerError>;

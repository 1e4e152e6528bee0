//! Node identity file loader.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::domain::message::NodeIdentity;

/// Read `{node_id, location, validator_web_socket}` from disk.
pub fn load_identity(path: impl AsRef<Path>) -> Result<NodeIdentity> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read node identity {}", path.display()))?;
    let identity: NodeIdentity = serde_json::from_str(&raw)
        .with_context(|| format!("invalid node identity {}", path.display()))?;
    anyhow::ensure!(!identity.node_id.is_empty(), "node identity has an empty node_id");
    info!(node_id = %identity.node_id, "Node identity loaded");
    Ok(identity)
}

//! Chain movement as seen by the streaming source.

use serde::{Deserialize, Serialize};

use super::utxo::{CanonicalUtxo, OutputRef};

/// A point on the chain: slot plus block header hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainPoint {
    pub slot: u64,
    pub id: String,
}

/// A transaction reduced to what the indexer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: String,
    /// Outputs spent by this transaction.
    pub inputs: Vec<OutputRef>,
    /// Produced outputs, indexed by their position in the transaction.
    pub outputs: Vec<CanonicalUtxo>,
}

/// A block received while rolling forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: String,
    pub height: u64,
    pub slot: u64,
    pub transactions: Vec<Transaction>,
}

/// Next event from the block stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// The chain advanced by one block.
    Forward(Block),
    /// The chain rolled back to the given point.
    Backward(Option<ChainPoint>),
}

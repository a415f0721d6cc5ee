use serde::{Deserialize, Serialize};

use crate::hash::{hash256, Hash32};
use crate::transaction::Transaction;

/// Serialized length of a block header.
pub const HEADER_SIZE: usize = 80;

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub previous: Hash32,
    pub merkle_root: Hash32,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash32 {
        hash256(&self.to_bytes())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.version.to_le_bytes());
        bytes[4..36].copy_from_slice(self.previous.as_bytes());
        bytes[36..68].copy_from_slice(self.merkle_root.as_bytes());
        bytes[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[72..76].copy_from_slice(&self.bits.to_le_bytes());
        bytes[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        bytes
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash32 {
        self.header.hash()
    }

    /// Total input count across all transactions. Used to normalize
    /// per-phase validation cost in the block report.
    pub fn total_inputs(&self) -> usize {
        self.transactions.iter().map(|tx| tx.inputs.len()).sum()
    }

    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE
            + 8
            + self
                .transactions
                .iter()
                .map(Transaction::serialized_size)
                .sum::<usize>()
    }
}

/// Heights sampled for a block locator: the ten heights directly below the
/// top, then exponentially wider steps, always terminated by zero.
///
/// The latest height a peer recognizes anchors its response, so density near
/// the top keeps the common case cheap while the exponential tail bounds the
/// list length for any chain height.
pub fn locator_heights(top: u64) -> Vec<u64> {
    let mut heights = Vec::new();
    let mut step = 1u64;
    let mut height = top;

    while height > 0 {
        if heights.len() >= 10 {
            step <<= 1;
        }
        heights.push(height);
        height = height.saturating_sub(step);
    }

    heights.push(0);
    heights
}

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::block::{Block, BlockHeader};
use crate::hash::Hash32;
use crate::transaction::Transaction;

/// 64-bit short transaction identifier used by compact block announcements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShortId(pub u64);

/// Per-announcement key salting short-id computation.
///
/// Derived from the announcement header and the announcer-chosen nonce, so
/// two peers announcing the same block produce unrelated short ids and an
/// attacker cannot precompute collisions against the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShortIdKey([u8; 32]);

impl ShortIdKey {
    pub fn new(header: &BlockHeader, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(header.hash().as_bytes());
        hasher.update(nonce.to_le_bytes());
        let digest = hasher.finalize();
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        ShortIdKey(key)
    }

    /// Short id of `txid` under this key: first eight bytes of the keyed
    /// digest, little endian.
    pub fn short_id(&self, txid: &Hash32) -> ShortId {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        hasher.update(txid.as_bytes());
        let digest = hasher.finalize();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&digest[..8]);
        ShortId(u64::from_le_bytes(raw))
    }
}

/// Transaction carried in full inside a compact announcement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefilledTransaction {
    /// Number of short-id slots since the previous prefilled entry; zero
    /// means this entry immediately follows it.
    pub gap: u64,
    pub transaction: Transaction,
}

/// Compact block announcement: header plus transactions encoded as short
/// ids, with a small set of prefilled transactions carried in full.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactBlock {
    pub header: BlockHeader,
    pub nonce: u64,
    pub short_ids: Vec<ShortId>,
    pub prefilled: Vec<PrefilledTransaction>,
}

impl CompactBlock {
    pub fn key(&self) -> ShortIdKey {
        ShortIdKey::new(&self.header, self.nonce)
    }

    /// Transaction count of the announced block.
    pub fn total_transactions(&self) -> usize {
        self.prefilled.len() + self.short_ids.len()
    }

    /// Encode `block` as a compact announcement, carrying the transactions
    /// at the sorted absolute positions in `prefill_indexes` in full and the
    /// rest as short ids.
    pub fn from_block(block: &Block, nonce: u64, prefill_indexes: &[usize]) -> Self {
        let key = ShortIdKey::new(&block.header, nonce);

        let mut indexes: Vec<usize> = prefill_indexes
            .iter()
            .copied()
            .filter(|index| *index < block.transactions.len())
            .collect();
        indexes.sort_unstable();
        indexes.dedup();

        let mut prefilled = Vec::with_capacity(indexes.len());
        let mut short_ids = Vec::new();
        let mut previous = 0usize;

        for (position, tx) in block.transactions.iter().enumerate() {
            if indexes.binary_search(&position).is_ok() {
                prefilled.push(PrefilledTransaction {
                    gap: (position - previous) as u64,
                    transaction: tx.clone(),
                });
                previous = position + 1;
            } else {
                short_ids.push(key.short_id(&tx.hash()));
            }
        }

        CompactBlock {
            header: block.header.clone(),
            nonce,
            short_ids,
            prefilled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash256;
    use crate::transaction::{OutPoint, TxInput};

    fn tx(tag: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    hash: hash256(&[tag]),
                    index: 0,
                },
                script: vec![tag],
                sequence: 0,
            }],
            outputs: vec![],
            lock_time: 0,
        }
    }

    fn block(tx_count: u8) -> Block {
        Block {
            header: BlockHeader::default(),
            transactions: (0..tx_count).map(tx).collect(),
        }
    }

    #[test]
    fn short_ids_depend_on_nonce() {
        let header = BlockHeader::default();
        let txid = hash256(b"tx");
        let a = ShortIdKey::new(&header, 1).short_id(&txid);
        let b = ShortIdKey::new(&header, 2).short_id(&txid);
        assert_ne!(a, b);
    }

    #[test]
    fn short_ids_are_deterministic() {
        let header = BlockHeader::default();
        let txid = hash256(b"tx");
        assert_eq!(
            ShortIdKey::new(&header, 7).short_id(&txid),
            ShortIdKey::new(&header, 7).short_id(&txid)
        );
    }

    #[test]
    fn from_block_preserves_total_count() {
        let announced = CompactBlock::from_block(&block(6), 9, &[0, 3]);
        assert_eq!(announced.prefilled.len(), 2);
        assert_eq!(announced.short_ids.len(), 4);
        assert_eq!(announced.total_transactions(), 6);
    }

    #[test]
    fn from_block_encodes_gap_indexes() {
        // Prefilled at absolute 0 and 3: first gap 0, second gap 2 (two
        // short-id slots sit between them).
        let announced = CompactBlock::from_block(&block(6), 9, &[0, 3]);
        assert_eq!(announced.prefilled[0].gap, 0);
        assert_eq!(announced.prefilled[1].gap, 2);
    }

    #[test]
    fn from_block_all_prefilled() {
        let announced = CompactBlock::from_block(&block(3), 1, &[0, 1, 2]);
        assert!(announced.short_ids.is_empty());
        assert_eq!(
            announced.prefilled.iter().map(|p| p.gap).collect::<Vec<_>>(),
            vec![0, 0, 0]
        );
    }
}

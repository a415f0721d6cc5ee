use async_trait::async_trait;
use containers::{Block, Hash32, ShortId, ShortIdKey, Transaction};

use crate::error::ChainError;
use crate::organize::OrganizeOutcome;

/// Interface to the blockchain storage/validation engine.
///
/// The sync engine never touches storage directly; everything it needs from
/// the chain goes through this trait, which also makes every consumer
/// testable against an in-memory double.
#[async_trait]
pub trait FastChain: Send + Sync {
    /// Height of the current chain top.
    async fn top_height(&self) -> u64;

    /// Build a locator from the given heights: the hash at each height that
    /// exists, ordered from highest to lowest.
    async fn fetch_block_locator(&self, heights: &[u64]) -> Result<Vec<Hash32>, ChainError>;

    /// Subset of `hashes` not already possessed, order preserved.
    async fn filter_blocks(&self, hashes: Vec<Hash32>) -> Result<Vec<Hash32>, ChainError>;

    /// Organize a block into the chain. Expected sync-time outcomes
    /// (orphan, duplicate, insufficient work) are [`OrganizeOutcome`]
    /// variants; validation and internal failures are errors.
    async fn organize(&self, block: Block) -> Result<OrganizeOutcome, ChainError>;

    /// Match short ids against the pending-transaction pool under the
    /// announcement key. One slot per id, `None` where the pool has no
    /// matching transaction.
    async fn resolve_short_ids(&self, key: &ShortIdKey, ids: &[ShortId]) -> Vec<Option<Transaction>>;

    /// Whether the whole node is stale: the chain top has not advanced
    /// within the expected time budget.
    fn is_stale(&self) -> bool;

    /// Acquire exclusive block-organization rights for a sync session.
    fn begin_write(&self) -> bool;

    /// Release exclusive block-organization rights.
    fn end_write(&self) -> bool;
}

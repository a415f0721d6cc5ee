pub mod block;
pub mod compact;
pub mod hash;
pub mod transaction;

pub use block::{locator_heights, Block, BlockHeader};
pub use compact::{CompactBlock, PrefilledTransaction, ShortId, ShortIdKey};
pub use hash::{hash256, Hash32};
pub use transaction::{OutPoint, Transaction, TxInput, TxOutput};

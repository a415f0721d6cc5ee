/// Block synchronization engine.
///
/// Downloads the chain of blocks from multiple untrusted peers concurrently
/// and hands validated blocks to the chain collaborator. It is built from:
///
/// - **Reservations**: partitions the needed hashes into one ordered work
///   queue per peer slot, with stealing and regulator-driven rebalancing
/// - **Block Protocol**: the per-channel state machine enforcing delivery
///   order, latency budgets and peer integrity
/// - **Compact Reconstructor**: rebuilds announced blocks from short ids
///   plus prefilled transactions, fetching what the pool cannot resolve
/// - **Sync Session**: opens one connection per slot, tracks completion
///   through a countdown synchronizer, regulates slot performance
///
/// ## Lifecycle
///
/// 1. A session partitions the needed hashes and takes the chain write lock
/// 2. Each slot connects, retrying indefinitely, and attaches the protocol
/// 3. Protocols walk the chain via locators, claim their slot's hashes and
///    request them, matching deliveries against a FIFO backlog
/// 4. Misbehaving or slow peers are dropped; their remaining work returns
///    to the table and the slot reconnects
/// 5. Every slot signals the synchronizer exactly once; the session then
///    releases the write lock and reports a single terminal outcome
pub mod compact;
pub mod config;
pub mod error;
pub mod protocol;
pub mod reservation;
pub mod session;
pub mod states;
pub mod synchronizer;

pub use compact::{reconstruct, CompactDecodeError, PendingAssembly, Reconstruction};
pub use config::SyncSettings;
pub use error::{DropReason, SyncError};
pub use protocol::{BlockProtocol, ProtocolOutcome};
pub use reservation::{Reservation, Reservations};
pub use session::SyncSession;
pub use states::SessionState;
pub use synchronizer::{SlotToken, Synchronizer};

#[cfg(test)]
mod tests;

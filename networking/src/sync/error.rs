use chain::ChainError;
use thiserror::Error;

/// Terminal result codes for a whole sync session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Failed to acquire or release the exclusive chain write lock.
    #[error("chain write lock operation failed")]
    OperationFailed,

    /// The configured sync timeout elapsed before completion.
    #[error("sync timed out")]
    Timeout,

    /// The session was stopped before completion.
    #[error("sync stopped")]
    Stopped,
}

/// Reasons one channel is dropped.
///
/// Channel drops are transient from the session's point of view: the
/// reservation returns to the table and the slot connects to another peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DropReason {
    #[error("block headers out of order")]
    UnsequencedHeaders,

    #[error("block unexpected or out of order")]
    BacklogMismatch,

    #[error("peer reported not_found for blocks it claimed to have")]
    NotFound,

    #[error("peer exceeded configured block latency")]
    Latency,

    #[error("node is stale; releasing slot for a better peer")]
    StaleNode,

    #[error("peer version range does not serve blocks")]
    NoBlocks,

    #[error("malformed compact block: {0}")]
    MalformedCompact(String),

    #[error("peer disconnected")]
    Disconnected,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("session stopping")]
    Stopping,
}

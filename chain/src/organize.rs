use std::time::Duration;

/// Result of organizing a block into the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum OrganizeOutcome {
    /// Block extended the chain. Carries the validation metadata consumed
    /// by the per-channel block report.
    Connected(ConnectedBlock),

    /// The block's parent is unknown; the caller should re-request from the
    /// chain top up to this block.
    Orphan,

    /// Block already organized. Non-fatal.
    Duplicate,

    /// Block's branch does not exceed the current chain work. Non-fatal.
    InsufficientWork,
}

/// Metadata for a block accepted into the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectedBlock {
    pub height: u64,
    pub timings: ValidationTimings,
    /// Transaction-validation cache hits over queries for this block.
    pub cache_efficiency: f32,
}

/// Per-phase validation cost of one block, recorded by the chain while the
/// block moves through its acceptance pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ValidationTimings {
    /// Gap between deserialization end and validation start.
    pub wait: Duration,
    pub deserialize: Duration,
    /// Context-free structural checks.
    pub check: Duration,
    /// Previous-output population.
    pub populate: Duration,
    /// Contextual policy acceptance.
    pub accept: Duration,
    /// Script connection.
    pub connect: Duration,
    /// Store commit.
    pub deposit: Duration,
}

impl ValidationTimings {
    /// Total validation time: everything after the wait gap.
    pub fn validation_total(&self) -> Duration {
        self.check + self.populate + self.accept + self.connect
    }
}

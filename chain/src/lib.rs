pub mod error;
pub mod organize;
pub mod store;

pub use error::ChainError;
pub use organize::{ConnectedBlock, OrganizeOutcome, ValidationTimings};
pub use store::FastChain;

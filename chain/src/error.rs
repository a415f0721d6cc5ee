use thiserror::Error;

/// Failures surfaced by the chain collaborator.
///
/// Organization outcomes that are expected during sync (orphan, duplicate,
/// insufficient work) are not errors; they are [`OrganizeOutcome`]
/// variants. Errors here either indicate an internal collaborator fault or
/// a block that failed validation outright.
///
/// [`OrganizeOutcome`]: crate::organize::OrganizeOutcome
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("failed to generate block locator: {0}")]
    LocatorGeneration(String),

    #[error("failed to filter block hashes: {0}")]
    FilterFailed(String),

    #[error("block failed validation: {0}")]
    Validation(String),

    #[error("internal chain failure: {0}")]
    Internal(String),
}

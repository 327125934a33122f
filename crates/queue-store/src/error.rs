use std::error::Error as StdError;

/// Failures surfaced by the storage layer.
///
/// Anything that is not a namespace-creation conflict is collapsed into an
/// opaque I/O failure; other failure modes are programmer bugs.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("namespace already exists")]
    AlreadyExists,
    #[error("storage failure")]
    Io(#[source] Box<dyn StdError + Send + Sync>),
}

impl StoreError {
    pub(crate) fn io<E: Into<Box<dyn StdError + Send + Sync>>>(source: E) -> Self {
        StoreError::Io(source.into())
    }
}

/// Domain failures of the queue repository, ordered most-specific first.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("invalid input")]
    Invalid,
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("record codec failure")]
    Codec(#[source] Box<dyn StdError + Send + Sync>),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RepoError {
    pub(crate) fn codec<E: Into<Box<dyn StdError + Send + Sync>>>(source: E) -> Self {
        RepoError::Codec(source.into())
    }
}

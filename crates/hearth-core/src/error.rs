//! Error taxonomy for the memory engine.
//!
//! `EngineError` is the concrete, `#[from]`-convertible error type every
//! fallible method returns. [`Class`] is the small, stable taxonomy the
//! write/recall APIs classify errors into before surfacing them to a host,
//! per the propagation policy: optional enrichment never fails an
//! operation, only storage I/O and programmer errors do.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Concrete error type produced by storage, WAL, and pipeline operations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem failure (WAL file, data directory, vector index persistence).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A WAL entry or sidecar file could not be parsed.
    #[error("corrupt entry in {path}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    /// No fact exists for the given id or (entity, key) pair.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller supplied a value the engine refuses to act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Vector index failure (creation, add, search, persistence).
    #[error("vector index error: {0}")]
    VectorIndex(String),

    /// Start-up or configuration failure (data directory, dimension mismatch).
    #[error("initialization error: {0}")]
    Init(String),

    /// A background lock was poisoned by a panicking holder.
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl EngineError {
    /// Classify this error into the stable taxonomy exposed to hosts (§7).
    pub fn class(&self) -> Class {
        match self {
            EngineError::NotFound(_) => Class::NotFound,
            EngineError::InvalidArgument(_) => Class::InvalidArgument,
            EngineError::Corruption { .. } => Class::Degraded,
            EngineError::Database(_)
            | EngineError::Io(_)
            | EngineError::VectorIndex(_)
            | EngineError::Init(_)
            | EngineError::LockPoisoned(_) => Class::Internal,
        }
    }
}

/// The small, stable error taxonomy a host observes (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// Requested fact/entity does not exist.
    NotFound,
    /// Caller input was rejected outright.
    InvalidArgument,
    /// Operation completed with a partial/degraded result; not a hard failure.
    Degraded,
    /// Storage I/O or programmer error; never silently swallowed.
    Internal,
}

pub(crate) fn lock_poisoned(what: &str) -> EngineError {
    EngineError::LockPoisoned(what.to_string())
}

#[cfg(feature = "vector-search")]
impl From<crate::vector::VectorSearchError> for EngineError {
    fn from(e: crate::vector::VectorSearchError) -> Self {
        EngineError::VectorIndex(e.to_string())
    }
}

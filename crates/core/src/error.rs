//! Error types shared across the idsync crates.

use thiserror::Error;

/// Top-level error type for all idsync operations.
#[derive(Debug, Error)]
pub enum IdSyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("name canonicalization produced an empty result for {0:?}")]
    InvalidName(String),

    #[error("canonical name collision: {0}")]
    NameCollision(String),

    #[error("planned {planned} removals, refusing to apply with remove limit {limit}")]
    RemoveLimitExceeded { planned: usize, limit: usize },

    #[error("prevented attempt to change manually managed principal {0:?}")]
    ManualManaged(String),

    #[error("source directory unavailable: {0}")]
    SourceUnavailable(String),

    #[error("target platform unavailable: {0}")]
    TargetUnavailable(String),

    #[error("{failed} operation(s) failed during apply")]
    PartialApply { failed: u64 },
}

/// A convenience Result alias that defaults to [`IdSyncError`].
pub type Result<T> = std::result::Result<T, IdSyncError>;

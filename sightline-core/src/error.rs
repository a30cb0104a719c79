//! Sightline Core - Error types
//!
//! Every fallible operation in the workspace returns [`SightlineResult`].
//! Component-specific errors convert into [`SightlineError`] via `From`,
//! so `?` works across crate boundaries.

use thiserror::Error;

/// Workspace-wide result alias.
pub type SightlineResult<T> = Result<T, SightlineError>;

/// Top-level error, one variant per component error type.
#[derive(Error, Debug)]
pub enum SightlineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failures raised by document store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend failure: {reason}")]
    Backend { reason: String },

    #[error("lock poisoned")]
    LockPoisoned,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn backend(reason: impl Into<String>) -> Self {
        StoreError::Backend {
            reason: reason.into(),
        }
    }
}

/// Failures that abort a refresh pass.
///
/// Per-unit recompute failures are not errors at this level; the
/// orchestrator logs and skips them.
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("refresh context preparation failed for view '{view}': {reason}")]
    ContextPreparation { view: String, reason: String },

    #[error("garbage collection failed for view '{view}': {reason}")]
    GarbageCollection { view: String, reason: String },
}

impl RefreshError {
    pub fn context_preparation(view: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RefreshError::ContextPreparation {
            view: view.into(),
            reason: reason.to_string(),
        }
    }

    pub fn garbage_collection(view: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RefreshError::GarbageCollection {
            view: view.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures raised while building or executing queries.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("invalid date range: end {end} is before start {start}")]
    InvalidRange { start: String, end: String },
}

/// Configuration validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

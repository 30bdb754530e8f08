//! Cache Error Types
//!
//! Every fallible cache operation returns [`CacheError`]. The type is
//! deliberately `Clone`: when several callers wait on the same single-flight
//! load and the load fails, each of them receives the same error value.
//!
//! Configuration problems are fatal at construction time and never surface
//! from a built cache; loader failures are per-request and are never cached.

use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by cache construction and cache operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The builder was given an inconsistent or out-of-range configuration.
    ///
    /// Raised only by [`CacheBuilder::build`](crate::CacheBuilder::build).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A value loader signalled failure.
    ///
    /// The error is propagated to the caller that triggered the load and to
    /// every caller coalesced into the same single-flight window. No entry is
    /// cached.
    #[error("loader failed: {0}")]
    Loader(Arc<str>),

    /// The operation is not available on this handle or in this context,
    /// for example a cache call made from inside an event listener.
    #[error("operation unavailable: {0}")]
    OperationUnavailable(&'static str),

    /// The cache has been shut down; all subsequent operations return this.
    #[error("cache has been shut down")]
    Shutdown,
}

impl CacheError {
    /// Builds a [`CacheError::Loader`] from any displayable message.
    pub fn loader(message: impl Into<String>) -> Self {
        CacheError::Loader(Arc::from(message.into()))
    }

    /// Returns `true` for loader failures.
    pub fn is_loader_failure(&self) -> bool {
        matches!(self, CacheError::Loader(_))
    }
}

/// Convenience alias used across the crate.
pub type CacheResult<T> = Result<T, CacheError>;

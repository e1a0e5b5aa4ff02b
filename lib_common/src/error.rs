//! # Error Types
//!
//! Two layers: `StoreError` is whatever the shared store reported, and
//! `AlarmError` is what producers and the reset worker see. Row-level sweep
//! outcomes (malformed members, stale entries) are not errors; they are
//! reported through `Resolution`.

use thiserror::Error;

/// Failure talking to the shared state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "connections")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("unexpected store response: {0}")]
    Unexpected(String),
}

#[derive(Debug, Error)]
pub enum AlarmError {
    /// The store could not be reached or rejected the batch. Never retried here.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("invalid alarm member {namespace:?}/{field:?}: parts must be non-empty and must not contain '{separator}'")]
    InvalidMember {
        namespace: String,
        field: String,
        separator: char,
    },

    #[error("invalid pulse duration {0}: must be a finite, non-negative number of seconds")]
    InvalidDuration(f64),

    #[error("invalid sweep batch {0}: must be at least 1")]
    InvalidBatch(usize),
}

pub type AlarmResult<T> = Result<T, AlarmError>;

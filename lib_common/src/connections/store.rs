//! # Shared State Store Contract
//!
//! The alarm primitive needs very little from its store: atomic batches of
//! point writes, a handful of point reads, and a score-ordered index. Any
//! transactional keyed store with a sorted set fits; `RedisStore` and
//! `MemoryStore` are the two shipped here.

use async_trait::async_trait;

use crate::error::StoreError;

/// One point write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Write field `field` of the mapping `namespace`.
    SetFlag {
        namespace: String,
        field: String,
        value: u8,
    },
    SetToken {
        key: String,
        value: String,
    },
    DeleteToken {
        key: String,
    },
    /// Insert or overwrite the member's score. Never produces a second entry.
    UpsertDue {
        index: String,
        member: String,
        score: f64,
    },
    RemoveDue {
        index: String,
        member: String,
    },
}

/// Precondition for `apply_if_due`: `member` must still be in `index` with a
/// score within `tolerance` of `score`.
#[derive(Debug, Clone, PartialEq)]
pub struct DueGuard {
    pub index: String,
    pub member: String,
    pub score: f64,
    pub tolerance: f64,
}

impl DueGuard {
    pub fn holds(&self, current: Option<f64>) -> bool {
        current.is_some_and(|s| (s - self.score).abs() < self.tolerance)
    }
}

#[async_trait]
pub trait AlarmStore: Send + Sync {
    /// Commits every op as one indivisible unit. Readers never see a prefix.
    async fn apply(&self, batch: Vec<StoreOp>) -> Result<(), StoreError>;

    /// Like `apply`, but the guard check and the writes happen atomically.
    /// Returns `false` and writes nothing when the guard does not hold.
    async fn apply_if_due(&self, guard: DueGuard, batch: Vec<StoreOp>) -> Result<bool, StoreError>;

    async fn token(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Raw flag value; `None` if the field was never written.
    async fn flag(&self, namespace: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn due_score(&self, index: &str, member: &str) -> Result<Option<f64>, StoreError>;

    async fn remove_due(&self, index: &str, member: &str) -> Result<(), StoreError>;

    /// Up to `limit` entries with score ≤ `max_score`, smallest score first.
    /// Order among equal scores is unspecified.
    async fn due_before(
        &self,
        index: &str,
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, StoreError>;
}

//! # In-Process Store
//!
//! `AlarmStore` kept in a single mutex-guarded map set. Each call takes the lock
//! once, so batches are atomic with respect to every other caller sharing the
//! same `Arc<MemoryStore>`. Used by tests and dry runs; nothing is persisted.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::store::{AlarmStore, DueGuard, StoreOp};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Tables {
    hashes: HashMap<String, HashMap<String, String>>,
    strings: HashMap<String, String>,
    sorted: HashMap<String, HashMap<String, f64>>,
}

impl Tables {
    fn write(&mut self, op: StoreOp) {
        match op {
            StoreOp::SetFlag { namespace, field, value } => {
                self.hashes
                    .entry(namespace)
                    .or_default()
                    .insert(field, value.to_string());
            }
            StoreOp::SetToken { key, value } => {
                self.strings.insert(key, value);
            }
            StoreOp::DeleteToken { key } => {
                self.strings.remove(&key);
            }
            StoreOp::UpsertDue { index, member, score } => {
                self.sorted.entry(index).or_default().insert(member, score);
            }
            StoreOp::RemoveDue { index, member } => {
                self.remove_due(&index, &member);
            }
        }
    }

    fn remove_due(&mut self, index: &str, member: &str) {
        if let Some(set) = self.sorted.get_mut(index) {
            set.remove(member);
            if set.is_empty() {
                self.sorted.remove(index);
            }
        }
    }

    fn score(&self, index: &str, member: &str) -> Option<f64> {
        self.sorted.get(index)?.get(member).copied()
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of entries currently in `index`.
    pub fn due_len(&self, index: &str) -> usize {
        self.lock().sorted.get(index).map_or(0, HashMap::len)
    }

    /// Writes a raw value, bypassing the alarm API. Lets callers set up
    /// out-of-band state such as a tampered token.
    pub fn put_raw(&self, op: StoreOp) {
        self.lock().write(op);
    }
}

#[async_trait]
impl AlarmStore for MemoryStore {
    async fn apply(&self, batch: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut tables = self.lock();
        for op in batch {
            tables.write(op);
        }
        Ok(())
    }

    async fn apply_if_due(&self, guard: DueGuard, batch: Vec<StoreOp>) -> Result<bool, StoreError> {
        let mut tables = self.lock();
        if !guard.holds(tables.score(&guard.index, &guard.member)) {
            return Ok(false);
        }
        for op in batch {
            tables.write(op);
        }
        Ok(true)
    }

    async fn token(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().strings.get(key).cloned())
    }

    async fn flag(&self, namespace: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()
            .hashes
            .get(namespace)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn due_score(&self, index: &str, member: &str) -> Result<Option<f64>, StoreError> {
        Ok(self.lock().score(index, member))
    }

    async fn remove_due(&self, index: &str, member: &str) -> Result<(), StoreError> {
        self.lock().remove_due(index, member);
        Ok(())
    }

    async fn due_before(
        &self,
        index: &str,
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let tables = self.lock();
        let Some(set) = tables.sorted.get(index) else {
            return Ok(Vec::new());
        };

        let mut due: Vec<(String, f64)> = set
            .iter()
            .filter(|(_, score)| **score <= max_score)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        due.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        due.truncate(limit);
        Ok(due)
    }
}

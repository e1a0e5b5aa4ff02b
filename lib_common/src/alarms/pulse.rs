//! # Pulse API
//!
//! Producer-side handle. A pulse raises the flag and (re)schedules its
//! automatic clear in one atomic batch; callers fire and forget. Flag reads
//! are here too so consumers share the same key layout.

use std::sync::Arc;

use crate::alarms::clock::{Clock, SystemClock};
use crate::alarms::keys::{AlarmKeys, DEFAULT_PULSE_SECS, Member, encode_due};
use crate::connections::store::{AlarmStore, StoreOp};
use crate::error::{AlarmError, AlarmResult};

/// One due-index entry as seen by `AlarmClient::pending`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAlarm {
    pub member: String,
    pub due: f64,
    /// Raw token value, if one exists.
    pub token: Option<String>,
}

/// # Alarm Client
///
/// Cheap to clone; every clone shares the store connection.
///
/// # Example
/// ```rust,ignore
/// let store = Arc::new(RedisStore::connect("redis://redis:6379/0").await?);
/// let alarms = AlarmClient::new(store);
/// alarms.pulse("health:svc", "sftp_upload:job1", 22.0).await?;
/// ```
#[derive(Clone)]
pub struct AlarmClient {
    store: Arc<dyn AlarmStore>,
    keys: AlarmKeys,
    clock: Arc<dyn Clock>,
}

impl AlarmClient {
    /// Uses the default key layout and the system clock.
    pub fn new(store: Arc<dyn AlarmStore>) -> Self {
        Self {
            store,
            keys: AlarmKeys::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_keys(mut self, keys: AlarmKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn keys(&self) -> &AlarmKeys {
        &self.keys
    }

    /// Sets the flag to 1 and schedules it back to 0 at `now + duration_sec`.
    ///
    /// Writes flag, token and due-index score as one atomic batch. A later
    /// pulse on the same member overwrites token and score, so the due index
    /// never holds more than one entry per member. Returns the due timestamp.
    ///
    /// # Errors
    /// * `InvalidMember` / `InvalidDuration` before anything is written.
    /// * `StoreUnavailable` if the batch fails. No retry is attempted.
    pub async fn pulse(&self, namespace: &str, field: &str, duration_sec: f64) -> AlarmResult<f64> {
        if !duration_sec.is_finite() || duration_sec < 0.0 {
            return Err(AlarmError::InvalidDuration(duration_sec));
        }
        let member = Member::new(namespace, field)?;

        let due = self.clock.now() + duration_sec;
        let batch = vec![
            StoreOp::SetFlag {
                namespace: member.namespace().to_string(),
                field: member.field().to_string(),
                value: 1,
            },
            StoreOp::SetToken {
                key: self.keys.token_key(&member),
                value: encode_due(due),
            },
            StoreOp::UpsertDue {
                index: self.keys.due_index.clone(),
                member: member.encode(),
                score: due,
            },
        ];
        self.store.apply(batch).await?;

        tracing::debug!(member = %member, due, "pulsed {}:{}=1, reset due at {:.3}", namespace, field, due);
        Ok(due)
    }

    /// `pulse` with the default 22 second window.
    pub async fn pulse_default(&self, namespace: &str, field: &str) -> AlarmResult<f64> {
        self.pulse(namespace, field, DEFAULT_PULSE_SECS).await
    }

    /// Current flag value, 0 or 1. A missing field is 0.
    pub async fn read_flag(&self, namespace: &str, field: &str) -> AlarmResult<u8> {
        let raw = self.store.flag(namespace, field).await?;
        Ok(raw.map_or(0, |raw| flag_value(namespace, field, &raw)))
    }

    /// Entries in the due index regardless of due time, soonest first.
    pub async fn pending(&self, limit: usize) -> AlarmResult<Vec<PendingAlarm>> {
        let entries = self
            .store
            .due_before(&self.keys.due_index, f64::MAX, limit)
            .await?;

        let mut pending = Vec::with_capacity(entries.len());
        for (member, due) in entries {
            let token = match Member::parse(&member) {
                Some(parsed) => self.store.token(&self.keys.token_key(&parsed)).await?,
                None => None,
            };
            pending.push(PendingAlarm { member, due, token });
        }
        Ok(pending)
    }
}

fn flag_value(namespace: &str, field: &str, raw: &str) -> u8 {
    match raw.trim().parse::<f64>() {
        Ok(v) if v != 0.0 => 1,
        Ok(_) => 0,
        Err(_) => {
            tracing::warn!("cannot parse {:?} for field '{}' of {}, reading as 0", raw, field, namespace);
            0
        }
    }
}

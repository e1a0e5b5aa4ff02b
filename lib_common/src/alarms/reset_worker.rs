//! # Reset Worker
//!
//! Sweeps the due index and turns expired alarms back off.
//!
//! ## Per-member resolution
//! For every member whose score is ≤ now:
//! 1. re-read its current score; gone means someone else resolved it
//! 2. read its token
//! 3. no usable token: clear the flag and drop the index entry
//! 4. token equal to the score: clear the flag, drop the entry, delete the token
//! 5. token differs: drop the entry only
//!
//! Members without a separator are dropped from the index on sight.
//!
//! ## Race policy
//! Steps 1 and 2 are separate reads. A pulse landing between them leaves score
//! and token agreeing on a newer deadline. `RacePolicy::Refetch` compares
//! against the re-read score anyway (it may clear a freshly re-armed flag, or
//! strand it at 1). `RacePolicy::SelectedScore` compares against the score seen
//! at selection time and commits every resolution guarded on that score, so a
//! concurrent pulse always wins and the member stays armed.
//!
//! Store failures are fatal: `sweep` and `run` return them and leave recovery
//! to whoever supervises the process. All state is in the store, so a restart
//! picks up where the last sweep stopped.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};

use crate::alarms::clock::{Clock, SystemClock};
use crate::alarms::keys::{AlarmKeys, DUE_TOLERANCE_SECS, Member, decode_due, same_due};
use crate::connections::store::{AlarmStore, DueGuard, StoreOp};
use crate::error::{AlarmError, AlarmResult};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_BATCH: usize = 200;

/// How often the run loop logs its running totals at info level.
const HEARTBEAT_EVERY: Duration = Duration::from_secs(60);

/// What the worker compares a member's token against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RacePolicy {
    /// Compare against the score re-read just before the token.
    Refetch,
    /// Compare against the score returned by the selecting range query and
    /// commit only while that score is still current.
    #[default]
    SelectedScore,
}

impl fmt::Display for RacePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RacePolicy::Refetch => write!(f, "refetch"),
            RacePolicy::SelectedScore => write!(f, "selected-score"),
        }
    }
}

impl FromStr for RacePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "refetch" => Ok(RacePolicy::Refetch),
            "selected-score" | "selected_score" | "selected" => Ok(RacePolicy::SelectedScore),
            other => Err(format!(
                "unknown race policy '{other}' (expected 'refetch' or 'selected-score')"
            )),
        }
    }
}

/// Static worker configuration. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetWorkerOptions {
    pub keys: AlarmKeys,
    /// Sleep between sweeps that found nothing due.
    pub poll_interval: Duration,
    /// Maximum members examined per sweep.
    pub batch: usize,
    pub race_policy: RacePolicy,
}

impl Default for ResetWorkerOptions {
    fn default() -> Self {
        Self {
            keys: AlarmKeys::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch: DEFAULT_BATCH,
            race_policy: RacePolicy::default(),
        }
    }
}

/// Outcome for one candidate member. None of these stop the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Flag cleared, entry and token removed.
    Resolved,
    /// No usable token: flag cleared, entry removed.
    ResolvedWithoutToken,
    /// Token did not match: entry removed, flag and token untouched.
    DroppedStale,
    /// Member had no separator and was removed from the index.
    Malformed,
    /// Entry was already gone when re-read.
    Vanished,
    /// A pulse moved the deadline after selection; nothing written.
    Rearmed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub candidates: usize,
    pub resolved: usize,
    pub resolved_without_token: usize,
    pub dropped_stale: usize,
    pub malformed: usize,
    pub vanished: usize,
    pub rearmed: usize,
}

impl SweepReport {
    pub fn record(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Resolved => self.resolved += 1,
            Resolution::ResolvedWithoutToken => self.resolved_without_token += 1,
            Resolution::DroppedStale => self.dropped_stale += 1,
            Resolution::Malformed => self.malformed += 1,
            Resolution::Vanished => self.vanished += 1,
            Resolution::Rearmed => self.rearmed += 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates == 0
    }

    /// Adds another report's counters into this one.
    pub fn absorb(&mut self, other: &SweepReport) {
        self.candidates += other.candidates;
        self.resolved += other.resolved;
        self.resolved_without_token += other.resolved_without_token;
        self.dropped_stale += other.dropped_stale;
        self.malformed += other.malformed;
        self.vanished += other.vanished;
        self.rearmed += other.rearmed;
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidates={} resolved={} no_token={} stale={} malformed={} vanished={} rearmed={}",
            self.candidates,
            self.resolved,
            self.resolved_without_token,
            self.dropped_stale,
            self.malformed,
            self.vanished,
            self.rearmed
        )
    }
}

/// # Reset Worker
///
/// One logical instance per deployment. Running several is possible but there
/// is no mutual exclusion between them.
pub struct ResetWorker {
    store: Arc<dyn AlarmStore>,
    options: ResetWorkerOptions,
    clock: Arc<dyn Clock>,
}

impl ResetWorker {
    /// # Errors
    /// * `InvalidBatch` if `options.batch` is 0.
    pub fn new(store: Arc<dyn AlarmStore>, options: ResetWorkerOptions) -> AlarmResult<Self> {
        if options.batch == 0 {
            return Err(AlarmError::InvalidBatch(options.batch));
        }
        Ok(Self {
            store,
            options,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &ResetWorkerOptions {
        &self.options
    }

    /// Sweeps until a store error occurs. Never returns `Ok`.
    pub async fn run(&self) -> AlarmResult<()> {
        tracing::info!(
            due_index = %self.options.keys.due_index,
            token_prefix = %self.options.keys.token_prefix,
            poll_ms = self.options.poll_interval.as_millis() as u64,
            batch = self.options.batch,
            policy = %self.options.race_policy,
            "alarm reset worker started"
        );

        let mut totals = SweepReport::default();
        let mut last_heartbeat = Instant::now();

        loop {
            let report = self.sweep().await?;
            totals.absorb(&report);

            if last_heartbeat.elapsed() >= HEARTBEAT_EVERY {
                tracing::info!("reset worker alive: {}", totals);
                last_heartbeat = Instant::now();
            }

            if report.is_empty() {
                sleep(self.options.poll_interval).await;
            } else {
                tracing::debug!("sweep: {}", report);
            }
        }
    }

    /// One pass over everything currently due, up to `batch` members.
    pub async fn sweep(&self) -> AlarmResult<SweepReport> {
        let now = self.clock.now();
        let due = self
            .store
            .due_before(&self.options.keys.due_index, now, self.options.batch)
            .await?;

        let mut report = SweepReport {
            candidates: due.len(),
            ..Default::default()
        };
        for (member, selected) in due {
            let resolution = self.resolve(&member, selected).await?;
            report.record(resolution);
        }
        Ok(report)
    }

    /// Resolves one candidate. `selected` is the score the range query
    /// returned for it.
    pub async fn resolve(&self, member: &str, selected: f64) -> AlarmResult<Resolution> {
        let index = &self.options.keys.due_index;

        let Some(parsed) = Member::parse(member) else {
            tracing::warn!("bad member format {:?}, dropping from {}", member, index);
            self.store.remove_due(index, member).await?;
            return Ok(Resolution::Malformed);
        };

        let resolution = match self.options.race_policy {
            RacePolicy::Refetch => self.resolve_refetch(member, &parsed).await?,
            RacePolicy::SelectedScore => self.resolve_selected(member, &parsed, selected).await?,
        };

        tracing::debug!(member, ?resolution, "resolved {}:{}", parsed.namespace(), parsed.field());
        Ok(resolution)
    }

    async fn resolve_refetch(&self, member: &str, parsed: &Member) -> AlarmResult<Resolution> {
        let index = &self.options.keys.due_index;

        let Some(score) = self.store.due_score(index, member).await? else {
            return Ok(Resolution::Vanished);
        };

        let token_key = self.options.keys.token_key(parsed);
        let token = self.read_token(&token_key).await?;

        match token {
            None => {
                self.store.apply(self.clear_batch(member, parsed, None)).await?;
                Ok(Resolution::ResolvedWithoutToken)
            }
            Some(latest) if same_due(latest, score) => {
                self.store
                    .apply(self.clear_batch(member, parsed, Some(token_key)))
                    .await?;
                Ok(Resolution::Resolved)
            }
            Some(_) => {
                self.store.remove_due(index, member).await?;
                Ok(Resolution::DroppedStale)
            }
        }
    }

    async fn resolve_selected(
        &self,
        member: &str,
        parsed: &Member,
        selected: f64,
    ) -> AlarmResult<Resolution> {
        let index = &self.options.keys.due_index;

        let Some(current) = self.store.due_score(index, member).await? else {
            return Ok(Resolution::Vanished);
        };
        if !same_due(current, selected) {
            return Ok(Resolution::Rearmed);
        }

        let token_key = self.options.keys.token_key(parsed);
        let token = self.read_token(&token_key).await?;

        let (batch, outcome) = match token {
            None => (
                self.clear_batch(member, parsed, None),
                Resolution::ResolvedWithoutToken,
            ),
            Some(latest) if same_due(latest, selected) => (
                self.clear_batch(member, parsed, Some(token_key)),
                Resolution::Resolved,
            ),
            Some(_) => (vec![self.remove_op(member)], Resolution::DroppedStale),
        };

        let guard = DueGuard {
            index: index.clone(),
            member: member.to_string(),
            score: selected,
            tolerance: DUE_TOLERANCE_SECS,
        };
        if self.store.apply_if_due(guard, batch).await? {
            Ok(outcome)
        } else {
            Ok(Resolution::Rearmed)
        }
    }

    /// Token as a due time. Missing and non-numeric tokens are both `None`.
    async fn read_token(&self, token_key: &str) -> AlarmResult<Option<f64>> {
        let raw = self.store.token(token_key).await?;
        Ok(raw.as_deref().and_then(decode_due))
    }

    fn remove_op(&self, member: &str) -> StoreOp {
        StoreOp::RemoveDue {
            index: self.options.keys.due_index.clone(),
            member: member.to_string(),
        }
    }

    fn clear_batch(&self, member: &str, parsed: &Member, token_key: Option<String>) -> Vec<StoreOp> {
        let mut batch = vec![
            StoreOp::SetFlag {
                namespace: parsed.namespace().to_string(),
                field: parsed.field().to_string(),
                value: 0,
            },
            self.remove_op(member),
        ];
        if let Some(key) = token_key {
            batch.push(StoreOp::DeleteToken { key });
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn race_policy_parses_both_spellings() {
        assert_eq!("refetch".parse::<RacePolicy>(), Ok(RacePolicy::Refetch));
        assert_eq!("Selected-Score".parse::<RacePolicy>(), Ok(RacePolicy::SelectedScore));
        assert_eq!("selected_score".parse::<RacePolicy>(), Ok(RacePolicy::SelectedScore));
        assert!("lease".parse::<RacePolicy>().is_err());
        assert_eq!(RacePolicy::default(), RacePolicy::SelectedScore);
    }

    #[test]
    fn race_policy_serializes_kebab_case() {
        let json = serde_json::to_string(&RacePolicy::SelectedScore).unwrap();
        assert_eq!(json, "\"selected-score\"");
        let back: RacePolicy = serde_json::from_str("\"refetch\"").unwrap();
        assert_eq!(back, RacePolicy::Refetch);
    }

    #[test]
    fn report_counts_each_outcome() {
        let mut report = SweepReport {
            candidates: 3,
            ..Default::default()
        };
        report.record(Resolution::Resolved);
        report.record(Resolution::Malformed);
        report.record(Resolution::Resolved);
        assert_eq!(report.resolved, 2);
        assert_eq!(report.malformed, 1);

        let mut totals = SweepReport::default();
        totals.absorb(&report);
        totals.absorb(&report);
        assert_eq!(totals.candidates, 6);
        assert_eq!(totals.resolved, 4);
        assert!(SweepReport::default().is_empty());
    }

    #[test]
    fn zero_batch_is_rejected() {
        use crate::connections::cache_memory::MemoryStore;

        let options = ResetWorkerOptions {
            batch: 0,
            ..Default::default()
        };
        let err = ResetWorker::new(Arc::new(MemoryStore::new()), options).err();
        assert!(matches!(err, Some(AlarmError::InvalidBatch(0))));

        let worker = ResetWorker::new(Arc::new(MemoryStore::new()), ResetWorkerOptions::default());
        assert!(worker.is_ok());
    }

    #[test]
    fn default_options_match_deployment_defaults() {
        let options = ResetWorkerOptions::default();
        assert_eq!(options.poll_interval, Duration::from_millis(200));
        assert_eq!(options.batch, 200);
        assert_eq!(options.keys.due_index, "alarm:pulse_due");
        assert_eq!(options.keys.token_prefix, "alarm:pulse_token:");
    }
}

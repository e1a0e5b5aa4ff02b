//! A pulse landing in the middle of a resolution, at each point where the
//! worker's reads are not atomic with the writes that follow them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use lib_common::{
    AlarmClient, AlarmStore, DueGuard, ManualClock, MemoryStore, RacePolicy, ResetWorker,
    ResetWorkerOptions, Resolution, StoreError, StoreOp,
};

const T0: f64 = 1_700_000_000.0;
const DUE: &str = "alarm:pulse_due";
const NS: &str = "health:svc";
const FIELD: &str = "sftp_upload:job1";
const MEMBER: &str = "health:svc|sftp_upload:job1";
const TOKEN: &str = "alarm:pulse_token:health:svc|sftp_upload:job1";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Interleave {
    /// After the range query selected the member, before the score re-read.
    BeforeScoreRead,
    /// After the score re-read, before the token read.
    BeforeTokenRead,
    /// After both reads, before the resolving write.
    BeforeCommit,
}

/// Forwards to a `MemoryStore`, firing one producer pulse at the chosen point.
struct RacingStore {
    inner: Arc<MemoryStore>,
    racer: AlarmClient,
    at: Interleave,
    fired: AtomicBool,
}

impl RacingStore {
    async fn maybe_race(&self, point: Interleave) {
        if point == self.at && !self.fired.swap(true, Ordering::SeqCst) {
            self.racer.pulse(NS, FIELD, 22.0).await.unwrap();
        }
    }
}

#[async_trait]
impl AlarmStore for RacingStore {
    async fn apply(&self, batch: Vec<StoreOp>) -> Result<(), StoreError> {
        self.maybe_race(Interleave::BeforeCommit).await;
        self.inner.apply(batch).await
    }

    async fn apply_if_due(&self, guard: DueGuard, batch: Vec<StoreOp>) -> Result<bool, StoreError> {
        self.maybe_race(Interleave::BeforeCommit).await;
        self.inner.apply_if_due(guard, batch).await
    }

    async fn token(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.maybe_race(Interleave::BeforeTokenRead).await;
        self.inner.token(key).await
    }

    async fn flag(&self, namespace: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.inner.flag(namespace, field).await
    }

    async fn due_score(&self, index: &str, member: &str) -> Result<Option<f64>, StoreError> {
        self.maybe_race(Interleave::BeforeScoreRead).await;
        self.inner.due_score(index, member).await
    }

    async fn remove_due(&self, index: &str, member: &str) -> Result<(), StoreError> {
        self.maybe_race(Interleave::BeforeCommit).await;
        self.inner.remove_due(index, member).await
    }

    async fn due_before(
        &self,
        index: &str,
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.inner.due_before(index, max_score, limit).await
    }
}

struct Race {
    inner: Arc<MemoryStore>,
    alarms: AlarmClient,
    worker: ResetWorker,
    clock: Arc<ManualClock>,
}

/// Arms the member with a 1s window, then moves the clock past the deadline.
async fn race(policy: RacePolicy, at: Interleave) -> Race {
    let inner = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let alarms = AlarmClient::new(inner.clone()).with_clock(clock.clone());
    let store = Arc::new(RacingStore {
        inner: inner.clone(),
        racer: alarms.clone(),
        at,
        fired: AtomicBool::new(false),
    });
    let worker = ResetWorker::new(
        store,
        ResetWorkerOptions {
            race_policy: policy,
            ..Default::default()
        },
    )
    .unwrap()
    .with_clock(clock.clone());

    alarms.pulse(NS, FIELD, 1.0).await.unwrap();
    clock.set(T0 + 1.5);

    Race {
        inner,
        alarms,
        worker,
        clock,
    }
}

async fn assert_still_armed(r: &Race) {
    let rearmed_due = T0 + 1.5 + 22.0;
    assert_eq!(r.alarms.read_flag(NS, FIELD).await.unwrap(), 1);
    assert_eq!(r.inner.due_score(DUE, MEMBER).await.unwrap(), Some(rearmed_due));
    assert_eq!(r.inner.token(TOKEN).await.unwrap(), Some(rearmed_due.to_string()));
}

#[tokio::test]
async fn refetch_clears_an_alarm_rearmed_before_the_score_read() {
    let r = race(RacePolicy::Refetch, Interleave::BeforeScoreRead).await;

    let report = r.worker.sweep().await.unwrap();

    // Score and token agree on the new deadline, so the fresh pulse is lost.
    assert_eq!(report.resolved, 1);
    assert_eq!(r.alarms.read_flag(NS, FIELD).await.unwrap(), 0);
    assert_eq!(r.inner.due_len(DUE), 0);
    assert_eq!(r.inner.token(TOKEN).await.unwrap(), None);
}

#[tokio::test]
async fn refetch_strands_an_alarm_rearmed_before_the_token_read() {
    let r = race(RacePolicy::Refetch, Interleave::BeforeTokenRead).await;

    let report = r.worker.sweep().await.unwrap();
    assert_eq!(report.dropped_stale, 1);

    // Flag stays up with no due entry; later sweeps never see it again.
    assert_eq!(r.alarms.read_flag(NS, FIELD).await.unwrap(), 1);
    assert_eq!(r.inner.due_len(DUE), 0);
    r.clock.set(T0 + 100.0);
    assert!(r.worker.sweep().await.unwrap().is_empty());
    assert_eq!(r.alarms.read_flag(NS, FIELD).await.unwrap(), 1);
}

#[tokio::test]
async fn selected_score_keeps_alarm_armed_at_every_interleaving() {
    for at in [
        Interleave::BeforeScoreRead,
        Interleave::BeforeTokenRead,
        Interleave::BeforeCommit,
    ] {
        let r = race(RacePolicy::SelectedScore, at).await;

        let report = r.worker.sweep().await.unwrap();
        assert_eq!(report.candidates, 1, "{at:?}");
        assert_eq!(report.rearmed, 1, "{at:?}");
        assert_still_armed(&r).await;

        // The new deadline is honoured by a later sweep.
        r.clock.set(T0 + 1.5 + 22.0);
        assert_eq!(r.worker.sweep().await.unwrap().resolved, 1, "{at:?}");
        assert_eq!(r.alarms.read_flag(NS, FIELD).await.unwrap(), 0);
        assert_eq!(r.inner.due_len(DUE), 0);
    }
}

#[tokio::test]
async fn resolve_reports_vanished_when_entry_is_already_gone() {
    for policy in [RacePolicy::Refetch, RacePolicy::SelectedScore] {
        let inner = Arc::new(MemoryStore::new());
        let worker = ResetWorker::new(
            inner.clone(),
            ResetWorkerOptions {
                race_policy: policy,
                ..Default::default()
            },
        )
        .unwrap();

        let resolution = worker.resolve(MEMBER, T0).await.unwrap();
        assert_eq!(resolution, Resolution::Vanished, "{policy}");
        assert_eq!(inner.flag(NS, FIELD).await.unwrap(), None);
    }
}

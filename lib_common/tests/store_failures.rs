//! Store failures: producers get `StoreUnavailable`, the worker stops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lib_common::{
    AlarmClient, AlarmError, AlarmStore, DueGuard, ManualClock, MemoryStore, RacePolicy,
    ResetWorker, ResetWorkerOptions, StoreError, StoreOp,
};

const T0: f64 = 1_700_000_000.0;
const DUE: &str = "alarm:pulse_due";

/// Forwards to a `MemoryStore` but fails every write, or every read of one
/// member's score.
struct FailingStore {
    inner: Arc<MemoryStore>,
    fail_writes: bool,
    poisoned: Option<&'static str>,
}

impl FailingStore {
    fn down() -> StoreError {
        StoreError::Unexpected("down".to_string())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(Self::down());
        }
        Ok(())
    }
}

#[async_trait]
impl AlarmStore for FailingStore {
    async fn apply(&self, batch: Vec<StoreOp>) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.apply(batch).await
    }

    async fn apply_if_due(&self, guard: DueGuard, batch: Vec<StoreOp>) -> Result<bool, StoreError> {
        self.check_write()?;
        self.inner.apply_if_due(guard, batch).await
    }

    async fn token(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.token(key).await
    }

    async fn flag(&self, namespace: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.inner.flag(namespace, field).await
    }

    async fn due_score(&self, index: &str, member: &str) -> Result<Option<f64>, StoreError> {
        if self.poisoned == Some(member) {
            return Err(Self::down());
        }
        self.inner.due_score(index, member).await
    }

    async fn remove_due(&self, index: &str, member: &str) -> Result<(), StoreError> {
        self.check_write()?;
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

const POLICIES: [RacePolicy; 2] = [RacePolicy::Refetch, RacePolicy::SelectedScore];

fn worker_over(store: FailingStore, policy: RacePolicy, clock: Arc<ManualClock>) -> ResetWorker {
    let options = ResetWorkerOptions {
        race_policy: policy,
        ..Default::default()
    };
    ResetWorker::new(Arc::new(store), options)
        .unwrap()
        .with_clock(clock)
}

#[tokio::test]
async fn pulse_surfaces_store_unavailable() {
    let inner = Arc::new(MemoryStore::new());
    let failing = Arc::new(FailingStore {
        inner: inner.clone(),
        fail_writes: true,
        poisoned: None,
    });
    let alarms = AlarmClient::new(failing).with_clock(Arc::new(ManualClock::new(T0)));

    let result = alarms.pulse("health:svc", "sftp_upload:job1", 22.0).await;
    assert!(
        matches!(result, Err(AlarmError::StoreUnavailable(StoreError::Unexpected(_)))),
        "got {result:?}"
    );
    assert_eq!(inner.due_len(DUE), 0);
    assert_eq!(alarms.read_flag("health:svc", "sftp_upload:job1").await.unwrap(), 0);
}

#[tokio::test]
async fn sweep_stops_at_the_first_failing_member() {
    for policy in POLICIES {
        let inner = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let alarms = AlarmClient::new(inner.clone()).with_clock(clock.clone());

        for (i, field) in ["a", "b", "c"].into_iter().enumerate() {
            alarms.pulse("ns", field, 1.0 + i as f64).await.unwrap();
        }
        clock.set(T0 + 10.0);

        let store = FailingStore {
            inner: inner.clone(),
            fail_writes: false,
            poisoned: Some("ns|b"),
        };
        let worker = worker_over(store, policy, clock.clone());

        let result = worker.sweep().await;
        assert!(
            matches!(result, Err(AlarmError::StoreUnavailable(_))),
            "{policy}: got {result:?}"
        );

        // "a" came before the failure, "c" was never reached.
        assert_eq!(alarms.read_flag("ns", "a").await.unwrap(), 0, "{policy}");
        assert_eq!(alarms.read_flag("ns", "b").await.unwrap(), 1, "{policy}");
        assert_eq!(alarms.read_flag("ns", "c").await.unwrap(), 1, "{policy}");
        assert_eq!(inner.due_len(DUE), 2, "{policy}");
    }
}

#[tokio::test]
async fn run_returns_the_store_error() {
    for policy in POLICIES {
        let inner = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let alarms = AlarmClient::new(inner.clone()).with_clock(clock.clone());
        alarms.pulse("health:svc", "sftp_upload:job1", 1.0).await.unwrap();
        clock.set(T0 + 2.0);

        let store = FailingStore {
            inner: inner.clone(),
            fail_writes: true,
            poisoned: None,
        };
        let worker = worker_over(store, policy, clock);

        let outcome = tokio::time::timeout(Duration::from_secs(5), worker.run()).await;
        let result = outcome.unwrap_or_else(|_| panic!("{policy}: run kept looping"));
        assert!(
            matches!(result, Err(AlarmError::StoreUnavailable(StoreError::Unexpected(_)))),
            "{policy}: got {result:?}"
        );
        assert_eq!(alarms.read_flag("health:svc", "sftp_upload:job1").await.unwrap(), 1);
    }
}

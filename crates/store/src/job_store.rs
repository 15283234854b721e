//! Job record storage.
//!
//! The store is the source of truth for job status. Every status change goes
//! through [`JobStore::transition`], which compare-and-swaps on the expected
//! prior status so two concurrent writers can never both move a job out of
//! the same state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use headshot_core::error::{CoreError, ErrorKind};
use headshot_core::job::{Job, JobStatus, NewJob, Transition};
use headshot_core::types::{JobId, Timestamp};
use tokio::sync::RwLock;

/// Errors from job store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record with this id (never created, or already purged).
    #[error("Job {0} not found")]
    NotFound(JobId),

    /// The job was not in the expected status, or the edge is not allowed.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backing store could not be reached.
    #[error("Job store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unavailable(_) => ErrorKind::StorageUnavailable,
        }
    }

    /// Whether this error is an expected race with the janitor or another
    /// writer rather than a fault.
    pub fn is_race(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Conflict(_))
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Receives every committed `create` and `transition`.
///
/// Called while the store still holds the record, so one job's changes
/// arrive in commit order. Must not block or call back into the store.
pub trait JobObserver: Send + Sync {
    fn job_changed(&self, job: &Job);
}

/// Storage for [`Job`] records.
///
/// Implementations that accept a [`JobObserver`] report each change before
/// another writer can see it.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `Queued` with zero attempts.
    async fn create(&self, input: NewJob) -> Result<Job, StoreError>;

    async fn get(&self, id: JobId) -> Result<Job, StoreError>;

    /// Atomically move `id` from `expected` to the transition's target.
    ///
    /// Returns the updated job, [`StoreError::Conflict`] if the job is no
    /// longer in `expected` or the edge is invalid, and
    /// [`StoreError::NotFound`] if the record is gone.
    async fn transition(
        &self,
        id: JobId,
        expected: JobStatus,
        transition: Transition,
    ) -> Result<Job, StoreError>;

    /// Non-terminal jobs whose `expires_at` is at or before `now`.
    async fn list_expirable(&self, now: Timestamp) -> Result<Vec<Job>, StoreError>;

    /// Queued jobs plus retrying jobs whose resume time has passed, oldest
    /// first.
    async fn list_dispatchable(&self, now: Timestamp) -> Result<Vec<Job>, StoreError>;

    /// Remove terminal jobs whose `expires_at` is at or before `cutoff`.
    /// Returns how many were removed.
    async fn purge_terminal(&self, cutoff: Timestamp) -> Result<usize, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct Entry {
    /// Insertion sequence; defines FIFO order.
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct JobTable {
    next_seq: u64,
    jobs: HashMap<JobId, Entry>,
}

impl JobTable {
    fn collect_ordered(&self, mut keep: impl FnMut(&Job) -> bool) -> Vec<Job> {
        let mut matched: Vec<&Entry> = self.jobs.values().filter(|e| keep(&e.job)).collect();
        matched.sort_by_key(|e| e.seq);
        matched.into_iter().map(|e| e.job.clone()).collect()
    }
}

/// Process-local [`JobStore`]. Every operation takes the table lock for a
/// short, non-async critical section.
#[derive(Default)]
pub struct InMemoryJobStore {
    table: RwLock<JobTable>,
    observer: Option<Arc<dyn JobObserver>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that reports every change to `observer` under the table lock.
    pub fn with_observer(observer: Arc<dyn JobObserver>) -> Self {
        Self {
            table: RwLock::default(),
            observer: Some(observer),
        }
    }

    fn notify(&self, job: &Job) {
        if let Some(observer) = &self.observer {
            observer.job_changed(job);
        }
    }

    /// Number of records currently held, in any status.
    pub async fn len(&self) -> usize {
        self.table.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, input: NewJob) -> Result<Job, StoreError> {
        let job = Job::new(input, Utc::now());
        let mut table = self.table.write().await;
        let seq = table.next_seq;
        table.next_seq += 1;
        table.jobs.insert(
            job.id,
            Entry {
                seq,
                job: job.clone(),
            },
        );
        self.notify(&job);
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.table
            .read()
            .await
            .jobs
            .get(&id)
            .map(|e| e.job.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn transition(
        &self,
        id: JobId,
        expected: JobStatus,
        transition: Transition,
    ) -> Result<Job, StoreError> {
        let mut table = self.table.write().await;
        let entry = table.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entry
            .job
            .apply_transition(expected, transition, Utc::now())?;
        debug_assert!(entry.job.check_invariants().is_ok());
        let job = entry.job.clone();
        self.notify(&job);
        Ok(job)
    }

    async fn list_expirable(&self, now: Timestamp) -> Result<Vec<Job>, StoreError> {
        let table = self.table.read().await;
        Ok(table.collect_ordered(|job| !job.status.is_terminal() && job.expires_at <= now))
    }

    async fn list_dispatchable(&self, now: Timestamp) -> Result<Vec<Job>, StoreError> {
        let table = self.table.read().await;
        Ok(table.collect_ordered(|job| job.is_dispatchable(now)))
    }

    async fn purge_terminal(&self, cutoff: Timestamp) -> Result<usize, StoreError> {
        let mut table = self.table.write().await;
        let before = table.jobs.len();
        table
            .jobs
            .retain(|_, e| !(e.job.status.is_terminal() && e.job.expires_at <= cutoff));
        Ok(before - table.jobs.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use chrono::Duration;
    use headshot_core::hashing::fingerprint;
    use headshot_core::style::Style;
    use headshot_core::types::ClientId;

    use super::*;

    fn new_job(client: &str, ttl: Duration) -> NewJob {
        NewJob {
            client_id: ClientId::new(client),
            source_artifact: fingerprint(client.as_bytes()),
            style: Style::CreativeProfessional,
            expires_at: Utc::now() + ttl,
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job("a", Duration::hours(1))).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempt, 0);
        assert_eq!(store.get(job.id).await.unwrap(), job);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let store = InMemoryJobStore::new();
        assert_matches!(store.get(JobId::new()).await, Err(StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn transition_updates_timestamp() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job("a", Duration::hours(1))).await.unwrap();
        let dispatched = store
            .transition(job.id, JobStatus::Queued, Transition::Dispatch)
            .await
            .unwrap();
        assert_eq!(dispatched.status, JobStatus::Dispatched);
        assert_eq!(dispatched.attempt, 1);
        assert!(dispatched.updated_at >= job.updated_at);
    }

    #[tokio::test]
    async fn transition_from_wrong_status_conflicts() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job("a", Duration::hours(1))).await.unwrap();
        let result = store
            .transition(job.id, JobStatus::Retrying, Transition::Dispatch)
            .await;
        assert_matches!(result, Err(StoreError::Conflict(_)));
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn concurrent_dispatch_has_exactly_one_winner() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = store.create(new_job("a", Duration::hours(1))).await.unwrap().id;

        let attempts = (0..16).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .transition(id, JobStatus::Queued, Transition::Dispatch)
                    .await
            })
        });
        let results = futures::future::join_all(attempts).await;

        let winners = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.get(id).await.unwrap().attempt, 1);
    }

    #[tokio::test]
    async fn dispatchable_jobs_are_fifo() {
        let store = InMemoryJobStore::new();
        let first = store.create(new_job("a", Duration::hours(1))).await.unwrap();
        let second = store.create(new_job("b", Duration::hours(1))).await.unwrap();
        let third = store.create(new_job("a", Duration::hours(1))).await.unwrap();

        let ids: Vec<JobId> = store
            .list_dispatchable(Utc::now())
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[tokio::test]
    async fn retrying_job_hidden_until_resume_time() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job("a", Duration::hours(1))).await.unwrap();
        let resume_at = Utc::now() + Duration::seconds(30);
        store
            .transition(job.id, JobStatus::Queued, Transition::Dispatch)
            .await
            .unwrap();
        store
            .transition(job.id, JobStatus::Dispatched, Transition::Retry { resume_at })
            .await
            .unwrap();

        assert!(store.list_dispatchable(Utc::now()).await.unwrap().is_empty());
        assert_eq!(store.list_dispatchable(resume_at).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expirable_excludes_terminal_and_fresh_jobs() {
        let store = InMemoryJobStore::new();
        let stale = store.create(new_job("a", Duration::zero())).await.unwrap();
        let fresh = store.create(new_job("b", Duration::hours(1))).await.unwrap();
        let done = store.create(new_job("c", Duration::zero())).await.unwrap();
        store
            .transition(done.id, JobStatus::Queued, Transition::Cancel)
            .await
            .unwrap();

        let expirable = store.list_expirable(Utc::now()).await.unwrap();
        assert_eq!(expirable.len(), 1);
        assert_eq!(expirable[0].id, stale.id);
        assert_ne!(expirable[0].id, fresh.id);
    }

    #[tokio::test]
    async fn purge_removes_only_old_terminal_records() {
        let store = InMemoryJobStore::new();
        let old_done = store.create(new_job("a", Duration::zero())).await.unwrap();
        store
            .transition(old_done.id, JobStatus::Queued, Transition::Expire)
            .await
            .unwrap();
        let old_live = store.create(new_job("b", Duration::zero())).await.unwrap();

        assert_eq!(store.purge_terminal(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.purge_terminal(Utc::now()).await.unwrap(), 0);
        assert_matches!(store.get(old_done.id).await, Err(StoreError::NotFound(_)));
        assert!(store.get(old_live.id).await.is_ok());
        assert_eq!(store.len().await, 1);
    }

    /// Records every change it is told about.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(JobId, JobStatus)>>,
    }

    impl JobObserver for Recorder {
        fn job_changed(&self, job: &Job) {
            self.seen.lock().unwrap().push((job.id, job.status));
        }
    }

    #[tokio::test]
    async fn observer_sees_creates_and_transitions_but_not_conflicts() {
        let recorder = Arc::new(Recorder::default());
        let store = InMemoryJobStore::with_observer(recorder.clone());

        let job = store.create(new_job("a", Duration::hours(1))).await.unwrap();
        store
            .transition(job.id, JobStatus::Queued, Transition::Dispatch)
            .await
            .unwrap();
        let _ = store
            .transition(job.id, JobStatus::Queued, Transition::Expire)
            .await
            .unwrap_err();

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![(job.id, JobStatus::Queued), (job.id, JobStatus::Dispatched)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_writers_are_observed_in_commit_order() {
        let recorder = Arc::new(Recorder::default());
        let store = Arc::new(InMemoryJobStore::with_observer(recorder.clone()));

        let mut ids = Vec::new();
        for _ in 0..200 {
            ids.push(store.create(new_job("a", Duration::hours(1))).await.unwrap().id);
        }

        // Dispatch and expiry race on every job; the loser gets a conflict.
        let mut tasks = Vec::new();
        for &id in &ids {
            for transition in [Transition::Dispatch, Transition::Expire] {
                let store = Arc::clone(&store);
                tasks.push(tokio::spawn(async move {
                    let _ = store.transition(id, JobStatus::Queued, transition).await;
                    if let Ok(job) = store.get(id).await {
                        if job.status == JobStatus::Dispatched {
                            let _ = store
                                .transition(id, JobStatus::Dispatched, Transition::Expire)
                                .await;
                        }
                    }
                }));
            }
        }
        futures::future::join_all(tasks).await;

        let seen = recorder.seen.lock().unwrap().clone();
        for id in ids {
            let last = seen.iter().rev().find(|(job, _)| *job == id).map(|(_, s)| *s);
            assert_eq!(last, Some(store.get(id).await.unwrap().status));
        }
    }

    #[test]
    fn race_errors_are_flagged() {
        assert!(StoreError::NotFound(JobId::new()).is_race());
        assert!(StoreError::Conflict("x".into()).is_race());
        assert!(!StoreError::Unavailable("x".into()).is_race());
        assert_eq!(
            StoreError::Unavailable("x".into()).kind(),
            ErrorKind::StorageUnavailable
        );
    }
}

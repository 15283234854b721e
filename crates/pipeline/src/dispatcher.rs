//! Background job dispatcher.
//!
//! Wakes every `poll_interval` (or sooner when a job is submitted or a
//! provider call finishes), walks the dispatchable jobs oldest first, and
//! hands each one it can admit to a provider call running on its own task.
//!
//! Admission needs a concurrency permit, a rate-limit token, and a
//! successful `Queued|Retrying -> Dispatched` compare-and-swap. A client
//! denied by the rate limiter is not asked again until the denial's
//! `retry_after` has passed, so its backlog never blocks other clients'
//! jobs and the limiter is not polled while nothing can change.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use headshot_core::error::ErrorKind;
use headshot_core::job::{Job, JobError, JobStatus, Transition};
use headshot_core::retry::{RetryDecision, RetryPolicy};
use headshot_core::types::{add_duration, ArtifactRef, ClientId};
use headshot_provider::{ProviderFailure, TransformProvider};
use headshot_store::{ArtifactError, ArtifactStore, JobStore, StoreError};
use tokio::sync::{Notify, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::PipelineConfig;
use crate::media::detect_image_mime;
use crate::rate_limiter::{Admission, LimitScope, RateLimiter};

/// Longest provider `Retry-After` hint honoured.
const MAX_PROVIDER_HINT: Duration = Duration::from_secs(600);

/// MIME type recorded when a result's format is not recognised.
const FALLBACK_MIME: &str = "application/octet-stream";

/// What one dispatch cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Jobs moved to `Dispatched` and handed to the provider.
    pub dispatched: usize,
    /// Clients the rate limiter denied this cycle.
    pub client_limited: usize,
    /// Jobs skipped because their client is still waiting out an earlier
    /// denial.
    pub deferred: usize,
    /// Whether the cycle stopped early on the global limit or on
    /// concurrency.
    pub saturated: bool,
}

/// Rate-limit denials still in force.
#[derive(Default)]
struct Backoff {
    global: Option<Instant>,
    clients: HashMap<ClientId, Instant>,
}

impl Backoff {
    /// Forget deadlines that have passed.
    fn expire(&mut self, now: Instant) {
        if self.global.is_some_and(|until| until <= now) {
            self.global = None;
        }
        self.clients.retain(|_, until| *until > now);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.global.into_iter().chain(self.clients.values().copied()).min()
    }
}

/// Matches dispatchable jobs with provider capacity.
pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    provider: Arc<dyn TransformProvider>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    provider_timeout: Duration,
    queued_retention: Duration,
    completed_retention: Duration,
    poll_interval: Duration,
    permits: Arc<Semaphore>,
    backoff: Mutex<Backoff>,
    wake: Arc<Notify>,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        config: &PipelineConfig,
        jobs: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        provider: Arc<dyn TransformProvider>,
        limiter: Arc<RateLimiter>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            jobs,
            artifacts,
            provider,
            limiter,
            retry: config.retry.clone(),
            provider_timeout: config.provider_timeout,
            queued_retention: config.queued_retention,
            completed_retention: config.completed_retention,
            poll_interval: config.poll_interval,
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            backoff: Mutex::new(Backoff::default()),
            wake,
            tracker: TaskTracker::new(),
        }
    }

    /// Provider calls currently running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Run the dispatcher loop until `cancel` fires, then wait for
    /// in-flight provider calls to finish.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_concurrency = self.permits.available_permits(),
            "Job dispatcher started",
        );

        loop {
            let backoff_ends = self.backoff().next_deadline();
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
                _ = sleep_until(backoff_ends) => {}
            }

            if let Err(e) = self.dispatch_cycle().await {
                tracing::error!(error = %e, "Dispatch cycle failed");
            }
        }

        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "Waiting for in-flight provider calls");
        }
        self.tracker.wait().await;
        tracing::info!("Job dispatcher stopped");
    }

    /// One pass over the dispatchable jobs.
    pub async fn dispatch_cycle(self: &Arc<Self>) -> Result<CycleReport, StoreError> {
        let mut report = CycleReport::default();
        let now = Instant::now();
        {
            let mut backoff = self.backoff();
            backoff.expire(now);
            if backoff.global.is_some() {
                report.saturated = true;
                return Ok(report);
            }
        }

        let candidates = self.jobs.list_dispatchable(Utc::now()).await?;

        for job in candidates {
            if self.backoff().clients.contains_key(&job.client_id) {
                report.deferred += 1;
                continue;
            }

            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                report.saturated = true;
                break;
            };

            if let Admission::Denied { retry_after, scope } = self.limiter.try_acquire(&job.client_id)
            {
                tracing::debug!(
                    job_id = %job.id,
                    client_id = %job.client_id,
                    ?scope,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limited, leaving job queued",
                );
                let until = Instant::now().checked_add(retry_after);
                let mut backoff = self.backoff();
                match scope {
                    LimitScope::Global => {
                        backoff.global = until;
                        report.saturated = true;
                        break;
                    }
                    LimitScope::Client => {
                        if let Some(until) = until {
                            backoff.clients.insert(job.client_id.clone(), until);
                        }
                        report.client_limited += 1;
                        continue;
                    }
                }
            }

            let dispatched = match self
                .jobs
                .transition(job.id, job.status, Transition::Dispatch)
                .await
            {
                Ok(dispatched) => dispatched,
                Err(e) if e.is_race() => {
                    tracing::debug!(job_id = %job.id, error = %e, "Job changed before dispatch, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };

            tracing::info!(
                job_id = %dispatched.id,
                client_id = %dispatched.client_id,
                attempt = dispatched.attempt,
                style = dispatched.style.name(),
                "Job dispatched",
            );
            report.dispatched += 1;

            let this = Arc::clone(self);
            self.tracker.spawn(async move {
                this.execute(dispatched).await;
                drop(permit);
                this.wake.notify_one();
            });
        }

        Ok(report)
    }

    fn backoff(&self) -> std::sync::MutexGuard<'_, Backoff> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one provider attempt for a `Dispatched` job and record the
    /// outcome.
    async fn execute(&self, job: Job) {
        match self.attempt(&job).await {
            Ok(bytes) => self.complete(&job, bytes).await,
            Err(failure) => self.handle_failure(&job, failure).await,
        }
    }

    async fn attempt(&self, job: &Job) -> Result<Vec<u8>, ProviderFailure> {
        let source = match self.artifacts.get(&job.source_artifact).await {
            Ok(source) => source,
            Err(ArtifactError::Unavailable(msg)) => {
                tracing::warn!(job_id = %job.id, error = %msg, "Source image unreadable");
                return Err(ProviderFailure::of_kind(ErrorKind::StorageUnavailable));
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Source image missing");
                return Err(ProviderFailure::new(
                    ErrorKind::InvalidInput,
                    "The uploaded photo is no longer available. Please upload it again.",
                ));
            }
        };

        let call = self
            .provider
            .transform(&source.bytes, job.style, self.provider_timeout);
        match tokio::time::timeout(self.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderFailure::of_kind(ErrorKind::ProviderTimeout)),
        }
    }

    async fn complete(&self, job: &Job, bytes: Vec<u8>) {
        let mime = detect_image_mime(&bytes).unwrap_or(FALLBACK_MIME);

        // Stored with the short TTL until the job is known to be Completed.
        let result = match self.artifacts.put(bytes, mime, self.queued_retention).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to store result image");
                let failure = ProviderFailure::of_kind(ErrorKind::StorageUnavailable);
                return self.handle_failure(job, failure).await;
            }
        };

        let transition = Transition::Complete {
            result_artifact: result.clone(),
            expires_at: add_duration(Utc::now(), self.completed_retention),
        };
        match self
            .jobs
            .transition(job.id, JobStatus::Dispatched, transition)
            .await
        {
            Ok(completed) => {
                self.extend(&result, job).await;
                self.extend(&job.source_artifact, job).await;
                tracing::info!(
                    job_id = %completed.id,
                    attempt = completed.attempt,
                    result = %result,
                    "Job completed",
                );
            }
            Err(e) if e.is_race() => {
                tracing::debug!(job_id = %job.id, error = %e, "Job left Dispatched in flight, result discarded");
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record job completion");
            }
        }
    }

    async fn extend(&self, artifact: &ArtifactRef, job: &Job) {
        if let Err(e) = self.artifacts.extend_ttl(artifact, self.completed_retention).await {
            tracing::warn!(job_id = %job.id, artifact = %artifact, error = %e, "Failed to extend artifact retention");
        }
    }

    async fn handle_failure(&self, job: &Job, failure: ProviderFailure) {
        let transition = match self.retry.decide(job.attempt, failure.kind) {
            RetryDecision::Retry(backoff) => {
                let delay = failure
                    .retry_after
                    .map_or(backoff, |hint| backoff.max(hint.min(MAX_PROVIDER_HINT)));
                tracing::warn!(
                    job_id = %job.id,
                    attempt = job.attempt,
                    error_kind = failure.kind.as_str(),
                    delay_ms = delay.as_millis() as u64,
                    "Provider call failed, will retry",
                );
                Transition::Retry {
                    resume_at: add_duration(Utc::now(), delay),
                }
            }
            RetryDecision::GiveUp => {
                tracing::warn!(
                    job_id = %job.id,
                    attempt = job.attempt,
                    error_kind = failure.kind.as_str(),
                    error = %failure.message,
                    "Provider call failed, giving up",
                );
                Transition::Fail {
                    error: JobError::new(failure.kind, failure.message),
                }
            }
        };

        match self
            .jobs
            .transition(job.id, JobStatus::Dispatched, transition)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_race() => {
                tracing::debug!(job_id = %job.id, error = %e, "Job left Dispatched in flight, outcome dropped");
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record provider failure");
            }
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

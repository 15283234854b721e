//! Periodic expiry and cleanup.
//!
//! Each sweep drops expired artifacts, moves non-terminal jobs past their
//! `expires_at` to `Expired`, purges terminal records once their grace
//! period has passed, and applies pending rate-limiter evictions. Every step is
//! idempotent, so overlapping or repeated sweeps are harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use headshot_core::job::Transition;
use headshot_core::types::Timestamp;
use headshot_store::{ArtifactStore, JobStore};
use tokio_util::sync::CancellationToken;

use crate::rate_limiter::RateLimiter;

/// Counts from one [`Janitor::sweep`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub artifacts_purged: usize,
    pub jobs_expired: usize,
    pub records_purged: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Janitor {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    limiter: Arc<RateLimiter>,
    record_grace: Duration,
    interval: Duration,
}

impl Janitor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        limiter: Arc<RateLimiter>,
        record_grace: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            jobs,
            artifacts,
            limiter,
            record_grace,
            interval,
        }
    }

    /// Run the sweep loop until `cancel` is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            record_grace_secs = self.record_grace.as_secs(),
            "Janitor started"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Janitor stopping");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.sweep(Utc::now()).await;
                    if report.is_empty() {
                        tracing::debug!("Janitor: nothing to clean up");
                    } else {
                        tracing::info!(
                            artifacts_purged = report.artifacts_purged,
                            jobs_expired = report.jobs_expired,
                            records_purged = report.records_purged,
                            "Janitor: sweep finished"
                        );
                    }
                }
            }
        }
    }

    /// One cleanup pass as of `now`. Failures in one step are logged and
    /// do not stop the others.
    pub async fn sweep(&self, now: Timestamp) -> SweepReport {
        let mut report = SweepReport::default();

        match self.artifacts.purge_expired(now).await {
            Ok(n) => report.artifacts_purged = n,
            Err(e) => tracing::error!(error = %e, "Janitor: artifact purge failed"),
        }

        match self.jobs.list_expirable(now).await {
            Ok(expirable) => {
                for job in expirable {
                    match self.jobs.transition(job.id, job.status, Transition::Expire).await {
                        Ok(_) => {
                            tracing::debug!(job_id = %job.id, from = job.status.as_str(), "Janitor: job expired");
                            report.jobs_expired += 1;
                        }
                        // Dispatched or completed since the listing.
                        Err(e) if e.is_race() => {
                            tracing::debug!(job_id = %job.id, error = %e, "Janitor: expiry skipped");
                        }
                        Err(e) => {
                            tracing::error!(job_id = %job.id, error = %e, "Janitor: expiry failed");
                        }
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "Janitor: listing expirable jobs failed"),
        }

        let cutoff = chrono::Duration::from_std(self.record_grace)
            .ok()
            .and_then(|grace| now.checked_sub_signed(grace))
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        match self.jobs.purge_terminal(cutoff).await {
            Ok(n) => report.records_purged = n,
            Err(e) => tracing::error!(error = %e, "Janitor: record purge failed"),
        }

        self.limiter.run_pending_tasks();
        report
    }
}

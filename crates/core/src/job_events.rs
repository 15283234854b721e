//! Event type names for job lifecycle notifications.
//!
//! Published on the event bus whenever a job is created or changes status.

use crate::job::JobStatus;

/// Job accepted into the queue.
pub const EVENT_JOB_QUEUED: &str = "job.queued";

/// Job admitted and handed to the provider.
pub const EVENT_JOB_DISPATCHED: &str = "job.dispatched";

/// Transient failure; job waits for its resume time.
pub const EVENT_JOB_RETRYING: &str = "job.retrying";

/// Result stored and ready to fetch.
pub const EVENT_JOB_COMPLETED: &str = "job.completed";

/// Job failed with a user-facing error.
pub const EVENT_JOB_FAILED: &str = "job.failed";

/// Retention window passed before the job finished.
pub const EVENT_JOB_EXPIRED: &str = "job.expired";

/// Job cancelled before dispatch.
pub const EVENT_JOB_CANCELLED: &str = "job.cancelled";

/// Event type published when a job enters `status`.
pub fn event_type_for(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => EVENT_JOB_QUEUED,
        JobStatus::Dispatched => EVENT_JOB_DISPATCHED,
        JobStatus::Retrying => EVENT_JOB_RETRYING,
        JobStatus::Completed => EVENT_JOB_COMPLETED,
        JobStatus::Failed => EVENT_JOB_FAILED,
        JobStatus::Expired => EVENT_JOB_EXPIRED,
        JobStatus::Cancelled => EVENT_JOB_CANCELLED,
    }
}

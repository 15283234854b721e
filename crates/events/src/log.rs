//! Structured event log.
//!
//! [`EventLog`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! writes every received [`JobEvent`] to the tracing log. It runs as a
//! long-lived background task and shuts down when the bus sender is dropped.

use headshot_core::job::JobStatus;
use tokio::sync::broadcast;

use crate::bus::JobEvent;

/// Background service that logs job events.
pub struct EventLog;

impl EventLog {
    /// Run the logging loop until the channel closes. Returns the number of
    /// events logged.
    pub async fn run(mut receiver: broadcast::Receiver<JobEvent>) -> u64 {
        let mut logged = 0u64;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    Self::record(&event);
                    logged += 1;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event log lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!(logged, "Event bus closed, event log shutting down");
                    break;
                }
            }
        }
        logged
    }

    fn record(event: &JobEvent) {
        match event.status {
            JobStatus::Failed => {
                let (kind, message) = event
                    .error
                    .as_ref()
                    .map(|e| (e.kind.as_str(), e.message.as_str()))
                    .unwrap_or(("unknown", ""));
                tracing::warn!(
                    event_type = %event.event_type,
                    job_id = %event.job_id,
                    client_id = %event.client_id,
                    attempt = event.attempt,
                    error_kind = kind,
                    error = message,
                    "Job event",
                );
            }
            _ => {
                tracing::info!(
                    event_type = %event.event_type,
                    job_id = %event.job_id,
                    client_id = %event.client_id,
                    attempt = event.attempt,
                    "Job event",
                );
            }
        }
    }
}

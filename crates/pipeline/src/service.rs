//! Client-facing operations: upload, submit, poll, fetch, cancel.
//!
//! [`JobService`] is what an HTTP or RPC layer calls. It never talks to the
//! provider; it writes `Queued` jobs, nudges the dispatcher, and reads back
//! whatever the dispatcher and janitor have recorded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use headshot_core::error::ErrorKind;
use headshot_core::job::{Job, JobError, JobStatus, NewJob, Transition};
use headshot_core::style::Style;
use headshot_core::types::{add_duration, ArtifactRef, ClientId, JobId, Timestamp};
use headshot_events::{EventBus, JobEvent};
use headshot_store::{ArtifactError, ArtifactStore, JobStore, StoreError};
use serde::Serialize;
use tokio::sync::{broadcast, Notify};

use crate::config::PipelineConfig;
use crate::media::detect_image_mime;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from [`JobService`] operations other than `fetch_result`.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("{0}")]
    Conflict(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unavailable(_) => ErrorKind::StorageUnavailable,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Unavailable(msg) => Self::Unavailable(msg),
        }
    }
}

/// Why [`JobService::fetch_result`] returned no image.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Still queued, dispatched or waiting to retry.
    #[error("Job is {} and has no result yet", .0.as_str())]
    NotReady(JobStatus),

    #[error("Job {0} not found")]
    NotFound(JobId),

    /// The job or its result passed its retention window.
    #[error("Job {0} has expired")]
    Expired(JobId),

    #[error("Job failed: {}", .0.message)]
    Failed(JobError),

    #[error("Job {0} was cancelled")]
    Cancelled(JobId),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotReady(_) | Self::Cancelled(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Expired(_) => ErrorKind::Expired,
            Self::Failed(error) => error.kind,
            Self::Unavailable(_) => ErrorKind::StorageUnavailable,
        }
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Point-in-time view of a job for status polling.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub client_id: ClientId,
    pub style: Style,
    pub status: JobStatus,
    pub attempt: u32,
    pub resume_at: Option<Timestamp>,
    pub result_artifact: Option<ArtifactRef>,
    pub error: Option<JobError>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expires_at: Timestamp,
}

impl From<Job> for JobSnapshot {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            client_id: job.client_id,
            style: job.style,
            status: job.status,
            attempt: job.attempt,
            resume_at: job.resume_at,
            result_artifact: job.result_artifact,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
            expires_at: job.expires_at,
        }
    }
}

/// A finished headshot ready to stream to the client.
#[derive(Debug, Clone)]
pub struct ResultImage {
    pub reference: ArtifactRef,
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct JobService {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    events: Arc<EventBus>,
    wake: Arc<Notify>,
    queued_retention: Duration,
    max_upload_bytes: usize,
}

impl JobService {
    pub fn new(
        config: &PipelineConfig,
        jobs: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        events: Arc<EventBus>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            jobs,
            artifacts,
            events,
            wake,
            queued_retention: config.queued_retention,
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    /// Store an uploaded source photo. Accepts PNG, JPEG and WebP up to the
    /// configured size limit.
    pub async fn upload_source(&self, bytes: Vec<u8>) -> Result<ArtifactRef, ServiceError> {
        if bytes.is_empty() {
            return Err(ServiceError::InvalidInput("The uploaded file is empty.".into()));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(ServiceError::InvalidInput(format!(
                "The uploaded file is {} bytes; the limit is {} bytes.",
                bytes.len(),
                self.max_upload_bytes
            )));
        }
        let mime = detect_image_mime(&bytes).ok_or_else(|| {
            ServiceError::InvalidInput("Only PNG, JPEG and WebP images are supported.".into())
        })?;

        let size = bytes.len();
        let reference = self
            .artifacts
            .put(bytes, mime, self.queued_retention)
            .await
            .map_err(artifact_error)?;
        tracing::debug!(artifact = %reference, mime, size, "Source image stored");
        Ok(reference)
    }

    /// Queue a transformation of `source` into `style` for `client_id`.
    pub async fn submit_job(
        &self,
        client_id: ClientId,
        source: ArtifactRef,
        style: Style,
    ) -> Result<JobId, ServiceError> {
        if client_id.as_str().trim().is_empty() {
            return Err(ServiceError::InvalidInput("A client id is required.".into()));
        }

        match self.artifacts.get(&source).await {
            Ok(_) => {}
            Err(ArtifactError::NotFound(_) | ArtifactError::Expired(_)) => {
                return Err(ServiceError::InvalidInput(
                    "The source image was not found or has expired. Please upload it again."
                        .into(),
                ));
            }
            Err(e) => return Err(artifact_error(e)),
        }

        // The source must outlive the job's queued window.
        if let Err(e) = self.artifacts.extend_ttl(&source, self.queued_retention).await {
            tracing::warn!(artifact = %source, error = %e, "Failed to extend source retention");
        }

        let job = self
            .jobs
            .create(NewJob {
                client_id,
                source_artifact: source,
                style,
                expires_at: add_duration(Utc::now(), self.queued_retention),
            })
            .await?;

        tracing::info!(
            job_id = %job.id,
            client_id = %job.client_id,
            style = style.name(),
            "Job submitted",
        );
        self.wake.notify_one();
        Ok(job.id)
    }

    pub async fn get_job_status(&self, id: JobId) -> Result<JobSnapshot, ServiceError> {
        Ok(self.jobs.get(id).await?.into())
    }

    /// The result image of a completed job.
    pub async fn fetch_result(&self, id: JobId) -> Result<ResultImage, FetchError> {
        let job = match self.jobs.get(id).await {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) => return Err(FetchError::NotFound(id)),
            Err(e) => return Err(FetchError::Unavailable(e.to_string())),
        };

        match job.status {
            JobStatus::Completed => {}
            JobStatus::Queued | JobStatus::Dispatched | JobStatus::Retrying => {
                return Err(FetchError::NotReady(job.status));
            }
            JobStatus::Failed => {
                let kind = ErrorKind::ProviderPermanent;
                let error = job
                    .error
                    .unwrap_or_else(|| JobError::new(kind, kind.user_message()));
                return Err(FetchError::Failed(error));
            }
            JobStatus::Expired => return Err(FetchError::Expired(id)),
            JobStatus::Cancelled => return Err(FetchError::Cancelled(id)),
        }

        let Some(reference) = job.result_artifact else {
            return Err(FetchError::Unavailable(format!("Job {id} completed without a result")));
        };
        match self.artifacts.get(&reference).await {
            Ok(artifact) => Ok(ResultImage {
                reference,
                bytes: artifact.bytes,
                mime_type: artifact.mime_type,
            }),
            // The record outlives the bytes by the grace period.
            Err(ArtifactError::NotFound(_) | ArtifactError::Expired(_)) => {
                Err(FetchError::Expired(id))
            }
            Err(ArtifactError::Unavailable(msg)) => Err(FetchError::Unavailable(msg)),
        }
    }

    /// Cancel a job that has not been dispatched yet.
    pub async fn cancel_job(&self, id: JobId) -> Result<JobSnapshot, ServiceError> {
        let job = self.jobs.get(id).await?;
        if !matches!(job.status, JobStatus::Queued | JobStatus::Retrying) {
            return Err(not_cancellable(id, job.status));
        }

        match self.jobs.transition(id, job.status, Transition::Cancel).await {
            Ok(cancelled) => {
                tracing::info!(job_id = %id, client_id = %cancelled.client_id, "Job cancelled");
                Ok(cancelled.into())
            }
            Err(StoreError::Conflict(_)) => {
                let current = self.jobs.get(id).await?;
                Err(not_cancellable(id, current.status))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Receive an event for every job status change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }
}

fn not_cancellable(id: JobId, status: JobStatus) -> ServiceError {
    ServiceError::Conflict(format!(
        "Job {id} is {} and can no longer be cancelled",
        status.as_str()
    ))
}

fn artifact_error(err: ArtifactError) -> ServiceError {
    match err {
        ArtifactError::Unavailable(msg) => ServiceError::Unavailable(msg),
        other => ServiceError::InvalidInput(other.to_string()),
    }
}

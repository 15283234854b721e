//! Job record and its transition rules.
//!
//! A [`Job`] only changes through [`Job::apply_transition`], which checks
//! the expected prior status (compare-and-swap), validates the edge against
//! [`state_machine`], and writes the fields that belong to the target
//! status. Stores call it under their own lock.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ErrorKind};
use crate::scheduling::state_machine;
use crate::style::Style;
use crate::types::{ArtifactRef, ClientId, JobId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Dispatched,
    Retrying,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Queued,
        JobStatus::Dispatched,
        JobStatus::Retrying,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Expired,
        JobStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Expired | Self::Cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Failure recorded on a job that ended in [`JobStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    /// Safe to display to the end user.
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One requested image transformation and its tracked lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub client_id: ClientId,
    pub source_artifact: ArtifactRef,
    pub style: Style,
    pub status: JobStatus,
    /// Transform attempts made so far. Incremented on every dispatch.
    pub attempt: u32,
    /// Earliest re-admission time while `Retrying`.
    pub resume_at: Option<Timestamp>,
    pub result_artifact: Option<ArtifactRef>,
    pub error: Option<JobError>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Input for creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub client_id: ClientId,
    pub source_artifact: ArtifactRef,
    pub style: Style,
    pub expires_at: Timestamp,
}

/// A requested status change with the fields that accompany it.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Admit to a provider call. Increments `attempt`.
    Dispatch,
    /// Transient failure; re-admit no earlier than `resume_at`.
    Retry { resume_at: Timestamp },
    /// Result stored; retention extended to `expires_at`.
    Complete {
        result_artifact: ArtifactRef,
        expires_at: Timestamp,
    },
    Fail { error: JobError },
    Expire,
    Cancel,
}

impl Transition {
    pub fn target(&self) -> JobStatus {
        match self {
            Self::Dispatch => JobStatus::Dispatched,
            Self::Retry { .. } => JobStatus::Retrying,
            Self::Complete { .. } => JobStatus::Completed,
            Self::Fail { .. } => JobStatus::Failed,
            Self::Expire => JobStatus::Expired,
            Self::Cancel => JobStatus::Cancelled,
        }
    }
}

impl Job {
    pub fn new(input: NewJob, now: Timestamp) -> Self {
        Self {
            id: JobId::new(),
            client_id: input.client_id,
            source_artifact: input.source_artifact,
            style: input.style,
            status: JobStatus::Queued,
            attempt: 0,
            resume_at: None,
            result_artifact: None,
            error: None,
            created_at: now,
            updated_at: now,
            expires_at: input.expires_at,
        }
    }

    /// Compare-and-swap the status from `expected` to the transition's
    /// target, applying its fields. Leaves the job untouched on error.
    pub fn apply_transition(
        &mut self,
        expected: JobStatus,
        transition: Transition,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        if self.status != expected {
            return Err(CoreError::Conflict(format!(
                "Job {} is {}, expected {}",
                self.id,
                self.status.as_str(),
                expected.as_str()
            )));
        }
        let target = transition.target();
        state_machine::validate_transition(expected, target)?;

        match transition {
            Transition::Dispatch => {
                self.attempt = self.attempt.saturating_add(1);
                self.resume_at = None;
            }
            Transition::Retry { resume_at } => {
                self.resume_at = Some(resume_at);
            }
            Transition::Complete {
                result_artifact,
                expires_at,
            } => {
                self.result_artifact = Some(result_artifact);
                self.expires_at = expires_at;
            }
            Transition::Fail { error } => {
                self.error = Some(error);
            }
            Transition::Expire | Transition::Cancel => {
                self.resume_at = None;
            }
        }

        self.status = target;
        self.updated_at = now;
        Ok(())
    }

    /// Check the result/error exclusivity invariant for the current status.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        let ok = match self.status {
            JobStatus::Completed => self.result_artifact.is_some() && self.error.is_none(),
            JobStatus::Failed => self.error.is_some() && self.result_artifact.is_none(),
            _ => self.result_artifact.is_none() && self.error.is_none(),
        };
        let resume_ok = self.resume_at.is_some() == (self.status == JobStatus::Retrying);
        if ok && resume_ok {
            Ok(())
        } else {
            Err(CoreError::Internal(format!(
                "Job {} violates invariants in status {}",
                self.id,
                self.status.as_str()
            )))
        }
    }

    /// Whether the dispatcher may admit this job at `now`.
    pub fn is_dispatchable(&self, now: Timestamp) -> bool {
        match self.status {
            JobStatus::Queued => true,
            JobStatus::Retrying => self.resume_at.is_some_and(|at| at <= now),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::hashing::fingerprint;

    fn queued_job() -> Job {
        let now = Utc::now();
        Job::new(
            NewJob {
                client_id: ClientId::new("client-a"),
                source_artifact: fingerprint(b"source"),
                style: Style::CorporateClassic,
                expires_at: now + Duration::hours(1),
            },
            now,
        )
    }

    #[test]
    fn new_job_is_queued_with_zero_attempts() {
        let job = queued_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempt, 0);
        assert!(job.check_invariants().is_ok());
    }

    #[test]
    fn dispatch_increments_attempt_and_clears_resume() {
        let mut job = queued_job();
        let now = Utc::now();
        job.apply_transition(JobStatus::Queued, Transition::Dispatch, now)
            .unwrap();
        job.apply_transition(
            JobStatus::Dispatched,
            Transition::Retry { resume_at: now },
            now,
        )
        .unwrap();
        assert_eq!(job.resume_at, Some(now));
        job.apply_transition(JobStatus::Retrying, Transition::Dispatch, now)
            .unwrap();
        assert_eq!(job.attempt, 2);
        assert!(job.resume_at.is_none());
    }

    #[test]
    fn stale_expected_status_is_a_conflict() {
        let mut job = queued_job();
        let now = Utc::now();
        job.apply_transition(JobStatus::Queued, Transition::Dispatch, now)
            .unwrap();
        let err = job
            .apply_transition(JobStatus::Queued, Transition::Dispatch, now)
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert_eq!(job.attempt, 1);
    }

    #[test]
    fn complete_extends_expiry_and_sets_result() {
        let mut job = queued_job();
        let now = Utc::now();
        let later = now + Duration::hours(24);
        job.apply_transition(JobStatus::Queued, Transition::Dispatch, now)
            .unwrap();
        job.apply_transition(
            JobStatus::Dispatched,
            Transition::Complete {
                result_artifact: fingerprint(b"result"),
                expires_at: later,
            },
            now,
        )
        .unwrap();
        assert_eq!(job.expires_at, later);
        assert!(job.check_invariants().is_ok());
    }

    #[test]
    fn terminal_job_rejects_everything() {
        let mut job = queued_job();
        let now = Utc::now();
        job.apply_transition(JobStatus::Queued, Transition::Expire, now)
            .unwrap();
        for t in [Transition::Dispatch, Transition::Cancel, Transition::Expire] {
            assert!(job
                .apply_transition(JobStatus::Expired, t, now)
                .is_err());
        }
        assert_eq!(job.status, JobStatus::Expired);
    }

    #[test]
    fn retrying_job_waits_for_resume_time() {
        let mut job = queued_job();
        let now = Utc::now();
        job.apply_transition(JobStatus::Queued, Transition::Dispatch, now)
            .unwrap();
        job.apply_transition(
            JobStatus::Dispatched,
            Transition::Retry {
                resume_at: now + Duration::seconds(5),
            },
            now,
        )
        .unwrap();
        assert!(!job.is_dispatchable(now));
        assert!(job.is_dispatchable(now + Duration::seconds(5)));
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        fn arb_status() -> impl Strategy<Value = JobStatus> {
            prop::sample::select(JobStatus::ALL.to_vec())
        }

        fn arb_transition() -> impl Strategy<Value = Transition> {
            let now = Utc::now();
            prop_oneof![
                Just(Transition::Dispatch),
                (0i64..120).prop_map(move |s| Transition::Retry {
                    resume_at: now + Duration::seconds(s)
                }),
                Just(Transition::Complete {
                    result_artifact: fingerprint(b"result"),
                    expires_at: now + Duration::hours(24),
                }),
                prop::sample::select(vec![
                    ErrorKind::InvalidInput,
                    ErrorKind::ProviderPermanent,
                    ErrorKind::ProviderTimeout,
                ])
                .prop_map(|kind| Transition::Fail {
                    error: JobError::new(kind, kind.user_message()),
                }),
                Just(Transition::Expire),
                Just(Transition::Cancel),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 512,
                ..ProptestConfig::default()
            })]

            /// Property: only graph edges succeed, terminal states are
            /// absorbing, invariants hold after every step and `attempt`
            /// never decreases.
            #[test]
            fn random_transition_sequences_respect_the_graph(
                steps in prop::collection::vec((arb_status(), arb_transition()), 1..40)
            ) {
                let mut job = queued_job();
                for (expected, transition) in steps {
                    let before = job.clone();
                    let target = transition.target();
                    let result = job.apply_transition(expected, transition, Utc::now());

                    if result.is_ok() {
                        prop_assert_eq!(before.status, expected);
                        prop_assert!(state_machine::can_transition(before.status, target));
                        prop_assert!(!before.status.is_terminal());
                        prop_assert_eq!(job.status, target);
                    } else {
                        prop_assert_eq!(&job, &before);
                    }
                    prop_assert!(job.attempt >= before.attempt);
                    prop_assert!(job.check_invariants().is_ok());
                }
            }
        }
    }
}

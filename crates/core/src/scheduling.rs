//! Job state machine.
//!
//! ```text
//! Queued -> Dispatched -> Completed | Failed | Retrying
//! Retrying -> Dispatched
//! Queued | Dispatched | Retrying -> Expired      (janitor)
//! Queued | Retrying -> Cancelled                 (external request)
//! ```
//!
//! Completed, Failed, Expired and Cancelled are terminal.

pub mod state_machine {
    use crate::error::CoreError;
    use crate::job::JobStatus;

    /// Returns the set of statuses reachable from `from`.
    ///
    /// Terminal states return an empty slice.
    pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
        use JobStatus::*;
        match from {
            Queued => &[Dispatched, Expired, Cancelled],
            Dispatched => &[Completed, Failed, Retrying, Expired],
            Retrying => &[Dispatched, Expired, Cancelled],
            Completed | Failed | Expired | Cancelled => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a state transition, returning a conflict for invalid ones.
    pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), CoreError> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Invalid transition: {} -> {}",
                from.as_str(),
                to.as_str()
            )))
        }
    }
}

//! Job and artifact storage.
//!
//! Both stores are traits so the dispatcher and janitor can run against any
//! backend. The in-memory implementations here are the default and hold
//! state only for the lifetime of the process.
//!
//! - [`JobStore`] / [`InMemoryJobStore`]: job records, compare-and-swap
//!   status transitions.
//! - [`ArtifactStore`] / [`InMemoryArtifactStore`]: content-addressed,
//!   time-bounded blobs.

pub mod artifact_store;
pub mod job_store;

pub use artifact_store::{Artifact, ArtifactError, ArtifactStore, InMemoryArtifactStore};
pub use job_store::{InMemoryJobStore, JobObserver, JobStore, StoreError};

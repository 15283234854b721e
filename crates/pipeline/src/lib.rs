//! Job orchestration for headshot transformations.
//!
//! [`JobService`] accepts work, the [`Dispatcher`] feeds it to a
//! [`TransformProvider`](headshot_provider::TransformProvider) under
//! concurrency, rate and retry limits, and the [`Janitor`] expires and
//! purges what is left behind. [`Pipeline`] wires them together.

pub mod config;
pub mod dispatcher;
pub mod janitor;
pub mod media;
pub mod observed;
pub mod rate_limiter;
pub mod runtime;
pub mod service;

pub use config::{PipelineConfig, RateLimit};
pub use dispatcher::{CycleReport, Dispatcher};
pub use janitor::{Janitor, SweepReport};
pub use observed::BusObserver;
pub use rate_limiter::{Admission, LimitScope, RateLimiter};
pub use runtime::{Pipeline, PipelineHandle};
pub use service::{FetchError, JobService, JobSnapshot, ResultImage, ServiceError};

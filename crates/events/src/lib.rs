//! Job lifecycle event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`]: snapshot of a job published on every status change.
//! - [`EventLog`]: background subscriber that writes every event to the
//!   structured log.

pub mod bus;
pub mod log;

pub use bus::{EventBus, JobEvent};
pub use log::EventLog;

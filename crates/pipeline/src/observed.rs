//! Bridges job store changes onto the event bus.

use std::sync::Arc;

use headshot_core::job::Job;
use headshot_events::{EventBus, JobEvent};
use headshot_store::JobObserver;

/// Publishes a [`JobEvent`] for every committed job change. Purges are
/// silent.
pub struct BusObserver {
    bus: Arc<EventBus>,
}

impl BusObserver {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl JobObserver for BusObserver {
    fn job_changed(&self, job: &Job) {
        self.bus.publish(JobEvent::from_job(job));
    }
}

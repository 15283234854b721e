//! Wires the stores, limiter, dispatcher, janitor and service together and
//! runs the background loops.

use std::sync::Arc;

use headshot_core::config::ConfigError;
use headshot_events::EventBus;
use headshot_provider::TransformProvider;
use headshot_store::artifact_store::DEFAULT_MAX_TOTAL_BYTES;
use headshot_store::{ArtifactStore, InMemoryArtifactStore, InMemoryJobStore, JobStore};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::dispatcher::Dispatcher;
use crate::janitor::Janitor;
use crate::observed::BusObserver;
use crate::rate_limiter::RateLimiter;
use crate::service::JobService;

/// A fully wired pipeline. Nothing runs until [`Pipeline::start`].
pub struct Pipeline {
    service: Arc<JobService>,
    dispatcher: Arc<Dispatcher>,
    janitor: Arc<Janitor>,
    events: Arc<EventBus>,
}

impl Pipeline {
    /// Build a pipeline over `jobs` and `artifacts`.
    ///
    /// Subscribers of `events` only hear about job changes if `jobs`
    /// reports them to a [`BusObserver`] over the same bus.
    pub fn new(
        config: PipelineConfig,
        events: Arc<EventBus>,
        jobs: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        provider: Arc<dyn TransformProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let limiter = Arc::new(RateLimiter::new(
            config.client_rate,
            config.global_rate,
            config.max_tracked_clients,
        ));
        let wake = Arc::new(Notify::new());

        let dispatcher = Arc::new(Dispatcher::new(
            &config,
            Arc::clone(&jobs),
            Arc::clone(&artifacts),
            provider,
            Arc::clone(&limiter),
            Arc::clone(&wake),
        ));
        let janitor = Arc::new(Janitor::new(
            Arc::clone(&jobs),
            Arc::clone(&artifacts),
            limiter,
            config.record_grace,
            config.janitor_interval,
        ));
        let service = Arc::new(JobService::new(
            &config,
            jobs,
            artifacts,
            Arc::clone(&events),
            wake,
        ));

        Ok(Self {
            service,
            dispatcher,
            janitor,
            events,
        })
    }

    /// Pipeline backed by the in-memory stores, with `artifact_budget`
    /// bytes of artifact storage.
    pub fn in_memory_with_budget(
        config: PipelineConfig,
        provider: Arc<dyn TransformProvider>,
        artifact_budget: usize,
    ) -> Result<Self, ConfigError> {
        let events = Arc::new(EventBus::default());
        let observer = Arc::new(BusObserver::new(Arc::clone(&events)));
        Self::new(
            config,
            events,
            Arc::new(InMemoryJobStore::with_observer(observer)),
            Arc::new(InMemoryArtifactStore::new(artifact_budget)),
            provider,
        )
    }

    /// Pipeline backed by the in-memory stores.
    pub fn in_memory(
        config: PipelineConfig,
        provider: Arc<dyn TransformProvider>,
    ) -> Result<Self, ConfigError> {
        Self::in_memory_with_budget(config, provider, DEFAULT_MAX_TOTAL_BYTES)
    }

    pub fn service(&self) -> Arc<JobService> {
        Arc::clone(&self.service)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn janitor(&self) -> &Arc<Janitor> {
        &self.janitor
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Spawn the dispatcher and janitor loops. Both stop when `cancel` is
    /// triggered.
    pub fn start(&self, cancel: CancellationToken) -> PipelineHandle {
        let dispatcher = tokio::spawn(Arc::clone(&self.dispatcher).run(cancel.clone()));

        let janitor = Arc::clone(&self.janitor);
        let janitor_cancel = cancel.clone();
        let janitor = tokio::spawn(async move { janitor.run(janitor_cancel).await });

        PipelineHandle {
            cancel,
            dispatcher,
            janitor,
        }
    }
}

/// Running background loops of a [`Pipeline`].
pub struct PipelineHandle {
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
    janitor: JoinHandle<()>,
}

impl PipelineHandle {
    /// Stop both loops and wait for in-flight provider calls to settle.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.dispatcher.await {
            tracing::error!(error = %e, "Dispatcher task panicked");
        }
        if let Err(e) = self.janitor.await {
            tracing::error!(error = %e, "Janitor task panicked");
        }
    }
}

//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use headshot_core::error::ErrorKind;
use headshot_core::job::JobStatus;
use headshot_core::retry::RetryPolicy;
use headshot_core::style::Style;
use headshot_core::types::JobId;
use headshot_events::JobEvent;
use headshot_pipeline::{JobService, JobSnapshot, PipelineConfig, RateLimit};
use headshot_provider::{ProviderFailure, TransformProvider};
use tokio::sync::{broadcast, Notify};

/// A PNG signature followed by `tag`, so each call site gets distinct
/// content (and therefore a distinct artifact).
pub fn png(tag: &str) -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec();
    bytes.extend_from_slice(tag.as_bytes());
    bytes
}

/// Fast timings, generous limits; janitor sweeps are driven by hand.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        max_concurrency: 4,
        client_rate: RateLimit::new(100, Duration::from_secs(60)),
        global_rate: RateLimit::new(1000, Duration::from_secs(60)),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        },
        provider_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(10),
        janitor_interval: Duration::from_secs(3600),
        ..PipelineConfig::default()
    }
}

/// One scripted provider response.
#[derive(Clone)]
pub enum Step {
    Succeed,
    Fail(ErrorKind),
    /// Sleep, then succeed.
    Stall(Duration),
    /// Wait for the gate, then succeed.
    Gate(Arc<Notify>),
}

/// Provider that plays back a script, then succeeds forever.
///
/// A successful call returns `png("result:")` followed by the source bytes,
/// so results can be traced back to their job.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Step>>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sources: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedProvider {
    pub fn new(script: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Self::with_delay(script, Duration::ZERO)
    }

    /// Every call takes at least `delay`.
    pub fn with_delay(script: impl IntoIterator<Item = Step>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            sources: Mutex::new(Vec::new()),
        })
    }

    pub fn always_failing(kind: ErrorKind) -> Arc<Self> {
        Self::new(std::iter::repeat(Step::Fail(kind)).take(64))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Source bytes of every call, in call order.
    pub fn sources(&self) -> Vec<Vec<u8>> {
        self.sources.lock().unwrap().clone()
    }

    pub fn expected_result(source: &[u8]) -> Vec<u8> {
        let mut out = png("result:");
        out.extend_from_slice(source);
        out
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransformProvider for ScriptedProvider {
    async fn transform(
        &self,
        source: &[u8],
        _style: Style,
        _timeout: Duration,
    ) -> Result<Vec<u8>, ProviderFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().unwrap().push(source.to_vec());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Succeed);
        match step {
            Step::Succeed => {}
            Step::Fail(kind) => return Err(ProviderFailure::of_kind(kind)),
            Step::Stall(d) => tokio::time::sleep(d).await,
            Step::Gate(gate) => gate.notified().await,
        }
        Ok(Self::expected_result(source))
    }
}

/// Poll until the job reaches `status`, panicking after five seconds.
pub async fn wait_for_status(service: &JobService, id: JobId, status: JobStatus) -> JobSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = service.get_job_status(id).await.unwrap();
        if snapshot.status == status {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} stuck in {:?}, wanted {:?}",
            snapshot.status,
            status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until `check` holds, panicking after five seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Event types published for `id` up to and including the first event with
/// status `last`, panicking after five seconds.
pub async fn events_until(
    events: &mut broadcast::Receiver<JobEvent>,
    id: JobId,
    last: JobStatus,
) -> Vec<String> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for job events")
            .unwrap();
        if event.job_id != id {
            continue;
        }
        let done = event.status == last;
        seen.push(event.event_type);
        if done {
            return seen;
        }
    }
}

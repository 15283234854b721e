//! Pipeline tuning loaded from environment variables.

use std::time::Duration;

use headshot_core::config::{env_millis, env_or, env_secs, ConfigError};
use headshot_core::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};

/// Default upload size limit (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Default cap on client rate-limit buckets held at once.
pub const DEFAULT_MAX_TRACKED_CLIENTS: u64 = 100_000;

/// `capacity` acquisitions per `window`, refilled continuously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub capacity: u32,
    pub window: Duration,
}

impl RateLimit {
    pub const fn new(capacity: u32, window: Duration) -> Self {
        Self { capacity, window }
    }
}

/// Everything the dispatcher, janitor and service need to know.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on provider calls in flight at once.
    pub max_concurrency: usize,
    pub client_rate: RateLimit,
    pub global_rate: RateLimit,
    /// Client buckets held at once; the least useful are evicted beyond it.
    pub max_tracked_clients: u64,
    pub retry: RetryPolicy,
    /// How long a queued job (and its source image) may wait for a result.
    pub queued_retention: Duration,
    /// How long a completed result stays fetchable.
    pub completed_retention: Duration,
    /// How long a terminal record outlives its `expires_at` before purge.
    pub record_grace: Duration,
    /// Per-call deadline for the provider.
    pub provider_timeout: Duration,
    /// Dispatcher wakes at least this often.
    pub poll_interval: Duration,
    pub janitor_interval: Duration,
    pub max_upload_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            client_rate: RateLimit::new(5, Duration::from_secs(60)),
            global_rate: RateLimit::new(60, Duration::from_secs(60)),
            max_tracked_clients: DEFAULT_MAX_TRACKED_CLIENTS,
            retry: RetryPolicy::default(),
            queued_retention: Duration::from_secs(3600),
            completed_retention: Duration::from_secs(86_400),
            record_grace: Duration::from_secs(3600),
            provider_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            janitor_interval: Duration::from_secs(60),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default    |
    /// |------------------------------|------------|
    /// | `MAX_CONCURRENCY`            | `4`        |
    /// | `CLIENT_RATE_LIMIT`          | `5`        |
    /// | `CLIENT_RATE_WINDOW_SECS`    | `60`       |
    /// | `GLOBAL_RATE_LIMIT`          | `60`       |
    /// | `GLOBAL_RATE_WINDOW_SECS`    | `60`       |
    /// | `RATE_LIMIT_MAX_CLIENTS`     | `100000`   |
    /// | `RETRY_MAX_ATTEMPTS`         | `3`        |
    /// | `RETRY_BASE_DELAY_MS`        | `1000`     |
    /// | `RETRY_MAX_DELAY_MS`         | `30000`    |
    /// | `QUEUED_RETENTION_SECS`      | `3600`     |
    /// | `COMPLETED_RETENTION_SECS`   | `86400`    |
    /// | `RECORD_GRACE_SECS`          | `3600`     |
    /// | `PROVIDER_TIMEOUT_SECS`      | `30`       |
    /// | `DISPATCH_POLL_INTERVAL_MS`  | `500`      |
    /// | `JANITOR_INTERVAL_SECS`      | `60`       |
    /// | `MAX_UPLOAD_BYTES`           | `10485760` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            max_concurrency: env_or("MAX_CONCURRENCY", defaults.max_concurrency)?,
            client_rate: RateLimit::new(
                env_or("CLIENT_RATE_LIMIT", defaults.client_rate.capacity)?,
                env_secs("CLIENT_RATE_WINDOW_SECS", defaults.client_rate.window)?,
            ),
            global_rate: RateLimit::new(
                env_or("GLOBAL_RATE_LIMIT", defaults.global_rate.capacity)?,
                env_secs("GLOBAL_RATE_WINDOW_SECS", defaults.global_rate.window)?,
            ),
            max_tracked_clients: env_or("RATE_LIMIT_MAX_CLIENTS", defaults.max_tracked_clients)?,
            retry: RetryPolicy {
                max_attempts: env_or("RETRY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
                base_delay: env_millis("RETRY_BASE_DELAY_MS", DEFAULT_BASE_DELAY)?,
                max_delay: env_millis("RETRY_MAX_DELAY_MS", DEFAULT_MAX_DELAY)?,
            },
            queued_retention: env_secs("QUEUED_RETENTION_SECS", defaults.queued_retention)?,
            completed_retention: env_secs(
                "COMPLETED_RETENTION_SECS",
                defaults.completed_retention,
            )?,
            record_grace: env_secs("RECORD_GRACE_SECS", defaults.record_grace)?,
            provider_timeout: env_secs("PROVIDER_TIMEOUT_SECS", defaults.provider_timeout)?,
            poll_interval: env_millis("DISPATCH_POLL_INTERVAL_MS", defaults.poll_interval)?,
            janitor_interval: env_secs("JANITOR_INTERVAL_SECS", defaults.janitor_interval)?,
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &'static str, value: impl ToString, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                key,
                value: value.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.max_concurrency == 0 {
            return Err(invalid("MAX_CONCURRENCY", 0, "must be at least 1"));
        }
        if self.client_rate.capacity == 0 {
            return Err(invalid("CLIENT_RATE_LIMIT", 0, "must be at least 1"));
        }
        if self.global_rate.capacity == 0 {
            return Err(invalid("GLOBAL_RATE_LIMIT", 0, "must be at least 1"));
        }
        if self.client_rate.window.is_zero() {
            return Err(invalid("CLIENT_RATE_WINDOW_SECS", 0, "must be positive"));
        }
        if self.global_rate.window.is_zero() {
            return Err(invalid("GLOBAL_RATE_WINDOW_SECS", 0, "must be positive"));
        }
        if self.max_tracked_clients == 0 {
            return Err(invalid("RATE_LIMIT_MAX_CLIENTS", 0, "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("RETRY_MAX_ATTEMPTS", 0, "must be at least 1"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(invalid(
                "RETRY_BASE_DELAY_MS",
                self.retry.base_delay.as_millis(),
                "must not exceed RETRY_MAX_DELAY_MS",
            ));
        }
        if self.provider_timeout.is_zero() {
            return Err(invalid("PROVIDER_TIMEOUT_SECS", 0, "must be positive"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("DISPATCH_POLL_INTERVAL_MS", 0, "must be positive"));
        }
        if self.janitor_interval.is_zero() {
            return Err(invalid("JANITOR_INTERVAL_SECS", 0, "must be positive"));
        }
        if self.completed_retention < self.queued_retention {
            return Err(invalid(
                "COMPLETED_RETENTION_SECS",
                self.completed_retention.as_secs(),
                "must not be shorter than QUEUED_RETENTION_SECS",
            ));
        }
        Ok(())
    }
}

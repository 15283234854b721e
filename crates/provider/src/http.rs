//! HTTP adapter for a remote image-generation service.
//!
//! Sends `POST {base_url}/v1/transform` as multipart form data with the
//! source image and the style template id, and expects the result image as
//! the raw response body. HTTP outcomes are classified into [`ErrorKind`]s
//! so the retry policy can act on them.

use std::time::Duration;

use async_trait::async_trait;
use headshot_core::config::{env_or, env_required, env_secs, ConfigError};
use headshot_core::error::ErrorKind;
use headshot_core::style::Style;
use reqwest::header::RETRY_AFTER;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;

use crate::provider::{ProviderFailure, TransformProvider};

/// Default connect timeout; the per-call timeout is passed by the caller.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for [`HttpTransformProvider`].
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base HTTP URL, e.g. `https://gen.example.com`.
    pub base_url: String,
    /// Sent as a bearer token when present.
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
}

impl ProviderConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                          | Default   |
    /// |----------------------------------|-----------|
    /// | `PROVIDER_URL`                   | required  |
    /// | `PROVIDER_API_KEY`               | unset     |
    /// | `PROVIDER_CONNECT_TIMEOUT_SECS`  | `5`       |
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = env_required("PROVIDER_URL")?
            .trim_end_matches('/')
            .to_string();
        let api_key = env_or::<String>("PROVIDER_API_KEY", String::new())?;
        let api_key = (!api_key.is_empty()).then_some(api_key);
        let connect_timeout = env_secs("PROVIDER_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT)?;

        Ok(Self {
            base_url,
            api_key,
            connect_timeout,
        })
    }
}

/// Errors building the HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum HttpProviderError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// [`TransformProvider`] backed by a remote HTTP service.
pub struct HttpTransformProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpTransformProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, HttpProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/transform", self.config.base_url)
    }
}

#[async_trait]
impl TransformProvider for HttpTransformProvider {
    async fn transform(
        &self,
        source: &[u8],
        style: Style,
        timeout: Duration,
    ) -> Result<Vec<u8>, ProviderFailure> {
        let form = Form::new()
            .text("style", style.name())
            .part("image", Part::bytes(source.to_vec()).file_name("source"));

        let mut request = self
            .client
            .post(self.endpoint())
            .timeout(timeout)
            .multipart(form);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(classify_request_error)?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(
                status = status.as_u16(),
                style = style.name(),
                body = %truncate(&body, 512),
                "Provider rejected transform request",
            );
            return Err(classify_status(status, retry_after));
        }

        let bytes = response.bytes().await.map_err(classify_request_error)?;
        if bytes.is_empty() {
            return Err(ProviderFailure::new(
                ErrorKind::ProviderTransient,
                "The generation service returned an empty image.",
            ));
        }
        Ok(bytes.to_vec())
    }
}

// ---- classification helpers ----

/// Map a non-2xx status to a failure kind.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> ProviderFailure {
    let kind = match status.as_u16() {
        429 => ErrorKind::RateLimited,
        408 => ErrorKind::ProviderTimeout,
        400 | 413 | 415 | 422 => ErrorKind::InvalidInput,
        500..=599 => ErrorKind::ProviderTransient,
        _ => ErrorKind::ProviderPermanent,
    };
    let failure = ProviderFailure::of_kind(kind);
    match retry_after {
        Some(delay) if kind.is_transient() => failure.with_retry_after(delay),
        _ => failure,
    }
}

/// Map a transport-level error to a failure kind.
fn classify_request_error(err: reqwest::Error) -> ProviderFailure {
    tracing::debug!(error = %err, "Provider request failed");
    if err.is_timeout() {
        ProviderFailure::of_kind(ErrorKind::ProviderTimeout)
    } else {
        ProviderFailure::of_kind(ErrorKind::ProviderTransient)
    }
}

/// Parse a `Retry-After` header given in delta-seconds. HTTP-date values
/// are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

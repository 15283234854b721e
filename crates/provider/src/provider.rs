//! Abstract contract for the remote image transformation.

use std::time::Duration;

use async_trait::async_trait;
use headshot_core::error::ErrorKind;
use headshot_core::style::Style;

/// Why a transform attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderFailure {
    pub kind: ErrorKind,
    /// Safe to display to the end user.
    pub message: String,
    /// Provider-suggested wait before the next attempt, if it sent one.
    pub retry_after: Option<Duration>,
}

impl ProviderFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Failure carrying the kind's stock user-facing message.
    pub fn of_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind.user_message())
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Performs the image-to-image transformation.
///
/// From the core's point of view a call is synchronous and bounded by
/// `timeout`. Implementations should honour `timeout` themselves; the
/// dispatcher also enforces it externally and reports
/// [`ErrorKind::ProviderTimeout`] when it fires.
#[async_trait]
pub trait TransformProvider: Send + Sync {
    /// Transform `source` into the requested `style`, returning the result
    /// image bytes.
    async fn transform(
        &self,
        source: &[u8],
        style: Style,
        timeout: Duration,
    ) -> Result<Vec<u8>, ProviderFailure>;
}

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable failure classification carried by failed jobs and used by the
/// retry policy.
///
/// `NotFound`, `Conflict` and `Expired` are control-flow signals for
/// store races; the dispatcher and janitor absorb them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad image or style. Never retried.
    InvalidInput,
    /// Provider or local quota exhausted.
    RateLimited,
    /// Provider call exceeded its wall-clock timeout.
    ProviderTimeout,
    /// 5xx-equivalent or network failure.
    ProviderTransient,
    /// Content-policy or malformed-request rejection. Never retried.
    ProviderPermanent,
    /// Artifact store read/write failure.
    StorageUnavailable,
    NotFound,
    Conflict,
    Expired,
}

impl ErrorKind {
    /// Whether a failure of this kind is worth retrying.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::ProviderTimeout
                | Self::ProviderTransient
                | Self::StorageUnavailable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::RateLimited => "rate_limited",
            Self::ProviderTimeout => "provider_timeout",
            Self::ProviderTransient => "provider_transient",
            Self::ProviderPermanent => "provider_permanent",
            Self::StorageUnavailable => "storage_unavailable",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Expired => "expired",
        }
    }

    /// Message safe to show an end user when a job fails with this kind.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::InvalidInput => "The uploaded image could not be processed.",
            Self::RateLimited => "The generation service is busy. Please try again later.",
            Self::ProviderTimeout => "The generation service took too long to respond.",
            Self::ProviderTransient => "The generation service is temporarily unavailable.",
            Self::ProviderPermanent => "The generation service rejected this image.",
            Self::StorageUnavailable => "Image storage is temporarily unavailable.",
            Self::NotFound => "The requested item was not found.",
            Self::Conflict => "The request conflicts with the current job state.",
            Self::Expired => "This job has expired.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

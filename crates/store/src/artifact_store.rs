//! Content-addressed, time-bounded blob storage.
//!
//! Artifacts are immutable once written. Readers get a cheap handle to the
//! shared bytes; nothing is copied out of the store. Expiry is enforced two
//! ways: reads of an artifact past `expires_at` fail with
//! [`ArtifactError::Expired`], and [`ArtifactStore::purge_expired`] (run by
//! the janitor) drops the bytes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use headshot_core::error::ErrorKind;
use headshot_core::hashing::fingerprint;
use headshot_core::types::{ArtifactRef, Timestamp};
use tokio::sync::RwLock;

/// Default upper bound on bytes held by [`InMemoryArtifactStore`] (2 GiB).
pub const DEFAULT_MAX_TOTAL_BYTES: usize = 2 * 1024 * 1024 * 1024;

/// A stored blob and its metadata.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub reference: ArtifactRef,
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
    pub size: usize,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Errors from artifact store operations.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact {0} not found")]
    NotFound(ArtifactRef),

    #[error("Artifact {0} has expired")]
    Expired(ArtifactRef),

    /// Read or write failed; worth retrying.
    #[error("Artifact store unavailable: {0}")]
    Unavailable(String),
}

impl ArtifactError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Expired(_) => ErrorKind::Expired,
            Self::Unavailable(_) => ErrorKind::StorageUnavailable,
        }
    }
}

/// Storage for source and result images.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` for `ttl`. Identical bytes map to the same reference;
    /// storing them again keeps the later of the two expiry times.
    async fn put(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        ttl: Duration,
    ) -> Result<ArtifactRef, ArtifactError>;

    async fn get(&self, reference: &ArtifactRef) -> Result<Artifact, ArtifactError>;

    /// Push expiry out to at least `now + ttl`. Never shortens it.
    async fn extend_ttl(&self, reference: &ArtifactRef, ttl: Duration)
        -> Result<(), ArtifactError>;

    /// Drop every artifact whose `expires_at` is at or before `now`.
    /// Returns how many were dropped.
    async fn purge_expired(&self, now: Timestamp) -> Result<usize, ArtifactError>;
}

fn expiry_after(ttl: Duration) -> Result<Timestamp, ArtifactError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| ArtifactError::Unavailable(format!("TTL out of range: {ttl:?}")))
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BlobTable {
    blobs: HashMap<ArtifactRef, Artifact>,
    total_bytes: usize,
}

/// Process-local [`ArtifactStore`] with a total size bound.
pub struct InMemoryArtifactStore {
    table: RwLock<BlobTable>,
    max_total_bytes: usize,
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOTAL_BYTES)
    }
}

impl InMemoryArtifactStore {
    /// Create a store holding at most `max_total_bytes`. Writes beyond the
    /// bound fail with [`ArtifactError::Unavailable`] until the janitor
    /// frees space.
    pub fn new(max_total_bytes: usize) -> Self {
        Self {
            table: RwLock::new(BlobTable::default()),
            max_total_bytes,
        }
    }

    /// Number of artifacts currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.table.read().await.blobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn total_bytes(&self) -> usize {
        self.table.read().await.total_bytes
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        ttl: Duration,
    ) -> Result<ArtifactRef, ArtifactError> {
        let reference = fingerprint(&bytes);
        let expires_at = expiry_after(ttl)?;
        let size = bytes.len();

        let mut table = self.table.write().await;
        if let Some(existing) = table.blobs.get_mut(&reference) {
            existing.expires_at = existing.expires_at.max(expires_at);
            return Ok(reference);
        }

        if table.total_bytes.saturating_add(size) > self.max_total_bytes {
            return Err(ArtifactError::Unavailable(format!(
                "capacity of {} bytes exhausted",
                self.max_total_bytes
            )));
        }

        table.total_bytes += size;
        table.blobs.insert(
            reference.clone(),
            Artifact {
                reference: reference.clone(),
                bytes: Arc::from(bytes),
                mime_type: mime_type.to_string(),
                size,
                created_at: Utc::now(),
                expires_at,
            },
        );
        Ok(reference)
    }

    async fn get(&self, reference: &ArtifactRef) -> Result<Artifact, ArtifactError> {
        let table = self.table.read().await;
        let artifact = table
            .blobs
            .get(reference)
            .ok_or_else(|| ArtifactError::NotFound(reference.clone()))?;
        if artifact.expires_at <= Utc::now() {
            return Err(ArtifactError::Expired(reference.clone()));
        }
        Ok(artifact.clone())
    }

    async fn extend_ttl(
        &self,
        reference: &ArtifactRef,
        ttl: Duration,
    ) -> Result<(), ArtifactError> {
        let expires_at = expiry_after(ttl)?;
        let mut table = self.table.write().await;
        let artifact = table
            .blobs
            .get_mut(reference)
            .ok_or_else(|| ArtifactError::NotFound(reference.clone()))?;
        artifact.expires_at = artifact.expires_at.max(expires_at);
        Ok(())
    }

    async fn purge_expired(&self, now: Timestamp) -> Result<usize, ArtifactError> {
        let mut table = self.table.write().await;
        let mut freed = 0usize;
        let before = table.blobs.len();
        table.blobs.retain(|_, a| {
            let keep = a.expires_at > now;
            if !keep {
                freed += a.size;
            }
            keep
        });
        table.total_bytes -= freed;
        let purged = before - table.blobs.len();
        if purged > 0 {
            tracing::debug!(purged, freed_bytes = freed, "Expired artifacts dropped");
        }
        Ok(purged)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

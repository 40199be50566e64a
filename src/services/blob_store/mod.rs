//! Blob storage abstraction used by the caption worker.
//!
//! The worker only needs a narrow slice of a container API: prefix listing,
//! whole-object reads and writes, server-side copy, lease management and a
//! lease-authorized delete. `BlobStore` captures exactly that slice so the
//! processing logic can run against Azure in production and against an
//! in-memory container in tests.

pub mod azure;
pub mod connection_string;
#[cfg(test)]
pub mod memory;

use crate::models::lease::Lease;
use async_trait::async_trait;
use bytes::Bytes;
use std::{future::Future, time::Duration};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("blob `{0}` is already leased")]
    LeaseConflict(String),
    #[error("lease on blob `{0}` is missing, expired, or held by someone else")]
    LeaseMismatch(String),
    #[error("storage service returned HTTP {status} during {operation}: {body}")]
    Service {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("storage request failed during {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid storage credentials: {0}")]
    Credentials(String),
    #[error("malformed storage response during {operation}: {reason}")]
    Malformed {
        operation: &'static str,
        reason: String,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Operations the worker performs against a single container.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Names beginning with `prefix`, in service order, at most `limit` of them.
    async fn list_blobs(&self, prefix: &str, limit: usize) -> StorageResult<Vec<String>>;

    /// Full content of a blob.
    async fn download(&self, name: &str) -> StorageResult<Bytes>;

    /// Take an exclusive lease that the service expires after `duration`.
    async fn acquire_lease(&self, name: &str, duration: Duration) -> StorageResult<Lease>;

    async fn release_lease(&self, lease: &Lease) -> StorageResult<()>;

    /// Create or overwrite a blob.
    async fn upload(&self, name: &str, content_type: &str, data: Bytes) -> StorageResult<()>;

    /// Address of a blob as understood by `copy_from_url`.
    fn blob_url(&self, name: &str) -> String;

    /// Server-side copy of `source_url` into `dest_name`.
    async fn copy_from_url(&self, source_url: &str, dest_name: &str) -> StorageResult<()>;

    /// Delete a blob, and its snapshots when `include_snapshots` is set.
    /// A held lease must be presented while one is active.
    async fn delete(
        &self,
        name: &str,
        include_snapshots: bool,
        lease: Option<&Lease>,
    ) -> StorageResult<()>;
}

/// Percent-encoding set for blob names: everything except unreserved
/// characters and `/`.
pub const BLOB_NAME_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Encode a blob name for use as a URL path.
pub fn encode_blob_name(name: &str) -> String {
    percent_encoding::utf8_percent_encode(name, &BLOB_NAME_ENCODE_SET).to_string()
}

/// Run `body` while holding a lease on `name`.
///
/// The lease is released after `body` completes, whatever its outcome.
/// Release failures are logged at debug level and never surface: the lease
/// expires on its own, and a release that fails because the blob was just
/// deleted is the normal end of a successful pass.
pub async fn with_lease<T, E, F, Fut>(
    store: &dyn BlobStore,
    name: &str,
    duration: Duration,
    body: F,
) -> Result<T, E>
where
    F: FnOnce(Lease) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<StorageError>,
{
    let lease = store.acquire_lease(name, duration).await?;
    let outcome = body(lease.clone()).await;

    if let Err(err) = store.release_lease(&lease).await {
        debug!(blob = %name, error = %err, "lease release failed; letting it expire");
    }

    outcome
}

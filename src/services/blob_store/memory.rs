//! In-memory `BlobStore` used by tests.
//!
//! Mirrors the parts of blob-service behaviour the worker depends on:
//! lexicographic listing, exclusive leases that expire, lease-authorized
//! deletes, and a 404 when releasing the lease of a deleted blob. Individual
//! operations can be made to fail to exercise error paths.

use super::{BlobStore, StorageError, StorageResult};
use crate::models::lease::Lease;
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use uuid::Uuid;

const URL_BASE: &str = "memory://container/";

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: String,
    lease: Option<ActiveLease>,
}

#[derive(Debug, Clone)]
struct ActiveLease {
    id: String,
    expires_at: Instant,
}

impl StoredBlob {
    fn active_lease(&self) -> Option<&ActiveLease> {
        self.lease
            .as_ref()
            .filter(|lease| lease.expires_at > Instant::now())
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, StoredBlob>>,
    releases: Mutex<Vec<String>>,
    failing_uploads: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
    fail_releases: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, content_type: &str, data: impl Into<Bytes>) {
        self.blobs().insert(
            name.to_string(),
            StoredBlob {
                data: data.into(),
                content_type: content_type.to_string(),
                lease: None,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<StoredBlob> {
        self.blobs().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blobs().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.blobs().keys().cloned().collect()
    }

    pub fn is_leased(&self, name: &str) -> bool {
        self.blobs()
            .get(name)
            .is_some_and(|blob| blob.active_lease().is_some())
    }

    /// Lease a blob on behalf of some other worker.
    pub fn lease_externally(&self, name: &str, duration: Duration) {
        if let Some(blob) = self.blobs().get_mut(name) {
            blob.lease = Some(ActiveLease {
                id: Uuid::new_v4().to_string(),
                expires_at: Instant::now() + duration,
            });
        }
    }

    /// Blob names passed to `release_lease`, in call order.
    pub fn releases(&self) -> Vec<String> {
        lock(&self.releases).clone()
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_releases(&self, fail: bool) {
        self.fail_releases.store(fail, Ordering::SeqCst);
    }

    pub fn fail_uploads_to(&self, name: &str) {
        lock(&self.failing_uploads).insert(name.to_string());
    }

    fn blobs(&self) -> MutexGuard<'_, BTreeMap<String, StoredBlob>> {
        lock(&self.blobs)
    }

    fn injected(operation: &'static str) -> StorageError {
        StorageError::Service {
            operation,
            status: 500,
            body: "injected failure".into(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list_blobs(&self, prefix: &str, limit: usize) -> StorageResult<Vec<String>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Self::injected("list_blobs"));
        }
        Ok(self
            .blobs()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn download(&self, name: &str) -> StorageResult<Bytes> {
        self.blobs()
            .get(name)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn acquire_lease(&self, name: &str, duration: Duration) -> StorageResult<Lease> {
        let mut blobs = self.blobs();
        let blob = blobs
            .get_mut(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        if blob.active_lease().is_some() {
            return Err(StorageError::LeaseConflict(name.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        blob.lease = Some(ActiveLease {
            id: id.clone(),
            expires_at: Instant::now() + duration,
        });
        Ok(Lease {
            blob_name: name.to_string(),
            lease_id: id,
            duration,
        })
    }

    async fn release_lease(&self, lease: &Lease) -> StorageResult<()> {
        lock(&self.releases).push(lease.blob_name.clone());
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(Self::injected("release_lease"));
        }

        let mut blobs = self.blobs();
        let blob = blobs
            .get_mut(&lease.blob_name)
            .ok_or_else(|| StorageError::NotFound(lease.blob_name.clone()))?;
        match &blob.lease {
            Some(active) if active.id == lease.lease_id => {
                blob.lease = None;
                Ok(())
            }
            _ => Err(StorageError::LeaseMismatch(lease.blob_name.clone())),
        }
    }

    async fn upload(&self, name: &str, content_type: &str, data: Bytes) -> StorageResult<()> {
        if lock(&self.failing_uploads).contains(name) {
            return Err(Self::injected("upload"));
        }
        let mut blobs = self.blobs();
        if blobs.get(name).is_some_and(|blob| blob.active_lease().is_some()) {
            return Err(StorageError::LeaseMismatch(name.to_string()));
        }
        blobs.insert(
            name.to_string(),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
                lease: None,
            },
        );
        Ok(())
    }

    fn blob_url(&self, name: &str) -> String {
        format!("{}{}", URL_BASE, name)
    }

    async fn copy_from_url(&self, source_url: &str, dest_name: &str) -> StorageResult<()> {
        let source = source_url
            .strip_prefix(URL_BASE)
            .ok_or_else(|| StorageError::NotFound(source_url.to_string()))?;
        let mut blobs = self.blobs();
        let copied = blobs
            .get(source)
            .map(|blob| StoredBlob {
                data: blob.data.clone(),
                content_type: blob.content_type.clone(),
                lease: None,
            })
            .ok_or_else(|| StorageError::NotFound(source.to_string()))?;
        blobs.insert(dest_name.to_string(), copied);
        Ok(())
    }

    async fn delete(
        &self,
        name: &str,
        _include_snapshots: bool,
        lease: Option<&Lease>,
    ) -> StorageResult<()> {
        let mut blobs = self.blobs();
        let blob = blobs
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        if let Some(active) = blob.active_lease() {
            if lease.map(|l| l.lease_id.as_str()) != Some(active.id.as_str()) {
                return Err(StorageError::LeaseMismatch(name.to_string()));
            }
        }
        blobs.remove(name);
        Ok(())
    }
}

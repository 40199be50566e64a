//! Represents an exclusive, time-boxed lease on a single blob.

use std::time::Duration;

/// A lease currently held by this worker.
///
/// The storage service expires the lease after `duration` even if it is
/// never released, so a crashed worker cannot block a blob indefinitely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lease {
    /// Blob the lease is scoped to.
    pub blob_name: String,

    /// Opaque token presented to authorize writes and the final release.
    pub lease_id: String,

    /// Server-side expiry window requested at acquisition.
    pub duration: Duration,
}

//! Snapshot of the worker's process-wide counters.

use serde::{Deserialize, Serialize};

/// Counters served by `GET /stats`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Blobs that completed the full caption-and-archive pass.
    pub processed: u64,

    /// Failures counted by the polling loop, per blob or per discovery.
    pub errors: u64,

    /// Description of the most recent failure, if any.
    pub last_error: Option<String>,
}

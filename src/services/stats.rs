//! Process statistics shared between the polling loop and the HTTP layer.

use crate::models::stats::StatsSnapshot;
use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// Mutex-guarded counters.
///
/// The worker is the only writer; status handlers take snapshots. A poisoned
/// lock is recovered rather than propagated since the counters stay valid
/// after any panic.
#[derive(Debug, Default)]
pub struct ProcessStats {
    inner: Mutex<StatsSnapshot>,
}

impl ProcessStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one fully processed blob.
    pub fn record_success(&self) {
        self.lock().processed += 1;
    }

    /// Count one failure and remember its description.
    pub fn record_error(&self, err: &dyn fmt::Display) {
        let mut stats = self.lock();
        stats.errors += 1;
        stats.last_error = Some(err.to_string());
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, StatsSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

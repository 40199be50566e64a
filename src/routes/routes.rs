//! Status routes served next to the caption worker.
//!
//! - `GET /healthz` - liveness, plain-text `ok`
//! - `GET /stats`   - `{"processed", "errors", "last_error"}` as JSON

use crate::{
    handlers::{health_handlers::healthz, stats_handlers::get_stats},
    services::stats::ProcessStats,
};
use axum::{Router, routing::get};
use std::sync::Arc;

/// Build the status router. Handlers share the worker's counters.
pub fn routes() -> Router<Arc<ProcessStats>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stats", get(get_stats))
}

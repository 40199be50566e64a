use crate::{models::stats::StatsSnapshot, services::stats::ProcessStats};
use axum::{Json, extract::State};
use std::sync::Arc;

/// `GET /stats`
///
/// Current processing counters and the most recent error message.
pub async fn get_stats(State(stats): State<Arc<ProcessStats>>) -> Json<StatsSnapshot> {
    Json(stats.snapshot())
}

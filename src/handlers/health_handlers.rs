//! Liveness handler.
//!
//! - GET /healthz -> plain-text "ok"

use axum::{http::StatusCode, response::IntoResponse};

/// `GET /healthz`
///
/// Always 200 and never touches storage.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

//! Liveness endpoint.

use axum::Json;

use crate::models::HealthResponse;

/// Liveness check. Does not contact Microsoft 365.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Service is running", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

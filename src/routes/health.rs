//! Lightweight service health endpoint used for readiness checks and tests.

use crate::models::{ApiResponse, HealthStatus};
use rocket::serde::json::Json;
use rocket_okapi::openapi;

/// Health check endpoint returning a trivial JSON payload.
#[openapi(tag = "Health")]
#[get("/health")]
pub fn health_check() -> Json<ApiResponse<HealthStatus>> {
    Json(ApiResponse::success(HealthStatus {
        status: "ok".to_string(),
    }))
}

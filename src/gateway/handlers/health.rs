//! Health check handler

use std::sync::Arc;

use axum::{Json, extract::State};
use serde::Serialize;

use super::super::state::AppState;
use super::super::types::ApiResponse;

/// Health check response data
#[derive(Serialize)]
pub struct HealthResponse {
    /// Engine time in milliseconds
    pub timestamp_ms: i64,
    pub active_flows: usize,
}

/// GET /api/v1/health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(HealthResponse {
        timestamp_ms: state.funds.now().timestamp_millis(),
        active_flows: state.funds.active_flows(),
    }))
}

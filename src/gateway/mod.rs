//! HTTP Gateway
//!
//! JSON endpoints over [`FundsService`](crate::service::FundsService), all
//! nested under `/api/v1` and answering with the [`types::ApiResponse`]
//! envelope.

pub mod handlers;
pub mod state;
pub mod types;

#[cfg(test)]
mod integration_tests;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post, put},
};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::GatewayConfig;
use state::AppState;
use types::ApiResponse;

async fn not_found() -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error(404, "not found")),
    )
}

/// Build the gateway router
pub fn router(state: Arc<AppState>) -> Router {
    let transfer_routes = Router::new()
        .route("/", post(handlers::begin_transfer))
        .route("/execute", post(handlers::execute_transfer))
        .route(
            "/{handle}",
            get(handlers::get_transfer).delete(handlers::cancel_transfer),
        )
        .route("/{handle}/destination", put(handlers::edit_destination))
        .route("/{handle}/amount", put(handlers::set_transfer_amount))
        .route("/{handle}/authorize", post(handlers::authorize_transfer))
        .route("/{handle}/submit", post(handlers::submit_transfer))
        .route("/{handle}/retry", post(handlers::retry_authorization));

    let atm_routes = Router::new()
        .route("/codes", post(handlers::generate_atm_code))
        .route("/codes/{account_id}", get(handlers::get_atm_code))
        .route(
            "/codes/{account_id}/countdown",
            get(handlers::atm_code_countdown),
        )
        .route("/codes/{account_id}/redeem", post(handlers::redeem_atm_code));

    let api = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/recipients/resolve", post(handlers::resolve_recipient))
        .route("/submissions/{key}", get(handlers::get_submission))
        .nest("/transfers", transfer_routes)
        .nest("/atm", atm_routes);

    Router::new()
        .nest("/api/v1", api)
        .fallback(not_found)
        .with_state(state)
}

/// Start HTTP Gateway server
pub async fn run_server(config: &GatewayConfig, state: Arc<AppState>) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(%addr, "Gateway listening");
    info!("Transfers: /api/v1/transfers/*");
    info!("ATM codes: /api/v1/atm/codes/*");

    axum::serve(listener, router(state)).await
}

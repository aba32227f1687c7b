//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: ledger, token codec and protocol wiring
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and body validation
//! - `errors.rs`: consistent error responses

use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Router, error_handling::HandleErrorLayer, http::StatusCode, routing::get};
use tower::{BoxError, ServiceBuilder};

use crate::config::AppConfig;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router from configuration (used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> Result<Router, services::StartupError> {
    let services = services::build_services(config).await?;
    Ok(router(Arc::new(services), config.request_timeout))
}

/// Router over already wired services.
pub fn router(services: Arc<AppServices>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router(&services))
        .layer(Extension(services))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(request_timeout),
        )
}

async fn handle_middleware_error(err: BoxError) -> errors::ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        tracing::warn!("request timed out");
        errors::ApiError::new(StatusCode::REQUEST_TIMEOUT, "Request timed out.")
    } else {
        tracing::error!(error = %err, "middleware failure");
        errors::ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
    }
}

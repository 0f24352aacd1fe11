pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod utils;
pub mod validation;
pub mod webhook;

use axum::{
    routing::{get, post},
    Router,
};

use crate::error::{ApiError, PaymentError};
use crate::services::{PaymentService, WebhookService};

#[derive(Clone)]
pub struct AppState {
    pub payments: PaymentService,
    pub webhooks: WebhookService,
    /// Present when transactions live in Postgres; probed by `/health`.
    pub db: Option<sqlx::PgPool>,
    pub debug_mode: bool,
    /// Log sanitized request bodies on the merchant API.
    pub log_request_body: bool,
}

impl AppState {
    pub fn api_error(&self, error: PaymentError) -> ApiError {
        ApiError::new(error, self.debug_mode)
    }
}

/// Merchant-facing API: charge, query and refund.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/payments", post(handlers::payments::create_payment))
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route("/payments/:id/refunds", post(handlers::payments::refund_payment))
        .layer(axum::middleware::from_fn_with_state(
            middleware::RequestLogging {
                log_body: state.log_request_body,
            },
            middleware::request_logger_middleware,
        ))
        .with_state(state)
}

/// Provider-facing webhook receiver, served on its own port.
///
/// Signed payloads are never buffered for logging.
pub fn webhook_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/payments/:provider/events",
            post(handlers::webhook::receive_event),
        )
        .layer(axum::middleware::from_fn_with_state(
            middleware::RequestLogging::default(),
            middleware::request_logger_middleware,
        ))
        .with_state(state)
}

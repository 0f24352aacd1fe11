use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::ports::StoreError;

/// Stable machine-readable error classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InternalServerError,
    InvalidRequest,
    ResourceNotFound,
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("invalid amount")]
    InvalidAmount,

    #[error("missing currency")]
    MissingCurrency,

    #[error("missing payment method")]
    MissingPaymentMethod,

    #[error("missing transaction ID")]
    MissingTransactionId,

    #[error("malformed request body: {0}")]
    MalformedRequest(String),

    #[error("missing charge ID")]
    MissingChargeHandle,

    #[error("charge already refunded")]
    ChargeAlreadyRefunded,

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("unsupported event: {0}")]
    UnsupportedEvent(String),

    #[error("event verification failed: {0}")]
    EventVerificationFailed(String),

    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    #[error("concurrent update on transaction {0} did not settle")]
    UpdateConflict(String),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for PaymentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => PaymentError::TransactionNotFound(id),
            other => PaymentError::Store(other),
        }
    }
}

impl PaymentError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PaymentError::InvalidAmount
            | PaymentError::MissingCurrency
            | PaymentError::MissingPaymentMethod
            | PaymentError::MissingTransactionId
            | PaymentError::MalformedRequest(_)
            | PaymentError::ChargeAlreadyRefunded
            | PaymentError::UnsupportedProvider(_)
            | PaymentError::UnsupportedEvent(_)
            | PaymentError::EventVerificationFailed(_) => ErrorCode::InvalidRequest,
            PaymentError::TransactionNotFound(_) => ErrorCode::ResourceNotFound,
            PaymentError::MissingChargeHandle
            | PaymentError::UpdateConflict(_)
            | PaymentError::Gateway(_)
            | PaymentError::Store(_) => ErrorCode::InternalServerError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.code() {
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
            ErrorCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.code() != ErrorCode::InternalServerError
    }

    /// Builds the caller-facing envelope. Internal details are only included
    /// when `debug` is set.
    pub fn envelope(&self, debug: bool) -> ErrorEnvelope {
        let message = match self {
            PaymentError::TransactionNotFound(id) => format!("Resource '{}' not found", id),
            e if e.code() == ErrorCode::InvalidRequest => format!("Invalid request: {}", e),
            e if debug => format!("Internal server error: {}", e),
            _ => "Internal server error".to_string(),
        };

        ErrorEnvelope {
            code: self.code(),
            status_code: self.status_code().as_u16(),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: ErrorCode,
    pub status_code: u16,
    pub message: String,
}

/// A `PaymentError` paired with the response-rendering mode.
#[derive(Debug)]
pub struct ApiError {
    pub error: PaymentError,
    pub debug: bool,
}

impl ApiError {
    pub fn new(error: PaymentError, debug: bool) -> Self {
        Self { error, debug }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if !self.error.is_client_error() {
            tracing::error!(error = %self.error, "request failed");
        }

        let envelope = self.error.envelope(self.debug);
        let status = self.error.status_code();
        (status, Json(envelope)).into_response()
    }
}

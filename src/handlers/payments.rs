use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

use crate::error::{ApiError, PaymentError};
use crate::validation::ChargeRequest;
use crate::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChargeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) =
        payload.map_err(|e| state.api_error(PaymentError::MalformedRequest(e.body_text())))?;
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let tx = state
        .payments
        .charge_with_key(request, idempotency_key)
        .await
        .map_err(|e| state.api_error(e))?;

    Ok((StatusCode::CREATED, Json(tx)))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tx = state
        .payments
        .query(&transaction_id)
        .await
        .map_err(|e| state.api_error(e))?;

    Ok(Json(tx))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tx = state
        .payments
        .refund(&transaction_id)
        .await
        .map_err(|e| state.api_error(e))?;

    Ok(Json(tx))
}

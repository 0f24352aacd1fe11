use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};

use crate::error::ApiError;
use crate::services::WebhookReceipt;
use crate::AppState;

/// Receives a provider event delivery. The body is taken raw because the
/// signature covers the exact bytes sent.
pub async fn receive_event(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookReceipt>, ApiError> {
    let header = state
        .webhooks
        .signature_header(&provider)
        .map_err(|e| state.api_error(e))?;
    let signature = headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let receipt = state
        .webhooks
        .handle(&provider, &body, signature)
        .await
        .map_err(|e| state.api_error(e))?;

    Ok(Json(receipt))
}

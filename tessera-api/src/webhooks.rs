use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    pub payment_reference: String,
    pub gateway_transaction_id: String,
    pub status: String,
}

/// POST /v1/webhooks/payments
/// Receive payment status updates from the gateway
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<PaymentWebhook>,
) -> Result<StatusCode, StatusCode> {
    tracing::info!(
        "Received webhook: {} for payment {}",
        payload.status,
        payload.payment_reference
    );

    let success = match payload.status.as_str() {
        "COMPLETED" => true,
        "FAILED" => false,
        other => {
            tracing::warn!("Ignoring webhook with unknown status {}", other);
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    state
        .payments
        .complete(&payload.payment_reference, &payload.gateway_transaction_id, success)
        .await
        .map_err(|err| {
            tracing::warn!("Webhook processing failed: {}", err);
            match err {
                tessera_core::CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                tessera_core::CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        })?;

    Ok(StatusCode::OK)
}

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use tessera_domain::{Payment, PaymentMethod};

use crate::{error::ApiError, middleware::auth::UserClaims, state::AppState};

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub booking_id: Uuid,
    pub method: PaymentMethod,
    /// Provider-specific fields (card token etc.), passed through to the
    /// gateway untouched.
    #[serde(default)]
    pub details: HashMap<String, String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments", post(initiate_payment))
        // Same param name as the refund route below; matchit requires it.
        .route("/v1/payments/{id}", get(get_payment))
        .route("/v1/payments/{id}/refund", post(refund_payment))
}

async fn initiate_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), ApiError> {
    let payment = state
        .payments
        .initiate(&claims.sub, payload.booking_id, payload.method, &payload.details)
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

async fn get_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Path(reference): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let payment = state.payments.get_by_reference(&claims.sub, &reference).await?;
    Ok(Json(payment))
}

async fn refund_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, ApiError> {
    let payment = state.payments.refund(&claims.sub, id).await?;
    Ok(Json(payment))
}

//! Payment webhook relay to the on-chain oracle

use alloy::primitives::U256;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::str::FromStr;
use tracing::{error, info, warn};

use super::{payment_error, ApiError};
use crate::models::error::ApiErrorResponse;
use crate::models::payment::{
    ExecutePaymentResponse, PaymentStatus, SubmitPaymentRequest, SubmitPaymentResponse,
};
use crate::services::payment_confirmation::PaymentError;
use crate::AppState;

/// POST /payments
///
/// Returns 200 with the oracle payment id, or 202 with `paymentId: null`
/// when the submission landed but its id could not be decoded.
pub async fn submit_payment(
    State(state): State<AppState>,
    Json(request): Json<SubmitPaymentRequest>,
) -> Result<(StatusCode, Json<SubmitPaymentResponse>), ApiError> {
    info!(
        loan_id = request.loan_id,
        amount = %request.amount,
        proof_ref = %request.proof_ref,
        "Payment notification received"
    );

    match state
        .payments
        .submit_payment(request.loan_id, request.amount, &request.proof_ref)
        .await
    {
        Ok(submitted) => Ok((
            StatusCode::OK,
            Json(SubmitPaymentResponse {
                tx_hash: submitted.tx_hash,
                payment_id: Some(submitted.payment_id.to_string()),
                status: PaymentStatus::Submitted,
            }),
        )),
        Err(PaymentError::PaymentIdUnknown { tx_hash, .. }) => {
            warn!(tx_hash = %tx_hash, "Payment accepted without a payment id");
            Ok((
                StatusCode::ACCEPTED,
                Json(SubmitPaymentResponse {
                    tx_hash,
                    payment_id: None,
                    status: PaymentStatus::IdUnknown,
                }),
            ))
        }
        Err(e) => {
            error!(loan_id = request.loan_id, error = %e, "Payment submission failed");
            Err(payment_error(&e))
        }
    }
}

/// POST /payments/{payment_id}/execute
pub async fn execute_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<ExecutePaymentResponse>, ApiError> {
    let payment_id = U256::from_str(payment_id.trim()).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiErrorResponse::new(
                "VALIDATION_INVALID_PAYMENT_ID",
                format!("invalid payment id: {}", payment_id),
            )),
        )
    })?;

    let tx_hash = state
        .payments
        .execute_payment(payment_id)
        .await
        .map_err(|e| {
            error!(payment_id = %payment_id, error = %e, "Payment execution failed");
            payment_error(&e)
        })?;

    Ok(Json(ExecutePaymentResponse { tx_hash }))
}

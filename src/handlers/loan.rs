//! Loan origination, activation and read endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info};

use super::auth::CallerId;
use super::{orchestration_error, repository_error, validation_error, ApiError};
use crate::error::{OrchestrationError, ValidationError};
use crate::models::attempt::{AttemptResponse, Flow};
use crate::models::loan::{
    ActivateLoanResponse, ConfirmRepaymentRequest, CreateLoanRequest, CreateLoanResponse,
    LoanResponse,
};
use crate::AppState;

fn log_failure(operation: &str, err: &OrchestrationError) {
    match err {
        OrchestrationError::Validation(e) => info!(operation, error = %e, "Request rejected"),
        other => error!(operation, error = %other, "Request failed"),
    }
}

/// POST /loans
///
/// Mints the collateral NFT, approves it to the pool and creates the pool
/// loan. A failure names the step and any on-chain artifacts created so far.
pub async fn create_loan(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(request): Json<CreateLoanRequest>,
) -> Result<(StatusCode, Json<CreateLoanResponse>), ApiError> {
    let origination = state
        .loans
        .create_loan(request.document_id, user_id)
        .await
        .map_err(|e| {
            log_failure("create_loan", &e);
            orchestration_error(&e)
        })?;

    Ok((
        StatusCode::CREATED,
        Json(CreateLoanResponse::new(&origination.loan, origination.attempt_id)),
    ))
}

/// POST /loans/{id}/activate
pub async fn activate_loan(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(loan_id): Path<i32>,
) -> Result<Json<ActivateLoanResponse>, ApiError> {
    let activation = state
        .loans
        .activate_loan(loan_id, user_id)
        .await
        .map_err(|e| {
            log_failure("activate_loan", &e);
            orchestration_error(&e)
        })?;

    Ok(Json(ActivateLoanResponse {
        loan_id: activation.loan.id,
        activate_tx_hash: activation.activate_tx_hash,
        transfer_tx_hash: activation.transfer_tx_hash,
        net_amount: activation.net_amount,
        status: activation.loan.status,
    }))
}

/// POST /loans/{id}/confirm-repayment
pub async fn confirm_repayment(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(loan_id): Path<i32>,
    Json(request): Json<ConfirmRepaymentRequest>,
) -> Result<Json<LoanResponse>, ApiError> {
    let loan = state
        .loans
        .confirm_repayment(loan_id, user_id, &request.tx_hash)
        .await
        .map_err(|e| {
            log_failure("confirm_repayment", &e);
            orchestration_error(&e)
        })?;

    Ok(Json(LoanResponse::from(loan)))
}

/// GET /loans/{id}
pub async fn get_loan(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(loan_id): Path<i32>,
) -> Result<Json<LoanResponse>, ApiError> {
    let loan = state
        .repo
        .find_loan(loan_id)
        .await
        .map_err(|e| repository_error(&e))?
        .filter(|l| l.user_id == user_id)
        .ok_or_else(|| validation_error(&ValidationError::LoanNotFound(loan_id)))?;

    Ok(Json(LoanResponse::from(loan)))
}

/// GET /loans
pub async fn list_loans(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<Json<Vec<LoanResponse>>, ApiError> {
    let loans = state
        .repo
        .list_loans_for_user(user_id)
        .await
        .map_err(|e| repository_error(&e))?;

    Ok(Json(loans.into_iter().map(LoanResponse::from).collect()))
}

/// GET /loans/attempts
///
/// Origination attempts for the caller's documents, with their step logs.
pub async fn list_attempts(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<Json<Vec<AttemptResponse>>, ApiError> {
    let attempts = state
        .repo
        .list_attempts_for_user(user_id)
        .await
        .map_err(|e| repository_error(&e))?;

    let mut response = Vec::with_capacity(attempts.len());
    for attempt in attempts {
        let steps = state
            .repo
            .list_steps(Flow::Origination, &attempt.id)
            .await
            .map_err(|e| repository_error(&e))?;
        response.push(AttemptResponse::new(attempt, steps));
    }

    Ok(Json(response))
}

/// POST /loans/attempts/{id}/resume
pub async fn resume_attempt(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(attempt_id): Path<String>,
) -> Result<(StatusCode, Json<CreateLoanResponse>), ApiError> {
    let origination = state
        .loans
        .resume_attempt(&attempt_id, Some(user_id))
        .await
        .map_err(|e| {
            log_failure("resume_attempt", &e);
            orchestration_error(&e)
        })?;

    Ok((
        StatusCode::CREATED,
        Json(CreateLoanResponse::new(&origination.loan, origination.attempt_id)),
    ))
}

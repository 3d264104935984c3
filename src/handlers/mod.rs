//! HTTP handlers and the mapping from service errors to responses

use axum::{http::StatusCode, Json};
use tracing::error;

use crate::error::{OrchestrationError, ValidationError};
use crate::models::attempt::Step;
use crate::models::error::ApiErrorResponse;
use crate::services::payment_confirmation::PaymentError;
use crate::services::repository::RepositoryError;
use crate::services::step_executor::StepError;
use crate::services::wallet_link::WalletLinkError;

pub mod auth;
pub mod document;
pub mod loan;
pub mod payment;
pub mod wallet;

pub type ApiError = (StatusCode, Json<ApiErrorResponse>);

fn api_error(status: StatusCode, body: ApiErrorResponse) -> ApiError {
    (status, Json(body))
}

pub fn validation_error(err: &ValidationError) -> ApiError {
    let status = match err {
        ValidationError::UnknownUser(_)
        | ValidationError::DocumentNotFound(_)
        | ValidationError::LoanNotFound(_)
        | ValidationError::AttemptNotFound(_) => StatusCode::NOT_FOUND,
        ValidationError::DocumentAlreadyLoaned(_)
        | ValidationError::OriginationInProgress(_)
        | ValidationError::ActivationInProgress(_) => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    };
    api_error(status, ApiErrorResponse::new(err.code(), err.to_string()))
}

pub fn repository_error(err: &RepositoryError) -> ApiError {
    match err {
        RepositoryError::Conflict(msg) => {
            api_error(StatusCode::CONFLICT, ApiErrorResponse::new("CONFLICT", msg.clone()))
        }
        RepositoryError::NotFound(msg) => {
            api_error(StatusCode::NOT_FOUND, ApiErrorResponse::new("NOT_FOUND", msg.clone()))
        }
        RepositoryError::Database(e) => {
            error!(error = %e, "Database error");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorResponse::new("DATABASE", format!("Database error: {}", e)),
            )
        }
    }
}

fn step_error(err: &StepError) -> ApiError {
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        ApiErrorResponse::new(err.code(), err.to_string())
            .with_step(err.step)
            .with_tx_hash(err.tx_hash().map(str::to_string)),
    )
}

pub fn orchestration_error(err: &OrchestrationError) -> ApiError {
    match err {
        OrchestrationError::Validation(e) => validation_error(e),
        OrchestrationError::Repository(e) => repository_error(e),
        OrchestrationError::Step(e) => step_error(e),
        OrchestrationError::Origination(failure) => {
            // Nothing landed on-chain when the first step fails
            let code = if failure.last_successful_step.is_some() {
                "PARTIAL_ORIGINATION"
            } else {
                failure.cause.code()
            };
            let mut body = ApiErrorResponse::new(code, failure.to_string())
                .with_step(failure.failed_step)
                .with_tx_hash(
                    failure
                        .pending_tx_hash
                        .clone()
                        .or_else(|| failure.cause.tx_hash().map(str::to_string)),
                );
            body.attempt_id = Some(failure.attempt_id.clone());
            body.last_successful_step = failure.last_successful_step;
            body.token_id = failure.token_id.clone();
            body.chain_loan_id = failure.chain_loan_id.clone();
            api_error(StatusCode::INTERNAL_SERVER_ERROR, body)
        }
        OrchestrationError::PartialActivation(partial) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorResponse {
                last_successful_step: Some(Step::Activate),
                ..ApiErrorResponse::new("PARTIAL_ACTIVATION", partial.to_string())
                    .with_step(partial.cause.step)
                    .with_tx_hash(Some(partial.activate_tx_hash.clone()))
            },
        ),
    }
}

pub fn payment_error(err: &PaymentError) -> ApiError {
    match err {
        PaymentError::Validation(e) => validation_error(e),
        PaymentError::Repository(e) => repository_error(e),
        PaymentError::Submit(e) | PaymentError::Execute(e) => step_error(e),
        PaymentError::PaymentIdUnknown { tx_hash, .. } => api_error(
            StatusCode::ACCEPTED,
            ApiErrorResponse::new("PAYMENT_ID_UNKNOWN", err.to_string())
                .with_step(Step::SubmitPayment)
                .with_tx_hash(Some(tx_hash.clone())),
        ),
    }
}

pub fn wallet_error(err: &WalletLinkError) -> ApiError {
    let (status, code) = match err {
        WalletLinkError::InvalidAddress(_) | WalletLinkError::MalformedSignature(_) => {
            (StatusCode::BAD_REQUEST, "WALLET_INVALID_FORMAT")
        }
        WalletLinkError::SignatureMismatch { .. } => {
            (StatusCode::BAD_REQUEST, "WALLET_SIGNATURE_MISMATCH")
        }
        WalletLinkError::AddressTaken(_) => (StatusCode::CONFLICT, "WALLET_ADDRESS_TAKEN"),
        WalletLinkError::UnknownUser(_) => (StatusCode::NOT_FOUND, "VALIDATION_UNKNOWN_USER"),
        WalletLinkError::Repository(e) => return repository_error(e),
    };
    api_error(status, ApiErrorResponse::new(code, err.to_string()))
}

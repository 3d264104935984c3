//! Errors returned by the orchestrators

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::attempt::Step;
use crate::models::document::RiskTier;
use crate::models::loan::TransitionError;
use crate::services::repository::RepositoryError;
use crate::services::step_executor::StepError;

/// Precondition failures. Raised before any side effect.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("user {0} not found")]
    UnknownUser(i32),
    #[error("user {0} has no linked wallet")]
    WalletNotLinked(i32),
    #[error("stored wallet address is invalid: {0}")]
    InvalidWallet(String),
    #[error("document {0} not found")]
    DocumentNotFound(i32),
    #[error("document {0} already has a loan")]
    DocumentAlreadyLoaned(i32),
    #[error("origination for document {0} is already in progress")]
    OriginationInProgress(i32),
    #[error("document {0} has no verified income")]
    NoVerifiedIncome(i32),
    #[error("risk tier {0} is not eligible for lending")]
    IneligibleTier(RiskTier),
    #[error("document hash is not a 32-byte hex value: {0}")]
    InvalidDocumentHash(String),
    #[error("loan {0} not found")]
    LoanNotFound(i32),
    #[error("loan {0} is already being activated")]
    ActivationInProgress(i32),
    #[error("loan {0} has no on-chain loan id")]
    MissingChainLoanId(i32),
    #[error("origination attempt {0} not found")]
    AttemptNotFound(String),
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("amount {0} cannot be represented on-chain")]
    AmountOutOfRange(Decimal),
    #[error("transaction hash is malformed: {0}")]
    InvalidTxHash(String),
    #[error(transparent)]
    IllegalTransition(#[from] TransitionError),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::UnknownUser(_) => "VALIDATION_UNKNOWN_USER",
            ValidationError::WalletNotLinked(_) => "VALIDATION_WALLET_NOT_LINKED",
            ValidationError::InvalidWallet(_) => "VALIDATION_INVALID_WALLET",
            ValidationError::DocumentNotFound(_) => "VALIDATION_DOCUMENT_NOT_FOUND",
            ValidationError::DocumentAlreadyLoaned(_) => "VALIDATION_DOCUMENT_ALREADY_LOANED",
            ValidationError::OriginationInProgress(_) => "VALIDATION_ORIGINATION_IN_PROGRESS",
            ValidationError::NoVerifiedIncome(_) => "VALIDATION_NO_VERIFIED_INCOME",
            ValidationError::IneligibleTier(_) => "VALIDATION_INELIGIBLE_TIER",
            ValidationError::InvalidDocumentHash(_) => "VALIDATION_INVALID_DOCUMENT_HASH",
            ValidationError::LoanNotFound(_) => "VALIDATION_LOAN_NOT_FOUND",
            ValidationError::ActivationInProgress(_) => "VALIDATION_ACTIVATION_IN_PROGRESS",
            ValidationError::MissingChainLoanId(_) => "VALIDATION_MISSING_CHAIN_LOAN_ID",
            ValidationError::AttemptNotFound(_) => "VALIDATION_ATTEMPT_NOT_FOUND",
            ValidationError::NonPositiveAmount(_) => "VALIDATION_NON_POSITIVE_AMOUNT",
            ValidationError::AmountOutOfRange(_) => "VALIDATION_AMOUNT_OUT_OF_RANGE",
            ValidationError::InvalidTxHash(_) => "VALIDATION_INVALID_TX_HASH",
            ValidationError::IllegalTransition(_) => "VALIDATION_ILLEGAL_TRANSITION",
        }
    }
}

/// An origination attempt stopped partway. Everything already on-chain is
/// named so the attempt can be resumed or reconciled.
#[derive(Debug, Error)]
#[error("origination attempt {attempt_id} failed at {failed_step}: {cause}")]
pub struct OriginationFailure {
    pub attempt_id: String,
    pub document_id: i32,
    pub failed_step: Step,
    pub last_successful_step: Option<Step>,
    pub token_id: Option<String>,
    pub chain_loan_id: Option<String>,
    pub pending_tx_hash: Option<String>,
    #[source]
    pub cause: StepError,
}

/// The pool released funds to custody but the transfer to the borrower failed
#[derive(Debug, Error)]
#[error("loan {loan_id} activated in {activate_tx_hash} but disbursement failed: {cause}")]
pub struct PartialActivation {
    pub loan_id: i32,
    pub activate_tx_hash: String,
    #[source]
    pub cause: StepError,
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Step(#[from] StepError),
    #[error(transparent)]
    Origination(Box<OriginationFailure>),
    #[error(transparent)]
    PartialActivation(Box<PartialActivation>),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<TransitionError> for OrchestrationError {
    fn from(err: TransitionError) -> Self {
        OrchestrationError::Validation(err.into())
    }
}

impl From<OriginationFailure> for OrchestrationError {
    fn from(err: OriginationFailure) -> Self {
        OrchestrationError::Origination(Box::new(err))
    }
}

impl From<PartialActivation> for OrchestrationError {
    fn from(err: PartialActivation) -> Self {
        OrchestrationError::PartialActivation(Box::new(err))
    }
}

//! Persistence port for the orchestrators
//!
//! Every method is a single atomic operation. Uniqueness (one attempt and one
//! loan per document, one user per wallet) is enforced by the store and
//! surfaces as [`RepositoryError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::DbErr;
use thiserror::Error;

use crate::entities::{
    financial_documents, loans, origination_attempts, payments, risk_assessments, step_log, users,
};
use crate::models::attempt::{AttemptStatus, Flow, Step, StepOutcome};
use crate::models::loan::LoanStatus;
use crate::models::payment::PaymentStatus;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Result of claiming a document for origination
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// A new attempt was created
    Fresh(origination_attempts::Model),
    /// A failed attempt was flipped back to in-flight
    Resumed(origination_attempts::Model),
}

impl ClaimOutcome {
    pub fn into_attempt(self) -> origination_attempts::Model {
        match self {
            ClaimOutcome::Fresh(attempt) | ClaimOutcome::Resumed(attempt) => attempt,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub id: String,
    pub document_id: i32,
    pub user_id: i32,
    pub principal_amount: Decimal,
    pub interest_amount: Decimal,
    pub due_date: DateTime<Utc>,
    pub risk_tier: i16,
    pub trust_score: i32,
}

#[derive(Debug, Clone)]
pub struct NewStepEntry {
    pub flow: Flow,
    pub reference: String,
    pub step: Step,
    pub outcome: StepOutcome,
    pub tx_hash: Option<String>,
    pub detail: serde_json::Value,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewLoan {
    pub user_id: i32,
    pub document_id: i32,
    pub chain_loan_id: String,
    pub nft_token_id: String,
    pub transaction_hash: String,
    pub principal_amount: Decimal,
    pub interest_amount: Decimal,
    pub due_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub loan_id: i32,
    pub amount: Decimal,
    pub proof_reference: String,
    pub proof_token: String,
    pub submit_tx_hash: String,
    pub chain_payment_id: Option<String>,
    pub status: PaymentStatus,
}

#[async_trait]
pub trait LoanRepository: Send + Sync {
    // Users
    async fn find_user(&self, user_id: i32) -> Result<Option<users::Model>, RepositoryError>;

    /// Binds `address` to the user. Conflict if another user holds it.
    async fn bind_wallet(&self, user_id: i32, address: &str)
        -> Result<users::Model, RepositoryError>;

    // Documents
    async fn find_document(
        &self,
        document_id: i32,
    ) -> Result<Option<financial_documents::Model>, RepositoryError>;

    async fn list_documents(
        &self,
        user_id: i32,
    ) -> Result<Vec<financial_documents::Model>, RepositoryError>;

    async fn find_risk_assessment(
        &self,
        document_id: i32,
    ) -> Result<Option<risk_assessments::Model>, RepositoryError>;

    // Origination attempts

    /// Inserts a fresh attempt, or flips an existing failed attempt for the same
    /// document back to in-flight. Conflict while an attempt is in flight or
    /// completed.
    async fn claim_document(&self, attempt: NewAttempt) -> Result<ClaimOutcome, RepositoryError>;

    async fn save_attempt(
        &self,
        attempt: origination_attempts::Model,
    ) -> Result<origination_attempts::Model, RepositoryError>;

    async fn find_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<origination_attempts::Model>, RepositoryError>;

    async fn list_attempts_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<origination_attempts::Model>, RepositoryError>;

    async fn list_attempts_by_status(
        &self,
        status: AttemptStatus,
    ) -> Result<Vec<origination_attempts::Model>, RepositoryError>;

    /// Compare-and-set failed → in-flight, incrementing the resume count.
    /// Conflict when the attempt is not failed.
    async fn reclaim_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<origination_attempts::Model, RepositoryError>;

    /// Marks in-flight attempts not updated since `cutoff` as failed.
    /// Returns the attempts that were expired.
    async fn expire_stale_attempts(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<origination_attempts::Model>, RepositoryError>;

    // Step log
    async fn append_step(&self, entry: NewStepEntry) -> Result<step_log::Model, RepositoryError>;

    async fn list_steps(
        &self,
        flow: Flow,
        reference: &str,
    ) -> Result<Vec<step_log::Model>, RepositoryError>;

    // Loans

    /// Conflict if the document already has a loan
    async fn insert_loan(&self, loan: NewLoan) -> Result<loans::Model, RepositoryError>;

    async fn find_loan(&self, loan_id: i32) -> Result<Option<loans::Model>, RepositoryError>;

    async fn find_loan_by_document(
        &self,
        document_id: i32,
    ) -> Result<Option<loans::Model>, RepositoryError>;

    async fn list_loans_for_user(&self, user_id: i32) -> Result<Vec<loans::Model>, RepositoryError>;

    async fn list_loans_by_status(
        &self,
        status: LoanStatus,
    ) -> Result<Vec<loans::Model>, RepositoryError>;

    /// Writes `loan` only while the stored status is still `expected`.
    /// Conflict when another writer moved the loan first.
    async fn update_loan(
        &self,
        loan: loans::Model,
        expected: LoanStatus,
    ) -> Result<loans::Model, RepositoryError>;

    /// Marks a pending loan as held by one activation. A claim older than
    /// `stale_before` is taken over. Conflict while another claim is live or
    /// the loan is no longer pending.
    async fn claim_activation(
        &self,
        loan_id: i32,
        stale_before: DateTime<Utc>,
    ) -> Result<loans::Model, RepositoryError>;

    // Payments
    async fn insert_payment(&self, payment: NewPayment) -> Result<payments::Model, RepositoryError>;

    async fn save_payment(&self, payment: payments::Model)
        -> Result<payments::Model, RepositoryError>;

    /// Latest payment recorded for a bank reference on a loan
    async fn find_payment_by_reference(
        &self,
        loan_id: i32,
        proof_reference: &str,
    ) -> Result<Option<payments::Model>, RepositoryError>;

    async fn find_payment_by_chain_id(
        &self,
        chain_payment_id: &str,
    ) -> Result<Option<payments::Model>, RepositoryError>;

    async fn list_payments_by_status(
        &self,
        status: PaymentStatus,
    ) -> Result<Vec<payments::Model>, RepositoryError>;
}

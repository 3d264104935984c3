//! In-memory [`LoanRepository`] for tests and local runs
//!
//! All tables live behind one mutex, so every trait method observes and
//! mutates a consistent snapshot, matching the atomicity of the SQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::DbErr;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::repository::{
    ClaimOutcome, LoanRepository, NewAttempt, NewLoan, NewPayment, NewStepEntry, RepositoryError,
};
use super::sea_repository::STALE_ATTEMPT_CODE;
use crate::entities::{
    financial_documents, loans, origination_attempts, payments, risk_assessments, step_log, users,
};
use crate::models::attempt::{AttemptStatus, Flow, OriginationStage};
use crate::models::document::{DocumentType, RiskTier};
use crate::models::loan::LoanStatus;
use crate::models::payment::PaymentStatus;

#[derive(Default)]
struct Tables {
    users: BTreeMap<i32, users::Model>,
    documents: BTreeMap<i32, financial_documents::Model>,
    assessments: BTreeMap<i32, risk_assessments::Model>,
    attempts: BTreeMap<String, origination_attempts::Model>,
    steps: Vec<step_log::Model>,
    loans: BTreeMap<i32, loans::Model>,
    payments: BTreeMap<i32, payments::Model>,
    next_id: i32,
    failing_payment_writes: usize,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn payment_write(&mut self) -> Result<(), RepositoryError> {
        if self.failing_payment_writes > 0 {
            self.failing_payment_writes -= 1;
            return Err(RepositoryError::Database(DbErr::Custom(
                "payments table unavailable".to_string(),
            )));
        }
        Ok(())
    }
}

fn now() -> DateTimeWithTimeZone {
    Utc::now().into()
}

#[derive(Clone, Default)]
pub struct InMemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, username: &str, wallet_address: Option<&str>) -> users::Model {
        let mut tables = self.tables.lock();
        let user = users::Model {
            id: tables.next_id(),
            username: username.to_string(),
            wallet_address: wallet_address.map(str::to_string),
            created_at: now(),
        };
        tables.users.insert(user.id, user.clone());
        user
    }

    pub fn insert_document(
        &self,
        user_id: i32,
        document_type: DocumentType,
        document_hash: &str,
        verified_income_amount: Decimal,
    ) -> financial_documents::Model {
        let mut tables = self.tables.lock();
        let id = tables.next_id();
        let document = financial_documents::Model {
            id,
            user_id,
            document_type,
            file_url: format!("https://files.invalid/documents/{}", id),
            document_hash: document_hash.to_string(),
            extracted_data: serde_json::json!({}),
            verified_income_amount,
            currency: "VND".to_string(),
            uploaded_at: now(),
        };
        tables.documents.insert(id, document.clone());
        document
    }

    pub fn insert_risk_assessment(
        &self,
        document_id: i32,
        tier: RiskTier,
        score: f64,
    ) -> risk_assessments::Model {
        let mut tables = self.tables.lock();
        let assessment = risk_assessments::Model {
            id: tables.next_id(),
            document_id,
            tier,
            score,
            approved_ltv: tier.max_ltv().to_f64().unwrap_or(0.0),
            interest_rate: 0.05,
            ai_reasoning: serde_json::json!({}),
            assessed_at: now(),
        };
        tables.assessments.insert(document_id, assessment.clone());
        assessment
    }

    /// Makes the next `count` payment inserts or saves fail
    pub fn fail_payment_writes(&self, count: usize) {
        self.tables.lock().failing_payment_writes = count;
    }

    /// Rewinds an attempt's `updated_at`, for exercising the stale sweep
    pub fn backdate_attempt(&self, attempt_id: &str, updated_at: DateTime<Utc>) {
        if let Some(attempt) = self.tables.lock().attempts.get_mut(attempt_id) {
            attempt.updated_at = updated_at.into();
        }
    }
}

#[async_trait]
impl LoanRepository for InMemoryRepository {
    async fn find_user(&self, user_id: i32) -> Result<Option<users::Model>, RepositoryError> {
        Ok(self.tables.lock().users.get(&user_id).cloned())
    }

    async fn bind_wallet(
        &self,
        user_id: i32,
        address: &str,
    ) -> Result<users::Model, RepositoryError> {
        let mut tables = self.tables.lock();

        let taken = tables
            .users
            .values()
            .any(|u| u.id != user_id && u.wallet_address.as_deref() == Some(address));
        if taken {
            return Err(RepositoryError::Conflict(format!(
                "wallet address already bound: {}",
                address
            )));
        }

        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))?;
        user.wallet_address = Some(address.to_string());
        Ok(user.clone())
    }

    async fn find_document(
        &self,
        document_id: i32,
    ) -> Result<Option<financial_documents::Model>, RepositoryError> {
        Ok(self.tables.lock().documents.get(&document_id).cloned())
    }

    async fn list_documents(
        &self,
        user_id: i32,
    ) -> Result<Vec<financial_documents::Model>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .documents
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_risk_assessment(
        &self,
        document_id: i32,
    ) -> Result<Option<risk_assessments::Model>, RepositoryError> {
        Ok(self.tables.lock().assessments.get(&document_id).cloned())
    }

    async fn claim_document(&self, attempt: NewAttempt) -> Result<ClaimOutcome, RepositoryError> {
        let mut tables = self.tables.lock();

        if let Some(existing) = tables
            .attempts
            .values_mut()
            .find(|a| a.document_id == attempt.document_id)
        {
            if existing.status != AttemptStatus::Failed {
                return Err(RepositoryError::Conflict(format!(
                    "document {} has an origination in flight or completed",
                    attempt.document_id
                )));
            }
            existing.status = AttemptStatus::InFlight;
            existing.resume_count += 1;
            existing.updated_at = now();
            return Ok(ClaimOutcome::Resumed(existing.clone()));
        }

        let stamp = now();
        let model = origination_attempts::Model {
            id: attempt.id,
            document_id: attempt.document_id,
            user_id: attempt.user_id,
            stage: OriginationStage::Claimed,
            status: AttemptStatus::InFlight,
            principal_amount: attempt.principal_amount,
            interest_amount: attempt.interest_amount,
            due_date: attempt.due_date.into(),
            risk_tier: attempt.risk_tier,
            trust_score: attempt.trust_score,
            token_id: None,
            chain_loan_id: None,
            mint_tx_hash: None,
            approve_tx_hash: None,
            create_loan_tx_hash: None,
            pending_tx_hash: None,
            error_code: None,
            error_message: None,
            resume_count: 0,
            loan_id: None,
            created_at: stamp,
            updated_at: stamp,
        };
        tables.attempts.insert(model.id.clone(), model.clone());
        Ok(ClaimOutcome::Fresh(model))
    }

    async fn save_attempt(
        &self,
        mut attempt: origination_attempts::Model,
    ) -> Result<origination_attempts::Model, RepositoryError> {
        let mut tables = self.tables.lock();
        if !tables.attempts.contains_key(&attempt.id) {
            return Err(RepositoryError::NotFound(format!("attempt {}", attempt.id)));
        }
        attempt.updated_at = now();
        tables.attempts.insert(attempt.id.clone(), attempt.clone());
        Ok(attempt)
    }

    async fn find_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<origination_attempts::Model>, RepositoryError> {
        Ok(self.tables.lock().attempts.get(attempt_id).cloned())
    }

    async fn list_attempts_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<origination_attempts::Model>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .attempts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_attempts_by_status(
        &self,
        status: AttemptStatus,
    ) -> Result<Vec<origination_attempts::Model>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .attempts
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }

    async fn reclaim_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<origination_attempts::Model, RepositoryError> {
        let mut tables = self.tables.lock();
        let attempt = tables
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("attempt {}", attempt_id)))?;

        if attempt.status != AttemptStatus::Failed {
            return Err(RepositoryError::Conflict(format!(
                "attempt {} is {:?}, not failed",
                attempt_id, attempt.status
            )));
        }

        attempt.status = AttemptStatus::InFlight;
        attempt.resume_count += 1;
        attempt.updated_at = now();
        Ok(attempt.clone())
    }

    async fn expire_stale_attempts(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<origination_attempts::Model>, RepositoryError> {
        let mut tables = self.tables.lock();
        let cutoff: DateTimeWithTimeZone = cutoff.into();

        let mut expired = Vec::new();
        for attempt in tables.attempts.values_mut() {
            if attempt.status == AttemptStatus::InFlight && attempt.updated_at < cutoff {
                attempt.status = AttemptStatus::Failed;
                attempt.error_code = Some(STALE_ATTEMPT_CODE.to_string());
                attempt.error_message = Some("attempt abandoned while in flight".to_string());
                expired.push(attempt.clone());
            }
        }
        Ok(expired)
    }

    async fn append_step(&self, entry: NewStepEntry) -> Result<step_log::Model, RepositoryError> {
        let mut tables = self.tables.lock();
        let model = step_log::Model {
            id: tables.steps.len() as i64 + 1,
            flow: entry.flow,
            reference: entry.reference,
            step: entry.step,
            outcome: entry.outcome,
            tx_hash: entry.tx_hash,
            detail: entry.detail,
            error_code: entry.error_code,
            error_message: entry.error_message,
            created_at: now(),
        };
        tables.steps.push(model.clone());
        Ok(model)
    }

    async fn list_steps(
        &self,
        flow: Flow,
        reference: &str,
    ) -> Result<Vec<step_log::Model>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .steps
            .iter()
            .filter(|s| s.flow == flow && s.reference == reference)
            .cloned()
            .collect())
    }

    async fn insert_loan(&self, loan: NewLoan) -> Result<loans::Model, RepositoryError> {
        let mut tables = self.tables.lock();

        if tables.loans.values().any(|l| l.document_id == loan.document_id) {
            return Err(RepositoryError::Conflict(format!(
                "document already has a loan: {}",
                loan.document_id
            )));
        }

        let stamp = now();
        let model = loans::Model {
            id: tables.next_id(),
            user_id: loan.user_id,
            document_id: loan.document_id,
            chain_loan_id: Some(loan.chain_loan_id),
            nft_token_id: Some(loan.nft_token_id),
            transaction_hash: Some(loan.transaction_hash),
            activation_tx_hash: None,
            disbursement_tx_hash: None,
            pending_tx_hash: None,
            activation_claimed_at: None,
            principal_amount: loan.principal_amount,
            interest_amount: loan.interest_amount,
            due_date: loan.due_date.into(),
            status: LoanStatus::Pending,
            created_at: stamp,
            updated_at: stamp,
        };
        tables.loans.insert(model.id, model.clone());
        Ok(model)
    }

    async fn find_loan(&self, loan_id: i32) -> Result<Option<loans::Model>, RepositoryError> {
        Ok(self.tables.lock().loans.get(&loan_id).cloned())
    }

    async fn find_loan_by_document(
        &self,
        document_id: i32,
    ) -> Result<Option<loans::Model>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .loans
            .values()
            .find(|l| l.document_id == document_id)
            .cloned())
    }

    async fn list_loans_for_user(&self, user_id: i32) -> Result<Vec<loans::Model>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .loans
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_loans_by_status(
        &self,
        status: LoanStatus,
    ) -> Result<Vec<loans::Model>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .loans
            .values()
            .filter(|l| l.status == status)
            .cloned()
            .collect())
    }

    async fn update_loan(
        &self,
        mut loan: loans::Model,
        expected: LoanStatus,
    ) -> Result<loans::Model, RepositoryError> {
        let mut tables = self.tables.lock();
        let stored = tables
            .loans
            .get(&loan.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("loan {}", loan.id)))?;
        if stored.status != expected {
            return Err(RepositoryError::Conflict(format!(
                "loan {} is {}, not {}",
                loan.id, stored.status, expected
            )));
        }
        loan.updated_at = now();
        tables.loans.insert(loan.id, loan.clone());
        Ok(loan)
    }

    async fn claim_activation(
        &self,
        loan_id: i32,
        stale_before: DateTime<Utc>,
    ) -> Result<loans::Model, RepositoryError> {
        let mut tables = self.tables.lock();
        let loan = tables
            .loans
            .get_mut(&loan_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("loan {}", loan_id)))?;

        let stale_before: DateTimeWithTimeZone = stale_before.into();
        let held = loan.activation_claimed_at.is_some_and(|at| at >= stale_before);
        if loan.status != LoanStatus::Pending || held {
            return Err(RepositoryError::Conflict(format!(
                "loan {} is {} or already being activated",
                loan_id, loan.status
            )));
        }

        let stamp = now();
        loan.activation_claimed_at = Some(stamp);
        loan.updated_at = stamp;
        Ok(loan.clone())
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<payments::Model, RepositoryError> {
        let mut tables = self.tables.lock();
        tables.payment_write()?;
        let stamp = now();
        let model = payments::Model {
            id: tables.next_id(),
            loan_id: payment.loan_id,
            amount: payment.amount,
            proof_reference: payment.proof_reference,
            proof_token: payment.proof_token,
            submit_tx_hash: payment.submit_tx_hash,
            chain_payment_id: payment.chain_payment_id,
            status: payment.status,
            execute_tx_hash: None,
            created_at: stamp,
            updated_at: stamp,
        };
        tables.payments.insert(model.id, model.clone());
        Ok(model)
    }

    async fn save_payment(
        &self,
        mut payment: payments::Model,
    ) -> Result<payments::Model, RepositoryError> {
        let mut tables = self.tables.lock();
        tables.payment_write()?;
        if !tables.payments.contains_key(&payment.id) {
            return Err(RepositoryError::NotFound(format!("payment {}", payment.id)));
        }
        payment.updated_at = now();
        tables.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn find_payment_by_reference(
        &self,
        loan_id: i32,
        proof_reference: &str,
    ) -> Result<Option<payments::Model>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .payments
            .values()
            .rev()
            .find(|p| p.loan_id == loan_id && p.proof_reference == proof_reference)
            .cloned())
    }

    async fn find_payment_by_chain_id(
        &self,
        chain_payment_id: &str,
    ) -> Result<Option<payments::Model>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .payments
            .values()
            .find(|p| p.chain_payment_id.as_deref() == Some(chain_payment_id))
            .cloned())
    }

    async fn list_payments_by_status(
        &self,
        status: PaymentStatus,
    ) -> Result<Vec<payments::Model>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .payments
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect())
    }
}

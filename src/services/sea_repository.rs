//! Postgres implementation of [`LoanRepository`] on SeaORM

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr,
    EntityTrait, NotSet, QueryFilter, QueryOrder, Set, SqlErr,
};
use tracing::{debug, warn};

use super::repository::{
    ClaimOutcome, LoanRepository, NewAttempt, NewLoan, NewPayment, NewStepEntry, RepositoryError,
};
use crate::entities::{
    financial_documents, loans, origination_attempts, payments, risk_assessments, step_log, users,
};
use crate::models::attempt::{AttemptStatus, Flow, OriginationStage};
use crate::models::loan::LoanStatus;
use crate::models::payment::PaymentStatus;

/// Error code recorded on attempts expired by the reconciliation sweep
pub const STALE_ATTEMPT_CODE: &str = "STALE_ATTEMPT";

#[derive(Clone)]
pub struct SeaLoanRepository {
    db: DatabaseConnection,
}

impl SeaLoanRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn map_db_err(err: DbErr, what: &str) -> RepositoryError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            RepositoryError::Conflict(format!("{}: {}", what, detail))
        }
        _ => RepositoryError::Database(err),
    }
}

#[async_trait]
impl LoanRepository for SeaLoanRepository {
    async fn find_user(&self, user_id: i32) -> Result<Option<users::Model>, RepositoryError> {
        Ok(users::Entity::find_by_id(user_id).one(&self.db).await?)
    }

    async fn bind_wallet(
        &self,
        user_id: i32,
        address: &str,
    ) -> Result<users::Model, RepositoryError> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))?;

        if user.wallet_address.as_deref() == Some(address) {
            return Ok(user);
        }

        let mut active: users::ActiveModel = user.into();
        active.wallet_address = Set(Some(address.to_string()));

        // The unique index decides races between two users claiming one address
        active
            .update(&self.db)
            .await
            .map_err(|e| map_db_err(e, "wallet address already bound"))
    }

    async fn find_document(
        &self,
        document_id: i32,
    ) -> Result<Option<financial_documents::Model>, RepositoryError> {
        Ok(financial_documents::Entity::find_by_id(document_id)
            .one(&self.db)
            .await?)
    }

    async fn list_documents(
        &self,
        user_id: i32,
    ) -> Result<Vec<financial_documents::Model>, RepositoryError> {
        Ok(financial_documents::Entity::find()
            .filter(financial_documents::Column::UserId.eq(user_id))
            .order_by_desc(financial_documents::Column::UploadedAt)
            .all(&self.db)
            .await?)
    }

    async fn find_risk_assessment(
        &self,
        document_id: i32,
    ) -> Result<Option<risk_assessments::Model>, RepositoryError> {
        Ok(risk_assessments::Entity::find()
            .filter(risk_assessments::Column::DocumentId.eq(document_id))
            .one(&self.db)
            .await?)
    }

    async fn claim_document(&self, attempt: NewAttempt) -> Result<ClaimOutcome, RepositoryError> {
        let now: sea_orm::prelude::DateTimeWithTimeZone = Utc::now().into();
        let document_id = attempt.document_id;

        let fresh = origination_attempts::ActiveModel {
            id: Set(attempt.id),
            document_id: Set(attempt.document_id),
            user_id: Set(attempt.user_id),
            stage: Set(OriginationStage::Claimed),
            status: Set(AttemptStatus::InFlight),
            principal_amount: Set(attempt.principal_amount),
            interest_amount: Set(attempt.interest_amount),
            due_date: Set(attempt.due_date.into()),
            risk_tier: Set(attempt.risk_tier),
            trust_score: Set(attempt.trust_score),
            token_id: Set(None),
            chain_loan_id: Set(None),
            mint_tx_hash: Set(None),
            approve_tx_hash: Set(None),
            create_loan_tx_hash: Set(None),
            pending_tx_hash: Set(None),
            error_code: Set(None),
            error_message: Set(None),
            resume_count: Set(0),
            loan_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match fresh.insert(&self.db).await {
            Ok(model) => return Ok(ClaimOutcome::Fresh(model)),
            Err(e) => match map_db_err(e, "document already claimed") {
                RepositoryError::Conflict(_) => {}
                other => return Err(other),
            },
        }

        // An attempt exists: only a failed one may be taken over
        let result = origination_attempts::Entity::update_many()
            .col_expr(
                origination_attempts::Column::Status,
                Expr::value(AttemptStatus::InFlight),
            )
            .col_expr(
                origination_attempts::Column::ResumeCount,
                Expr::col(origination_attempts::Column::ResumeCount).add(1),
            )
            .col_expr(origination_attempts::Column::UpdatedAt, Expr::value(now))
            .filter(origination_attempts::Column::DocumentId.eq(document_id))
            .filter(origination_attempts::Column::Status.eq(AttemptStatus::Failed))
            .exec(&self.db)
            .await?;

        if result.rows_affected != 1 {
            return Err(RepositoryError::Conflict(format!(
                "document {} has an origination in flight or completed",
                document_id
            )));
        }

        let resumed = origination_attempts::Entity::find()
            .filter(origination_attempts::Column::DocumentId.eq(document_id))
            .one(&self.db)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("attempt for document {}", document_id)))?;

        debug!(attempt_id = %resumed.id, document_id = document_id, "Reclaimed failed attempt");
        Ok(ClaimOutcome::Resumed(resumed))
    }

    async fn save_attempt(
        &self,
        attempt: origination_attempts::Model,
    ) -> Result<origination_attempts::Model, RepositoryError> {
        let mut active = origination_attempts::ActiveModel::from(attempt).reset_all();
        active.updated_at = Set(Utc::now().into());
        Ok(active.update(&self.db).await?)
    }

    async fn find_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<origination_attempts::Model>, RepositoryError> {
        Ok(origination_attempts::Entity::find_by_id(attempt_id.to_string())
            .one(&self.db)
            .await?)
    }

    async fn list_attempts_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<origination_attempts::Model>, RepositoryError> {
        Ok(origination_attempts::Entity::find()
            .filter(origination_attempts::Column::UserId.eq(user_id))
            .order_by_desc(origination_attempts::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    async fn list_attempts_by_status(
        &self,
        status: AttemptStatus,
    ) -> Result<Vec<origination_attempts::Model>, RepositoryError> {
        Ok(origination_attempts::Entity::find()
            .filter(origination_attempts::Column::Status.eq(status))
            .order_by_asc(origination_attempts::Column::UpdatedAt)
            .all(&self.db)
            .await?)
    }

    async fn reclaim_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<origination_attempts::Model, RepositoryError> {
        let now: sea_orm::prelude::DateTimeWithTimeZone = Utc::now().into();

        let result = origination_attempts::Entity::update_many()
            .col_expr(
                origination_attempts::Column::Status,
                Expr::value(AttemptStatus::InFlight),
            )
            .col_expr(
                origination_attempts::Column::ResumeCount,
                Expr::col(origination_attempts::Column::ResumeCount).add(1),
            )
            .col_expr(origination_attempts::Column::UpdatedAt, Expr::value(now))
            .filter(origination_attempts::Column::Id.eq(attempt_id))
            .filter(origination_attempts::Column::Status.eq(AttemptStatus::Failed))
            .exec(&self.db)
            .await?;

        let attempt = self
            .find_attempt(attempt_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("attempt {}", attempt_id)))?;

        if result.rows_affected != 1 {
            return Err(RepositoryError::Conflict(format!(
                "attempt {} is {:?}, not failed",
                attempt_id, attempt.status
            )));
        }

        Ok(attempt)
    }

    async fn expire_stale_attempts(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<origination_attempts::Model>, RepositoryError> {
        let stale = origination_attempts::Entity::find()
            .filter(origination_attempts::Column::Status.eq(AttemptStatus::InFlight))
            .filter(origination_attempts::Column::UpdatedAt.lt(cutoff))
            .all(&self.db)
            .await?;

        let mut expired = Vec::new();
        for attempt in stale {
            // Re-check status and timestamp so a live worker's progress wins
            let result = origination_attempts::Entity::update_many()
                .col_expr(
                    origination_attempts::Column::Status,
                    Expr::value(AttemptStatus::Failed),
                )
                .col_expr(
                    origination_attempts::Column::ErrorCode,
                    Expr::value(STALE_ATTEMPT_CODE),
                )
                .col_expr(
                    origination_attempts::Column::ErrorMessage,
                    Expr::value("attempt abandoned while in flight"),
                )
                .filter(origination_attempts::Column::Id.eq(attempt.id.clone()))
                .filter(origination_attempts::Column::Status.eq(AttemptStatus::InFlight))
                .filter(origination_attempts::Column::UpdatedAt.lt(cutoff))
                .exec(&self.db)
                .await?;

            if result.rows_affected == 1 {
                warn!(attempt_id = %attempt.id, stage = %attempt.stage, "Expired stale attempt");
                if let Some(updated) = self.find_attempt(&attempt.id).await? {
                    expired.push(updated);
                }
            }
        }

        Ok(expired)
    }

    async fn append_step(&self, entry: NewStepEntry) -> Result<step_log::Model, RepositoryError> {
        let active = step_log::ActiveModel {
            id: NotSet,
            flow: Set(entry.flow),
            reference: Set(entry.reference),
            step: Set(entry.step),
            outcome: Set(entry.outcome),
            tx_hash: Set(entry.tx_hash),
            detail: Set(entry.detail),
            error_code: Set(entry.error_code),
            error_message: Set(entry.error_message),
            created_at: Set(Utc::now().into()),
        };
        Ok(active.insert(&self.db).await?)
    }

    async fn list_steps(
        &self,
        flow: Flow,
        reference: &str,
    ) -> Result<Vec<step_log::Model>, RepositoryError> {
        Ok(step_log::Entity::find()
            .filter(step_log::Column::Flow.eq(flow))
            .filter(step_log::Column::Reference.eq(reference))
            .order_by_asc(step_log::Column::Id)
            .all(&self.db)
            .await?)
    }

    async fn insert_loan(&self, loan: NewLoan) -> Result<loans::Model, RepositoryError> {
        let now: sea_orm::prelude::DateTimeWithTimeZone = Utc::now().into();
        let active = loans::ActiveModel {
            id: NotSet,
            user_id: Set(loan.user_id),
            document_id: Set(loan.document_id),
            chain_loan_id: Set(Some(loan.chain_loan_id)),
            nft_token_id: Set(Some(loan.nft_token_id)),
            transaction_hash: Set(Some(loan.transaction_hash)),
            activation_tx_hash: Set(None),
            disbursement_tx_hash: Set(None),
            pending_tx_hash: Set(None),
            activation_claimed_at: Set(None),
            principal_amount: Set(loan.principal_amount),
            interest_amount: Set(loan.interest_amount),
            due_date: Set(loan.due_date.into()),
            status: Set(LoanStatus::Pending),
            created_at: Set(now),
            updated_at: Set(now),
        };

        active
            .insert(&self.db)
            .await
            .map_err(|e| map_db_err(e, "document already has a loan"))
    }

    async fn find_loan(&self, loan_id: i32) -> Result<Option<loans::Model>, RepositoryError> {
        Ok(loans::Entity::find_by_id(loan_id).one(&self.db).await?)
    }

    async fn find_loan_by_document(
        &self,
        document_id: i32,
    ) -> Result<Option<loans::Model>, RepositoryError> {
        Ok(loans::Entity::find()
            .filter(loans::Column::DocumentId.eq(document_id))
            .one(&self.db)
            .await?)
    }

    async fn list_loans_for_user(&self, user_id: i32) -> Result<Vec<loans::Model>, RepositoryError> {
        Ok(loans::Entity::find()
            .filter(loans::Column::UserId.eq(user_id))
            .order_by_desc(loans::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    async fn list_loans_by_status(
        &self,
        status: LoanStatus,
    ) -> Result<Vec<loans::Model>, RepositoryError> {
        Ok(loans::Entity::find()
            .filter(loans::Column::Status.eq(status))
            .order_by_asc(loans::Column::DueDate)
            .all(&self.db)
            .await?)
    }

    async fn update_loan(
        &self,
        loan: loans::Model,
        expected: LoanStatus,
    ) -> Result<loans::Model, RepositoryError> {
        let loan_id = loan.id;
        let mut active = loans::ActiveModel::from(loan).reset_all();
        active.updated_at = Set(Utc::now().into());

        loans::Entity::update(active)
            .filter(loans::Column::Status.eq(expected))
            .exec(&self.db)
            .await
            .map_err(|e| match e {
                DbErr::RecordNotUpdated => RepositoryError::Conflict(format!(
                    "loan {} is no longer {}",
                    loan_id, expected
                )),
                other => RepositoryError::Database(other),
            })
    }

    async fn claim_activation(
        &self,
        loan_id: i32,
        stale_before: DateTime<Utc>,
    ) -> Result<loans::Model, RepositoryError> {
        let now: sea_orm::prelude::DateTimeWithTimeZone = Utc::now().into();

        let result = loans::Entity::update_many()
            .col_expr(loans::Column::ActivationClaimedAt, Expr::value(now))
            .col_expr(loans::Column::UpdatedAt, Expr::value(now))
            .filter(loans::Column::Id.eq(loan_id))
            .filter(loans::Column::Status.eq(LoanStatus::Pending))
            .filter(
                Condition::any()
                    .add(loans::Column::ActivationClaimedAt.is_null())
                    .add(loans::Column::ActivationClaimedAt.lt(stale_before)),
            )
            .exec(&self.db)
            .await?;

        let loan = self
            .find_loan(loan_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("loan {}", loan_id)))?;

        if result.rows_affected != 1 {
            return Err(RepositoryError::Conflict(format!(
                "loan {} is {} or already being activated",
                loan_id, loan.status
            )));
        }

        debug!(loan_id = loan_id, "Claimed loan for activation");
        Ok(loan)
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<payments::Model, RepositoryError> {
        let now: sea_orm::prelude::DateTimeWithTimeZone = Utc::now().into();
        let active = payments::ActiveModel {
            id: NotSet,
            loan_id: Set(payment.loan_id),
            amount: Set(payment.amount),
            proof_reference: Set(payment.proof_reference),
            proof_token: Set(payment.proof_token),
            submit_tx_hash: Set(payment.submit_tx_hash),
            chain_payment_id: Set(payment.chain_payment_id),
            status: Set(payment.status),
            execute_tx_hash: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(active.insert(&self.db).await?)
    }

    async fn save_payment(
        &self,
        payment: payments::Model,
    ) -> Result<payments::Model, RepositoryError> {
        let mut active = payments::ActiveModel::from(payment).reset_all();
        active.updated_at = Set(Utc::now().into());
        Ok(active.update(&self.db).await?)
    }

    async fn find_payment_by_reference(
        &self,
        loan_id: i32,
        proof_reference: &str,
    ) -> Result<Option<payments::Model>, RepositoryError> {
        Ok(payments::Entity::find()
            .filter(payments::Column::LoanId.eq(loan_id))
            .filter(payments::Column::ProofReference.eq(proof_reference))
            .order_by_desc(payments::Column::Id)
            .one(&self.db)
            .await?)
    }

    async fn find_payment_by_chain_id(
        &self,
        chain_payment_id: &str,
    ) -> Result<Option<payments::Model>, RepositoryError> {
        Ok(payments::Entity::find()
            .filter(payments::Column::ChainPaymentId.eq(chain_payment_id))
            .one(&self.db)
            .await?)
    }

    async fn list_payments_by_status(
        &self,
        status: PaymentStatus,
    ) -> Result<Vec<payments::Model>, RepositoryError> {
        Ok(payments::Entity::find()
            .filter(payments::Column::Status.eq(status))
            .order_by_asc(payments::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }
}

//! Relays off-chain payment notifications to the payment oracle

use alloy::primitives::U256;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::chain::{
    parse_tx_hash, ChainClient, ContractAddresses, ContractCall, IPaymentOracle, TxReceipt,
};
use super::loan_policy::{proof_token, LoanPolicy};
use super::repository::{LoanRepository, NewPayment, RepositoryError};
use super::step_executor::{detail, StepError, StepExecutor};
use crate::entities::payments;
use crate::error::ValidationError;
use crate::models::attempt::{Flow, Step, StepOutcome};
use crate::models::payment::PaymentStatus;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("payment submission failed: {0}")]
    Submit(#[source] StepError),
    /// Submitted and confirmed, but the oracle's payment id could not be read
    #[error("payment submitted in {tx_hash} but its payment id is unknown")]
    PaymentIdUnknown {
        tx_hash: String,
        payment_record_id: Option<i32>,
    },
    #[error("payment execution failed: {0}")]
    Execute(#[source] StepError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone)]
pub struct SubmittedPayment {
    pub tx_hash: String,
    pub payment_id: U256,
    /// `None` when the submission confirmed but storing it failed
    pub record: Option<payments::Model>,
}

pub struct PaymentOrchestrator {
    repo: Arc<dyn LoanRepository>,
    executor: StepExecutor,
    contracts: ContractAddresses,
    policy: LoanPolicy,
}

impl PaymentOrchestrator {
    pub fn new(
        repo: Arc<dyn LoanRepository>,
        chain: Arc<dyn ChainClient>,
        contracts: ContractAddresses,
        policy: LoanPolicy,
    ) -> Self {
        let executor = StepExecutor::new(chain, repo.clone(), policy.gas);
        Self {
            repo,
            executor,
            contracts,
            policy,
        }
    }

    /// Submits a payment once per (loan, bank reference). A repeated
    /// notification returns the stored submission, and one whose earlier
    /// transaction was never observed looks that transaction up first.
    pub async fn submit_payment(
        &self,
        loan_id: i32,
        amount: Decimal,
        proof_reference: &str,
    ) -> Result<SubmittedPayment, PaymentError> {
        let correlation_id = Uuid::new_v4();

        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(amount).into());
        }

        let loan = self
            .repo
            .find_loan(loan_id)
            .await?
            .ok_or(ValidationError::LoanNotFound(loan_id))?;
        let chain_loan_id = loan
            .chain_loan_id
            .as_deref()
            .and_then(|id| U256::from_str(id).ok())
            .ok_or(ValidationError::MissingChainLoanId(loan_id))?;

        let existing = self
            .repo
            .find_payment_by_reference(loan_id, proof_reference)
            .await?;
        if let Some(record) = &existing {
            if record.amount != amount {
                warn!(
                    correlation_id = %correlation_id,
                    payment_record_id = record.id,
                    stored = %record.amount,
                    received = %amount,
                    "Repeated payment notification with a different amount"
                );
            }
        }
        let existing = match existing {
            Some(record)
                if matches!(
                    record.status,
                    PaymentStatus::Submitted | PaymentStatus::IdUnknown | PaymentStatus::Executed
                ) =>
            {
                info!(
                    correlation_id = %correlation_id,
                    payment_record_id = record.id,
                    tx_hash = %record.submit_tx_hash,
                    "Payment already submitted"
                );
                return self.already_submitted(record).await;
            }
            other => other,
        };

        let units = self.policy.to_base_units(amount)?;
        let proof = proof_token(proof_reference);
        let proof_hex = format!("0x{}", hex::encode(proof));

        info!(
            correlation_id = %correlation_id,
            loan_id = loan_id,
            chain_loan_id = %chain_loan_id,
            amount = %amount,
            proof = %proof_hex,
            "Submitting payment"
        );

        let call = ContractCall::new(
            Step::SubmitPayment,
            self.contracts.payment_oracle,
            IPaymentOracle::submitPaymentCall {
                loanId: chain_loan_id,
                amount: units,
                proof,
            },
        );

        let pending = existing
            .as_ref()
            .filter(|r| r.status == PaymentStatus::Pending)
            .map(|r| r.submit_tx_hash.clone());

        let receipt = match self.executor.run(&call, pending.as_deref()).await {
            Ok(receipt) => receipt,
            Err(cause) => {
                self.executor
                    .log_failure(
                        Flow::Payment,
                        proof_reference,
                        &cause,
                        detail(&[("loanId", Some(loan_id.to_string()))]),
                    )
                    .await;
                error!(
                    correlation_id = %correlation_id,
                    loan_id = loan_id,
                    tx_hash = ?cause.tx_hash(),
                    code = cause.code(),
                    error = %cause,
                    "Payment submission failed"
                );
                let unsent = NewPayment {
                    loan_id,
                    amount,
                    proof_reference: proof_reference.to_string(),
                    proof_token: proof_hex,
                    submit_tx_hash: String::new(),
                    chain_payment_id: None,
                    status: PaymentStatus::Pending,
                };
                self.record_failed_submission(existing, unsent, &cause).await;
                return Err(PaymentError::Submit(cause));
            }
        };

        let tx_hash = receipt.tx_hash_hex();
        let payment_id = receipt
            .decode_event::<IPaymentOracle::PaymentSubmitted>(self.contracts.payment_oracle)
            .map(|event| event.paymentId);
        let status = if payment_id.is_some() {
            PaymentStatus::Submitted
        } else {
            PaymentStatus::IdUnknown
        };

        let stored = match existing {
            Some(mut record) => {
                record.amount = amount;
                record.submit_tx_hash = tx_hash.clone();
                record.chain_payment_id = payment_id.map(|id| id.to_string());
                record.status = status;
                self.repo.save_payment(record).await
            }
            None => {
                self.repo
                    .insert_payment(NewPayment {
                        loan_id,
                        amount,
                        proof_reference: proof_reference.to_string(),
                        proof_token: proof_hex,
                        submit_tx_hash: tx_hash.clone(),
                        chain_payment_id: payment_id.map(|id| id.to_string()),
                        status,
                    })
                    .await
            }
        };

        let record = match stored {
            Ok(record) => Some(record),
            Err(e) => {
                // The submission is on-chain regardless; the step log keeps the hash
                error!(
                    correlation_id = %correlation_id,
                    loan_id = loan_id,
                    tx_hash = %tx_hash,
                    error = %e,
                    "Failed to store payment record"
                );
                None
            }
        };

        self.executor
            .log_success(
                Flow::Payment,
                proof_reference,
                Step::SubmitPayment,
                Some(tx_hash.clone()),
                detail(&[
                    ("loanId", Some(loan_id.to_string())),
                    ("paymentId", payment_id.map(|id| id.to_string())),
                ]),
            )
            .await;

        match payment_id {
            Some(payment_id) => {
                info!(
                    correlation_id = %correlation_id,
                    tx_hash = %tx_hash,
                    payment_id = %payment_id,
                    stored = record.is_some(),
                    "Payment submitted"
                );
                Ok(SubmittedPayment {
                    tx_hash,
                    payment_id,
                    record,
                })
            }
            None => {
                warn!(
                    correlation_id = %correlation_id,
                    tx_hash = %tx_hash,
                    "PaymentSubmitted event missing, payment id unknown"
                );
                Err(PaymentError::PaymentIdUnknown {
                    tx_hash,
                    payment_record_id: record.map(|r| r.id),
                })
            }
        }
    }

    async fn already_submitted(
        &self,
        record: payments::Model,
    ) -> Result<SubmittedPayment, PaymentError> {
        let stored_id = record
            .chain_payment_id
            .as_deref()
            .and_then(|id| U256::from_str(id).ok());
        if let Some(payment_id) = stored_id {
            return Ok(SubmittedPayment {
                tx_hash: record.submit_tx_hash.clone(),
                payment_id,
                record: Some(record),
            });
        }

        let (record_id, tx_hash) = (record.id, record.submit_tx_hash.clone());
        let recovered = self.lookup_payment_id(record).await?;
        let payment_id = recovered.as_ref().and_then(|r| {
            r.chain_payment_id
                .as_deref()
                .and_then(|id| U256::from_str(id).ok())
        });
        match (payment_id, recovered) {
            (Some(payment_id), Some(record)) => Ok(SubmittedPayment {
                tx_hash,
                payment_id,
                record: Some(record),
            }),
            _ => Err(PaymentError::PaymentIdUnknown {
                tx_hash,
                payment_record_id: Some(record_id),
            }),
        }
    }

    /// Keeps an unobserved submission on the payment row so a repeat looks
    /// it up, and marks a reverted one for resubmission.
    async fn record_failed_submission(
        &self,
        existing: Option<payments::Model>,
        unsent: NewPayment,
        cause: &StepError,
    ) {
        let loan_id = unsent.loan_id;
        let stored = match (cause.ambiguous_tx(), existing) {
            (Some(tx_hash), Some(mut record)) => {
                record.submit_tx_hash = tx_hash.to_string();
                record.status = PaymentStatus::Pending;
                self.repo.save_payment(record).await
            }
            (Some(tx_hash), None) => {
                self.repo
                    .insert_payment(NewPayment {
                        submit_tx_hash: tx_hash.to_string(),
                        ..unsent
                    })
                    .await
            }
            (None, Some(mut record)) if cause.code() == "CHAIN_REVERTED" => {
                if let Some(tx_hash) = cause.tx_hash() {
                    record.submit_tx_hash = tx_hash.to_string();
                }
                record.status = PaymentStatus::Reverted;
                self.repo.save_payment(record).await
            }
            _ => return,
        };

        if let Err(e) = stored {
            error!(
                loan_id = loan_id,
                tx_hash = ?cause.tx_hash(),
                error = %e,
                "Failed to store failed payment submission"
            );
        }
    }

    /// Executes an oracle payment. A transaction from an earlier call that
    /// was never observed is looked up instead of sending another.
    pub async fn execute_payment(&self, payment_id: U256) -> Result<String, PaymentError> {
        let correlation_id = Uuid::new_v4();
        let reference = payment_id.to_string();

        let record = self.repo.find_payment_by_chain_id(&reference).await?;
        if let Some(executed) = record
            .as_ref()
            .filter(|r| r.status == PaymentStatus::Executed)
            .and_then(|r| r.execute_tx_hash.clone())
        {
            info!(
                correlation_id = %correlation_id,
                payment_id = %payment_id,
                tx_hash = %executed,
                "Payment already executed"
            );
            return Ok(executed);
        }

        let pending = match record.as_ref().and_then(|r| r.execute_tx_hash.clone()) {
            Some(tx_hash) => Some(tx_hash),
            None => self
                .executor
                .latest_step(Flow::Payment, &reference, Step::ExecutePayment)
                .await?
                .filter(|e| matches!(e.outcome, StepOutcome::Succeeded | StepOutcome::Ambiguous))
                .and_then(|e| e.tx_hash),
        };

        let call = ContractCall::new(
            Step::ExecutePayment,
            self.contracts.payment_oracle,
            IPaymentOracle::executePaymentCall {
                paymentId: payment_id,
            },
        );

        let receipt = match self.executor.run(&call, pending.as_deref()).await {
            Ok(receipt) => receipt,
            Err(cause) => {
                self.executor
                    .log_failure(Flow::Payment, &reference, &cause, detail(&[]))
                    .await;
                error!(
                    correlation_id = %correlation_id,
                    payment_id = %payment_id,
                    tx_hash = ?cause.tx_hash(),
                    code = cause.code(),
                    error = %cause,
                    "Payment execution failed"
                );
                if let (Some(tx_hash), Some(mut record)) = (cause.ambiguous_tx(), record) {
                    record.execute_tx_hash = Some(tx_hash.to_string());
                    if let Err(e) = self.repo.save_payment(record).await {
                        error!(payment_id = %payment_id, error = %e, "Failed to store pending execution");
                    }
                }
                return Err(PaymentError::Execute(cause));
            }
        };

        let tx_hash = receipt.tx_hash_hex();
        self.executor
            .log_success(
                Flow::Payment,
                &reference,
                Step::ExecutePayment,
                Some(tx_hash.clone()),
                detail(&[]),
            )
            .await;

        if let Some(mut record) = record {
            record.status = PaymentStatus::Executed;
            record.execute_tx_hash = Some(tx_hash.clone());
            self.repo.save_payment(record).await?;
        }

        info!(
            correlation_id = %correlation_id,
            payment_id = %payment_id,
            tx_hash = %tx_hash,
            "Payment executed"
        );
        Ok(tx_hash)
    }

    /// Re-reads the submission receipt of a payment stored without an oracle id
    pub async fn lookup_payment_id(
        &self,
        mut record: payments::Model,
    ) -> Result<Option<payments::Model>, PaymentError> {
        let receipt = self.receipt(Step::SubmitPayment, &record.submit_tx_hash).await?;

        let payment_id = receipt.and_then(|r| {
            r.decode_event::<IPaymentOracle::PaymentSubmitted>(self.contracts.payment_oracle)
        });

        match payment_id {
            Some(event) => {
                record.chain_payment_id = Some(event.paymentId.to_string());
                record.status = PaymentStatus::Submitted;
                let record = self.repo.save_payment(record).await?;
                info!(
                    payment_record_id = record.id,
                    payment_id = %event.paymentId,
                    "Recovered oracle payment id"
                );
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Settles a submission whose receipt was never observed. Returns the
    /// updated row, or `None` while the transaction is still unknown.
    pub async fn resolve_pending_submission(
        &self,
        mut record: payments::Model,
    ) -> Result<Option<payments::Model>, PaymentError> {
        let Some(receipt) = self.receipt(Step::SubmitPayment, &record.submit_tx_hash).await? else {
            debug!(payment_record_id = record.id, "Pending submission still unknown");
            return Ok(None);
        };

        if receipt.success {
            let payment_id = receipt
                .decode_event::<IPaymentOracle::PaymentSubmitted>(self.contracts.payment_oracle)
                .map(|event| event.paymentId);
            record.status = if payment_id.is_some() {
                PaymentStatus::Submitted
            } else {
                PaymentStatus::IdUnknown
            };
            record.chain_payment_id = payment_id.map(|id| id.to_string());
        } else {
            record.status = PaymentStatus::Reverted;
        }

        let record = self.repo.save_payment(record).await?;
        info!(
            payment_record_id = record.id,
            status = ?record.status,
            tx_hash = %record.submit_tx_hash,
            "Resolved pending payment submission"
        );
        Ok(Some(record))
    }

    /// Settles an execution whose receipt was never observed. A revert
    /// clears the pending hash so the next execution sends again.
    pub async fn resolve_pending_execution(
        &self,
        mut record: payments::Model,
    ) -> Result<Option<payments::Model>, PaymentError> {
        let Some(tx_hash) = record.execute_tx_hash.clone() else {
            return Ok(None);
        };
        let Some(receipt) = self.receipt(Step::ExecutePayment, &tx_hash).await? else {
            debug!(payment_record_id = record.id, "Pending execution still unknown");
            return Ok(None);
        };

        if receipt.success {
            record.status = PaymentStatus::Executed;
        } else {
            record.execute_tx_hash = None;
        }

        let record = self.repo.save_payment(record).await?;
        info!(
            payment_record_id = record.id,
            status = ?record.status,
            tx_hash = %tx_hash,
            "Resolved pending payment execution"
        );
        Ok(Some(record))
    }

    async fn receipt(&self, step: Step, tx_hash: &str) -> Result<Option<TxReceipt>, PaymentError> {
        let hash = parse_tx_hash(tx_hash)
            .ok_or_else(|| ValidationError::InvalidTxHash(tx_hash.to_string()))?;

        self.executor
            .chain()
            .transaction_receipt(hash)
            .await
            .map_err(|e| match step {
                Step::ExecutePayment => PaymentError::Execute(StepError::new(step, e)),
                _ => PaymentError::Submit(StepError::new(step, e)),
            })
    }
}

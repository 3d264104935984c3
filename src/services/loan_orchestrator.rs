//! Loan origination and activation
//!
//! Origination is a durable state machine stored in `origination_attempts`:
//!
//! claimed --mint--> minted --approve--> approved --createLoan--> pool_loan_created --persist--> completed
//!
//! Every transition is saved before the next step starts, so a failed attempt
//! resumes from the step that failed and never repeats a confirmed one. A
//! step whose transaction was sent but never observed keeps its hash in
//! `pending_tx_hash`; resuming looks that hash up before sending anything.

use alloy::primitives::{Address, B256, U256};
use chrono::Utc;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::chain::{
    ChainClient, ContractAddresses, ContractCall, IERC20, IInvoiceNft, ILendingPool, TxReceipt,
};
use super::loan_policy::{bytes32_from_hex, LoanPolicy};
use super::repository::{LoanRepository, NewAttempt, NewLoan, RepositoryError};
use super::step_executor::{detail, StepError, StepExecutor, StepFailure};
use crate::entities::{financial_documents, loans, origination_attempts};
use crate::error::{OrchestrationError, OriginationFailure, PartialActivation, ValidationError};
use crate::models::attempt::{AttemptStatus, Flow, OriginationStage, Step};
use crate::models::loan::{LoanEvent, LoanStatus, TransitionError};

/// A fully originated loan
#[derive(Debug, Clone)]
pub struct Origination {
    pub loan: loans::Model,
    pub attempt_id: String,
}

/// A funded loan
#[derive(Debug, Clone)]
pub struct Activation {
    pub loan: loans::Model,
    pub activate_tx_hash: String,
    pub transfer_tx_hash: String,
    pub net_amount: Decimal,
}

pub struct LoanOrchestrator {
    repo: Arc<dyn LoanRepository>,
    executor: StepExecutor,
    contracts: ContractAddresses,
    policy: LoanPolicy,
}

impl LoanOrchestrator {
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

    pub fn policy(&self) -> &LoanPolicy {
        &self.policy
    }

    /// Originates a loan for one of the caller's documents.
    ///
    /// Calling again for a document whose attempt failed resumes that attempt.
    pub async fn create_loan(
        &self,
        document_id: i32,
        caller: i32,
    ) -> Result<Origination, OrchestrationError> {
        let correlation_id = Uuid::new_v4();
        info!(
            correlation_id = %correlation_id,
            document_id = document_id,
            user_id = caller,
            "Creating loan"
        );

        let user = self
            .repo
            .find_user(caller)
            .await?
            .ok_or(ValidationError::UnknownUser(caller))?;
        if user.wallet_address.is_none() {
            return Err(ValidationError::WalletNotLinked(caller).into());
        }

        let document = self
            .repo
            .find_document(document_id)
            .await?
            .filter(|d| d.user_id == caller)
            .ok_or(ValidationError::DocumentNotFound(document_id))?;

        if self.repo.find_loan_by_document(document_id).await?.is_some() {
            return Err(ValidationError::DocumentAlreadyLoaned(document_id).into());
        }

        if bytes32_from_hex(&document.document_hash).is_none() {
            return Err(ValidationError::InvalidDocumentHash(document.document_hash.clone()).into());
        }

        let assessment = self.repo.find_risk_assessment(document_id).await?;
        let terms = self.policy.quote(&document, assessment.as_ref(), Utc::now())?;
        self.policy.to_base_units(terms.principal)?;

        let claim = self
            .repo
            .claim_document(NewAttempt {
                id: Uuid::new_v4().to_string(),
                document_id,
                user_id: caller,
                principal_amount: terms.principal,
                interest_amount: terms.interest,
                due_date: terms.due_date,
                risk_tier: terms.risk_tier.ordinal() as i16,
                trust_score: terms.trust_score,
            })
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => {
                    OrchestrationError::from(ValidationError::OriginationInProgress(document_id))
                }
                other => other.into(),
            })?;

        let attempt = claim.into_attempt();
        info!(
            correlation_id = %correlation_id,
            attempt_id = %attempt.id,
            stage = %attempt.stage,
            resume_count = attempt.resume_count,
            principal = %attempt.principal_amount,
            interest = %attempt.interest_amount,
            "Document claimed for origination"
        );

        self.drive(attempt, &document, correlation_id).await
    }

    /// Resumes a failed attempt. `caller` restricts the attempt to its owner;
    /// background jobs pass `None`.
    pub async fn resume_attempt(
        &self,
        attempt_id: &str,
        caller: Option<i32>,
    ) -> Result<Origination, OrchestrationError> {
        let correlation_id = Uuid::new_v4();

        let attempt = self
            .repo
            .find_attempt(attempt_id)
            .await?
            .filter(|a| caller.is_none_or(|c| a.user_id == c))
            .ok_or_else(|| ValidationError::AttemptNotFound(attempt_id.to_string()))?;

        let document = self
            .repo
            .find_document(attempt.document_id)
            .await?
            .ok_or(ValidationError::DocumentNotFound(attempt.document_id))?;

        let attempt = self.repo.reclaim_attempt(attempt_id).await.map_err(|e| match e {
            RepositoryError::Conflict(_) => {
                OrchestrationError::from(ValidationError::OriginationInProgress(attempt.document_id))
            }
            other => other.into(),
        })?;

        info!(
            correlation_id = %correlation_id,
            attempt_id = %attempt.id,
            stage = %attempt.stage,
            resume_count = attempt.resume_count,
            "Resuming origination attempt"
        );

        self.drive(attempt, &document, correlation_id).await
    }

    async fn drive(
        &self,
        mut attempt: origination_attempts::Model,
        document: &financial_documents::Model,
        correlation_id: Uuid,
    ) -> Result<Origination, OrchestrationError> {
        let document_hash = bytes32_from_hex(&document.document_hash)
            .ok_or_else(|| ValidationError::InvalidDocumentHash(document.document_hash.clone()))?;

        while let Some(step) = attempt.stage.next_step() {
            let outcome = match step {
                Step::Mint => self.mint(&mut attempt, document_hash).await,
                Step::Approve => self.approve(&mut attempt).await,
                Step::CreateLoan => self.create_pool_loan(&mut attempt).await,
                _ => self.persist_loan(&mut attempt).await,
            };

            if let Err(cause) = outcome {
                return Err(self.fail_attempt(attempt, cause, correlation_id).await);
            }

            attempt = self.repo.save_attempt(attempt).await?;
        }

        let loan_id = attempt
            .loan_id
            .ok_or_else(|| RepositoryError::NotFound(format!("loan for attempt {}", attempt.id)))?;
        let loan = self
            .repo
            .find_loan(loan_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("loan {}", loan_id)))?;

        info!(
            correlation_id = %correlation_id,
            attempt_id = %attempt.id,
            loan_id = loan.id,
            chain_loan_id = ?loan.chain_loan_id,
            token_id = ?loan.nft_token_id,
            total_repayment = %loan.total_repayment(),
            "Loan originated"
        );

        Ok(Origination {
            loan,
            attempt_id: attempt.id,
        })
    }

    /// Sends the attempt's next step, reusing an earlier submission when one
    /// is pending or already recorded as succeeded.
    async fn submit(
        &self,
        attempt: &mut origination_attempts::Model,
        call: &ContractCall,
    ) -> Result<TxReceipt, StepError> {
        let pending = match attempt.pending_tx_hash.clone() {
            Some(hash) => Some(hash),
            None => {
                self.executor
                    .completed_step_tx(Flow::Origination, &attempt.id, call.step)
                    .await
            }
        };

        match self.executor.run(call, pending.as_deref()).await {
            Ok(receipt) => {
                attempt.pending_tx_hash = None;
                Ok(receipt)
            }
            Err(e) => {
                attempt.pending_tx_hash = e.ambiguous_tx().map(str::to_string);
                Err(e)
            }
        }
    }

    async fn mint(
        &self,
        attempt: &mut origination_attempts::Model,
        document_hash: B256,
    ) -> Result<(), StepError> {
        let amount = self
            .policy
            .to_base_units(attempt.principal_amount)
            .map_err(|e| StepError::new(Step::Mint, StepFailure::InvalidInput(e.to_string())))?;

        let call = ContractCall::new(
            Step::Mint,
            self.contracts.invoice_nft,
            IInvoiceNft::mintCall {
                to: self.executor.chain().custody_address(),
                invoiceHash: document_hash,
                dueDate: U256::from(attempt.due_date.timestamp().max(0) as u64),
                amount,
                riskTier: attempt.risk_tier.clamp(0, u8::MAX as i16) as u8,
                kycProofHash: document_hash,
                osintScore: U256::from(attempt.trust_score.max(0) as u64),
            },
        );

        let receipt = self.submit(attempt, &call).await?;
        let minted = self.expect_event::<IInvoiceNft::InvoiceMinted>(
            attempt,
            &receipt,
            Step::Mint,
            self.contracts.invoice_nft,
            "InvoiceMinted",
        )?;

        let tx_hash = receipt.tx_hash_hex();
        attempt.token_id = Some(minted.tokenId.to_string());
        attempt.mint_tx_hash = Some(tx_hash.clone());
        attempt.stage = OriginationStage::Minted;

        self.executor
            .log_success(
                Flow::Origination,
                &attempt.id,
                Step::Mint,
                Some(tx_hash),
                detail(&[("tokenId", attempt.token_id.clone())]),
            )
            .await;
        Ok(())
    }

    async fn approve(&self, attempt: &mut origination_attempts::Model) -> Result<(), StepError> {
        let token_id = parse_u256(attempt.token_id.as_deref(), Step::Approve, "token id")?;

        let call = ContractCall::new(
            Step::Approve,
            self.contracts.invoice_nft,
            IInvoiceNft::approveCall {
                to: self.contracts.lending_pool,
                tokenId: token_id,
            },
        );

        let receipt = self.submit(attempt, &call).await?;
        let tx_hash = receipt.tx_hash_hex();
        attempt.approve_tx_hash = Some(tx_hash.clone());
        attempt.stage = OriginationStage::Approved;

        self.executor
            .log_success(
                Flow::Origination,
                &attempt.id,
                Step::Approve,
                Some(tx_hash),
                detail(&[("tokenId", attempt.token_id.clone())]),
            )
            .await;
        Ok(())
    }

    async fn create_pool_loan(
        &self,
        attempt: &mut origination_attempts::Model,
    ) -> Result<(), StepError> {
        let token_id = parse_u256(attempt.token_id.as_deref(), Step::CreateLoan, "token id")?;

        let call = ContractCall::new(
            Step::CreateLoan,
            self.contracts.lending_pool,
            ILendingPool::createLoanCall {
                tokenId: token_id,
                currency: self.contracts.currency_token,
            },
        );

        let receipt = self.submit(attempt, &call).await?;
        let created = self.expect_event::<ILendingPool::LoanCreated>(
            attempt,
            &receipt,
            Step::CreateLoan,
            self.contracts.lending_pool,
            "LoanCreated",
        )?;

        let tx_hash = receipt.tx_hash_hex();
        attempt.chain_loan_id = Some(created.loanId.to_string());
        attempt.create_loan_tx_hash = Some(tx_hash.clone());
        attempt.stage = OriginationStage::PoolLoanCreated;

        self.executor
            .log_success(
                Flow::Origination,
                &attempt.id,
                Step::CreateLoan,
                Some(tx_hash),
                detail(&[
                    ("tokenId", attempt.token_id.clone()),
                    ("chainLoanId", attempt.chain_loan_id.clone()),
                ]),
            )
            .await;
        Ok(())
    }

    async fn persist_loan(&self, attempt: &mut origination_attempts::Model) -> Result<(), StepError> {
        let missing = |what: &str| {
            StepError::new(
                Step::Persist,
                StepFailure::InvalidInput(format!("attempt {} has no {}", attempt.id, what)),
            )
        };
        let chain_loan_id = attempt.chain_loan_id.clone().ok_or_else(|| missing("chain loan id"))?;
        let token_id = attempt.token_id.clone().ok_or_else(|| missing("token id"))?;
        let tx_hash = attempt
            .create_loan_tx_hash
            .clone()
            .ok_or_else(|| missing("createLoan tx hash"))?;

        let inserted = self
            .repo
            .insert_loan(NewLoan {
                user_id: attempt.user_id,
                document_id: attempt.document_id,
                chain_loan_id: chain_loan_id.clone(),
                nft_token_id: token_id,
                transaction_hash: tx_hash,
                principal_amount: attempt.principal_amount,
                interest_amount: attempt.interest_amount,
                due_date: attempt.due_date.into(),
            })
            .await;

        let loan = match inserted {
            Ok(loan) => loan,
            Err(RepositoryError::Conflict(_)) => {
                // A previous run wrote the row but failed to record it on the attempt
                let existing = self
                    .repo
                    .find_loan_by_document(attempt.document_id)
                    .await
                    .map_err(|e| StepError::new(Step::Persist, StepFailure::Persistence(e.to_string())))?;
                match existing {
                    Some(loan) if loan.chain_loan_id.as_deref() == Some(chain_loan_id.as_str()) => loan,
                    _ => {
                        return Err(StepError::new(
                            Step::Persist,
                            StepFailure::Persistence(format!(
                                "document {} already has a different loan",
                                attempt.document_id
                            )),
                        ))
                    }
                }
            }
            Err(e) => {
                return Err(StepError::new(
                    Step::Persist,
                    StepFailure::Persistence(e.to_string()),
                ))
            }
        };

        attempt.loan_id = Some(loan.id);
        attempt.stage = OriginationStage::Completed;
        attempt.status = AttemptStatus::Completed;
        attempt.error_code = None;
        attempt.error_message = None;

        self.executor
            .log_success(
                Flow::Origination,
                &attempt.id,
                Step::Persist,
                None,
                detail(&[
                    ("loanId", Some(loan.id.to_string())),
                    ("chainLoanId", loan.chain_loan_id.clone()),
                ]),
            )
            .await;
        Ok(())
    }

    /// Decodes `E` from a confirmed receipt. A missing event keeps the hash
    /// pending so a resume re-reads the receipt instead of resubmitting.
    fn expect_event<E: alloy::sol_types::SolEvent>(
        &self,
        attempt: &mut origination_attempts::Model,
        receipt: &TxReceipt,
        step: Step,
        emitter: Address,
        event: &'static str,
    ) -> Result<E, StepError> {
        receipt.decode_event::<E>(emitter).ok_or_else(|| {
            let tx_hash = receipt.tx_hash_hex();
            attempt.pending_tx_hash = Some(tx_hash.clone());
            StepError::new(step, StepFailure::MissingEvent { tx_hash, event })
        })
    }

    async fn fail_attempt(
        &self,
        mut attempt: origination_attempts::Model,
        cause: StepError,
        correlation_id: Uuid,
    ) -> OrchestrationError {
        attempt.status = AttemptStatus::Failed;
        attempt.error_code = Some(cause.code().to_string());
        attempt.error_message = Some(cause.to_string());

        self.executor
            .log_failure(
                Flow::Origination,
                &attempt.id,
                &cause,
                detail(&[
                    ("tokenId", attempt.token_id.clone()),
                    ("chainLoanId", attempt.chain_loan_id.clone()),
                ]),
            )
            .await;

        let last_successful_step = attempt.stage.last_successful_step();
        error!(
            correlation_id = %correlation_id,
            attempt_id = %attempt.id,
            document_id = attempt.document_id,
            step = %cause.step,
            last_successful_step = ?last_successful_step,
            token_id = ?attempt.token_id,
            chain_loan_id = ?attempt.chain_loan_id,
            tx_hash = ?cause.tx_hash(),
            code = cause.code(),
            error = %cause,
            "Origination failed"
        );

        let failure = OriginationFailure {
            attempt_id: attempt.id.clone(),
            document_id: attempt.document_id,
            failed_step: cause.step,
            last_successful_step,
            token_id: attempt.token_id.clone(),
            chain_loan_id: attempt.chain_loan_id.clone(),
            pending_tx_hash: attempt.pending_tx_hash.clone(),
            cause,
        };

        if let Err(e) = self.repo.save_attempt(attempt).await {
            error!(
                correlation_id = %correlation_id,
                attempt_id = %failure.attempt_id,
                error = %e,
                "Failed to record failed attempt"
            );
        }

        failure.into()
    }

    /// Funds a pending loan: the pool releases the principal to custody, then
    /// the net amount is transferred to the borrower's wallet.
    ///
    /// Confirmed steps are recorded on the loan, so calling again after a
    /// partial failure only runs what is left. The loan is claimed first, so
    /// only one activation runs at a time.
    pub async fn activate_loan(
        &self,
        loan_id: i32,
        caller: i32,
    ) -> Result<Activation, OrchestrationError> {
        let correlation_id = Uuid::new_v4();

        let loan = self
            .repo
            .find_loan(loan_id)
            .await?
            .filter(|l| l.user_id == caller)
            .ok_or(ValidationError::LoanNotFound(loan_id))?;

        loan.status.transition(LoanEvent::Activate)?;

        let chain_loan_id = loan
            .chain_loan_id
            .as_deref()
            .and_then(|id| U256::from_str(id).ok())
            .ok_or(ValidationError::MissingChainLoanId(loan_id))?;

        let user = self
            .repo
            .find_user(caller)
            .await?
            .ok_or(ValidationError::UnknownUser(caller))?;
        let wallet_address = user
            .wallet_address
            .ok_or(ValidationError::WalletNotLinked(caller))?;
        let wallet = Address::from_str(&wallet_address)
            .map_err(|_| ValidationError::InvalidWallet(wallet_address.clone()))?;

        let net_amount = self.policy.net_disbursement(loan.principal_amount);
        let net_units = self.policy.to_base_units(net_amount)?;
        let reference = loan.id.to_string();

        let stale_before = Utc::now() - chrono::Duration::seconds(self.policy.activation_lease_secs);
        let mut loan = match self.repo.claim_activation(loan_id, stale_before).await {
            Ok(loan) => loan,
            Err(RepositoryError::Conflict(_)) => {
                // Report a finished activation as an illegal transition
                if let Some(current) = self.repo.find_loan(loan_id).await? {
                    current.status.transition(LoanEvent::Activate)?;
                }
                warn!(correlation_id = %correlation_id, loan_id = loan_id, "Activation already in progress");
                return Err(ValidationError::ActivationInProgress(loan_id).into());
            }
            Err(e) => return Err(e.into()),
        };
        let next_status = loan.status.transition(LoanEvent::Activate)?;

        info!(
            correlation_id = %correlation_id,
            loan_id = loan.id,
            chain_loan_id = %chain_loan_id,
            net_amount = %net_amount,
            "Activating loan"
        );

        // Step A: pool → custody
        let recorded = match loan.activation_tx_hash.clone() {
            Some(hash) => Some(hash),
            None => {
                self.executor
                    .completed_step_tx(Flow::Activation, &reference, Step::Activate)
                    .await
            }
        };
        let activate_tx_hash = match recorded {
            Some(hash) => {
                info!(correlation_id = %correlation_id, loan_id = loan.id, tx_hash = %hash, "Activation already confirmed, skipping");
                hash
            }
            None => {
                let call = ContractCall::new(
                    Step::Activate,
                    self.contracts.lending_pool,
                    ILendingPool::activateLoanCall {
                        loanId: chain_loan_id,
                    },
                );
                match self.submit_for_loan(&mut loan, &call).await {
                    Ok(receipt) => {
                        let hash = receipt.tx_hash_hex();
                        self.executor
                            .log_success(
                                Flow::Activation,
                                &reference,
                                Step::Activate,
                                Some(hash.clone()),
                                detail(&[("chainLoanId", loan.chain_loan_id.clone())]),
                            )
                            .await;
                        hash
                    }
                    Err(cause) => {
                        self.executor
                            .log_failure(
                                Flow::Activation,
                                &reference,
                                &cause,
                                detail(&[("chainLoanId", loan.chain_loan_id.clone())]),
                            )
                            .await;
                        error!(
                            correlation_id = %correlation_id,
                            loan_id = loan.id,
                            chain_loan_id = ?loan.chain_loan_id,
                            step = %cause.step,
                            tx_hash = ?cause.tx_hash(),
                            code = cause.code(),
                            error = %cause,
                            "Loan activation failed"
                        );
                        self.release_activation(loan).await?;
                        return Err(cause.into());
                    }
                }
            }
        };
        loan.activation_tx_hash = Some(activate_tx_hash.clone());
        loan = self.repo.update_loan(loan, LoanStatus::Pending).await?;

        // Step B: custody → borrower
        let recorded = match loan.disbursement_tx_hash.clone() {
            Some(hash) => Some(hash),
            None => {
                self.executor
                    .completed_step_tx(Flow::Activation, &reference, Step::Transfer)
                    .await
            }
        };
        let transfer_tx_hash = match recorded {
            Some(hash) => hash,
            None => {
                let call = ContractCall::new(
                    Step::Transfer,
                    self.contracts.currency_token,
                    IERC20::transferCall {
                        to: wallet,
                        value: net_units,
                    },
                );
                match self.submit_for_loan(&mut loan, &call).await {
                    Ok(receipt) => {
                        let hash = receipt.tx_hash_hex();
                        self.executor
                            .log_success(
                                Flow::Activation,
                                &reference,
                                Step::Transfer,
                                Some(hash.clone()),
                                detail(&[
                                    ("to", Some(wallet_address.clone())),
                                    ("amount", Some(net_amount.to_string())),
                                ]),
                            )
                            .await;
                        hash
                    }
                    Err(cause) => {
                        self.executor
                            .log_failure(
                                Flow::Activation,
                                &reference,
                                &cause,
                                detail(&[("activateTxHash", Some(activate_tx_hash.clone()))]),
                            )
                            .await;
                        error!(
                            correlation_id = %correlation_id,
                            loan_id = loan.id,
                            chain_loan_id = ?loan.chain_loan_id,
                            activate_tx_hash = %activate_tx_hash,
                            step = %cause.step,
                            tx_hash = ?cause.tx_hash(),
                            code = cause.code(),
                            error = %cause,
                            "Loan activated but disbursement failed"
                        );
                        self.release_activation(loan).await?;
                        return Err(PartialActivation {
                            loan_id,
                            activate_tx_hash,
                            cause,
                        }
                        .into());
                    }
                }
            }
        };

        loan.disbursement_tx_hash = Some(transfer_tx_hash.clone());
        loan.transaction_hash = Some(activate_tx_hash.clone());
        loan.status = next_status;
        loan.activation_claimed_at = None;
        let loan = self.repo.update_loan(loan, LoanStatus::Pending).await?;

        info!(
            correlation_id = %correlation_id,
            loan_id = loan.id,
            activate_tx_hash = %activate_tx_hash,
            transfer_tx_hash = %transfer_tx_hash,
            "Loan activated"
        );

        Ok(Activation {
            loan,
            activate_tx_hash,
            transfer_tx_hash,
            net_amount,
        })
    }

    async fn release_activation(&self, mut loan: loans::Model) -> Result<(), RepositoryError> {
        loan.activation_claimed_at = None;
        self.repo.update_loan(loan, LoanStatus::Pending).await?;
        Ok(())
    }

    /// Persists a status change made from `from`. A concurrent writer that
    /// moved the loan first turns this into an illegal transition from the
    /// status it left behind.
    async fn persist_transition(
        &self,
        loan: loans::Model,
        from: LoanStatus,
        event: LoanEvent,
    ) -> Result<loans::Model, OrchestrationError> {
        let loan_id = loan.id;
        match self.repo.update_loan(loan, from).await {
            Ok(loan) => Ok(loan),
            Err(RepositoryError::Conflict(_)) => {
                let current = self
                    .repo
                    .find_loan(loan_id)
                    .await?
                    .ok_or(ValidationError::LoanNotFound(loan_id))?;
                let err = match current.status.transition(event) {
                    Err(e) => e,
                    // Moved away and back; the caller decided on stale data either way
                    Ok(_) => TransitionError {
                        from: current.status,
                        event,
                    },
                };
                Err(err.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn submit_for_loan(
        &self,
        loan: &mut loans::Model,
        call: &ContractCall,
    ) -> Result<TxReceipt, StepError> {
        match self.executor.run(call, loan.pending_tx_hash.as_deref()).await {
            Ok(receipt) => {
                loan.pending_tx_hash = None;
                Ok(receipt)
            }
            Err(e) => {
                loan.pending_tx_hash = e.ambiguous_tx().map(str::to_string);
                Err(e)
            }
        }
    }

    /// Records an off-chain confirmed repayment
    pub async fn confirm_repayment(
        &self,
        loan_id: i32,
        caller: i32,
        tx_hash: &str,
    ) -> Result<loans::Model, OrchestrationError> {
        if super::chain::parse_tx_hash(tx_hash).is_none() {
            return Err(ValidationError::InvalidTxHash(tx_hash.to_string()).into());
        }

        let mut loan = self
            .repo
            .find_loan(loan_id)
            .await?
            .filter(|l| l.user_id == caller)
            .ok_or(ValidationError::LoanNotFound(loan_id))?;

        let from = loan.status;
        loan.status = from.transition(LoanEvent::ConfirmRepayment)?;
        loan.transaction_hash = Some(tx_hash.to_lowercase());
        let loan = self
            .persist_transition(loan, from, LoanEvent::ConfirmRepayment)
            .await?;

        info!(loan_id = loan.id, tx_hash = %tx_hash, "Repayment confirmed");
        Ok(loan)
    }

    /// Applies a lifecycle event from a background sweep
    pub async fn apply_event(
        &self,
        mut loan: loans::Model,
        event: LoanEvent,
    ) -> Result<loans::Model, OrchestrationError> {
        let from = loan.status;
        loan.status = from.transition(event)?;
        let loan = self.persist_transition(loan, from, event).await?;
        if loan.status == LoanStatus::Defaulted {
            warn!(loan_id = loan.id, chain_loan_id = ?loan.chain_loan_id, "Loan defaulted");
        } else {
            info!(loan_id = loan.id, from = %from, to = %loan.status, "Loan status updated");
        }
        Ok(loan)
    }
}

fn parse_u256(value: Option<&str>, step: Step, what: &str) -> Result<U256, StepError> {
    value
        .and_then(|v| U256::from_str(v).ok())
        .ok_or_else(|| StepError::new(step, StepFailure::InvalidInput(format!("missing or malformed {}", what))))
}

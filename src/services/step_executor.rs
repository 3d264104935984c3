//! Runs one on-chain step and records its outcome in the step log

use alloy::primitives::B256;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use super::chain::{ChainClient, ChainError, ContractCall, GasPolicy, TxReceipt};
use super::repository::{LoanRepository, NewStepEntry, RepositoryError};
use crate::entities::step_log;
use crate::models::attempt::{Flow, Step, StepOutcome};

#[derive(Debug, Clone, Error)]
pub enum StepFailure {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("{event} not found in receipt of {tx_hash}")]
    MissingEvent { tx_hash: String, event: &'static str },
    #[error("transaction {tx_hash} is still unconfirmed")]
    StillUnconfirmed { tx_hash: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to record step: {0}")]
    Persistence(String),
}

/// A failed step, tagged with the step that failed
#[derive(Debug, Clone, Error)]
#[error("{step} failed: {kind}")]
pub struct StepError {
    pub step: Step,
    pub kind: StepFailure,
}

impl StepError {
    pub fn new(step: Step, kind: impl Into<StepFailure>) -> Self {
        Self {
            step,
            kind: kind.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match &self.kind {
            StepFailure::Chain(e) => e.code(),
            StepFailure::MissingEvent { .. } => "EVENT_DECODE",
            StepFailure::StillUnconfirmed { .. } => "STILL_UNCONFIRMED",
            StepFailure::InvalidInput(_) => "INVALID_INPUT",
            StepFailure::Persistence(_) => "PERSISTENCE",
        }
    }

    /// Hash of a transaction whose outcome is unknown. Resuming must look it
    /// up instead of sending the step again.
    pub fn ambiguous_tx(&self) -> Option<&str> {
        match &self.kind {
            StepFailure::Chain(e) => e.ambiguous_tx(),
            StepFailure::MissingEvent { tx_hash, .. } | StepFailure::StillUnconfirmed { tx_hash } => {
                Some(tx_hash)
            }
            _ => None,
        }
    }

    pub fn tx_hash(&self) -> Option<&str> {
        match &self.kind {
            StepFailure::Chain(e) => e.tx_hash(),
            StepFailure::MissingEvent { tx_hash, .. } | StepFailure::StillUnconfirmed { tx_hash } => {
                Some(tx_hash)
            }
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        is_retryable_code(self.code())
    }
}

/// Failures a later attempt may get past without operator involvement
pub fn is_retryable_code(code: &str) -> bool {
    matches!(
        code,
        "CHAIN_SUBMISSION"
            | "CHAIN_RPC"
            | "CHAIN_CONFIRMATION"
            | "CONFIRMATION_TIMEOUT"
            | "STILL_UNCONFIRMED"
            | "PERSISTENCE"
            | "STALE_ATTEMPT"
    )
}

#[derive(Clone)]
pub struct StepExecutor {
    chain: Arc<dyn ChainClient>,
    repo: Arc<dyn LoanRepository>,
    gas: GasPolicy,
}

impl StepExecutor {
    pub fn new(chain: Arc<dyn ChainClient>, repo: Arc<dyn LoanRepository>, gas: GasPolicy) -> Self {
        Self { chain, repo, gas }
    }

    pub fn chain(&self) -> &dyn ChainClient {
        self.chain.as_ref()
    }

    /// Runs `call` to a confirmed, successful receipt.
    ///
    /// With `pending` set, the earlier submission is looked up first: a
    /// confirmed receipt is reused, a revert allows a fresh submission, and
    /// an unknown transaction fails without sending anything.
    pub async fn run(&self, call: &ContractCall, pending: Option<&str>) -> Result<TxReceipt, StepError> {
        let step = call.step;

        if let Some(pending) = pending {
            match self.lookup(step, pending).await? {
                Some(receipt) if receipt.success => {
                    info!(step = %step, tx_hash = %pending, "Earlier submission confirmed");
                    return Ok(receipt);
                }
                Some(_) => {
                    warn!(step = %step, tx_hash = %pending, "Earlier submission reverted, resubmitting");
                }
                None => {
                    return Err(StepError::new(
                        step,
                        StepFailure::StillUnconfirmed {
                            tx_hash: pending.to_string(),
                        },
                    ));
                }
            }
        }

        let estimate = self
            .chain
            .estimate_gas(call)
            .await
            .map_err(|e| StepError::new(step, e))?;
        let gas_limit = self.gas.buffered(estimate);

        let receipt = self
            .chain
            .send_and_wait(call, gas_limit)
            .await
            .map_err(|e| StepError::new(step, e))?;

        if !receipt.success {
            return Err(StepError::new(
                step,
                ChainError::Reverted {
                    tx_hash: receipt.tx_hash_hex(),
                },
            ));
        }

        info!(
            step = %step,
            tx_hash = %receipt.tx_hash_hex(),
            gas_limit = gas_limit,
            block = ?receipt.block_number,
            "Step confirmed"
        );
        Ok(receipt)
    }

    async fn lookup(&self, step: Step, tx_hash: &str) -> Result<Option<TxReceipt>, StepError> {
        let hash: B256 = super::chain::parse_tx_hash(tx_hash).ok_or_else(|| {
            StepError::new(
                step,
                StepFailure::InvalidInput(format!("malformed pending tx hash {}", tx_hash)),
            )
        })?;

        self.chain
            .transaction_receipt(hash)
            .await
            .map_err(|e| StepError::new(step, e))
    }

    pub async fn log_success(
        &self,
        flow: Flow,
        reference: &str,
        step: Step,
        tx_hash: Option<String>,
        detail: Value,
    ) {
        self.append(NewStepEntry {
            flow,
            reference: reference.to_string(),
            step,
            outcome: StepOutcome::Succeeded,
            tx_hash,
            detail,
            error_code: None,
            error_message: None,
        })
        .await;
    }

    pub async fn log_failure(&self, flow: Flow, reference: &str, err: &StepError, detail: Value) {
        let outcome = match &err.kind {
            StepFailure::MissingEvent { .. } => StepOutcome::Failed,
            _ if err.ambiguous_tx().is_some() => StepOutcome::Ambiguous,
            _ => StepOutcome::Failed,
        };

        self.append(NewStepEntry {
            flow,
            reference: reference.to_string(),
            step: err.step,
            outcome,
            tx_hash: err.tx_hash().map(str::to_string),
            detail,
            error_code: Some(err.code().to_string()),
            error_message: Some(err.to_string()),
        })
        .await;
    }

    async fn append(&self, entry: NewStepEntry) {
        let (flow, step) = (entry.flow, entry.step);
        if let Err(e) = self.repo.append_step(entry).await {
            // The attempt/loan row still carries the outcome
            error!(flow = ?flow, step = %step, error = %e, "Failed to append step log entry");
        }
    }

    /// Tx hash of an earlier successful `step` for this reference, if any
    pub async fn completed_step_tx(&self, flow: Flow, reference: &str, step: Step) -> Option<String> {
        match self.repo.list_steps(flow, reference).await {
            Ok(entries) => entries
                .into_iter()
                .rev()
                .find(|e| e.step == step && e.outcome == StepOutcome::Succeeded)
                .and_then(|e| e.tx_hash),
            Err(e) => {
                warn!(flow = ?flow, step = %step, error = %e, "Failed to read step log");
                None
            }
        }
    }

    /// Most recent log entry for `step` on this reference
    pub async fn latest_step(
        &self,
        flow: Flow,
        reference: &str,
        step: Step,
    ) -> Result<Option<step_log::Model>, RepositoryError> {
        Ok(self
            .repo
            .list_steps(flow, reference)
            .await?
            .into_iter()
            .rev()
            .find(|e| e.step == step))
    }
}

/// Detail payload for step-log entries
pub fn detail(pairs: &[(&str, Option<String>)]) -> Value {
    let map: serde_json::Map<String, Value> = pairs
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), json!(v))))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_retryability() {
        let missing = StepError::new(
            Step::Mint,
            StepFailure::MissingEvent {
                tx_hash: "0x01".to_string(),
                event: "InvoiceMinted",
            },
        );
        assert_eq!(missing.code(), "EVENT_DECODE");
        assert!(!missing.is_retryable());
        assert_eq!(missing.ambiguous_tx(), Some("0x01"));

        let timeout = StepError::new(
            Step::Approve,
            ChainError::ConfirmationTimeout {
                tx_hash: "0x02".to_string(),
                timeout_secs: 120,
            },
        );
        assert!(timeout.is_retryable());
        assert_eq!(timeout.to_string(), "approve failed: transaction 0x02 not confirmed within 120s");

        let reverted = StepError::new(Step::CreateLoan, ChainError::Reverted { tx_hash: "0x03".into() });
        assert!(!reverted.is_retryable());
        assert_eq!(reverted.ambiguous_tx(), None);
    }

    #[test]
    fn test_detail_skips_missing_values() {
        let value = detail(&[("tokenId", Some("5".to_string())), ("chainLoanId", None)]);
        assert_eq!(value, json!({ "tokenId": "5" }));
    }
}

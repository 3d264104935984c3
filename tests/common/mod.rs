#![allow(dead_code)]

use alloy::primitives::{address, keccak256, Address, Bytes, Log, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use mantleflow_backend::entities::{financial_documents, users};
use mantleflow_backend::models::attempt::Step;
use mantleflow_backend::models::document::DocumentType;
use mantleflow_backend::services::chain::{
    ChainClient, ChainError, ContractAddresses, ContractCall, ILendingPool, IInvoiceNft,
    IPaymentOracle, TxReceipt,
};
use mantleflow_backend::services::loan_policy::LoanPolicy;
use mantleflow_backend::services::memory_repository::InMemoryRepository;
use mantleflow_backend::services::wallet_link::DEFAULT_LINK_MESSAGE;
use mantleflow_backend::AppState;

pub const CUSTODY: Address = address!("00000000000000000000000000000000000000c0");
pub const BORROWER_WALLET: &str = "0x00000000000000000000000000000000000000b0";
pub const DOCUMENT_HASH: &str =
    "0x1111111111111111111111111111111111111111111111111111111111111111";

pub fn contracts() -> ContractAddresses {
    ContractAddresses {
        invoice_nft: address!("00000000000000000000000000000000000000a1"),
        lending_pool: address!("00000000000000000000000000000000000000a2"),
        currency_token: address!("00000000000000000000000000000000000000a3"),
        payment_oracle: address!("00000000000000000000000000000000000000a4"),
    }
}

/// How the fake chain misbehaves on the next call for a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    EstimateFails,
    SubmitFails,
    Reverts,
    /// Transaction lands but the wait times out
    TimeoutLanded,
    /// Transaction is broadcast but not mined until [`FakeChain::mine_hidden`]
    TimeoutLost,
}

#[derive(Debug, Clone)]
pub struct SentCall {
    pub step: Step,
    pub to: Address,
    pub input: Bytes,
    pub gas_limit: u64,
    pub tx_hash: B256,
}

#[derive(Default)]
struct FakeState {
    faults: HashMap<Step, VecDeque<Fault>>,
    omitted_events: HashSet<Step>,
    receipts: HashMap<B256, TxReceipt>,
    hidden: HashMap<B256, TxReceipt>,
    sent: Vec<SentCall>,
    estimates: usize,
    next_tx: u64,
    next_token_id: u64,
    next_loan_id: u64,
    next_payment_id: u64,
}

/// Scriptable [`ChainClient`]: every call succeeds and emits the events the
/// real contracts emit, unless a fault is queued for its step.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<FakeState>,
}

impl FakeChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, step: Step, fault: Fault) {
        self.state.lock().faults.entry(step).or_default().push_back(fault);
    }

    pub fn omit_event(&self, step: Step) {
        self.state.lock().omitted_events.insert(step);
    }

    pub fn restore_event(&self, step: Step) {
        self.state.lock().omitted_events.remove(&step);
    }

    /// Mines every transaction that was left unconfirmed by `TimeoutLost`
    pub fn mine_hidden(&self) {
        let mut state = self.state.lock();
        let hidden: Vec<_> = state.hidden.drain().collect();
        state.receipts.extend(hidden);
    }

    /// Rewrites the receipts of earlier `step` calls as if their events had
    /// been emitted, e.g. after an indexer catches up
    pub fn backfill_events(&self, step: Step) {
        let mut state = self.state.lock();
        state.omitted_events.remove(&step);
        let calls: Vec<SentCall> = state.sent.iter().filter(|c| c.step == step).cloned().collect();
        for sent in calls {
            let call = ContractCall {
                step: sent.step,
                to: sent.to,
                input: sent.input.clone(),
            };
            let needs_logs = state
                .receipts
                .get(&sent.tx_hash)
                .is_some_and(|r| r.success && r.logs.is_empty());
            if needs_logs {
                let logs = Self::events_for(&mut state, &call);
                if let Some(receipt) = state.receipts.get_mut(&sent.tx_hash) {
                    receipt.logs = logs;
                }
            }
        }
    }

    pub fn sent(&self) -> Vec<SentCall> {
        self.state.lock().sent.clone()
    }

    pub fn sent_steps(&self) -> Vec<Step> {
        self.state.lock().sent.iter().map(|c| c.step).collect()
    }

    pub fn sent_count(&self, step: Step) -> usize {
        self.state.lock().sent.iter().filter(|c| c.step == step).count()
    }

    pub fn estimates(&self) -> usize {
        self.state.lock().estimates
    }

    fn take_fault(state: &mut FakeState, step: Step) -> Option<Fault> {
        state.faults.get_mut(&step).and_then(VecDeque::pop_front)
    }

    fn peek_fault(state: &FakeState, step: Step) -> Option<Fault> {
        state.faults.get(&step).and_then(|q| q.front().copied())
    }

    fn events_for(state: &mut FakeState, call: &ContractCall) -> Vec<Log> {
        if state.omitted_events.contains(&call.step) {
            return Vec::new();
        }

        let data = match call.step {
            Step::Mint => {
                state.next_token_id += 1;
                IInvoiceNft::InvoiceMinted {
                    tokenId: U256::from(state.next_token_id),
                    creditor: CUSTODY,
                }
                .encode_log_data()
            }
            Step::CreateLoan => {
                let Ok(decoded) = ILendingPool::createLoanCall::abi_decode(&call.input, true) else {
                    return Vec::new();
                };
                state.next_loan_id += 1;
                ILendingPool::LoanCreated {
                    loanId: U256::from(state.next_loan_id),
                    tokenId: decoded.tokenId,
                    borrower: CUSTODY,
                }
                .encode_log_data()
            }
            Step::SubmitPayment => {
                let Ok(decoded) = IPaymentOracle::submitPaymentCall::abi_decode(&call.input, true)
                else {
                    return Vec::new();
                };
                state.next_payment_id += 1;
                IPaymentOracle::PaymentSubmitted {
                    paymentId: U256::from(state.next_payment_id),
                    loanId: decoded.loanId,
                    amount: decoded.amount,
                }
                .encode_log_data()
            }
            _ => return Vec::new(),
        };

        vec![Log {
            address: call.to,
            data,
        }]
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn custody_address(&self) -> Address {
        CUSTODY
    }

    async fn estimate_gas(&self, call: &ContractCall) -> Result<u64, ChainError> {
        // Give concurrent callers a turn, as an RPC round trip would
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.estimates += 1;
        if Self::peek_fault(&state, call.step) == Some(Fault::EstimateFails) {
            Self::take_fault(&mut state, call.step);
            return Err(ChainError::GasEstimation("execution reverted".to_string()));
        }
        Ok(100_000)
    }

    async fn send_and_wait(
        &self,
        call: &ContractCall,
        gas_limit: u64,
    ) -> Result<TxReceipt, ChainError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        let fault = Self::take_fault(&mut state, call.step);
        if fault == Some(Fault::SubmitFails) {
            return Err(ChainError::Submission("nonce too low".to_string()));
        }

        state.next_tx += 1;
        let tx_hash = keccak256(state.next_tx.to_be_bytes());
        state.sent.push(SentCall {
            step: call.step,
            to: call.to,
            input: call.input.clone(),
            gas_limit,
            tx_hash,
        });

        let success = fault != Some(Fault::Reverts);
        let logs = if success {
            Self::events_for(&mut state, call)
        } else {
            Vec::new()
        };
        let receipt = TxReceipt {
            tx_hash,
            block_number: Some(state.next_tx),
            success,
            logs,
        };
        let hex_hash = receipt.tx_hash_hex();

        match fault {
            Some(Fault::TimeoutLanded) => {
                state.receipts.insert(tx_hash, receipt);
                Err(ChainError::ConfirmationTimeout {
                    tx_hash: hex_hash,
                    timeout_secs: 120,
                })
            }
            Some(Fault::TimeoutLost) => {
                state.hidden.insert(tx_hash, receipt);
                Err(ChainError::ConfirmationTimeout {
                    tx_hash: hex_hash,
                    timeout_secs: 120,
                })
            }
            _ => {
                state.receipts.insert(tx_hash, receipt.clone());
                Ok(receipt)
            }
        }
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, ChainError> {
        tokio::task::yield_now().await;
        Ok(self.state.lock().receipts.get(&tx_hash).cloned())
    }
}

pub struct TestContext {
    pub repo: InMemoryRepository,
    pub chain: Arc<FakeChain>,
    pub state: AppState,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_policy(LoanPolicy::default())
    }

    pub fn with_policy(policy: LoanPolicy) -> Self {
        let repo = InMemoryRepository::new();
        let chain = FakeChain::new();
        let state = AppState::new(
            Arc::new(repo.clone()),
            chain.clone(),
            contracts(),
            policy,
            DEFAULT_LINK_MESSAGE,
        );
        Self { repo, chain, state }
    }

    /// A borrower with a linked wallet and one 100-unit invoice
    pub fn seed_borrower(&self) -> (users::Model, financial_documents::Model) {
        let user = self.repo.insert_user("borrower", Some(BORROWER_WALLET));
        let document = self.repo.insert_document(
            user.id,
            DocumentType::Invoice,
            DOCUMENT_HASH,
            Decimal::from(100),
        );
        (user, document)
    }
}

/// Hex-encoded 65-byte signature as produced by a browser wallet
pub fn signature_hex(signature: &[u8; 65]) -> String {
    format!("0x{}", hex::encode(signature))
}

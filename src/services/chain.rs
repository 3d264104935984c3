//! Contract bindings and the chain capability the orchestrators depend on
//!
//! Orchestrators never talk to a provider directly. They build a
//! [`ContractCall`] and hand it to a [`ChainClient`], which estimates, signs,
//! submits and waits for the receipt.

use alloy::{
    primitives::{Address, Bytes, Log, B256},
    sol,
    sol_types::{SolCall, SolEvent},
};
use async_trait::async_trait;
use thiserror::Error;

use crate::models::attempt::Step;

sol! {
    interface IInvoiceNft {
        function mint(
            address to,
            bytes32 invoiceHash,
            uint256 dueDate,
            uint256 amount,
            uint8 riskTier,
            bytes32 kycProofHash,
            uint256 osintScore
        ) external returns (uint256);

        function approve(address to, uint256 tokenId) external;

        event InvoiceMinted(uint256 indexed tokenId, address indexed creditor);
    }

    interface ILendingPool {
        function createLoan(uint256 tokenId, address currency) external returns (uint256);

        function activateLoan(uint256 loanId) external;

        event LoanCreated(uint256 indexed loanId, uint256 indexed tokenId, address indexed borrower);
    }

    interface IPaymentOracle {
        function submitPayment(uint256 loanId, uint256 amount, bytes32 proof) external returns (uint256);

        function executePayment(uint256 paymentId) external;

        event PaymentSubmitted(uint256 indexed paymentId, uint256 indexed loanId, uint256 amount);
    }

    interface IERC20 {
        function transfer(address to, uint256 value) external returns (bool);
    }
}

/// Deployed contract addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    pub invoice_nft: Address,
    pub lending_pool: Address,
    pub currency_token: Address,
    pub payment_oracle: Address,
}

/// ABI-encoded call to a contract, tagged with the workflow step it performs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub step: Step,
    pub to: Address,
    pub input: Bytes,
}

impl ContractCall {
    pub fn new<C: SolCall>(step: Step, to: Address, call: C) -> Self {
        Self {
            step,
            to,
            input: Bytes::from(call.abi_encode()),
        }
    }
}

/// Confirmed transaction receipt, reduced to what the orchestrators read
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub success: bool,
    pub logs: Vec<Log>,
}

impl TxReceipt {
    /// First `E` emitted by `emitter` in this receipt
    pub fn decode_event<E: SolEvent>(&self, emitter: Address) -> Option<E> {
        self.logs
            .iter()
            .filter(|log| log.address == emitter)
            .filter(|log| log.data.topics().first() == Some(&E::SIGNATURE_HASH))
            .find_map(|log| E::decode_log_data(&log.data, true).ok())
    }

    pub fn tx_hash_hex(&self) -> String {
        tx_hash_hex(&self.tx_hash)
    }
}

pub fn tx_hash_hex(hash: &B256) -> String {
    format!("0x{}", hex::encode(hash))
}

/// Parses a 0x-prefixed 32-byte transaction hash
pub fn parse_tx_hash(value: &str) -> Option<B256> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(digits).ok()?;
    (bytes.len() == 32).then(|| B256::from_slice(&bytes))
}

/// Gas limit = estimate × (100 + buffer) / 100
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
    pub buffer_percent: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self { buffer_percent: 10 }
    }
}

impl GasPolicy {
    pub fn buffered(&self, estimate: u64) -> u64 {
        estimate.saturating_mul(100 + self.buffer_percent) / 100
    }
}

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("gas estimation failed: {0}")]
    GasEstimation(String),
    #[error("transaction submission failed: {0}")]
    Submission(String),
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },
    #[error("confirmation of {tx_hash} failed: {message}")]
    Confirmation { tx_hash: String, message: String },
    #[error("transaction {tx_hash} not confirmed within {timeout_secs}s")]
    ConfirmationTimeout { tx_hash: String, timeout_secs: u64 },
    #[error("rpc error: {0}")]
    Rpc(String),
}

impl ChainError {
    /// Hash of a transaction that may or may not have landed
    pub fn ambiguous_tx(&self) -> Option<&str> {
        match self {
            ChainError::Confirmation { tx_hash, .. }
            | ChainError::ConfirmationTimeout { tx_hash, .. } => Some(tx_hash),
            _ => None,
        }
    }

    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            ChainError::Reverted { tx_hash }
            | ChainError::Confirmation { tx_hash, .. }
            | ChainError::ConfirmationTimeout { tx_hash, .. } => Some(tx_hash),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ChainError::GasEstimation(_) | ChainError::Submission(_) => "CHAIN_SUBMISSION",
            ChainError::Reverted { .. } => "CHAIN_REVERTED",
            ChainError::Confirmation { .. } => "CHAIN_CONFIRMATION",
            ChainError::ConfirmationTimeout { .. } => "CONFIRMATION_TIMEOUT",
            ChainError::Rpc(_) => "CHAIN_RPC",
        }
    }
}

/// Signing and submission capability for the platform account
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address of the platform signer, which holds collateral and pool funds
    fn custody_address(&self) -> Address;

    async fn estimate_gas(&self, call: &ContractCall) -> Result<u64, ChainError>;

    /// Signs and submits `call`, then waits for its receipt.
    ///
    /// A reverted transaction comes back as a receipt with `success == false`.
    async fn send_and_wait(&self, call: &ContractCall, gas_limit: u64)
        -> Result<TxReceipt, ChainError>;

    /// `None` while the transaction is unknown or still pending
    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, ChainError>;
}

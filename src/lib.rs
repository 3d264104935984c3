// src/lib.rs

use std::sync::Arc;

use services::chain::{ChainClient, ContractAddresses};
use services::loan_orchestrator::LoanOrchestrator;
use services::loan_policy::LoanPolicy;
use services::payment_confirmation::PaymentOrchestrator;
use services::repository::LoanRepository;
use services::wallet_link::WalletLinkService;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn LoanRepository>,
    pub wallets: Arc<WalletLinkService>,
    pub loans: Arc<LoanOrchestrator>,
    pub payments: Arc<PaymentOrchestrator>,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn LoanRepository>,
        chain: Arc<dyn ChainClient>,
        contracts: ContractAddresses,
        policy: LoanPolicy,
        link_message: impl Into<String>,
    ) -> Self {
        Self {
            wallets: Arc::new(WalletLinkService::new(repo.clone(), link_message)),
            loans: Arc::new(LoanOrchestrator::new(
                repo.clone(),
                chain.clone(),
                contracts,
                policy.clone(),
            )),
            payments: Arc::new(PaymentOrchestrator::new(repo.clone(), chain, contracts, policy)),
            repo,
        }
    }
}

pub mod entities {
    pub mod prelude;
    pub mod users;
    pub mod financial_documents;
    pub mod risk_assessments;
    pub mod loans;
    pub mod origination_attempts;
    pub mod step_log;
    pub mod payments;
}

pub mod services {
    pub mod chain;
    pub mod alloy_chain;
    pub mod nonce_manager;
    pub mod repository;
    pub mod sea_repository;
    pub mod memory_repository;
    pub mod loan_policy;
    pub mod step_executor;
    pub mod loan_orchestrator;
    pub mod payment_confirmation;
    pub mod wallet_link;
}

pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod handlers;
pub mod routes;

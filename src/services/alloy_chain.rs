//! [`ChainClient`] backed by an alloy HTTP provider and a local private key

use alloy::{
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, B256},
    providers::{Provider, ProviderBuilder},
    rpc::types::{TransactionReceipt, TransactionRequest},
    signers::local::PrivateKeySigner,
    transports::http::{reqwest::Url, Client, Http},
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::chain::{tx_hash_hex, ChainClient, ChainError, ContractCall, TxReceipt};
use super::nonce_manager::NonceManager;

/// Provider with the custody wallet and fee fillers, built once per client
type SigningProvider = Arc<dyn Provider<Http<Client>>>;

pub struct AlloyChainClient {
    provider: SigningProvider,
    signer_address: Address,
    chain_id: u64,
    nonces: NonceManager,
    confirmation_timeout: Duration,
}

impl AlloyChainClient {
    /// Connects to `rpc_url` and checks the node is on `chain_id`
    pub async fn new(
        rpc_url: &str,
        private_key: &str,
        chain_id: u64,
        confirmation_timeout: Duration,
    ) -> Result<Self, ChainError> {
        info!(rpc_url = %rpc_url, chain_id = chain_id, "Initializing chain client");

        let client = Self::build(rpc_url, private_key, chain_id, confirmation_timeout)?;

        let actual = client.provider.get_chain_id().await.map_err(|e| {
            error!(error = %e, "Failed to connect to RPC");
            ChainError::Rpc(format!("Connection failed: {}", e))
        })?;

        if actual != chain_id {
            warn!(expected = chain_id, actual = actual, "Chain ID mismatch");
        }

        info!(
            chain_id = actual,
            signer = %client.signer_address,
            "Chain client initialized successfully"
        );
        Ok(client)
    }

    /// Builds the signing provider without touching the network
    fn build(
        rpc_url: &str,
        private_key: &str,
        chain_id: u64,
        confirmation_timeout: Duration,
    ) -> Result<Self, ChainError> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| ChainError::Rpc(format!("Invalid private key: {}", e)))?;
        let signer_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let rpc_url: Url = rpc_url
            .parse()
            .map_err(|e| ChainError::Rpc(format!("Invalid RPC URL: {}", e)))?;
        let provider: SigningProvider = Arc::new(
            ProviderBuilder::new()
                .with_recommended_fillers()
                .wallet(wallet)
                .on_http(rpc_url),
        );

        Ok(Self {
            provider,
            signer_address,
            chain_id,
            nonces: NonceManager::new(),
            confirmation_timeout,
        })
    }

    fn request(&self, call: &ContractCall) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.signer_address)
            .with_to(call.to)
            .with_input(call.input.clone())
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    fn custody_address(&self) -> Address {
        self.signer_address
    }

    async fn estimate_gas(&self, call: &ContractCall) -> Result<u64, ChainError> {
        let gas = self
            .provider
            .estimate_gas(&self.request(call))
            .await
            .map_err(|e| ChainError::GasEstimation(format!("{}: {}", call.step, e)))?;

        debug!(step = %call.step, estimated = gas, "Gas estimation successful");
        Ok(gas)
    }

    async fn send_and_wait(
        &self,
        call: &ContractCall,
        gas_limit: u64,
    ) -> Result<TxReceipt, ChainError> {
        let pending = {
            let lease = self
                .nonces
                .lease(|| async {
                    self.provider
                        .get_transaction_count(self.signer_address)
                        .pending()
                        .await
                        .map_err(|e| ChainError::Rpc(format!("Nonce lookup failed: {}", e)))
                })
                .await?;

            let tx = self
                .request(call)
                .with_nonce(lease.nonce())
                .with_gas_limit(gas_limit)
                .with_chain_id(self.chain_id);

            match self.provider.send_transaction(tx).await {
                Ok(pending) => {
                    debug!(step = %call.step, nonce = lease.nonce(), "Transaction accepted");
                    lease.commit();
                    pending
                }
                Err(e) => {
                    error!(step = %call.step, error = %e, "Failed to send transaction");
                    lease.invalidate();
                    return Err(ChainError::Submission(e.to_string()));
                }
            }
        };

        let tx_hash = tx_hash_hex(pending.tx_hash());
        info!(step = %call.step, tx_hash = %tx_hash, "Transaction sent, waiting for confirmation");

        let receipt = match tokio::time::timeout(self.confirmation_timeout, pending.get_receipt()).await
        {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                error!(tx_hash = %tx_hash, error = %e, "Failed to get transaction receipt");
                return Err(ChainError::Confirmation {
                    tx_hash,
                    message: e.to_string(),
                });
            }
            Err(_) => {
                warn!(tx_hash = %tx_hash, "Timed out waiting for receipt");
                return Err(ChainError::ConfirmationTimeout {
                    tx_hash,
                    timeout_secs: self.confirmation_timeout.as_secs(),
                });
            }
        };

        Ok(convert_receipt(&receipt))
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, ChainError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| ChainError::Rpc(format!("Receipt lookup failed: {}", e)))?;

        Ok(receipt.as_ref().map(convert_receipt))
    }
}

fn convert_receipt(receipt: &TransactionReceipt) -> TxReceipt {
    TxReceipt {
        tx_hash: receipt.transaction_hash,
        block_number: receipt.block_number,
        success: receipt.status(),
        logs: receipt.inner.logs().iter().map(|log| log.inner.clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_hex(signer: &PrivateKeySigner) -> String {
        format!("0x{}", hex::encode(signer.to_bytes()))
    }

    #[tokio::test]
    async fn test_build_keeps_custody_signer_and_reads_through_provider() {
        let signer = PrivateKeySigner::random();
        let client = AlloyChainClient::build(
            "http://127.0.0.1:1",
            &key_hex(&signer),
            5003,
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(client.custody_address(), signer.address());

        // Nothing listens on port 1
        let err = client.transaction_receipt(B256::ZERO).await.unwrap_err();
        assert_eq!(err.code(), "CHAIN_RPC");
    }

    #[test]
    fn test_build_rejects_bad_key_and_url() {
        let signer = PrivateKeySigner::random();

        let err = AlloyChainClient::build("http://127.0.0.1:1", "0x1234", 5003, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("Invalid private key"));

        let err = AlloyChainClient::build("not a url", &key_hex(&signer), 5003, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("Invalid RPC URL"));
    }
}

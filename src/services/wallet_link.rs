//! Signature-based binding of a wallet address to a platform user

use alloy::primitives::{Address, PrimitiveSignature};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::repository::{LoanRepository, RepositoryError};
use crate::entities::users;

pub const DEFAULT_LINK_MESSAGE: &str = "Welcome to MantleFlow AI!";

#[derive(Debug, Error)]
pub enum WalletLinkError {
    #[error("invalid wallet address: {0}")]
    InvalidAddress(String),
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("signature was produced by {recovered}, not {claimed}")]
    SignatureMismatch { claimed: String, recovered: String },
    #[error("wallet {0} is already linked to another user")]
    AddressTaken(String),
    #[error("user {0} not found")]
    UnknownUser(i32),
    #[error(transparent)]
    Repository(RepositoryError),
}

/// Lowercase 0x-prefixed form used for storage and comparison
pub fn normalize_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}

/// EIP-191 personal-message recovery
pub fn recover_signer(message: &str, signature: &str) -> Result<Address, WalletLinkError> {
    let bytes = hex::decode(signature.trim().trim_start_matches("0x"))
        .map_err(|e| WalletLinkError::MalformedSignature(e.to_string()))?;
    let signature = PrimitiveSignature::try_from(bytes.as_slice())
        .map_err(|e| WalletLinkError::MalformedSignature(e.to_string()))?;
    signature
        .recover_address_from_msg(message)
        .map_err(|e| WalletLinkError::MalformedSignature(e.to_string()))
}

pub struct WalletLinkService {
    repo: Arc<dyn LoanRepository>,
    message: String,
}

impl WalletLinkService {
    pub fn new(repo: Arc<dyn LoanRepository>, message: impl Into<String>) -> Self {
        Self {
            repo,
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub async fn link_wallet(
        &self,
        user_id: i32,
        claimed_address: &str,
        signature: &str,
    ) -> Result<users::Model, WalletLinkError> {
        let claimed = Address::from_str(claimed_address.trim())
            .map_err(|_| WalletLinkError::InvalidAddress(claimed_address.to_string()))?;
        let recovered = recover_signer(&self.message, signature)?;

        if recovered != claimed {
            warn!(user_id = user_id, claimed = %claimed, recovered = %recovered, "Wallet signature mismatch");
            return Err(WalletLinkError::SignatureMismatch {
                claimed: normalize_address(&claimed),
                recovered: normalize_address(&recovered),
            });
        }

        let address = normalize_address(&claimed);
        let user = self
            .repo
            .find_user(user_id)
            .await
            .map_err(WalletLinkError::Repository)?
            .ok_or(WalletLinkError::UnknownUser(user_id))?;

        if user.wallet_address.as_deref() == Some(address.as_str()) {
            return Ok(user);
        }

        let user = self
            .repo
            .bind_wallet(user_id, &address)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => WalletLinkError::AddressTaken(address.clone()),
                RepositoryError::NotFound(_) => WalletLinkError::UnknownUser(user_id),
                other => WalletLinkError::Repository(other),
            })?;

        info!(user_id = user_id, address = %address, "Wallet linked");
        Ok(user)
    }
}

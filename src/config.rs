//! Process configuration read from the environment (and `.env` via dotenvy)

use alloy::primitives::Address;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::services::chain::{ContractAddresses, GasPolicy};
use crate::services::loan_policy::LoanPolicy;
use crate::services::wallet_link::DEFAULT_LINK_MESSAGE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {message}")]
    Invalid { name: &'static str, message: String },
}

pub struct ChainConfig {
    pub rpc_url: String,
    pub private_key: String,
    pub chain_id: u64,
    pub contracts: ContractAddresses,
    pub confirmation_timeout: Duration,
}

impl std::fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("chain_id", &self.chain_id)
            .field("contracts", &self.contracts)
            .field("confirmation_timeout", &self.confirmation_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub reconciliation_interval: Duration,
    pub loan_status_interval: Duration,
    /// In-flight attempts untouched for this long are considered abandoned
    pub stale_attempt_after: Duration,
    pub max_auto_resumes: i32,
    /// Days past due before an overdue loan defaults
    pub default_grace_days: i64,
}

#[derive(Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub chain: ChainConfig,
    pub policy: LoanPolicy,
    pub jobs: JobConfig,
    pub wallet_link_message: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = LoanPolicy::default();

        let policy = LoanPolicy {
            interest_rate: optional("INTEREST_RATE", defaults.interest_rate)?,
            origination_fee_rate: optional("ORIGINATION_FEE_RATE", defaults.origination_fee_rate)?,
            term_days: optional("LOAN_TERM_DAYS", defaults.term_days)?,
            currency_decimals: optional("CURRENCY_DECIMALS", defaults.currency_decimals)?,
            default_risk_tier: optional("DEFAULT_RISK_TIER", defaults.default_risk_tier)?,
            default_trust_score: optional("DEFAULT_TRUST_SCORE", defaults.default_trust_score)?,
            activation_lease_secs: optional("ACTIVATION_LEASE_SECS", defaults.activation_lease_secs)?,
            gas: GasPolicy {
                buffer_percent: optional("GAS_BUFFER_PERCENT", defaults.gas.buffer_percent)?,
            },
        };

        if policy.currency_decimals > 28 {
            return Err(ConfigError::Invalid {
                name: "CURRENCY_DECIMALS",
                message: "must be at most 28".to_string(),
            });
        }
        if policy.origination_fee_rate < Decimal::ZERO || policy.origination_fee_rate >= Decimal::ONE {
            return Err(ConfigError::Invalid {
                name: "ORIGINATION_FEE_RATE",
                message: "must be in [0, 1)".to_string(),
            });
        }

        let chain = ChainConfig {
            rpc_url: required("RPC_URL")?,
            private_key: required("SIGNER_PRIVATE_KEY")?,
            chain_id: parse("CHAIN_ID", &required("CHAIN_ID")?)?,
            contracts: ContractAddresses {
                invoice_nft: address("INVOICE_NFT_ADDRESS")?,
                lending_pool: address("LENDING_POOL_ADDRESS")?,
                currency_token: address("CURRENCY_TOKEN_ADDRESS")?,
                payment_oracle: address("PAYMENT_ORACLE_ADDRESS")?,
            },
            confirmation_timeout: Duration::from_secs(optional("CONFIRMATION_TIMEOUT_SECS", 120)?),
        };

        let jobs = JobConfig {
            reconciliation_interval: Duration::from_secs(optional("RECONCILIATION_INTERVAL_SECS", 60)?),
            loan_status_interval: Duration::from_secs(optional("LOAN_STATUS_INTERVAL_SECS", 3600)?),
            stale_attempt_after: Duration::from_secs(optional("STALE_ATTEMPT_SECS", 900)?),
            max_auto_resumes: optional("MAX_AUTO_RESUMES", 3)?,
            default_grace_days: optional("DEFAULT_GRACE_DAYS", 30)?,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            chain,
            policy,
            jobs,
            wallet_link_message: env::var("WALLET_LINK_MESSAGE")
                .unwrap_or_else(|_| DEFAULT_LINK_MESSAGE.to_string()),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        message: e.to_string(),
    })
}

fn optional<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => parse(name, &raw),
        _ => Ok(default),
    }
}

fn address(name: &'static str) -> Result<Address, ConfigError> {
    parse(name, &required(name)?)
}


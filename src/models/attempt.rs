//! Origination attempt stages and step-log vocabulary
//!
//! An attempt progresses: claimed → minted → approved → pool_loan_created → completed
//! Its status is independent of the stage: a failed attempt keeps the stage it
//! reached so it can be resumed from the next step.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entities::{origination_attempts, step_log};

/// One on-chain (or persistence) step of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[sea_orm(string_value = "mint")]
    Mint,
    #[sea_orm(string_value = "approve")]
    Approve,
    #[sea_orm(string_value = "create_loan")]
    CreateLoan,
    #[sea_orm(string_value = "persist")]
    Persist,
    #[sea_orm(string_value = "activate")]
    Activate,
    #[sea_orm(string_value = "transfer")]
    Transfer,
    #[sea_orm(string_value = "submit_payment")]
    SubmitPayment,
    #[sea_orm(string_value = "execute_payment")]
    ExecutePayment,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Mint => write!(f, "mint"),
            Step::Approve => write!(f, "approve"),
            Step::CreateLoan => write!(f, "create_loan"),
            Step::Persist => write!(f, "persist"),
            Step::Activate => write!(f, "activate"),
            Step::Transfer => write!(f, "transfer"),
            Step::SubmitPayment => write!(f, "submit_payment"),
            Step::ExecutePayment => write!(f, "execute_payment"),
        }
    }
}

/// Workflow a step-log entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    #[sea_orm(string_value = "origination")]
    Origination,
    #[sea_orm(string_value = "activation")]
    Activation,
    #[sea_orm(string_value = "payment")]
    Payment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Submitted but never observed as confirmed or reverted
    #[sea_orm(string_value = "ambiguous")]
    Ambiguous,
}

/// How far an origination attempt has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum OriginationStage {
    /// Document claimed, nothing on-chain yet
    #[sea_orm(string_value = "claimed")]
    Claimed,
    /// Collateral NFT minted to custody
    #[sea_orm(string_value = "minted")]
    Minted,
    /// Lending pool approved to move the NFT
    #[sea_orm(string_value = "approved")]
    Approved,
    /// Pool loan created, loan row not yet written
    #[sea_orm(string_value = "pool_loan_created")]
    PoolLoanCreated,
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl OriginationStage {
    /// The step that runs from this stage, `None` once completed
    pub fn next_step(self) -> Option<Step> {
        match self {
            OriginationStage::Claimed => Some(Step::Mint),
            OriginationStage::Minted => Some(Step::Approve),
            OriginationStage::Approved => Some(Step::CreateLoan),
            OriginationStage::PoolLoanCreated => Some(Step::Persist),
            OriginationStage::Completed => None,
        }
    }

    /// The step whose success produced this stage
    pub fn last_successful_step(self) -> Option<Step> {
        match self {
            OriginationStage::Claimed => None,
            OriginationStage::Minted => Some(Step::Mint),
            OriginationStage::Approved => Some(Step::Approve),
            OriginationStage::PoolLoanCreated => Some(Step::CreateLoan),
            OriginationStage::Completed => Some(Step::Persist),
        }
    }
}

impl std::fmt::Display for OriginationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OriginationStage::Claimed => write!(f, "claimed"),
            OriginationStage::Minted => write!(f, "minted"),
            OriginationStage::Approved => write!(f, "approved"),
            OriginationStage::PoolLoanCreated => write!(f, "pool_loan_created"),
            OriginationStage::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    #[sea_orm(string_value = "in_flight")]
    InFlight,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "completed")]
    Completed,
}

/// Attempt as exposed on `GET /loans/attempts`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResponse {
    pub attempt_id: String,
    pub document_id: i32,
    pub stage: OriginationStage,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_step: Option<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_loan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub resume_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan_id: Option<i32>,
    pub steps: Vec<StepLogResponse>,
}

impl AttemptResponse {
    pub fn new(attempt: origination_attempts::Model, steps: Vec<step_log::Model>) -> Self {
        Self {
            last_successful_step: attempt.stage.last_successful_step(),
            attempt_id: attempt.id,
            document_id: attempt.document_id,
            stage: attempt.stage,
            status: attempt.status,
            token_id: attempt.token_id,
            chain_loan_id: attempt.chain_loan_id,
            pending_tx_hash: attempt.pending_tx_hash,
            error_code: attempt.error_code,
            error_message: attempt.error_message,
            resume_count: attempt.resume_count,
            loan_id: attempt.loan_id,
            steps: steps.into_iter().map(StepLogResponse::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepLogResponse {
    pub step: Step,
    pub outcome: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub detail: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub created_at: String,
}

impl From<step_log::Model> for StepLogResponse {
    fn from(entry: step_log::Model) -> Self {
        Self {
            step: entry.step,
            outcome: entry.outcome,
            tx_hash: entry.tx_hash,
            detail: entry.detail,
            error_code: entry.error_code,
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_steps_line_up() {
        // The step run from a stage is the step credited by the following stage
        let stages = [
            OriginationStage::Claimed,
            OriginationStage::Minted,
            OriginationStage::Approved,
            OriginationStage::PoolLoanCreated,
            OriginationStage::Completed,
        ];
        for pair in stages.windows(2) {
            assert_eq!(pair[0].next_step(), pair[1].last_successful_step());
        }
        assert_eq!(OriginationStage::Completed.next_step(), None);
        assert_eq!(OriginationStage::Claimed.last_successful_step(), None);
    }

    #[test]
    fn test_step_display_matches_serde() {
        let json = serde_json::to_string(&Step::CreateLoan).unwrap();
        assert_eq!(json, "\"create_loan\"");
        assert_eq!(Step::CreateLoan.to_string(), "create_loan");
    }
}

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::entities::loans;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    /// Originated on-chain, not yet funded
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "repaid")]
    Repaid,
    #[sea_orm(string_value = "overdue")]
    Overdue,
    #[sea_orm(string_value = "defaulted")]
    Defaulted,
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoanStatus::Pending => write!(f, "pending"),
            LoanStatus::Active => write!(f, "active"),
            LoanStatus::Repaid => write!(f, "repaid"),
            LoanStatus::Overdue => write!(f, "overdue"),
            LoanStatus::Defaulted => write!(f, "defaulted"),
        }
    }
}

impl FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(LoanStatus::Pending),
            "active" => Ok(LoanStatus::Active),
            "repaid" => Ok(LoanStatus::Repaid),
            "overdue" => Ok(LoanStatus::Overdue),
            "defaulted" => Ok(LoanStatus::Defaulted),
            _ => Err(format!("Unknown loan status: {}", s)),
        }
    }
}

/// Events that move a loan through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanEvent {
    Activate,
    ConfirmRepayment,
    MarkOverdue,
    MarkDefaulted,
}

impl std::fmt::Display for LoanEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoanEvent::Activate => write!(f, "activate"),
            LoanEvent::ConfirmRepayment => write!(f, "confirm_repayment"),
            LoanEvent::MarkOverdue => write!(f, "mark_overdue"),
            LoanEvent::MarkDefaulted => write!(f, "mark_defaulted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {event} a loan that is {from}")]
pub struct TransitionError {
    pub from: LoanStatus,
    pub event: LoanEvent,
}

impl LoanStatus {
    /// The only place loan status changes are decided.
    ///
    /// Pending → Active → Repaid, Active → Overdue → Defaulted. Everything
    /// else is rejected without touching the loan.
    pub fn transition(self, event: LoanEvent) -> Result<LoanStatus, TransitionError> {
        match (self, event) {
            (LoanStatus::Pending, LoanEvent::Activate) => Ok(LoanStatus::Active),
            (LoanStatus::Active, LoanEvent::ConfirmRepayment) => Ok(LoanStatus::Repaid),
            (LoanStatus::Active, LoanEvent::MarkOverdue) => Ok(LoanStatus::Overdue),
            (LoanStatus::Overdue, LoanEvent::MarkDefaulted) => Ok(LoanStatus::Defaulted),
            (from, event) => Err(TransitionError { from, event }),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LoanStatus::Repaid | LoanStatus::Defaulted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLoanRequest {
    pub document_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLoanResponse {
    pub loan_id: i32,
    pub on_chain_loan_id: String,
    pub token_id: String,
    pub tx_hash: String,
    pub attempt_id: String,
    pub principal_amount: Decimal,
    pub interest_amount: Decimal,
    pub total_repayment: Decimal,
    pub status: LoanStatus,
    pub due_date: String,
}

impl CreateLoanResponse {
    pub fn new(loan: &loans::Model, attempt_id: String) -> Self {
        Self {
            loan_id: loan.id,
            on_chain_loan_id: loan.chain_loan_id.clone().unwrap_or_default(),
            token_id: loan.nft_token_id.clone().unwrap_or_default(),
            tx_hash: loan.transaction_hash.clone().unwrap_or_default(),
            attempt_id,
            principal_amount: loan.principal_amount,
            interest_amount: loan.interest_amount,
            total_repayment: loan.total_repayment(),
            status: loan.status,
            due_date: loan.due_date.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateLoanResponse {
    pub loan_id: i32,
    pub activate_tx_hash: String,
    pub transfer_tx_hash: String,
    pub net_amount: Decimal,
    pub status: LoanStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRepaymentRequest {
    pub tx_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanResponse {
    pub id: i32,
    pub document_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_chain_loan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    pub principal_amount: Decimal,
    pub interest_amount: Decimal,
    pub total_repayment: Decimal,
    pub status: LoanStatus,
    pub due_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disbursement_tx_hash: Option<String>,
    pub created_at: String,
}

impl From<loans::Model> for LoanResponse {
    fn from(loan: loans::Model) -> Self {
        Self {
            total_repayment: loan.total_repayment(),
            id: loan.id,
            document_id: loan.document_id,
            on_chain_loan_id: loan.chain_loan_id,
            token_id: loan.nft_token_id,
            principal_amount: loan.principal_amount,
            interest_amount: loan.interest_amount,
            status: loan.status,
            due_date: loan.due_date.to_rfc3339(),
            tx_hash: loan.transaction_hash,
            activation_tx_hash: loan.activation_tx_hash,
            disbursement_tx_hash: loan.disbursement_tx_hash,
            created_at: loan.created_at.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert_eq!(LoanStatus::Pending.transition(LoanEvent::Activate), Ok(LoanStatus::Active));
        assert_eq!(
            LoanStatus::Active.transition(LoanEvent::ConfirmRepayment),
            Ok(LoanStatus::Repaid)
        );
        assert_eq!(LoanStatus::Active.transition(LoanEvent::MarkOverdue), Ok(LoanStatus::Overdue));
        assert_eq!(
            LoanStatus::Overdue.transition(LoanEvent::MarkDefaulted),
            Ok(LoanStatus::Defaulted)
        );
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let err = LoanStatus::Active.transition(LoanEvent::Activate).unwrap_err();
        assert_eq!(err.from, LoanStatus::Active);
        assert_eq!(err.event, LoanEvent::Activate);
        assert_eq!(err.to_string(), "cannot activate a loan that is active");

        assert!(LoanStatus::Pending.transition(LoanEvent::ConfirmRepayment).is_err());
        assert!(LoanStatus::Pending.transition(LoanEvent::MarkOverdue).is_err());
        assert!(LoanStatus::Overdue.transition(LoanEvent::ConfirmRepayment).is_err());
        assert!(LoanStatus::Repaid.transition(LoanEvent::MarkOverdue).is_err());
        assert!(LoanStatus::Defaulted.transition(LoanEvent::Activate).is_err());
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        assert_eq!("Overdue".parse::<LoanStatus>(), Ok(LoanStatus::Overdue));
        assert_eq!(LoanStatus::Defaulted.to_string(), "defaulted");
        assert!(LoanStatus::Repaid.is_terminal());
        assert!(!LoanStatus::Overdue.is_terminal());
    }
}

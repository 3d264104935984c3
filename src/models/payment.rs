use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Submission sent but its receipt was never observed
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Last submission reverted; the next notification sends it again
    #[sea_orm(string_value = "reverted")]
    Reverted,
    #[sea_orm(string_value = "submitted")]
    Submitted,
    /// Submission confirmed but the oracle payment id could not be read
    #[sea_orm(string_value = "id_unknown")]
    IdUnknown,
    #[sea_orm(string_value = "executed")]
    Executed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPaymentRequest {
    pub loan_id: i32,
    pub amount: Decimal,
    pub proof_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPaymentResponse {
    pub tx_hash: String,
    /// `null` when the oracle id could not be decoded
    pub payment_id: Option<String>,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePaymentResponse {
    pub tx_hash: String,
}

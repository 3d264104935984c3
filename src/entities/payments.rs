use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::payment::PaymentStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub loan_id: i32,
    #[sea_orm(column_type = "Decimal(Some((38, 8)))")]
    pub amount: Decimal,
    /// Off-chain reference as received from the payment webhook
    pub proof_reference: String,
    /// bytes32 submitted to the oracle, 0x hex
    pub proof_token: String,
    pub submit_tx_hash: String,
    /// Oracle payment id, `None` until decoded
    pub chain_payment_id: Option<String>,
    pub status: PaymentStatus,
    pub execute_tx_hash: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

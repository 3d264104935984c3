//! SeaORM Entity for origination attempts
//!
//! One row per document. The row is the durable state machine for the
//! mint → approve → createLoan → persist sequence.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::attempt::{AttemptStatus, OriginationStage};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "origination_attempts")]
pub struct Model {
    /// UUID v4
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub document_id: i32,
    pub user_id: i32,
    pub stage: OriginationStage,
    pub status: AttemptStatus,
    // Terms are frozen at first claim
    #[sea_orm(column_type = "Decimal(Some((38, 8)))")]
    pub principal_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((38, 8)))")]
    pub interest_amount: Decimal,
    pub due_date: DateTimeWithTimeZone,
    /// Tier ordinal, A = 1
    pub risk_tier: i16,
    pub trust_score: i32,
    pub token_id: Option<String>,
    pub chain_loan_id: Option<String>,
    pub mint_tx_hash: Option<String>,
    pub approve_tx_hash: Option<String>,
    pub create_loan_tx_hash: Option<String>,
    /// Hash of a step that was sent but never observed confirmed or reverted
    pub pending_tx_hash: Option<String>,
    pub error_code: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub resume_count: i32,
    pub loan_id: Option<i32>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

//! SeaORM Entity for loans
//!
//! A row exists only once the full origination sequence has succeeded, so
//! `chain_loan_id` and `nft_token_id` are always set together.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::loan::LoanStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "loans")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    #[sea_orm(unique)]
    pub document_id: i32,
    /// Lending pool's own loan id (decimal string)
    pub chain_loan_id: Option<String>,
    /// Collateral NFT token id (decimal string)
    pub nft_token_id: Option<String>,
    /// Last confirmed transaction affecting the loan
    pub transaction_hash: Option<String>,
    pub activation_tx_hash: Option<String>,
    pub disbursement_tx_hash: Option<String>,
    /// Submitted but unconfirmed activation step
    pub pending_tx_hash: Option<String>,
    /// Set while an activation holds the loan
    pub activation_claimed_at: Option<DateTimeWithTimeZone>,
    #[sea_orm(column_type = "Decimal(Some((38, 8)))")]
    pub principal_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((38, 8)))")]
    pub interest_amount: Decimal,
    pub due_date: DateTimeWithTimeZone,
    pub status: LoanStatus,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn total_repayment(&self) -> Decimal {
        self.principal_amount + self.interest_amount
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

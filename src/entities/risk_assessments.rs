use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::document::RiskTier;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "risk_assessments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub document_id: i32,
    pub tier: RiskTier,
    /// 0 to 100
    pub score: f64,
    pub approved_ltv: f64,
    pub interest_rate: f64,
    #[sea_orm(column_type = "JsonBinary")]
    pub ai_reasoning: Json,
    pub assessed_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

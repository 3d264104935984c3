//! SeaORM Entity for the append-only step log

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::attempt::{Flow, Step, StepOutcome};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "step_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub flow: Flow,
    /// Attempt id, loan id or payment reference depending on the flow
    pub reference: String,
    pub step: Step,
    pub outcome: StepOutcome,
    pub tx_hash: Option<String>,
    #[sea_orm(column_type = "JsonBinary")]
    pub detail: Json,
    pub error_code: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

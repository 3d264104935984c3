//! SeaORM Entity for uploaded financial documents
//!
//! Rows are written by the upload/extraction service and only read here.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::document::DocumentType;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "financial_documents")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub document_type: DocumentType,
    pub file_url: String,
    /// Hex SHA-256 of the file contents
    pub document_hash: String,
    /// Extraction output, shape owned by the AI service
    #[sea_orm(column_type = "JsonBinary")]
    pub extracted_data: Json,
    #[sea_orm(column_type = "Decimal(Some((38, 8)))")]
    pub verified_income_amount: Decimal,
    pub currency: String,
    pub uploaded_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

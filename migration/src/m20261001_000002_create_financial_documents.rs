use sea_orm_migration::{prelude::*, schema::*};

use super::m20261001_000001_create_users::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FinancialDocuments::Table)
                    .if_not_exists()
                    .col(pk_auto(FinancialDocuments::Id))
                    .col(integer(FinancialDocuments::UserId).not_null())
                    .col(string(FinancialDocuments::DocumentType).not_null())
                    .col(string(FinancialDocuments::FileUrl).not_null())
                    .col(string_len(FinancialDocuments::DocumentHash, 66).not_null())
                    .col(json_binary(FinancialDocuments::ExtractedData).default("{}"))
                    .col(decimal_len(FinancialDocuments::VerifiedIncomeAmount, 38, 8).default(0))
                    .col(string_len(FinancialDocuments::Currency, 8).default("VND"))
                    .col(
                        timestamp_with_time_zone(FinancialDocuments::UploadedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_financial_documents_user")
                            .from(FinancialDocuments::Table, FinancialDocuments::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_financial_documents_user")
                    .table(FinancialDocuments::Table)
                    .col(FinancialDocuments::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FinancialDocuments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum FinancialDocuments {
    Table,
    Id,
    UserId,
    DocumentType,
    FileUrl,
    DocumentHash,
    ExtractedData,
    VerifiedIncomeAmount,
    Currency,
    UploadedAt,
}

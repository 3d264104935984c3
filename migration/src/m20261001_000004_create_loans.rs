//! Loans produced by a completed origination sequence

use sea_orm_migration::{prelude::*, schema::*};

use super::m20261001_000001_create_users::Users;
use super::m20261001_000002_create_financial_documents::FinancialDocuments;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Loans::Table)
                    .if_not_exists()
                    .col(pk_auto(Loans::Id))
                    .col(integer(Loans::UserId).not_null())
                    // One loan per document
                    .col(integer(Loans::DocumentId).not_null().unique_key())
                    .col(string_null(Loans::ChainLoanId))
                    .col(string_null(Loans::NftTokenId))
                    .col(string_len_null(Loans::TransactionHash, 66))
                    .col(string_len_null(Loans::ActivationTxHash, 66))
                    .col(string_len_null(Loans::DisbursementTxHash, 66))
                    .col(string_len_null(Loans::PendingTxHash, 66))
                    .col(timestamp_with_time_zone_null(Loans::ActivationClaimedAt))
                    .col(decimal_len(Loans::PrincipalAmount, 38, 8).not_null())
                    .col(decimal_len(Loans::InterestAmount, 38, 8).not_null())
                    .col(timestamp_with_time_zone(Loans::DueDate).not_null())
                    .col(string(Loans::Status).not_null())
                    .col(timestamp_with_time_zone(Loans::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(Loans::UpdatedAt).default(Expr::current_timestamp()))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_loans_user")
                            .from(Loans::Table, Loans::UserId)
                            .to(Users::Table, Users::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_loans_document")
                            .from(Loans::Table, Loans::DocumentId)
                            .to(FinancialDocuments::Table, FinancialDocuments::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Status sweeps scan by status + due date
        manager
            .create_index(
                Index::create()
                    .name("idx_loans_status_due_date")
                    .table(Loans::Table)
                    .col(Loans::Status)
                    .col(Loans::DueDate)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Loans::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Loans {
    Table,
    Id,
    UserId,
    DocumentId,
    ChainLoanId,
    NftTokenId,
    TransactionHash,
    ActivationTxHash,
    DisbursementTxHash,
    PendingTxHash,
    ActivationClaimedAt,
    PrincipalAmount,
    InterestAmount,
    DueDate,
    Status,
    CreatedAt,
    UpdatedAt,
}

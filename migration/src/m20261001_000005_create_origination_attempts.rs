//! Durable state of each document's mint -> approve -> createLoan sequence.
//!
//! The unique document_id doubles as the per-document claim: a second
//! concurrent origination for the same document fails on insert.

use sea_orm_migration::{prelude::*, schema::*};

use super::m20261001_000002_create_financial_documents::FinancialDocuments;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OriginationAttempts::Table)
                    .if_not_exists()
                    .col(string_len(OriginationAttempts::Id, 36).primary_key())
                    .col(integer(OriginationAttempts::DocumentId).not_null().unique_key())
                    .col(integer(OriginationAttempts::UserId).not_null())
                    .col(string(OriginationAttempts::Stage).not_null())
                    .col(string(OriginationAttempts::Status).not_null())
                    .col(decimal_len(OriginationAttempts::PrincipalAmount, 38, 8).not_null())
                    .col(decimal_len(OriginationAttempts::InterestAmount, 38, 8).not_null())
                    .col(timestamp_with_time_zone(OriginationAttempts::DueDate).not_null())
                    .col(small_integer(OriginationAttempts::RiskTier).not_null())
                    .col(integer(OriginationAttempts::TrustScore).not_null())
                    .col(string_null(OriginationAttempts::TokenId))
                    .col(string_null(OriginationAttempts::ChainLoanId))
                    .col(string_len_null(OriginationAttempts::MintTxHash, 66))
                    .col(string_len_null(OriginationAttempts::ApproveTxHash, 66))
                    .col(string_len_null(OriginationAttempts::CreateLoanTxHash, 66))
                    .col(string_len_null(OriginationAttempts::PendingTxHash, 66))
                    .col(string_null(OriginationAttempts::ErrorCode))
                    .col(text_null(OriginationAttempts::ErrorMessage))
                    .col(integer(OriginationAttempts::ResumeCount).default(0))
                    .col(integer_null(OriginationAttempts::LoanId))
                    .col(
                        timestamp_with_time_zone(OriginationAttempts::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(OriginationAttempts::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_origination_attempts_document")
                            .from(OriginationAttempts::Table, OriginationAttempts::DocumentId)
                            .to(FinancialDocuments::Table, FinancialDocuments::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Reconciliation scans failed / stale attempts
        manager
            .create_index(
                Index::create()
                    .name("idx_origination_attempts_status")
                    .table(OriginationAttempts::Table)
                    .col(OriginationAttempts::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OriginationAttempts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OriginationAttempts {
    Table,
    Id,
    DocumentId,
    UserId,
    Stage,
    Status,
    PrincipalAmount,
    InterestAmount,
    DueDate,
    RiskTier,
    TrustScore,
    TokenId,
    ChainLoanId,
    MintTxHash,
    ApproveTxHash,
    CreateLoanTxHash,
    PendingTxHash,
    ErrorCode,
    ErrorMessage,
    ResumeCount,
    LoanId,
    CreatedAt,
    UpdatedAt,
}

use sea_orm_migration::{prelude::*, schema::*};

use super::m20261001_000004_create_loans::Loans;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Payments::Table)
                    .if_not_exists()
                    .col(pk_auto(Payments::Id))
                    .col(integer(Payments::LoanId).not_null())
                    .col(decimal_len(Payments::Amount, 38, 8).not_null())
                    .col(string(Payments::ProofReference).not_null())
                    .col(string_len(Payments::ProofToken, 66).not_null())
                    .col(string_len(Payments::SubmitTxHash, 66).not_null())
                    .col(string_null(Payments::ChainPaymentId))
                    .col(string(Payments::Status).not_null())
                    .col(string_len_null(Payments::ExecuteTxHash, 66))
                    .col(timestamp_with_time_zone(Payments::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp_with_time_zone(Payments::UpdatedAt).default(Expr::current_timestamp()))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payments_loan")
                            .from(Payments::Table, Payments::LoanId)
                            .to(Loans::Table, Loans::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_payments_chain_payment_id")
                    .table(Payments::Table)
                    .col(Payments::ChainPaymentId)
                    .to_owned(),
            )
            .await?;

        // Repeated notifications are matched by loan and bank reference
        manager
            .create_index(
                Index::create()
                    .name("idx_payments_loan_proof_reference")
                    .table(Payments::Table)
                    .col(Payments::LoanId)
                    .col(Payments::ProofReference)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Payments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Payments {
    Table,
    Id,
    LoanId,
    Amount,
    ProofReference,
    ProofToken,
    SubmitTxHash,
    ChainPaymentId,
    Status,
    ExecuteTxHash,
    CreatedAt,
    UpdatedAt,
}

//! Append-only log of every on-chain step outcome

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StepLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StepLog::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(string(StepLog::Flow).not_null())
                    .col(string(StepLog::Reference).not_null())
                    .col(string(StepLog::Step).not_null())
                    .col(string(StepLog::Outcome).not_null())
                    .col(string_len_null(StepLog::TxHash, 66))
                    .col(json_binary(StepLog::Detail).default("{}"))
                    .col(string_null(StepLog::ErrorCode))
                    .col(text_null(StepLog::ErrorMessage))
                    .col(timestamp_with_time_zone(StepLog::CreatedAt).default(Expr::current_timestamp()))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_step_log_flow_reference")
                    .table(StepLog::Table)
                    .col(StepLog::Flow)
                    .col(StepLog::Reference)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StepLog::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum StepLog {
    Table,
    Id,
    Flow,
    Reference,
    Step,
    Outcome,
    TxHash,
    Detail,
    ErrorCode,
    ErrorMessage,
    CreatedAt,
}

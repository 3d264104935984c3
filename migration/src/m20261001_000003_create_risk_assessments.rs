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
                    .table(RiskAssessments::Table)
                    .if_not_exists()
                    .col(pk_auto(RiskAssessments::Id))
                    .col(integer(RiskAssessments::DocumentId).not_null().unique_key())
                    .col(string_len(RiskAssessments::Tier, 1).not_null())
                    .col(double(RiskAssessments::Score).not_null())
                    .col(double(RiskAssessments::ApprovedLtv).not_null())
                    .col(double(RiskAssessments::InterestRate).not_null())
                    .col(json_binary(RiskAssessments::AiReasoning).default("{}"))
                    .col(
                        timestamp_with_time_zone(RiskAssessments::AssessedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_risk_assessments_document")
                            .from(RiskAssessments::Table, RiskAssessments::DocumentId)
                            .to(FinancialDocuments::Table, FinancialDocuments::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RiskAssessments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RiskAssessments {
    Table,
    Id,
    DocumentId,
    Tier,
    Score,
    ApprovedLtv,
    InterestRate,
    AiReasoning,
    AssessedAt,
}

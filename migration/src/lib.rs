pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_users;
mod m20261001_000002_create_financial_documents;
mod m20261001_000003_create_risk_assessments;
mod m20261001_000004_create_loans;
mod m20261001_000005_create_origination_attempts;
mod m20261001_000006_create_step_log;
mod m20261001_000007_create_payments;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_users::Migration),
            Box::new(m20261001_000002_create_financial_documents::Migration),
            Box::new(m20261001_000003_create_risk_assessments::Migration),
            Box::new(m20261001_000004_create_loans::Migration),
            Box::new(m20261001_000005_create_origination_attempts::Migration),
            Box::new(m20261001_000006_create_step_log::Migration),
            Box::new(m20261001_000007_create_payments::Migration),
        ]
    }
}

pub use super::financial_documents::Entity as FinancialDocuments;
pub use super::loans::Entity as Loans;
pub use super::origination_attempts::Entity as OriginationAttempts;
pub use super::payments::Entity as Payments;
pub use super::risk_assessments::Entity as RiskAssessments;
pub use super::step_log::Entity as StepLog;
pub use super::users::Entity as Users;

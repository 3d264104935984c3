use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::time::interval;

use crate::config::JobConfig;
use crate::error::{OrchestrationError, ValidationError};
use crate::models::loan::{LoanEvent, LoanStatus};
use crate::services::loan_orchestrator::LoanOrchestrator;
use crate::services::repository::LoanRepository;

pub async fn start_loan_status_job(
    repo: Arc<dyn LoanRepository>,
    loans: Arc<LoanOrchestrator>,
    config: JobConfig,
) {
    tokio::spawn(async move {
        let mut interval = interval(config.loan_status_interval);

        loop {
            interval.tick().await;
            tracing::debug!("Starting loan status sync");

            match sync_loan_statuses(repo.as_ref(), &loans, config.default_grace_days, Utc::now())
                .await
            {
                Ok((overdue, defaulted)) if overdue + defaulted > 0 => {
                    tracing::info!(overdue, defaulted, "Loan status sync complete");
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Failed to sync loan statuses: {}", e),
            }
        }
    });
}

/// Moves active loans past their due date to overdue, and overdue loans past
/// the grace period to defaulted. Returns (overdue, defaulted) counts. A loan
/// another writer moved in the meantime is skipped.
pub async fn sync_loan_statuses(
    repo: &dyn LoanRepository,
    loans: &LoanOrchestrator,
    grace_days: i64,
    now: DateTime<Utc>,
) -> Result<(usize, usize), Box<dyn std::error::Error + Send + Sync>> {
    let mut overdue = 0;
    for loan in repo.list_loans_by_status(LoanStatus::Active).await? {
        if loan.due_date.with_timezone(&Utc) < now {
            if apply_unless_moved(loans, loan, LoanEvent::MarkOverdue).await? {
                overdue += 1;
            }
        }
    }

    let grace = Duration::days(grace_days);
    let mut defaulted = 0;
    for loan in repo.list_loans_by_status(LoanStatus::Overdue).await? {
        if loan.due_date.with_timezone(&Utc) + grace < now {
            if apply_unless_moved(loans, loan, LoanEvent::MarkDefaulted).await? {
                defaulted += 1;
            }
        }
    }

    Ok((overdue, defaulted))
}

async fn apply_unless_moved(
    loans: &LoanOrchestrator,
    loan: crate::entities::loans::Model,
    event: LoanEvent,
) -> Result<bool, OrchestrationError> {
    let loan_id = loan.id;
    match loans.apply_event(loan, event).await {
        Ok(_) => Ok(true),
        Err(OrchestrationError::Validation(ValidationError::IllegalTransition(e))) => {
            tracing::debug!(loan_id, "Skipping loan status sync: {}", e);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

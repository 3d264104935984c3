use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::interval;

use crate::config::JobConfig;
use crate::models::attempt::AttemptStatus;
use crate::models::payment::PaymentStatus;
use crate::services::loan_orchestrator::LoanOrchestrator;
use crate::services::payment_confirmation::PaymentOrchestrator;
use crate::services::repository::LoanRepository;
use crate::services::step_executor::is_retryable_code;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub expired: usize,
    pub resumed: usize,
    pub resume_failures: usize,
    pub payment_ids_recovered: usize,
    pub pending_payments_resolved: usize,
}

pub async fn start_reconciliation_job(
    repo: Arc<dyn LoanRepository>,
    loans: Arc<LoanOrchestrator>,
    payments: Arc<PaymentOrchestrator>,
    config: JobConfig,
) {
    tokio::spawn(async move {
        let mut interval = interval(config.reconciliation_interval);

        loop {
            // First tick completes immediately, so this also runs on startup
            interval.tick().await;
            tracing::debug!("Starting reconciliation pass");

            match reconcile(repo.as_ref(), &loans, &payments, &config, Utc::now()).await {
                Ok(report) if report != ReconciliationReport::default() => {
                    tracing::info!(
                        expired = report.expired,
                        resumed = report.resumed,
                        resume_failures = report.resume_failures,
                        payment_ids_recovered = report.payment_ids_recovered,
                        pending_payments_resolved = report.pending_payments_resolved,
                        "Reconciliation pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Reconciliation pass failed: {}", e),
            }
        }
    });
}

/// One reconciliation pass:
/// - in-flight attempts abandoned by a crashed process are marked failed
/// - failed attempts with a retryable cause are resumed, up to `max_auto_resumes`
/// - payments stored without an oracle id get their receipt re-read
/// - payment submissions and executions whose receipt was never observed are
///   looked up and settled
pub async fn reconcile(
    repo: &dyn LoanRepository,
    loans: &LoanOrchestrator,
    payments: &PaymentOrchestrator,
    config: &JobConfig,
    now: DateTime<Utc>,
) -> Result<ReconciliationReport, Box<dyn std::error::Error + Send + Sync>> {
    let mut report = ReconciliationReport::default();

    let stale_after = chrono::Duration::from_std(config.stale_attempt_after)?;
    let expired = repo.expire_stale_attempts(now - stale_after).await?;
    for attempt in &expired {
        tracing::warn!(
            attempt_id = %attempt.id,
            document_id = attempt.document_id,
            stage = %attempt.stage,
            "Expired stale origination attempt"
        );
    }
    report.expired = expired.len();

    let failed = repo.list_attempts_by_status(AttemptStatus::Failed).await?;
    for attempt in failed {
        let retryable = attempt.error_code.as_deref().is_some_and(is_retryable_code);
        if !retryable || attempt.resume_count >= config.max_auto_resumes {
            continue;
        }

        tracing::info!(
            attempt_id = %attempt.id,
            resume_count = attempt.resume_count,
            error_code = ?attempt.error_code,
            "Auto-resuming origination attempt"
        );
        match loans.resume_attempt(&attempt.id, None).await {
            Ok(origination) => {
                report.resumed += 1;
                tracing::info!(
                    attempt_id = %origination.attempt_id,
                    loan_id = origination.loan.id,
                    "Auto-resumed attempt completed"
                );
            }
            Err(e) => {
                report.resume_failures += 1;
                tracing::warn!(attempt_id = %attempt.id, error = %e, "Auto-resume failed");
            }
        }
    }

    let unknown = repo.list_payments_by_status(PaymentStatus::IdUnknown).await?;
    for record in unknown {
        let record_id = record.id;
        match payments.lookup_payment_id(record).await {
            Ok(Some(_)) => report.payment_ids_recovered += 1,
            Ok(None) => {
                tracing::debug!(payment_record_id = record_id, "Payment id still unknown");
            }
            Err(e) => {
                tracing::warn!(payment_record_id = record_id, error = %e, "Payment id lookup failed");
            }
        }
    }

    let pending = repo.list_payments_by_status(PaymentStatus::Pending).await?;
    for record in pending {
        let record_id = record.id;
        match payments.resolve_pending_submission(record).await {
            Ok(Some(_)) => report.pending_payments_resolved += 1,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(payment_record_id = record_id, error = %e, "Pending payment lookup failed");
            }
        }
    }

    let executing = repo
        .list_payments_by_status(PaymentStatus::Submitted)
        .await?
        .into_iter()
        .filter(|p| p.execute_tx_hash.is_some());
    for record in executing {
        let record_id = record.id;
        match payments.resolve_pending_execution(record).await {
            Ok(Some(_)) => report.pending_payments_resolved += 1,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(payment_record_id = record_id, error = %e, "Pending execution lookup failed");
            }
        }
    }

    Ok(report)
}

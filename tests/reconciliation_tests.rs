mod common;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use std::time::Duration;

use mantleflow_backend::config::JobConfig;
use mantleflow_backend::jobs::reconciliation_sync::reconcile;
use mantleflow_backend::models::attempt::{AttemptStatus, Step};
use mantleflow_backend::models::payment::PaymentStatus;
use mantleflow_backend::services::repository::{LoanRepository, NewAttempt};

use crate::common::{Fault, TestContext};

fn job_config(max_auto_resumes: i32) -> JobConfig {
    JobConfig {
        reconciliation_interval: Duration::from_secs(60),
        loan_status_interval: Duration::from_secs(3600),
        stale_attempt_after: Duration::from_secs(900),
        max_auto_resumes,
        default_grace_days: 30,
    }
}

#[tokio::test]
async fn test_retryable_failure_is_resumed_automatically() {
    let ctx = TestContext::new();
    let (user, document) = ctx.seed_borrower();
    ctx.chain.fail_next(Step::Approve, Fault::SubmitFails);
    ctx.state.loans.create_loan(document.id, user.id).await.unwrap_err();

    let report = reconcile(
        &ctx.repo,
        &ctx.state.loans,
        &ctx.state.payments,
        &job_config(3),
        Utc::now(),
    )
    .await
    .unwrap();

    assert_eq!(report.resumed, 1);
    assert_eq!(report.resume_failures, 0);
    assert!(ctx.repo.find_loan_by_document(document.id).await.unwrap().is_some());
    assert_eq!(
        ctx.chain.sent_steps(),
        vec![Step::Mint, Step::Approve, Step::CreateLoan]
    );
}

#[tokio::test]
async fn test_non_retryable_and_exhausted_attempts_are_left_alone() {
    let ctx = TestContext::new();
    let (user, document) = ctx.seed_borrower();
    ctx.chain.fail_next(Step::Mint, Fault::Reverts);
    ctx.state.loans.create_loan(document.id, user.id).await.unwrap_err();

    let other = ctx
        .repo
        .insert_document(user.id, document.document_type, &document.document_hash, dec!(40));
    ctx.chain.fail_next(Step::Mint, Fault::SubmitFails);
    ctx.state.loans.create_loan(other.id, user.id).await.unwrap_err();

    let report = reconcile(
        &ctx.repo,
        &ctx.state.loans,
        &ctx.state.payments,
        &job_config(0),
        Utc::now(),
    )
    .await
    .unwrap();

    assert_eq!(report.resumed, 0);
    assert_eq!(report.resume_failures, 0);
    let failed = ctx
        .repo
        .list_attempts_by_status(AttemptStatus::Failed)
        .await
        .unwrap();
    assert_eq!(failed.len(), 2);
}

#[tokio::test]
async fn test_abandoned_in_flight_attempt_is_expired_and_resumed() {
    let ctx = TestContext::new();
    let (user, document) = ctx.seed_borrower();
    let now = Utc::now();

    // A process died right after claiming the document
    let attempt = ctx
        .repo
        .claim_document(NewAttempt {
            id: "abandoned".to_string(),
            document_id: document.id,
            user_id: user.id,
            principal_amount: dec!(100),
            interest_amount: dec!(5),
            due_date: now + ChronoDuration::days(30),
            risk_tier: 1,
            trust_score: 85,
        })
        .await
        .unwrap()
        .into_attempt();
    ctx.repo.backdate_attempt(&attempt.id, now - ChronoDuration::hours(1));

    let report = reconcile(
        &ctx.repo,
        &ctx.state.loans,
        &ctx.state.payments,
        &job_config(3),
        now,
    )
    .await
    .unwrap();

    assert_eq!(report.expired, 1);
    assert_eq!(report.resumed, 1);
    let attempt = ctx.repo.find_attempt("abandoned").await.unwrap().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Completed);
    assert_eq!(attempt.resume_count, 1);
}

#[tokio::test]
async fn test_recent_in_flight_attempt_is_not_expired() {
    let ctx = TestContext::new();
    let (user, document) = ctx.seed_borrower();
    let now = Utc::now();

    ctx.repo
        .claim_document(NewAttempt {
            id: "busy".to_string(),
            document_id: document.id,
            user_id: user.id,
            principal_amount: dec!(100),
            interest_amount: dec!(5),
            due_date: now + ChronoDuration::days(30),
            risk_tier: 1,
            trust_score: 85,
        })
        .await
        .unwrap();

    let report = reconcile(
        &ctx.repo,
        &ctx.state.loans,
        &ctx.state.payments,
        &job_config(3),
        now,
    )
    .await
    .unwrap();

    assert_eq!(report.expired, 0);
    let attempt = ctx.repo.find_attempt("busy").await.unwrap().unwrap();
    assert_eq!(attempt.status, AttemptStatus::InFlight);
    assert!(ctx.chain.sent_steps().is_empty());
}

#[tokio::test]
async fn test_unknown_payment_ids_are_recovered() {
    let ctx = TestContext::new();
    let (user, document) = ctx.seed_borrower();
    let loan = ctx.state.loans.create_loan(document.id, user.id).await.unwrap().loan;

    ctx.chain.omit_event(Step::SubmitPayment);
    ctx.state
        .payments
        .submit_payment(loan.id, dec!(10), "late-event")
        .await
        .unwrap_err();
    ctx.chain.backfill_events(Step::SubmitPayment);

    let report = reconcile(
        &ctx.repo,
        &ctx.state.loans,
        &ctx.state.payments,
        &job_config(3),
        Utc::now(),
    )
    .await
    .unwrap();

    assert_eq!(report.payment_ids_recovered, 1);
    let unknown = ctx
        .repo
        .list_payments_by_status(PaymentStatus::IdUnknown)
        .await
        .unwrap();
    assert!(unknown.is_empty());
}

#[tokio::test]
async fn test_pending_payment_transactions_are_settled() {
    let ctx = TestContext::new();
    let (user, document) = ctx.seed_borrower();
    let loan = ctx.state.loans.create_loan(document.id, user.id).await.unwrap().loan;

    let executed = ctx
        .state
        .payments
        .submit_payment(loan.id, dec!(25), "exec-pending")
        .await
        .unwrap();
    ctx.chain.fail_next(Step::ExecutePayment, Fault::TimeoutLost);
    ctx.state
        .payments
        .execute_payment(executed.payment_id)
        .await
        .unwrap_err();

    ctx.chain.fail_next(Step::SubmitPayment, Fault::TimeoutLost);
    ctx.state
        .payments
        .submit_payment(loan.id, dec!(10), "submit-pending")
        .await
        .unwrap_err();

    // Neither transaction has been mined yet
    let report = reconcile(
        &ctx.repo,
        &ctx.state.loans,
        &ctx.state.payments,
        &job_config(3),
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(report.pending_payments_resolved, 0);

    ctx.chain.mine_hidden();
    let report = reconcile(
        &ctx.repo,
        &ctx.state.loans,
        &ctx.state.payments,
        &job_config(3),
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(report.pending_payments_resolved, 2);

    let submitted = ctx
        .repo
        .find_payment_by_reference(loan.id, "submit-pending")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(submitted.status, PaymentStatus::Submitted);
    assert!(submitted.chain_payment_id.is_some());

    let executed = ctx
        .repo
        .find_payment_by_chain_id(&executed.payment_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(executed.status, PaymentStatus::Executed);
    assert_eq!(
        ctx.chain.sent_steps().into_iter().filter(|s| *s == Step::ExecutePayment).count(),
        1
    );
}

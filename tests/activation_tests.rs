mod common;

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use std::str::FromStr;

use mantleflow_backend::error::{OrchestrationError, ValidationError};
use mantleflow_backend::jobs::loan_status_sync::sync_loan_statuses;
use mantleflow_backend::models::attempt::{Flow, Step, StepOutcome};
use mantleflow_backend::models::loan::{LoanEvent, LoanStatus};
use mantleflow_backend::services::chain::IERC20;
use mantleflow_backend::services::repository::LoanRepository;

use crate::common::{Fault, TestContext, BORROWER_WALLET};

const REPAYMENT_TX: &str = "0xabababababababababababababababababababababababababababababababab";

async fn pending_loan(ctx: &TestContext) -> (i32, i32) {
    let (user, document) = ctx.seed_borrower();
    let origination = ctx.state.loans.create_loan(document.id, user.id).await.unwrap();
    (user.id, origination.loan.id)
}

#[tokio::test]
async fn test_activation_disburses_net_amount_to_wallet() {
    let ctx = TestContext::new();
    let (user_id, loan_id) = pending_loan(&ctx).await;

    let activation = ctx.state.loans.activate_loan(loan_id, user_id).await.unwrap();

    assert_eq!(activation.net_amount, dec!(99));
    assert_eq!(activation.loan.status, LoanStatus::Active);
    assert_eq!(
        activation.loan.activation_tx_hash.as_deref(),
        Some(activation.activate_tx_hash.as_str())
    );
    assert_eq!(
        activation.loan.disbursement_tx_hash.as_deref(),
        Some(activation.transfer_tx_hash.as_str())
    );

    let sent = ctx.chain.sent();
    let steps: Vec<Step> = sent.iter().map(|c| c.step).collect();
    assert_eq!(&steps[3..], &[Step::Activate, Step::Transfer]);

    let transfer = IERC20::transferCall::abi_decode(&sent[4].input, true).unwrap();
    assert_eq!(transfer.to, Address::from_str(BORROWER_WALLET).unwrap());
    assert_eq!(transfer.value, U256::from(99u64) * U256::from(10u64).pow(U256::from(18u64)));
    assert_eq!(sent[4].to, common::contracts().currency_token);
}

#[tokio::test]
async fn test_failed_transfer_is_partial_and_retry_skips_activate() {
    let ctx = TestContext::new();
    let (user_id, loan_id) = pending_loan(&ctx).await;
    ctx.chain.fail_next(Step::Transfer, Fault::SubmitFails);

    let err = ctx.state.loans.activate_loan(loan_id, user_id).await.unwrap_err();
    let partial = match err {
        OrchestrationError::PartialActivation(partial) => partial,
        other => panic!("expected partial activation, got {:?}", other),
    };
    assert_eq!(partial.loan_id, loan_id);
    assert_eq!(partial.cause.step, Step::Transfer);

    let loan = ctx.repo.find_loan(loan_id).await.unwrap().unwrap();
    assert_eq!(loan.status, LoanStatus::Pending);
    assert_eq!(loan.activation_tx_hash.as_deref(), Some(partial.activate_tx_hash.as_str()));
    assert_eq!(loan.disbursement_tx_hash, None);

    let activation = ctx.state.loans.activate_loan(loan_id, user_id).await.unwrap();
    assert_eq!(activation.activate_tx_hash, partial.activate_tx_hash);
    let activates = ctx.chain.sent_steps().into_iter().filter(|s| *s == Step::Activate).count();
    assert_eq!(activates, 1);

    let steps = ctx
        .repo
        .list_steps(Flow::Activation, &loan_id.to_string())
        .await
        .unwrap();
    let outcomes: Vec<(Step, StepOutcome)> = steps.iter().map(|s| (s.step, s.outcome)).collect();
    assert_eq!(
        outcomes,
        vec![
            (Step::Activate, StepOutcome::Succeeded),
            (Step::Transfer, StepOutcome::Failed),
            (Step::Transfer, StepOutcome::Succeeded),
        ]
    );
}

#[tokio::test]
async fn test_reverted_activation_leaves_loan_pending() {
    let ctx = TestContext::new();
    let (user_id, loan_id) = pending_loan(&ctx).await;
    ctx.chain.fail_next(Step::Activate, Fault::Reverts);

    let err = ctx.state.loans.activate_loan(loan_id, user_id).await.unwrap_err();
    match err {
        OrchestrationError::Step(step) => {
            assert_eq!(step.step, Step::Activate);
            assert_eq!(step.code(), "CHAIN_REVERTED");
        }
        other => panic!("expected a step error, got {:?}", other),
    }

    let loan = ctx.repo.find_loan(loan_id).await.unwrap().unwrap();
    assert_eq!(loan.status, LoanStatus::Pending);
    assert_eq!(loan.activation_tx_hash, None);
    assert!(!ctx.chain.sent_steps().contains(&Step::Transfer));
}

#[tokio::test]
async fn test_activation_rejects_wrong_state_and_owner() {
    let ctx = TestContext::new();
    let (user_id, loan_id) = pending_loan(&ctx).await;

    let err = ctx.state.loans.activate_loan(loan_id, user_id + 100).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation(ValidationError::LoanNotFound(_))));

    ctx.state.loans.activate_loan(loan_id, user_id).await.unwrap();
    let sent_before = ctx.chain.sent().len();
    let err = ctx.state.loans.activate_loan(loan_id, user_id).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation(ValidationError::IllegalTransition(_))));
    assert_eq!(ctx.chain.sent().len(), sent_before);
}

#[tokio::test]
async fn test_confirm_repayment_only_from_active() {
    let ctx = TestContext::new();
    let (user_id, loan_id) = pending_loan(&ctx).await;

    let err = ctx
        .state
        .loans
        .confirm_repayment(loan_id, user_id, REPAYMENT_TX)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation(ValidationError::IllegalTransition(_))));

    ctx.state.loans.activate_loan(loan_id, user_id).await.unwrap();

    let err = ctx
        .state
        .loans
        .confirm_repayment(loan_id, user_id, "0x12")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation(ValidationError::InvalidTxHash(_))));

    let loan = ctx
        .state
        .loans
        .confirm_repayment(loan_id, user_id, REPAYMENT_TX)
        .await
        .unwrap();
    assert_eq!(loan.status, LoanStatus::Repaid);
    assert_eq!(loan.transaction_hash.as_deref(), Some(REPAYMENT_TX));
}

#[tokio::test]
async fn test_stale_status_change_cannot_overwrite_repayment() {
    let ctx = TestContext::new();
    let (user_id, loan_id) = pending_loan(&ctx).await;
    ctx.state.loans.activate_loan(loan_id, user_id).await.unwrap();

    // Read by the status sweep before the borrower repaid
    let stale = ctx.repo.find_loan(loan_id).await.unwrap().unwrap();
    ctx.state
        .loans
        .confirm_repayment(loan_id, user_id, REPAYMENT_TX)
        .await
        .unwrap();

    let err = ctx
        .state
        .loans
        .apply_event(stale, LoanEvent::MarkOverdue)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::Validation(ValidationError::IllegalTransition(e)) if e.from == LoanStatus::Repaid
    ));

    let loan = ctx.repo.find_loan(loan_id).await.unwrap().unwrap();
    assert_eq!(loan.status, LoanStatus::Repaid);
    assert_eq!(loan.transaction_hash.as_deref(), Some(REPAYMENT_TX));
}

#[tokio::test]
async fn test_concurrent_activations_disburse_once() {
    let ctx = TestContext::new();
    let (user_id, loan_id) = pending_loan(&ctx).await;

    let (first, second) = tokio::join!(
        ctx.state.loans.activate_loan(loan_id, user_id),
        ctx.state.loans.activate_loan(loan_id, user_id),
    );

    assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
    let rejected = first.as_ref().err().or(second.as_ref().err()).unwrap();
    assert!(matches!(
        rejected,
        OrchestrationError::Validation(ValidationError::ActivationInProgress(id)) if *id == loan_id
    ));
    assert_eq!(ctx.chain.sent_count(Step::Activate), 1);
    assert_eq!(ctx.chain.sent_count(Step::Transfer), 1);

    let loan = ctx.repo.find_loan(loan_id).await.unwrap().unwrap();
    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(loan.activation_claimed_at, None);

    // Once active, a repeat is an illegal transition rather than a busy loan
    let err = ctx.state.loans.activate_loan(loan_id, user_id).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation(ValidationError::IllegalTransition(_))));
}

#[tokio::test]
async fn test_failed_activation_releases_claim() {
    let ctx = TestContext::new();
    let (user_id, loan_id) = pending_loan(&ctx).await;
    ctx.chain.fail_next(Step::Activate, Fault::SubmitFails);

    ctx.state.loans.activate_loan(loan_id, user_id).await.unwrap_err();
    let loan = ctx.repo.find_loan(loan_id).await.unwrap().unwrap();
    assert_eq!(loan.status, LoanStatus::Pending);
    assert_eq!(loan.activation_claimed_at, None);

    let activation = ctx.state.loans.activate_loan(loan_id, user_id).await.unwrap();
    assert_eq!(activation.loan.status, LoanStatus::Active);
}

#[tokio::test]
async fn test_status_sync_marks_overdue_then_defaulted() {
    let ctx = TestContext::new();
    let (user_id, loan_id) = pending_loan(&ctx).await;
    ctx.state.loans.activate_loan(loan_id, user_id).await.unwrap();

    let now = Utc::now();
    let mut loan = ctx.repo.find_loan(loan_id).await.unwrap().unwrap();
    loan.due_date = (now - Duration::days(1)).into();
    ctx.repo.update_loan(loan, LoanStatus::Active).await.unwrap();

    let counts = sync_loan_statuses(&ctx.repo, &ctx.state.loans, 30, now).await.unwrap();
    assert_eq!(counts, (1, 0));
    let loan = ctx.repo.find_loan(loan_id).await.unwrap().unwrap();
    assert_eq!(loan.status, LoanStatus::Overdue);

    // Still inside the grace period
    let counts = sync_loan_statuses(&ctx.repo, &ctx.state.loans, 30, now).await.unwrap();
    assert_eq!(counts, (0, 0));

    let later = now + Duration::days(31);
    let counts = sync_loan_statuses(&ctx.repo, &ctx.state.loans, 30, later).await.unwrap();
    assert_eq!(counts, (0, 1));
    let loan = ctx.repo.find_loan(loan_id).await.unwrap().unwrap();
    assert_eq!(loan.status, LoanStatus::Defaulted);

    let err = ctx
        .state
        .loans
        .confirm_repayment(loan_id, user_id, REPAYMENT_TX)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation(ValidationError::IllegalTransition(_))));
}

#[tokio::test]
async fn test_status_sync_ignores_pending_and_current_loans() {
    let ctx = TestContext::new();
    let (_, loan_id) = pending_loan(&ctx).await;

    let counts = sync_loan_statuses(&ctx.repo, &ctx.state.loans, 30, Utc::now() + Duration::days(90))
        .await
        .unwrap();
    assert_eq!(counts, (0, 0));
    let loan = ctx.repo.find_loan(loan_id).await.unwrap().unwrap();
    assert_eq!(loan.status, LoanStatus::Pending);
}

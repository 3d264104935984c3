mod common;

use alloy::primitives::U256;
use alloy::sol_types::SolCall;
use rust_decimal_macros::dec;

use mantleflow_backend::error::ValidationError;
use mantleflow_backend::models::attempt::{Flow, Step, StepOutcome};
use mantleflow_backend::models::payment::PaymentStatus;
use mantleflow_backend::services::chain::IPaymentOracle;
use mantleflow_backend::services::loan_policy::proof_token;
use mantleflow_backend::services::payment_confirmation::PaymentError;
use mantleflow_backend::services::repository::LoanRepository;

use crate::common::{Fault, TestContext};

async fn originated_loan(ctx: &TestContext) -> i32 {
    let (user, document) = ctx.seed_borrower();
    ctx.state
        .loans
        .create_loan(document.id, user.id)
        .await
        .unwrap()
        .loan
        .id
}

#[tokio::test]
async fn test_submit_payment_records_oracle_id() {
    let ctx = TestContext::new();
    let loan_id = originated_loan(&ctx).await;

    let submitted = ctx
        .state
        .payments
        .submit_payment(loan_id, dec!(52.5), "INV-2024-001")
        .await
        .unwrap();

    assert_eq!(submitted.payment_id, U256::from(1));
    let record = submitted.record.unwrap();
    assert_eq!(record.status, PaymentStatus::Submitted);
    assert_eq!(record.chain_payment_id.as_deref(), Some("1"));
    assert_eq!(record.submit_tx_hash, submitted.tx_hash);

    let sent = ctx.chain.sent();
    let call = sent.last().unwrap();
    assert_eq!(call.step, Step::SubmitPayment);
    let decoded = IPaymentOracle::submitPaymentCall::abi_decode(&call.input, true).unwrap();
    assert_eq!(decoded.loanId, U256::from(1));
    assert_eq!(decoded.amount, U256::from(525u64) * U256::from(10u64).pow(U256::from(17u64)));
    assert_eq!(decoded.proof, proof_token("INV-2024-001"));

    let steps = ctx.repo.list_steps(Flow::Payment, "INV-2024-001").await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].outcome, StepOutcome::Succeeded);
}

#[tokio::test]
async fn test_submit_payment_validates_before_sending() {
    let ctx = TestContext::new();
    let loan_id = originated_loan(&ctx).await;
    let sent_before = ctx.chain.sent().len();

    let err = ctx
        .state
        .payments
        .submit_payment(loan_id, dec!(0), "ref")
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(ValidationError::NonPositiveAmount(_))));

    let err = ctx
        .state
        .payments
        .submit_payment(loan_id + 1000, dec!(10), "ref")
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(ValidationError::LoanNotFound(_))));

    assert_eq!(ctx.chain.sent().len(), sent_before);
}

#[tokio::test]
async fn test_missing_payment_event_is_reported_as_id_unknown() {
    let ctx = TestContext::new();
    let loan_id = originated_loan(&ctx).await;
    ctx.chain.omit_event(Step::SubmitPayment);

    let err = ctx
        .state
        .payments
        .submit_payment(loan_id, dec!(10), "0xfeed")
        .await
        .unwrap_err();
    let (tx_hash, record_id) = match err {
        PaymentError::PaymentIdUnknown {
            tx_hash,
            payment_record_id,
        } => (tx_hash, payment_record_id),
        other => panic!("expected PaymentIdUnknown, got {:?}", other),
    };
    assert!(record_id.is_some());

    let unknown = ctx
        .repo
        .list_payments_by_status(PaymentStatus::IdUnknown)
        .await
        .unwrap();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].submit_tx_hash, tx_hash);
    assert_eq!(unknown[0].chain_payment_id, None);

    // Nothing to recover while the receipt has no event
    let record = unknown[0].clone();
    assert!(ctx.state.payments.lookup_payment_id(record.clone()).await.unwrap().is_none());

    ctx.chain.backfill_events(Step::SubmitPayment);
    let recovered = ctx.state.payments.lookup_payment_id(record).await.unwrap().unwrap();
    assert_eq!(recovered.status, PaymentStatus::Submitted);
    assert!(recovered.chain_payment_id.is_some());
}

#[tokio::test]
async fn test_repeat_after_landed_timeout_reuses_transaction() {
    let ctx = TestContext::new();
    let loan_id = originated_loan(&ctx).await;
    ctx.chain.fail_next(Step::SubmitPayment, Fault::TimeoutLanded);

    let err = ctx
        .state
        .payments
        .submit_payment(loan_id, dec!(10), "BANK-1")
        .await
        .unwrap_err();
    assert!(matches!(&err, PaymentError::Submit(cause) if cause.ambiguous_tx().is_some()));

    let pending = ctx
        .repo
        .find_payment_by_reference(loan_id, "BANK-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.status, PaymentStatus::Pending);

    let submitted = ctx
        .state
        .payments
        .submit_payment(loan_id, dec!(10), "BANK-1")
        .await
        .unwrap();
    assert_eq!(ctx.chain.sent_count(Step::SubmitPayment), 1);
    assert_eq!(submitted.tx_hash, pending.submit_tx_hash);
    assert_eq!(submitted.payment_id, U256::from(1));
    let record = submitted.record.unwrap();
    assert_eq!(record.id, pending.id);
    assert_eq!(record.status, PaymentStatus::Submitted);

    // Later repeats return the stored submission
    let again = ctx
        .state
        .payments
        .submit_payment(loan_id, dec!(10), "BANK-1")
        .await
        .unwrap();
    assert_eq!(again.tx_hash, submitted.tx_hash);
    assert_eq!(again.payment_id, submitted.payment_id);
    assert_eq!(ctx.chain.sent_count(Step::SubmitPayment), 1);
}

#[tokio::test]
async fn test_repeat_while_unconfirmed_sends_nothing() {
    let ctx = TestContext::new();
    let loan_id = originated_loan(&ctx).await;
    ctx.chain.fail_next(Step::SubmitPayment, Fault::TimeoutLost);

    ctx.state
        .payments
        .submit_payment(loan_id, dec!(10), "BANK-2")
        .await
        .unwrap_err();

    let err = ctx
        .state
        .payments
        .submit_payment(loan_id, dec!(10), "BANK-2")
        .await
        .unwrap_err();
    match err {
        PaymentError::Submit(cause) => assert_eq!(cause.code(), "STILL_UNCONFIRMED"),
        other => panic!("expected a submission error, got {:?}", other),
    }
    assert_eq!(ctx.chain.sent_count(Step::SubmitPayment), 1);

    ctx.chain.mine_hidden();
    let submitted = ctx
        .state
        .payments
        .submit_payment(loan_id, dec!(10), "BANK-2")
        .await
        .unwrap();
    assert_eq!(submitted.payment_id, U256::from(1));
    assert_eq!(ctx.chain.sent_count(Step::SubmitPayment), 1);
}

#[tokio::test]
async fn test_confirmed_submission_survives_record_store_failure() {
    let ctx = TestContext::new();
    let loan_id = originated_loan(&ctx).await;
    ctx.repo.fail_payment_writes(1);

    let submitted = ctx
        .state
        .payments
        .submit_payment(loan_id, dec!(15), "BANK-3")
        .await
        .unwrap();

    assert_eq!(submitted.payment_id, U256::from(1));
    assert!(submitted.record.is_none());
    let sent = ctx.chain.sent();
    assert_eq!(
        submitted.tx_hash,
        format!("0x{}", hex::encode(sent.last().unwrap().tx_hash))
    );

    let steps = ctx.repo.list_steps(Flow::Payment, "BANK-3").await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].outcome, StepOutcome::Succeeded);
    assert_eq!(steps[0].tx_hash.as_deref(), Some(submitted.tx_hash.as_str()));
}

#[tokio::test]
async fn test_execute_after_timeout_is_not_resent() {
    let ctx = TestContext::new();
    let loan_id = originated_loan(&ctx).await;
    let submitted = ctx
        .state
        .payments
        .submit_payment(loan_id, dec!(20), "BANK-4")
        .await
        .unwrap();
    ctx.chain.fail_next(Step::ExecutePayment, Fault::TimeoutLanded);

    let err = ctx
        .state
        .payments
        .execute_payment(submitted.payment_id)
        .await
        .unwrap_err();
    let pending_hash = match err {
        PaymentError::Execute(cause) => cause.ambiguous_tx().map(str::to_string).unwrap(),
        other => panic!("expected an execution error, got {:?}", other),
    };
    let record = ctx
        .repo
        .find_payment_by_chain_id(&submitted.payment_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PaymentStatus::Submitted);
    assert_eq!(record.execute_tx_hash.as_deref(), Some(pending_hash.as_str()));

    let tx_hash = ctx
        .state
        .payments
        .execute_payment(submitted.payment_id)
        .await
        .unwrap();
    assert_eq!(tx_hash, pending_hash);
    assert_eq!(ctx.chain.sent_count(Step::ExecutePayment), 1);

    let again = ctx
        .state
        .payments
        .execute_payment(submitted.payment_id)
        .await
        .unwrap();
    assert_eq!(again, pending_hash);
    assert_eq!(ctx.chain.sent_count(Step::ExecutePayment), 1);
}

#[tokio::test]
async fn test_execute_payment_marks_record_executed() {
    let ctx = TestContext::new();
    let loan_id = originated_loan(&ctx).await;
    let submitted = ctx
        .state
        .payments
        .submit_payment(loan_id, dec!(20), "bank-ref-77")
        .await
        .unwrap();

    let tx_hash = ctx
        .state
        .payments
        .execute_payment(submitted.payment_id)
        .await
        .unwrap();

    let record = ctx
        .repo
        .find_payment_by_chain_id(&submitted.payment_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PaymentStatus::Executed);
    assert_eq!(record.execute_tx_hash.as_deref(), Some(tx_hash.as_str()));

    let call = ctx.chain.sent().last().cloned().unwrap();
    let decoded = IPaymentOracle::executePaymentCall::abi_decode(&call.input, true).unwrap();
    assert_eq!(decoded.paymentId, submitted.payment_id);
}

#[tokio::test]
async fn test_reverted_execution_is_an_error() {
    let ctx = TestContext::new();
    ctx.chain.fail_next(Step::ExecutePayment, Fault::Reverts);

    let err = ctx
        .state
        .payments
        .execute_payment(U256::from(9))
        .await
        .unwrap_err();
    match err {
        PaymentError::Execute(step) => assert_eq!(step.code(), "CHAIN_REVERTED"),
        other => panic!("expected an execution error, got {:?}", other),
    }
}

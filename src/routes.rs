use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{document, loan, payment, wallet};
use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/wallet/link", post(wallet::link_wallet))
        .route("/documents", get(document::list_documents))
        .route("/loans", get(loan::list_loans).post(loan::create_loan))
        .route("/loans/attempts", get(loan::list_attempts))
        .route("/loans/attempts/{id}/resume", post(loan::resume_attempt))
        .route("/loans/{id}", get(loan::get_loan))
        .route("/loans/{id}/activate", post(loan::activate_loan))
        .route("/loans/{id}/confirm-repayment", post(loan::confirm_repayment))
        .route("/payments", post(payment::submit_payment))
        .route("/payments/{payment_id}/execute", post(payment::execute_payment))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "MantleFlow backend is running"
}

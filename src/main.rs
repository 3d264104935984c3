use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mantleflow_backend::config::Config;
use mantleflow_backend::jobs::{loan_status_sync, reconciliation_sync};
use mantleflow_backend::routes::build_router;
use mantleflow_backend::services::alloy_chain::AlloyChainClient;
use mantleflow_backend::services::chain::ChainClient;
use mantleflow_backend::services::repository::LoanRepository;
use mantleflow_backend::services::sea_repository::SeaLoanRepository;
use mantleflow_backend::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mantleflow_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(?config, "Loaded configuration");

    // Connect to database
    tracing::info!("Connecting to database...");
    let db = Database::connect(&config.database_url).await?;

    // Run migrations
    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None).await?;

    let chain: Arc<dyn ChainClient> = Arc::new(
        AlloyChainClient::new(
            &config.chain.rpc_url,
            &config.chain.private_key,
            config.chain.chain_id,
            config.chain.confirmation_timeout,
        )
        .await?,
    );
    let repo: Arc<dyn LoanRepository> = Arc::new(SeaLoanRepository::new(db));

    let state = AppState::new(
        repo.clone(),
        chain,
        config.chain.contracts,
        config.policy.clone(),
        config.wallet_link_message.clone(),
    );

    // Background jobs
    reconciliation_sync::start_reconciliation_job(
        repo.clone(),
        state.loans.clone(),
        state.payments.clone(),
        config.jobs.clone(),
    )
    .await;
    loan_status_sync::start_loan_status_job(repo, state.loans.clone(), config.jobs.clone()).await;

    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

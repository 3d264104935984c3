use axum::{extract::State, Json};
use tracing::{info, warn};

use super::auth::CallerId;
use super::{wallet_error, ApiError};
use crate::models::wallet::{LinkWalletRequest, LinkWalletResponse};
use crate::AppState;

/// POST /wallet/link
///
/// Binds the wallet that signed the link message to the caller.
pub async fn link_wallet(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(request): Json<LinkWalletRequest>,
) -> Result<Json<LinkWalletResponse>, ApiError> {
    info!(user_id = user_id, address = %request.address, "Wallet link request received");

    let user = state
        .wallets
        .link_wallet(user_id, &request.address, &request.signature)
        .await
        .map_err(|e| {
            warn!(user_id = user_id, error = %e, "Wallet link rejected");
            wallet_error(&e)
        })?;

    Ok(Json(LinkWalletResponse {
        address: user.wallet_address.unwrap_or_default(),
    }))
}

use axum::{extract::State, Json};

use super::auth::CallerId;
use super::{repository_error, ApiError};
use crate::models::document::DocumentResponse;
use crate::AppState;

/// GET /documents
pub async fn list_documents(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<Json<Vec<DocumentResponse>>, ApiError> {
    let documents = state
        .repo
        .list_documents(user_id)
        .await
        .map_err(|e| repository_error(&e))?;

    let mut response = Vec::with_capacity(documents.len());
    for document in documents {
        let assessment = state
            .repo
            .find_risk_assessment(document.id)
            .await
            .map_err(|e| repository_error(&e))?;
        response.push(DocumentResponse::new(document, assessment));
    }

    Ok(Json(response))
}

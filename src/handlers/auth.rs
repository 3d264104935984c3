//! Caller identity
//!
//! Authentication is done by the upstream gateway, which forwards the
//! authenticated user id in the `x-user-id` header.

use axum::{extract::FromRequestParts, http::request::Parts, http::StatusCode, Json};

use crate::models::error::ApiErrorResponse;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub i32);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ApiErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i32>().ok())
            .map(CallerId)
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ApiErrorResponse::new(
                        "UNAUTHENTICATED",
                        format!("missing or invalid {} header", USER_ID_HEADER),
                    )),
                )
            })
    }
}

//! Identity for the HTTP API. Users are provisioned/seeded directly (OAuth
//! identity-provider integration is out of scope) — the wire mechanism is a
//! bearer token carrying a user's stable external uid, resolved against the
//! Store on every request.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use rv_core::types::User;

use crate::api_error::ApiError;
use crate::api_state::ApiState;

/// The user making the current request, resolved from its bearer token.
pub struct AuthUser(pub User);

impl FromRequestParts<ApiState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let external_uid = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Validation("missing bearer token".into()))?;
        let user = state
            .store
            .get_user_by_external_uid(&external_uid)
            .await?
            .ok_or_else(|| ApiError::AuthorizationDenied("unknown user".into()))?;
        Ok(AuthUser(user))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("authorization")?.to_str().ok()?;
    raw.strip_prefix("Bearer ").map(|t| t.trim().to_string())
}

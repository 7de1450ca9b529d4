use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use super::{errors::AppError, AppState};
use crate::db::models::User;

/// Header carrying the caller's account id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The account making the request, resolved from [`USER_ID_HEADER`].
///
/// Session handling lives in front of this service; the header is trusted.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or(AppError::Unauthenticated("missing X-User-Id header"))?;

        let id = raw
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .ok_or(AppError::Unauthenticated("X-User-Id must be a UUID"))?;

        let user = state
            .store
            .find_user(id)
            .await?
            .ok_or(AppError::Unauthenticated("unknown user"))?;

        Ok(Self(user))
    }
}

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::{
    auth::{repo_types::Role, services::Profile},
    error::{AppError, AppResult},
    state::AppState,
};

/// Resolves the `Authorization` header to the caller's profile.
pub struct CurrentUser(pub Profile);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AppError::Unauthorized)?;
        Ok(CurrentUser(state.auth.current_user(header).await?))
    }
}

impl CurrentUser {
    pub fn require_admin(&self) -> AppResult<()> {
        match self.0.user.role {
            Role::Admin => Ok(()),
            _ => Err(AppError::Forbidden),
        }
    }
}

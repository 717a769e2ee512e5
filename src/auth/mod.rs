//! Request authentication: password hashing, JWT issuance, and the
//! `AuthUser` extractor that guards authenticated routes.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use thiserror::Error;
use uuid::Uuid;

use crate::models::User;
use crate::state::AppState;
use crate::utils::error::AppError;

pub mod jwt;
pub mod password;

pub use jwt::{Claims, TokenPair, TokenService, TokenType};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Given token not valid for any token type")]
    InvalidToken,

    #[error("Token is expired")]
    Expired,

    #[error("Token has wrong type")]
    WrongTokenType,

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Token encoding failed: {0}")]
    Encoding(String),
}

const MISSING_CREDENTIALS: &str = "Authentication credentials were not provided.";

/// The active user behind a valid `Authorization: Bearer <access token>` header.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn id(&self) -> Uuid {
        self.0.id
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::AuthError(MISSING_CREDENTIALS.to_string()))?;

        let claims = state.tokens.verify(token, TokenType::Access)?;

        match state.store.find_user(claims.sub).await? {
            Some(user) if user.is_active => Ok(AuthUser(user)),
            _ => Err(AppError::AuthError("User not found".to_string())),
        }
    }
}

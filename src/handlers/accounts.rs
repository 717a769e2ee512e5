use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::{Validate, ValidationError};

use crate::auth::password::{hash_password_blocking, verify_password_blocking};
use crate::auth::{AuthUser, TokenType};
use crate::db::StoreError;
use crate::models::{User, UserProfile};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::extract::ValidatedJson;
use crate::utils::response::{created, empty_success, success};

const INVALID_CREDENTIALS: &str = "No active account found with the given credentials";

fn validate_username(username: &str) -> Result<(), ValidationError> {
    let allowed = |c: char| c.is_alphanumeric() || "@.+-_".contains(c);
    if username.chars().all(allowed) {
        Ok(())
    } else {
        Err(ValidationError::new("username_characters"))
    }
}

fn username_taken() -> AppError {
    AppError::rejected("USERNAME_TAKEN", "A user with that username already exists.")
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterUserRequest {
    #[validate(length(min = 1, max = 150), custom = "validate_username")]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(must_match = "password")]
    pub password2: String,
    #[serde(default)]
    #[validate(length(max = 150))]
    pub first_name: String,
    #[serde(default)]
    #[validate(length(max = 150))]
    pub last_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 150), custom = "validate_username")]
    pub username: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 150))]
    pub first_name: Option<String>,
    #[validate(length(max = 150))]
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    #[validate(length(min = 8, max = 128))]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access: String,
}

pub async fn register_user(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RegisterUserRequest>,
) -> Result<Response, AppError> {
    if state
        .store
        .find_user_by_username(&payload.username)
        .await?
        .is_some()
    {
        return Err(username_taken());
    }

    let password_hash = hash_password_blocking(payload.password).await?;
    let user = User::new(
        payload.username,
        payload.email,
        payload.first_name,
        payload.last_name,
        password_hash,
    );

    match state.store.insert_user(&user).await {
        Ok(()) => {}
        Err(StoreError::UniqueViolation(_)) => return Err(username_taken()),
        Err(e) => return Err(e.into()),
    }

    info!(user_id = %user.id, username = %user.username, "User registered");
    Ok(created(UserProfile::from(&user), "User created successfully"))
}

pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> Result<Response, AppError> {
    let user = state
        .store
        .find_user_by_username(&payload.username)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| AppError::AuthError(INVALID_CREDENTIALS.to_string()))?;

    if !verify_password_blocking(payload.password, user.password_hash.clone()).await {
        return Err(AppError::AuthError(INVALID_CREDENTIALS.to_string()));
    }

    let pair = state.tokens.issue_pair(user.id)?;
    info!(user_id = %user.id, "User logged in");
    Ok(success(LoginResponse {
        access: pair.access,
        refresh: pair.refresh,
        user: UserProfile::from(&user),
    }))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RefreshRequest>,
) -> Result<Response, AppError> {
    let claims = state.tokens.verify(&payload.refresh, TokenType::Refresh)?;

    let user = state
        .store
        .find_user(claims.sub)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| AppError::AuthError(INVALID_CREDENTIALS.to_string()))?;

    let access = state.tokens.issue(user.id, TokenType::Access)?;
    Ok(success(RefreshResponse { access }))
}

pub async fn profile(AuthUser(user): AuthUser) -> Response {
    success(UserProfile::from(&user))
}

pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(mut user): AuthUser,
    ValidatedJson(payload): ValidatedJson<UpdateProfileRequest>,
) -> Result<Response, AppError> {
    if let Some(username) = payload.username {
        if username != user.username {
            if state.store.find_user_by_username(&username).await?.is_some() {
                return Err(username_taken());
            }
            user.username = username;
        }
    }
    if let Some(email) = payload.email {
        user.email = email;
    }
    if let Some(first_name) = payload.first_name {
        user.first_name = first_name;
    }
    if let Some(last_name) = payload.last_name {
        user.last_name = last_name;
    }
    user.updated_at = Utc::now();

    match state.store.update_user(&user).await {
        Ok(()) => {}
        Err(StoreError::UniqueViolation(_)) => return Err(username_taken()),
        Err(e) => return Err(e.into()),
    }

    Ok(success(UserProfile::from(&user)))
}

pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(mut user): AuthUser,
    ValidatedJson(payload): ValidatedJson<ChangePasswordRequest>,
) -> Result<Response, AppError> {
    if !verify_password_blocking(payload.old_password, user.password_hash.clone()).await {
        return Err(AppError::rejected(
            "INVALID_PASSWORD",
            "Old password is not correct",
        ));
    }

    user.password_hash = hash_password_blocking(payload.new_password).await?;
    user.updated_at = Utc::now();
    state.store.update_user(&user).await?;

    info!(user_id = %user.id, "Password changed");
    Ok(empty_success("Password updated successfully"))
}

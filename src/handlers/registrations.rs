use axum::extract::State;
use axum::response::Response;

use crate::auth::AuthUser;
use crate::models::{PageParams, PageRequest, RegistrationScope};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::extract::{ApiQuery, EntityId};
use crate::utils::response::{created, empty_success, success};

pub async fn register_for_event(
    State(state): State<AppState>,
    user: AuthUser,
    EntityId(event_id): EntityId,
) -> Result<Response, AppError> {
    let registration = state.registrations.register(event_id, user.id()).await?;

    let view = state
        .store
        .find_registration_view(registration.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found.".to_string()))?;

    Ok(created(view, "Successfully registered for the event."))
}

pub async fn unregister_from_event(
    State(state): State<AppState>,
    user: AuthUser,
    EntityId(event_id): EntityId,
) -> Result<Response, AppError> {
    state.registrations.unregister(event_id, user.id()).await?;
    Ok(empty_success("Successfully unregistered from the event."))
}

pub async fn event_attendees(
    State(state): State<AppState>,
    user: AuthUser,
    EntityId(event_id): EntityId,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<Response, AppError> {
    let page = state
        .registrations
        .attendees(event_id, user.id(), PageRequest::from(params))
        .await?;
    Ok(success(page))
}

async fn list_scope(
    state: &AppState,
    user: &AuthUser,
    scope: RegistrationScope,
    params: PageParams,
) -> Result<Response, AppError> {
    let page = state
        .store
        .list_user_registrations(user.id(), scope, PageRequest::from(params))
        .await?;
    Ok(success(page))
}

pub async fn my_registrations(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<Response, AppError> {
    list_scope(&state, &user, RegistrationScope::All, params).await
}

pub async fn my_active_registrations(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<Response, AppError> {
    list_scope(&state, &user, RegistrationScope::Active, params).await
}

pub async fn my_past_registrations(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<Response, AppError> {
    list_scope(&state, &user, RegistrationScope::Past, params).await
}

/// Other users' registrations are indistinguishable from missing ones.
pub async fn my_registration(
    State(state): State<AppState>,
    user: AuthUser,
    EntityId(id): EntityId,
) -> Result<Response, AppError> {
    let view = state
        .store
        .find_registration_view(id)
        .await?
        .filter(|view| view.user.id == user.id())
        .ok_or_else(|| AppError::NotFound("Not found.".to_string()))?;

    Ok(success(view))
}

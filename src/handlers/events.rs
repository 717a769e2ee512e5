use axum::extract::State;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::info;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::auth::AuthUser;
use crate::models::{Event, EventFilter, EventView, PageParams, PageRequest};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::extract::{ApiQuery, EntityId, ValidatedJson};
use crate::utils::response::{created, no_content, success};

const NOT_ORGANIZER: &str = "You do not have permission to perform this action.";

fn not_in_past(date: &DateTime<Utc>) -> Result<(), ValidationError> {
    if *date < Utc::now() {
        let mut error = ValidationError::new("date_in_past");
        error.message = Some("Event date cannot be in the past.".into());
        return Err(error);
    }
    Ok(())
}

fn default_active() -> bool {
    true
}

/// Present-but-null becomes `Some(None)`; an absent field stays `None` via `default`.
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn patch_capacity(patch: &EventPatch) -> Result<(), ValidationError> {
    match patch.max_attendees {
        Some(Some(max)) if max < 1 => {
            let mut error = ValidationError::new("range");
            error.message = Some("max_attendees must be at least 1.".into());
            Err(error)
        }
        _ => Ok(()),
    }
}

/// Body of `POST /api/events/` and `PUT /api/events/{id}/`.
#[derive(Debug, Deserialize, Validate)]
pub struct EventRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[validate(custom = "not_in_past")]
    pub date: DateTime<Utc>,
    #[validate(length(min = 1, max = 300))]
    pub location: String,
    #[validate(range(min = 1))]
    pub max_attendees: Option<i32>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// Body of `PATCH /api/events/{id}/`. Absent fields are left untouched;
/// `"max_attendees": null` removes the capacity limit.
#[derive(Debug, Default, Deserialize, Validate)]
#[validate(schema(function = "patch_capacity"))]
pub struct EventPatch {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    pub description: Option<String>,
    #[validate(custom = "not_in_past")]
    pub date: Option<DateTime<Utc>>,
    #[validate(length(min = 1, max = 300))]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub max_attendees: Option<Option<i32>>,
    pub is_active: Option<bool>,
}

impl EventRequest {
    fn into_event(self, organizer_id: Uuid) -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            title: self.title,
            description: self.description,
            date: self.date,
            location: self.location,
            organizer_id,
            max_attendees: self.max_attendees,
            is_active: self.is_active,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(self, event: &mut Event) {
        event.title = self.title;
        event.description = self.description;
        event.date = self.date;
        event.location = self.location;
        event.max_attendees = self.max_attendees;
        event.is_active = self.is_active;
    }
}

impl EventPatch {
    fn apply(self, event: &mut Event) {
        if let Some(title) = self.title {
            event.title = title;
        }
        if let Some(description) = self.description {
            event.description = description;
        }
        if let Some(date) = self.date {
            event.date = date;
        }
        if let Some(location) = self.location {
            event.location = location;
        }
        if let Some(max_attendees) = self.max_attendees {
            event.max_attendees = max_attendees;
        }
        if let Some(is_active) = self.is_active {
            event.is_active = is_active;
        }
    }
}

async fn list_with(
    state: &AppState,
    filter: EventFilter,
    viewer: Option<Uuid>,
    params: PageParams,
) -> Result<Response, AppError> {
    let page = state
        .store
        .list_events(&filter, viewer, PageRequest::from(params))
        .await?;
    let now = Utc::now();
    Ok(success(page.map(|view| view.summary(now))))
}

async fn load_view(state: &AppState, id: Uuid, viewer: Option<Uuid>) -> Result<EventView, AppError> {
    state
        .store
        .find_event_view(id, viewer)
        .await?
        .ok_or_else(|| AppError::NotFound("Not found.".to_string()))
}

/// Loads an event the caller is about to modify.
async fn load_owned(state: &AppState, id: Uuid, user_id: Uuid) -> Result<Event, AppError> {
    let event = state
        .store
        .find_event(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Not found.".to_string()))?;

    if !event.is_organized_by(user_id) {
        return Err(AppError::Forbidden(NOT_ORGANIZER.to_string()));
    }
    Ok(event)
}

pub async fn list_events(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    ApiQuery(filter): ApiQuery<EventFilter>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<Response, AppError> {
    let viewer = user.as_ref().map(AuthUser::id);
    list_with(&state, filter, viewer, params).await
}

pub async fn upcoming_events(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<Response, AppError> {
    let viewer = user.as_ref().map(AuthUser::id);
    list_with(&state, EventFilter::upcoming(), viewer, params).await
}

pub async fn my_events(
    State(state): State<AppState>,
    user: AuthUser,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<Response, AppError> {
    let filter = EventFilter::organized_by(user.id());
    list_with(&state, filter, Some(user.id()), params).await
}

pub async fn get_event(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    EntityId(id): EntityId,
) -> Result<Response, AppError> {
    let view = load_view(&state, id, user.as_ref().map(AuthUser::id)).await?;
    Ok(success(view.detail(Utc::now())))
}

pub async fn create_event(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(payload): ValidatedJson<EventRequest>,
) -> Result<Response, AppError> {
    let event = payload.into_event(user.id());
    state.store.insert_event(&event).await?;
    info!(event_id = %event.id, organizer_id = %user.id(), "Event created");

    let view = load_view(&state, event.id, Some(user.id())).await?;
    Ok(created(view.detail(Utc::now()), "Event created successfully"))
}

pub async fn replace_event(
    State(state): State<AppState>,
    user: AuthUser,
    EntityId(id): EntityId,
    ValidatedJson(payload): ValidatedJson<EventRequest>,
) -> Result<Response, AppError> {
    let mut event = load_owned(&state, id, user.id()).await?;
    payload.apply(&mut event);
    save(&state, event, user.id()).await
}

pub async fn patch_event(
    State(state): State<AppState>,
    user: AuthUser,
    EntityId(id): EntityId,
    ValidatedJson(payload): ValidatedJson<EventPatch>,
) -> Result<Response, AppError> {
    let mut event = load_owned(&state, id, user.id()).await?;
    payload.apply(&mut event);
    save(&state, event, user.id()).await
}

async fn save(state: &AppState, mut event: Event, user_id: Uuid) -> Result<Response, AppError> {
    event.updated_at = Utc::now();
    state.store.update_event(&event).await?;
    info!(event_id = %event.id, "Event updated");

    let view = load_view(state, event.id, Some(user_id)).await?;
    Ok(success(view.detail(Utc::now())))
}

pub async fn delete_event(
    State(state): State<AppState>,
    user: AuthUser,
    EntityId(id): EntityId,
) -> Result<Response, AppError> {
    load_owned(&state, id, user.id()).await?;
    state.store.delete_event(id).await?;
    info!(event_id = %id, "Event deleted");
    Ok(no_content())
}

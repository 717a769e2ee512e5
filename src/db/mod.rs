//! Persistence layer.
//!
//! Everything above this module talks to storage through the [`Store`] trait.
//! Registration mutations additionally go through a [`RegistrationTx`], a unit of
//! work that holds a lock on the event row until it is committed or dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Event, EventFilter, EventView, Page, PageRequest, Registration, RegistrationScope,
    RegistrationView, User,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return StoreError::UniqueViolation(constraint);
            }
        }
        StoreError::Database(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn update_user(&self, user: &User) -> StoreResult<()>;

    async fn insert_event(&self, event: &Event) -> StoreResult<()>;
    async fn find_event(&self, id: Uuid) -> StoreResult<Option<Event>>;
    async fn find_event_view(&self, id: Uuid, viewer: Option<Uuid>)
        -> StoreResult<Option<EventView>>;
    async fn list_events(
        &self,
        filter: &EventFilter,
        viewer: Option<Uuid>,
        page: PageRequest,
    ) -> StoreResult<Page<EventView>>;
    async fn update_event(&self, event: &Event) -> StoreResult<()>;
    /// Deletes the event and, by cascade, its registrations.
    async fn delete_event(&self, id: Uuid) -> StoreResult<bool>;
    /// Active events whose date falls in `[from, to)`.
    async fn events_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>>;

    async fn count_active_registrations(&self, event_id: Uuid) -> StoreResult<i64>;
    async fn find_registration_view(&self, id: Uuid) -> StoreResult<Option<RegistrationView>>;
    async fn list_attendees(
        &self,
        event_id: Uuid,
        page: PageRequest,
    ) -> StoreResult<Page<RegistrationView>>;
    async fn list_user_registrations(
        &self,
        user_id: Uuid,
        scope: RegistrationScope,
        page: PageRequest,
    ) -> StoreResult<Page<RegistrationView>>;

    /// Opens a unit of work for a registration state change.
    async fn begin(&self) -> StoreResult<Box<dyn RegistrationTx>>;
}

/// Dropping a transaction without calling [`RegistrationTx::commit`] discards its writes.
#[async_trait]
pub trait RegistrationTx: Send {
    /// Loads the event and locks it until the end of the transaction.
    async fn lock_event(&mut self, id: Uuid) -> StoreResult<Option<Event>>;
    async fn count_active_registrations(&mut self, event_id: Uuid) -> StoreResult<i64>;
    async fn find_registration(
        &mut self,
        user_id: Uuid,
        event_id: Uuid,
    ) -> StoreResult<Option<Registration>>;
    async fn insert_registration(&mut self, registration: &Registration) -> StoreResult<()>;
    async fn update_registration(&mut self, registration: &Registration) -> StoreResult<()>;
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

//! Registration state machine.
//!
//! A (user, event) pair owns at most one registration row. The row is created on
//! the first successful registration, flips to cancelled on unregister, and is
//! reactivated in place on re-registration. Every mutation runs inside a
//! [`RegistrationTx`] that locks the event row, so the capacity count is taken
//! fresh and stays valid until the insert commits.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{RegistrationTx, Store, StoreError};
use crate::models::{Page, PageRequest, Registration, RegistrationView};
use crate::notify::{Notification, Notifier};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Cannot register for past events.")]
    EventPast,

    #[error("This event is not active.")]
    EventInactive,

    #[error("This event is full.")]
    EventFull,

    #[error("You are already registered for this event.")]
    AlreadyRegistered,

    #[error("You are not registered for this event.")]
    NotRegistered,

    #[error("Event not found.")]
    NotFound,

    #[error("Only the organizer can view attendees.")]
    Forbidden,

    #[error("The registration was modified concurrently. Please try again.")]
    Conflict,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistrationError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistrationError::EventPast => "EVENT_PAST",
            RegistrationError::EventInactive => "EVENT_INACTIVE",
            RegistrationError::EventFull => "EVENT_FULL",
            RegistrationError::AlreadyRegistered => "ALREADY_REGISTERED",
            RegistrationError::NotRegistered => "NOT_REGISTERED",
            RegistrationError::NotFound => "NOT_FOUND",
            RegistrationError::Forbidden => "FORBIDDEN",
            RegistrationError::Conflict => "CONFLICT",
            RegistrationError::Store(_) => "DATABASE_ERROR",
        }
    }
}

/// Runs `attempt` and, if it lost a uniqueness race, runs it once more before
/// reporting a conflict.
async fn retry_on_unique_violation<T, F, Fut>(
    operation: &'static str,
    mut attempt: F,
) -> Result<T, RegistrationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RegistrationError>>,
{
    match attempt().await {
        Err(RegistrationError::Store(StoreError::UniqueViolation(constraint))) => {
            warn!(operation, %constraint, "Lost a uniqueness race, retrying once");
            match attempt().await {
                Err(RegistrationError::Store(StoreError::UniqueViolation(_))) => {
                    Err(RegistrationError::Conflict)
                }
                other => other,
            }
        }
        other => other,
    }
}

#[derive(Clone)]
pub struct RegistrationEngine {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
}

impl RegistrationEngine {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Registers `user_id` for `event_id`.
    ///
    /// Checks run in a fixed order and the first failure wins: past event,
    /// inactive event, full event, existing active registration.
    pub async fn register(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Registration, RegistrationError> {
        let registration = retry_on_unique_violation("register", || {
            self.try_register(event_id, user_id)
        })
        .await?;

        info!(
            %event_id,
            %user_id,
            registration_id = %registration.id,
            "User registered for event"
        );
        self.notifier.enqueue(Notification::RegistrationConfirmed {
            registration_id: registration.id,
        });
        Ok(registration)
    }

    async fn try_register(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Registration, RegistrationError> {
        let mut tx = self.store.begin().await?;
        let event = tx
            .lock_event(event_id)
            .await?
            .ok_or(RegistrationError::NotFound)?;
        let now = Utc::now();

        if event.is_past_at(now) {
            return Err(RegistrationError::EventPast);
        }
        if !event.is_active {
            return Err(RegistrationError::EventInactive);
        }
        if event.max_attendees.is_some() {
            let attendees_count = tx.count_active_registrations(event_id).await?;
            if event.is_full(attendees_count) {
                return Err(RegistrationError::EventFull);
            }
        }

        let registration = match tx.find_registration(user_id, event_id).await? {
            Some(existing) if existing.is_active() => {
                return Err(RegistrationError::AlreadyRegistered);
            }
            Some(mut cancelled) => {
                cancelled.reactivate();
                tx.update_registration(&cancelled).await?;
                cancelled
            }
            None => {
                let registration = Registration::new(user_id, event_id, now);
                tx.insert_registration(&registration).await?;
                registration
            }
        };

        tx.commit().await?;
        Ok(registration)
    }

    /// Cancels the caller's active registration. Unknown pairs fail with
    /// `NotRegistered` and change nothing.
    pub async fn unregister(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Registration, RegistrationError> {
        let mut tx = self.store.begin().await?;
        let registration = cancel_in(tx.as_mut(), event_id, user_id).await?;
        tx.commit().await?;

        info!(
            %event_id,
            %user_id,
            registration_id = %registration.id,
            "User unregistered from event"
        );
        self.notifier.enqueue(Notification::RegistrationCancelled {
            registration_id: registration.id,
        });
        Ok(registration)
    }

    /// Active registrations of an event, visible to its organizer only.
    pub async fn attendees(
        &self,
        event_id: Uuid,
        requester_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<RegistrationView>, RegistrationError> {
        let event = self
            .store
            .find_event(event_id)
            .await?
            .ok_or(RegistrationError::NotFound)?;

        if !event.is_organized_by(requester_id) {
            warn!(%event_id, %requester_id, "Attendee list requested by non-organizer");
            return Err(RegistrationError::Forbidden);
        }

        Ok(self.store.list_attendees(event_id, page).await?)
    }
}

async fn cancel_in(
    tx: &mut dyn RegistrationTx,
    event_id: Uuid,
    user_id: Uuid,
) -> Result<Registration, RegistrationError> {
    tx.lock_event(event_id)
        .await?
        .ok_or(RegistrationError::NotFound)?;

    let mut registration = tx
        .find_registration(user_id, event_id)
        .await?
        .filter(Registration::is_active)
        .ok_or(RegistrationError::NotRegistered)?;

    registration.cancel(Utc::now());
    tx.update_registration(&registration).await?;
    Ok(registration)
}

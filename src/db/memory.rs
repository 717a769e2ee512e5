//! In-process store used by the test suite and by `memory://` development runs.
//!
//! A registration transaction holds the store mutex for its whole lifetime and
//! works on a staged copy, so concurrent registrants are fully serialized and an
//! uncommitted transaction leaves no trace.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::db::{RegistrationTx, Store, StoreError, StoreResult};
use crate::models::{
    Event, EventFilter, EventOrdering, EventView, OrganizerInfo, Page, PageRequest,
    Registration, RegistrationScope, RegistrationView, User, UserProfile,
};

#[derive(Debug, Clone, Default)]
struct State {
    users: HashMap<Uuid, User>,
    events: HashMap<Uuid, Event>,
    registrations: HashMap<Uuid, Registration>,
}

impl State {
    fn count_active(&self, event_id: Uuid) -> i64 {
        self.registrations
            .values()
            .filter(|r| r.event_id == event_id && r.is_active())
            .count() as i64
    }

    fn find_registration(&self, user_id: Uuid, event_id: Uuid) -> Option<&Registration> {
        self.registrations
            .values()
            .find(|r| r.user_id == user_id && r.event_id == event_id)
    }

    fn event_view(&self, event: &Event, viewer: Option<Uuid>) -> Option<EventView> {
        let organizer = self.users.get(&event.organizer_id)?;
        let is_registered = viewer
            .and_then(|user_id| self.find_registration(user_id, event.id))
            .is_some_and(Registration::is_active);
        Some(EventView {
            event: event.clone(),
            organizer: OrganizerInfo::from(organizer),
            attendees_count: self.count_active(event.id),
            is_registered,
        })
    }

    fn registration_view(&self, registration: &Registration) -> Option<RegistrationView> {
        let user = self.users.get(&registration.user_id)?;
        let event = self.events.get(&registration.event_id)?;
        Some(RegistrationView {
            id: registration.id,
            user: UserProfile::from(user),
            event: event.id,
            event_title: event.title.clone(),
            event_date: event.date,
            registered_at: registration.registered_at,
            is_cancelled: registration.is_cancelled,
            cancelled_at: registration.cancelled_at,
        })
    }

    fn insert_registration(&mut self, registration: &Registration) -> StoreResult<()> {
        if self.registrations.contains_key(&registration.id)
            || self
                .find_registration(registration.user_id, registration.event_id)
                .is_some()
        {
            return Err(StoreError::UniqueViolation(
                "event_registration_user_event_key".to_string(),
            ));
        }
        self.registrations
            .insert(registration.id, registration.clone());
        Ok(())
    }
}

fn sort_events(views: &mut [EventView], ordering: EventOrdering) {
    match ordering {
        EventOrdering::DateAsc => views.sort_by_key(|v| (v.event.date, v.event.id)),
        EventOrdering::DateDesc => views.sort_by_key(|v| (Reverse(v.event.date), v.event.id)),
        EventOrdering::CreatedAsc => views.sort_by_key(|v| (v.event.created_at, v.event.id)),
        EventOrdering::CreatedDesc => {
            views.sort_by_key(|v| (Reverse(v.event.created_at), v.event.id))
        }
        EventOrdering::TitleAsc => views.sort_by(|a, b| {
            a.event
                .title
                .cmp(&b.event.title)
                .then(a.event.id.cmp(&b.event.id))
        }),
        EventOrdering::TitleDesc => views.sort_by(|a, b| {
            b.event
                .title
                .cmp(&a.event.title)
                .then(a.event.id.cmp(&b.event.id))
        }),
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::UniqueViolation("users_username_key".to_string()));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state
            .users
            .values()
            .any(|u| u.id != user.id && u.username == user.username)
        {
            return Err(StoreError::UniqueViolation("users_username_key".to_string()));
        }
        if let Some(existing) = state.users.get_mut(&user.id) {
            *existing = user.clone();
        }
        Ok(())
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn find_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self.state.lock().await.events.get(&id).cloned())
    }

    async fn find_event_view(
        &self,
        id: Uuid,
        viewer: Option<Uuid>,
    ) -> StoreResult<Option<EventView>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .get(&id)
            .and_then(|event| state.event_view(event, viewer)))
    }

    async fn list_events(
        &self,
        filter: &EventFilter,
        viewer: Option<Uuid>,
        page: PageRequest,
    ) -> StoreResult<Page<EventView>> {
        let now = Utc::now();
        let state = self.state.lock().await;
        let mut views: Vec<EventView> = state
            .events
            .values()
            .filter_map(|event| state.event_view(event, viewer))
            .filter(|view| filter.matches(view, now))
            .collect();
        sort_events(&mut views, filter.ordering);
        Ok(Page::new(page.slice(&views), views.len() as i64, page))
    }

    async fn update_event(&self, event: &Event) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.events.get_mut(&event.id) {
            *existing = event.clone();
        }
        Ok(())
    }

    async fn delete_event(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let removed = state.events.remove(&id).is_some();
        state.registrations.retain(|_, r| r.event_id != id);
        Ok(removed)
    }

    async fn events_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>> {
        let state = self.state.lock().await;
        let mut events: Vec<Event> = state
            .events
            .values()
            .filter(|e| e.is_active && e.date >= from && e.date < to)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.date);
        Ok(events)
    }

    async fn count_active_registrations(&self, event_id: Uuid) -> StoreResult<i64> {
        Ok(self.state.lock().await.count_active(event_id))
    }

    async fn find_registration_view(&self, id: Uuid) -> StoreResult<Option<RegistrationView>> {
        let state = self.state.lock().await;
        Ok(state
            .registrations
            .get(&id)
            .and_then(|r| state.registration_view(r)))
    }

    async fn list_attendees(
        &self,
        event_id: Uuid,
        page: PageRequest,
    ) -> StoreResult<Page<RegistrationView>> {
        let state = self.state.lock().await;
        let mut registrations: Vec<&Registration> = state
            .registrations
            .values()
            .filter(|r| r.event_id == event_id && r.is_active())
            .collect();
        registrations.sort_by_key(|r| (r.registered_at, r.id));
        let views: Vec<RegistrationView> = registrations
            .into_iter()
            .filter_map(|r| state.registration_view(r))
            .collect();
        Ok(Page::new(page.slice(&views), views.len() as i64, page))
    }

    async fn list_user_registrations(
        &self,
        user_id: Uuid,
        scope: RegistrationScope,
        page: PageRequest,
    ) -> StoreResult<Page<RegistrationView>> {
        let now = Utc::now();
        let state = self.state.lock().await;
        let mut views: Vec<RegistrationView> = state
            .registrations
            .values()
            .filter(|r| r.user_id == user_id)
            .filter_map(|r| state.registration_view(r))
            .filter(|v| match scope {
                RegistrationScope::All => true,
                RegistrationScope::Active => !v.is_cancelled && v.event_date >= now,
                RegistrationScope::Past => !v.is_cancelled && v.event_date < now,
            })
            .collect();
        views.sort_by_key(|v| (Reverse(v.registered_at), v.id));
        Ok(Page::new(page.slice(&views), views.len() as i64, page))
    }

    async fn begin(&self) -> StoreResult<Box<dyn RegistrationTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryRegistrationTx { guard, staged }))
    }
}

pub struct MemoryRegistrationTx {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

#[async_trait]
impl RegistrationTx for MemoryRegistrationTx {
    async fn lock_event(&mut self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self.staged.events.get(&id).cloned())
    }

    async fn count_active_registrations(&mut self, event_id: Uuid) -> StoreResult<i64> {
        Ok(self.staged.count_active(event_id))
    }

    async fn find_registration(
        &mut self,
        user_id: Uuid,
        event_id: Uuid,
    ) -> StoreResult<Option<Registration>> {
        Ok(self.staged.find_registration(user_id, event_id).cloned())
    }

    async fn insert_registration(&mut self, registration: &Registration) -> StoreResult<()> {
        self.staged.insert_registration(registration)
    }

    async fn update_registration(&mut self, registration: &Registration) -> StoreResult<()> {
        if let Some(existing) = self.staged.registrations.get_mut(&registration.id) {
            *existing = registration.clone();
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryRegistrationTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seed(store: &MemoryStore) -> (User, Event) {
        let user = User::new(
            "organizer".into(),
            "organizer@example.com".into(),
            String::new(),
            String::new(),
            "hash".into(),
        );
        store.insert_user(&user).await.unwrap();
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4(),
            title: "Launch party".into(),
            description: "Drinks".into(),
            date: now + Duration::days(2),
            location: "Rooftop".into(),
            organizer_id: user.id,
            max_attendees: Some(10),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.insert_event(&event).await.unwrap();
        (user, event)
    }

    #[tokio::test]
    async fn duplicate_usernames_are_rejected() {
        let store = MemoryStore::new();
        let (user, _) = seed(&store).await;
        let clone = User::new(
            user.username.clone(),
            "other@example.com".into(),
            String::new(),
            String::new(),
            "hash".into(),
        );
        let err = store.insert_user(&clone).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn uncommitted_transaction_is_discarded() {
        let store = MemoryStore::new();
        let (user, event) = seed(&store).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_registration(&Registration::new(user.id, event.id, Utc::now()))
            .await
            .unwrap();
        assert_eq!(tx.count_active_registrations(event.id).await.unwrap(), 1);
        drop(tx);

        assert_eq!(store.count_active_registrations(event.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn second_row_for_same_pair_violates_uniqueness() {
        let store = MemoryStore::new();
        let (user, event) = seed(&store).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_registration(&Registration::new(user.id, event.id, Utc::now()))
            .await
            .unwrap();
        let err = tx
            .insert_registration(&Registration::new(user.id, event.id, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn deleting_an_event_cascades_to_registrations() {
        let store = MemoryStore::new();
        let (user, event) = seed(&store).await;

        let registration = Registration::new(user.id, event.id, Utc::now());
        let mut tx = store.begin().await.unwrap();
        tx.insert_registration(&registration).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.delete_event(event.id).await.unwrap());
        assert!(store
            .find_registration_view(registration.id)
            .await
            .unwrap()
            .is_none());
        assert!(!store.delete_event(event.id).await.unwrap());
    }

    #[tokio::test]
    async fn event_view_reports_viewer_registration() {
        let store = MemoryStore::new();
        let (user, event) = seed(&store).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_registration(&Registration::new(user.id, event.id, Utc::now()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let view = store
            .find_event_view(event.id, Some(user.id))
            .await
            .unwrap()
            .unwrap();
        assert!(view.is_registered);
        assert_eq!(view.attendees_count, 1);

        let anonymous = store.find_event_view(event.id, None).await.unwrap().unwrap();
        assert!(!anonymous.is_registered);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::user::UserProfile;

/// Join row between a user and an event. At most one exists per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Registration {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub registered_at: DateTime<Utc>,
    pub is_cancelled: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Registration {
    pub fn new(user_id: Uuid, event_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            event_id,
            registered_at: now,
            is_cancelled: false,
            cancelled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.is_cancelled
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.is_cancelled = true;
        self.cancelled_at = Some(now);
    }

    /// Re-registration keeps the row identity and the original `registered_at`.
    pub fn reactivate(&mut self) {
        self.is_cancelled = false;
        self.cancelled_at = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationView {
    pub id: Uuid,
    pub user: UserProfile,
    pub event: Uuid,
    pub event_title: String,
    pub event_date: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub is_cancelled: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Subsets of a user's registrations exposed by the my-registrations endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationScope {
    All,
    /// Not cancelled, event still ahead.
    Active,
    /// Not cancelled, event already happened.
    Past,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_then_reactivate_keeps_identity() {
        let registered_at = Utc::now();
        let mut reg = Registration::new(Uuid::new_v4(), Uuid::new_v4(), registered_at);
        let id = reg.id;

        reg.cancel(Utc::now());
        assert!(reg.is_cancelled);
        assert!(reg.cancelled_at.is_some());
        assert!(!reg.is_active());

        reg.reactivate();
        assert_eq!(reg.id, id);
        assert_eq!(reg.registered_at, registered_at);
        assert!(reg.is_active());
        assert!(reg.cancelled_at.is_none());
    }
}

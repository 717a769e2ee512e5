use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::user::OrganizerInfo;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub location: String,
    pub organizer_id: Uuid,
    pub max_attendees: Option<i32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_past_at(&self, now: DateTime<Utc>) -> bool {
        self.date < now
    }

    pub fn is_past(&self) -> bool {
        self.is_past_at(Utc::now())
    }

    pub fn is_organized_by(&self, user_id: Uuid) -> bool {
        self.organizer_id == user_id
    }

    /// Capacity check against a freshly counted number of active registrations.
    pub fn is_full(&self, attendees_count: i64) -> bool {
        matches!(self.max_attendees, Some(max) if attendees_count >= i64::from(max))
    }

    /// `None` means the event has no capacity limit.
    pub fn available_spots(&self, attendees_count: i64) -> Option<i64> {
        self.max_attendees
            .map(|max| (i64::from(max) - attendees_count).max(0))
    }
}

/// An event together with the values derived from its registrations.
#[derive(Debug, Clone)]
pub struct EventView {
    pub event: Event,
    pub organizer: OrganizerInfo,
    pub attendees_count: i64,
    pub is_registered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: Uuid,
    pub title: String,
    pub date: DateTime<Utc>,
    pub location: String,
    pub organizer: OrganizerInfo,
    pub attendees_count: i64,
    pub is_past: bool,
    pub available_spots: Option<i64>,
    pub max_attendees: Option<i32>,
    pub is_active: bool,
    pub is_registered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDetail {
    #[serde(flatten)]
    pub summary: EventSummary,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventView {
    pub fn summary(&self, now: DateTime<Utc>) -> EventSummary {
        EventSummary {
            id: self.event.id,
            title: self.event.title.clone(),
            date: self.event.date,
            location: self.event.location.clone(),
            organizer: self.organizer.clone(),
            attendees_count: self.attendees_count,
            is_past: self.event.is_past_at(now),
            available_spots: self.event.available_spots(self.attendees_count),
            max_attendees: self.event.max_attendees,
            is_active: self.event.is_active,
            is_registered: self.is_registered,
        }
    }

    pub fn detail(&self, now: DateTime<Utc>) -> EventDetail {
        EventDetail {
            summary: self.summary(now),
            description: self.event.description.clone(),
            created_at: self.event.created_at,
            updated_at: self.event.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOrdering {
    #[default]
    #[serde(rename = "date")]
    DateAsc,
    #[serde(rename = "-date")]
    DateDesc,
    #[serde(rename = "created_at")]
    CreatedAsc,
    #[serde(rename = "-created_at")]
    CreatedDesc,
    #[serde(rename = "title")]
    TitleAsc,
    #[serde(rename = "-title")]
    TitleDesc,
}

impl EventOrdering {
    pub fn sql(&self) -> &'static str {
        match self {
            EventOrdering::DateAsc => "e.date ASC, e.id ASC",
            EventOrdering::DateDesc => "e.date DESC, e.id ASC",
            EventOrdering::CreatedAsc => "e.created_at ASC, e.id ASC",
            EventOrdering::CreatedDesc => "e.created_at DESC, e.id ASC",
            EventOrdering::TitleAsc => "e.title ASC, e.id ASC",
            EventOrdering::TitleDesc => "e.title DESC, e.id ASC",
        }
    }
}

/// Query-string filters accepted by the event listing endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub title: Option<String>,
    pub location: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub organizer: Option<Uuid>,
    pub is_active: Option<bool>,
    pub has_spots: Option<bool>,
    pub is_past: Option<bool>,
    pub search: Option<String>,
    #[serde(default)]
    pub ordering: EventOrdering,
}

impl EventFilter {
    pub fn upcoming() -> Self {
        Self {
            is_active: Some(true),
            is_past: Some(false),
            ..Self::default()
        }
    }

    pub fn organized_by(organizer: Uuid) -> Self {
        Self {
            organizer: Some(organizer),
            ..Self::default()
        }
    }

    /// In-process evaluation of the filter, mirroring the SQL predicates.
    pub fn matches(&self, view: &EventView, now: DateTime<Utc>) -> bool {
        let event = &view.event;

        if let Some(title) = &self.title {
            if !contains_ci(&event.title, title) {
                return false;
            }
        }
        if let Some(location) = &self.location {
            if !contains_ci(&event.location, location) {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if event.date < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if event.date > to {
                return false;
            }
        }
        if let Some(organizer) = self.organizer {
            if event.organizer_id != organizer {
                return false;
            }
        }
        if let Some(is_active) = self.is_active {
            if event.is_active != is_active {
                return false;
            }
        }
        if self.has_spots == Some(true) && event.is_full(view.attendees_count) {
            return false;
        }
        if let Some(is_past) = self.is_past {
            if event.is_past_at(now) != is_past {
                return false;
            }
        }
        if let Some(term) = &self.search {
            if !(contains_ci(&event.title, term)
                || contains_ci(&event.description, term)
                || contains_ci(&event.location, term))
            {
                return false;
            }
        }
        true
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(max_attendees: Option<i32>, date: DateTime<Utc>) -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            title: "Rust Meetup".into(),
            description: "Monthly meetup".into(),
            date,
            location: "Berlin".into(),
            organizer_id: Uuid::new_v4(),
            max_attendees,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn view(event: Event, attendees_count: i64) -> EventView {
        EventView {
            organizer: OrganizerInfo {
                id: event.organizer_id,
                username: "org".into(),
                email: "org@example.com".into(),
            },
            event,
            attendees_count,
            is_registered: false,
        }
    }

    #[test]
    fn available_spots_clamps_at_zero() {
        let e = event(Some(2), Utc::now() + Duration::days(1));
        assert_eq!(e.available_spots(0), Some(2));
        assert_eq!(e.available_spots(2), Some(0));
        assert_eq!(e.available_spots(5), Some(0));
    }

    #[test]
    fn unlimited_event_is_never_full() {
        let e = event(None, Utc::now() + Duration::days(1));
        assert_eq!(e.available_spots(1000), None);
        assert!(!e.is_full(1000));
    }

    #[test]
    fn is_full_at_capacity() {
        let e = event(Some(1), Utc::now() + Duration::days(1));
        assert!(!e.is_full(0));
        assert!(e.is_full(1));
    }

    #[test]
    fn is_past_compares_with_reference_time() {
        let now = Utc::now();
        let e = event(None, now - Duration::minutes(1));
        assert!(e.is_past_at(now));
        assert!(!e.is_past_at(now - Duration::hours(1)));
    }

    #[test]
    fn filter_matches_text_case_insensitively() {
        let now = Utc::now();
        let v = view(event(None, now + Duration::days(3)), 0);

        let filter = EventFilter {
            title: Some("rust".into()),
            ..EventFilter::default()
        };
        assert!(filter.matches(&v, now));

        let filter = EventFilter {
            search: Some("MONTHLY".into()),
            ..EventFilter::default()
        };
        assert!(filter.matches(&v, now));

        let filter = EventFilter {
            location: Some("paris".into()),
            ..EventFilter::default()
        };
        assert!(!filter.matches(&v, now));
    }

    #[test]
    fn filter_has_spots_excludes_full_events() {
        let now = Utc::now();
        let full = view(event(Some(1), now + Duration::days(1)), 1);
        let open = view(event(Some(2), now + Duration::days(1)), 1);
        let filter = EventFilter {
            has_spots: Some(true),
            ..EventFilter::default()
        };
        assert!(!filter.matches(&full, now));
        assert!(filter.matches(&open, now));
    }

    #[test]
    fn upcoming_filter_excludes_past_and_inactive() {
        let now = Utc::now();
        let past = view(event(None, now - Duration::days(1)), 0);
        let mut inactive_event = event(None, now + Duration::days(1));
        inactive_event.is_active = false;
        let inactive = view(inactive_event, 0);
        let upcoming = view(event(None, now + Duration::days(1)), 0);

        let filter = EventFilter::upcoming();
        assert!(!filter.matches(&past, now));
        assert!(!filter.matches(&inactive, now));
        assert!(filter.matches(&upcoming, now));
    }

    #[test]
    fn ordering_parses_from_query_values() {
        let filter: EventFilter = serde_json::from_value(serde_json::json!({
            "ordering": "-date"
        }))
        .unwrap();
        assert_eq!(filter.ordering, EventOrdering::DateDesc);
        assert_eq!(EventFilter::default().ordering, EventOrdering::DateAsc);
    }
}

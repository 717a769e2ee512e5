use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::db::{Store, StoreResult};
use crate::notify::{Notification, Notifier};

const REMINDER_LEAD_HOURS: i64 = 24;

/// Reminder scan state. Each run covers `[previous end, now + 24h + window)`,
/// so consecutive runs neither overlap nor leave gaps however the ticks drift.
#[derive(Debug, Clone)]
pub struct ReminderSweep {
    window: Duration,
    covered_until: Option<DateTime<Utc>>,
}

impl ReminderSweep {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            covered_until: None,
        }
    }

    /// Range the next run at `now` would scan.
    pub fn next_range(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let lead = now + Duration::hours(REMINDER_LEAD_HOURS);
        let from = self.covered_until.unwrap_or(lead);
        (from, lead + self.window)
    }

    /// Enqueues a reminder for every active event in the next range. A failed
    /// scan leaves the range uncovered so the following run retries it.
    pub async fn run_once(
        &mut self,
        store: &dyn Store,
        notifier: &dyn Notifier,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let (from, to) = self.next_range(now);
        if to <= from {
            return Ok(0);
        }

        let events = store.events_starting_between(from, to).await?;
        for event in &events {
            notifier.enqueue(Notification::EventReminder { event_id: event.id });
        }
        self.covered_until = Some(to);
        Ok(events.len())
    }
}

pub fn spawn_reminder_sweep(
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let window = match Duration::from_std(interval) {
            Ok(window) => window,
            Err(e) => {
                error!(error = %e, "Reminder interval out of range, sweep disabled");
                return;
            }
        };
        info!(interval_secs = interval.as_secs(), "Reminder sweep started");

        let mut sweep = ReminderSweep::new(window);
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match sweep
                .run_once(store.as_ref(), notifier.as_ref(), Utc::now())
                .await
            {
                Ok(0) => {}
                Ok(count) => info!(count, "Queued event reminders"),
                Err(e) => error!(error = %e, "Reminder sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{Event, User};
    use crate::notify::testing::RecordingNotifier;
    use uuid::Uuid;

    async fn event_at(store: &MemoryStore, organizer: &User, date: DateTime<Utc>) -> Event {
        let event = Event {
            id: Uuid::new_v4(),
            title: "Talk".into(),
            description: String::new(),
            date,
            location: "Hall".into(),
            organizer_id: organizer.id,
            max_attendees: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.insert_event(&event).await.unwrap();
        event
    }

    async fn organizer(store: &MemoryStore) -> User {
        let organizer = User::new(
            "org".into(),
            "org@example.com".into(),
            String::new(),
            String::new(),
            "hash".into(),
        );
        store.insert_user(&organizer).await.unwrap();
        organizer
    }

    fn reminded(notifier: &RecordingNotifier) -> Vec<Uuid> {
        notifier
            .sent()
            .into_iter()
            .filter_map(|n| match n {
                Notification::EventReminder { event_id } => Some(event_id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn only_events_inside_the_window_are_reminded() {
        let store = MemoryStore::new();
        let organizer = organizer(&store).await;

        let now = Utc::now();
        let inside = event_at(
            &store,
            &organizer,
            now + Duration::hours(24) + Duration::minutes(30),
        )
        .await;
        event_at(&store, &organizer, now + Duration::hours(2)).await;
        event_at(&store, &organizer, now + Duration::hours(26)).await;

        let notifier = RecordingNotifier::default();
        let mut sweep = ReminderSweep::new(Duration::hours(1));
        let count = sweep.run_once(&store, &notifier, now).await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(reminded(&notifier), vec![inside.id]);
    }

    #[tokio::test]
    async fn drifting_ticks_neither_repeat_nor_skip_events() {
        let store = MemoryStore::new();
        let organizer = organizer(&store).await;
        let now = Utc::now();
        let lead = now + Duration::hours(24);

        let first = event_at(&store, &organizer, lead + Duration::minutes(30)).await;
        let second = event_at(&store, &organizer, lead + Duration::minutes(70)).await;
        // Falls between windows anchored at each tick's own clock reading.
        let third = event_at(&store, &organizer, lead + Duration::minutes(115)).await;

        let notifier = RecordingNotifier::default();
        let mut sweep = ReminderSweep::new(Duration::hours(1));

        // On time, then early, then late.
        sweep.run_once(&store, &notifier, now).await.unwrap();
        sweep
            .run_once(&store, &notifier, now + Duration::minutes(50))
            .await
            .unwrap();
        sweep
            .run_once(&store, &notifier, now + Duration::minutes(130))
            .await
            .unwrap();

        assert_eq!(reminded(&notifier), vec![first.id, second.id, third.id]);
    }

    #[test]
    fn next_range_starts_where_the_last_run_ended() {
        let now = Utc::now();
        let lead = now + Duration::hours(24);
        let mut sweep = ReminderSweep::new(Duration::hours(1));
        assert_eq!(sweep.next_range(now), (lead, lead + Duration::hours(1)));

        sweep.covered_until = Some(lead + Duration::hours(1));
        let later = now + Duration::minutes(90);
        assert_eq!(
            sweep.next_range(later),
            (
                lead + Duration::hours(1),
                later + Duration::hours(24) + Duration::hours(1)
            )
        );
    }
}

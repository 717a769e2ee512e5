//! Fire-and-forget email notifications.
//!
//! Callers hand a [`Notification`] to a [`Notifier`] and move on. The queue
//! worker reloads the rows it needs, renders the message and passes it to a
//! [`Mailer`]. Failures end in the log and never reach the caller.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{Store, StoreError};
use crate::models::page::MAX_PAGE_SIZE;
use crate::models::{OrganizerInfo, PageRequest};

pub mod mailer;
pub mod reminders;
pub mod templates;

pub use mailer::{LogMailer, MailError, Mailer, OutgoingEmail, SmtpMailer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    RegistrationConfirmed { registration_id: Uuid },
    RegistrationCancelled { registration_id: Uuid },
    EventReminder { event_id: Uuid },
}

/// Best-effort, non-blocking hand-off. Nothing is returned to the caller.
pub trait Notifier: Send + Sync {
    fn enqueue(&self, notification: Notification);
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Mail(#[from] MailError),
}

/// Unbounded channel drained by a background worker task.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationQueue {
    pub fn start(store: Arc<dyn Store>, mailer: Arc<dyn Mailer>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = NotificationWorker { store, mailer };
        let handle = tokio::spawn(worker.run(rx));
        (Self { tx }, handle)
    }
}

impl Notifier for NotificationQueue {
    fn enqueue(&self, notification: Notification) {
        if let Err(e) = self.tx.send(notification) {
            error!(notification = ?e.0, "Notification queue closed, dropping notification");
        }
    }
}

#[derive(Clone)]
pub struct NotificationWorker {
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
}

impl NotificationWorker {
    pub fn new(store: Arc<dyn Store>, mailer: Arc<dyn Mailer>) -> Self {
        Self { store, mailer }
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<Notification>) {
        info!("Notification worker started");
        while let Some(notification) = rx.recv().await {
            let worker = self.clone();
            tokio::spawn(async move {
                if let Err(e) = worker.handle(notification).await {
                    error!(?notification, error = %e, "Failed to deliver notification");
                }
            });
        }
        info!("Notification worker stopped");
    }

    pub async fn handle(&self, notification: Notification) -> Result<(), NotifyError> {
        debug!(?notification, "Processing notification");
        match notification {
            Notification::RegistrationConfirmed { registration_id } => {
                let Some(registration) = self.store.find_registration_view(registration_id).await?
                else {
                    warn!(%registration_id, "Registration not found, skipping confirmation");
                    return Ok(());
                };
                let Some(event) = self.store.find_event(registration.event).await? else {
                    warn!(%registration_id, "Event not found, skipping confirmation");
                    return Ok(());
                };
                let organizer = self
                    .store
                    .find_user(event.organizer_id)
                    .await?
                    .map(|user| OrganizerInfo::from(&user))
                    .unwrap_or_else(|| OrganizerInfo {
                        id: event.organizer_id,
                        username: String::new(),
                        email: String::new(),
                    });

                let email = templates::registration_confirmed(&registration.user, &event, &organizer);
                self.mailer.send(email).await?;
                info!(%registration_id, to = %registration.user.email, "Registration email sent");
            }
            Notification::RegistrationCancelled { registration_id } => {
                let Some(registration) = self.store.find_registration_view(registration_id).await?
                else {
                    warn!(%registration_id, "Registration not found, skipping cancellation");
                    return Ok(());
                };
                let Some(event) = self.store.find_event(registration.event).await? else {
                    warn!(%registration_id, "Event not found, skipping cancellation");
                    return Ok(());
                };

                let email = templates::registration_cancelled(&registration.user, &event);
                self.mailer.send(email).await?;
                info!(%registration_id, to = %registration.user.email, "Cancellation email sent");
            }
            Notification::EventReminder { event_id } => {
                let Some(event) = self.store.find_event(event_id).await? else {
                    warn!(%event_id, "Event not found, skipping reminders");
                    return Ok(());
                };

                let mut page = PageRequest {
                    page: 1,
                    page_size: MAX_PAGE_SIZE,
                };
                let mut sent = 0usize;
                loop {
                    let attendees = self.store.list_attendees(event_id, page).await?;
                    let fetched = attendees.results.len();
                    for registration in attendees.results {
                        let email = templates::event_reminder(&registration.user, &event);
                        match self.mailer.send(email).await {
                            Ok(()) => sent += 1,
                            Err(e) => warn!(
                                %event_id,
                                to = %registration.user.email,
                                error = %e,
                                "Failed to send reminder"
                            ),
                        }
                    }
                    if fetched < page.page_size as usize {
                        break;
                    }
                    page.page += 1;
                }
                info!(%event_id, sent, "Reminder emails sent");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Captures notifications instead of delivering them.
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn enqueue(&self, notification: Notification) {
            self.sent.lock().unwrap().push(notification);
        }
    }

    #[derive(Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<OutgoingEmail>>,
        fail_for: Option<String>,
    }

    impl RecordingMailer {
        pub fn failing_for(address: &str) -> Self {
            Self {
                sent: Mutex::default(),
                fail_for: Some(address.to_string()),
            }
        }

        pub fn sent(&self) -> Vec<OutgoingEmail> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
            if self.fail_for.as_deref() == Some(email.to.as_str()) {
                return Err(MailError::Transport("connection refused".into()));
            }
            self.sent.lock().unwrap().push(email);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::testing::RecordingMailer;
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{Event, Registration, User};

    async fn user(store: &MemoryStore, username: &str) -> User {
        let user = User::new(
            username.into(),
            format!("{username}@example.com"),
            String::new(),
            String::new(),
            "hash".into(),
        );
        store.insert_user(&user).await.unwrap();
        user
    }

    async fn event(store: &MemoryStore, organizer: &User) -> Event {
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4(),
            title: "Workshop".into(),
            description: "Hands-on".into(),
            date: now + Duration::days(1),
            location: "Room 1".into(),
            organizer_id: organizer.id,
            max_attendees: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.insert_event(&event).await.unwrap();
        event
    }

    async fn register(store: &MemoryStore, user: &User, event: &Event) -> Registration {
        let registration = Registration::new(user.id, event.id, Utc::now());
        let mut tx = store.begin().await.unwrap();
        tx.insert_registration(&registration).await.unwrap();
        tx.commit().await.unwrap();
        registration
    }

    #[tokio::test]
    async fn confirmation_goes_to_the_registrant() {
        let store = MemoryStore::new();
        let organizer = user(&store, "organizer").await;
        let attendee = user(&store, "attendee").await;
        let event = event(&store, &organizer).await;
        let registration = register(&store, &attendee, &event).await;

        let mailer = Arc::new(RecordingMailer::default());
        let worker = NotificationWorker::new(Arc::new(store), mailer.clone());
        worker
            .handle(Notification::RegistrationConfirmed {
                registration_id: registration.id,
            })
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "attendee@example.com");
        assert_eq!(sent[0].subject, "Registration Confirmation: Workshop");
        assert!(sent[0].text_body.contains("Organizer: organizer"));
    }

    #[tokio::test]
    async fn missing_registration_is_skipped() {
        let mailer = Arc::new(RecordingMailer::default());
        let worker = NotificationWorker::new(Arc::new(MemoryStore::new()), mailer.clone());
        worker
            .handle(Notification::RegistrationCancelled {
                registration_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_reported_to_the_worker() {
        let store = MemoryStore::new();
        let organizer = user(&store, "organizer").await;
        let attendee = user(&store, "attendee").await;
        let event = event(&store, &organizer).await;
        let registration = register(&store, &attendee, &event).await;

        let mailer = Arc::new(RecordingMailer::failing_for("attendee@example.com"));
        let worker = NotificationWorker::new(Arc::new(store), mailer);
        let result = worker
            .handle(Notification::RegistrationConfirmed {
                registration_id: registration.id,
            })
            .await;
        assert!(matches!(result, Err(NotifyError::Mail(_))));
    }

    #[tokio::test]
    async fn reminders_continue_past_individual_failures() {
        let store = MemoryStore::new();
        let organizer = user(&store, "organizer").await;
        let first = user(&store, "first").await;
        let second = user(&store, "second").await;
        let event = event(&store, &organizer).await;
        register(&store, &first, &event).await;
        register(&store, &second, &event).await;

        let mailer = Arc::new(RecordingMailer::failing_for("first@example.com"));
        let worker = NotificationWorker::new(Arc::new(store), mailer.clone());
        worker
            .handle(Notification::EventReminder { event_id: event.id })
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "second@example.com");
        assert_eq!(sent[0].subject, "Event Reminder: Workshop");
    }

    #[tokio::test]
    async fn queue_delivers_in_background() {
        let store = MemoryStore::new();
        let organizer = user(&store, "organizer").await;
        let attendee = user(&store, "attendee").await;
        let event = event(&store, &organizer).await;
        let registration = register(&store, &attendee, &event).await;

        let mailer = Arc::new(RecordingMailer::default());
        let (queue, _handle) = NotificationQueue::start(Arc::new(store), mailer.clone());
        queue.enqueue(Notification::RegistrationCancelled {
            registration_id: registration.id,
        });

        for _ in 0..50 {
            if !mailer.sent().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(mailer.sent().len(), 1);
    }
}

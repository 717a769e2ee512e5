use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::db::{RegistrationTx, Store, StoreResult};
use crate::models::{
    Event, EventFilter, EventView, OrganizerInfo, Page, PageRequest, Registration,
    RegistrationScope, RegistrationView, User, UserProfile,
};

const EVENT_COLUMNS: &str = "id, title, description, date, location, organizer_id, \
     max_attendees, is_active, created_at, updated_at";

const USER_COLUMNS: &str = "id, username, email, first_name, last_name, password_hash, \
     is_active, date_joined, updated_at";

const REGISTRATION_VIEW_SELECT: &str = "SELECT r.id, r.user_id, u.username, u.email, \
     u.first_name, u.last_name, r.event_id, e.title AS event_title, e.date AS event_date, \
     r.registered_at, r.is_cancelled, r.cancelled_at \
     FROM event_registration r \
     JOIN users u ON u.id = r.user_id \
     JOIN event e ON e.id = r.event_id";

#[derive(FromRow)]
struct EventViewRow {
    id: Uuid,
    title: String,
    description: String,
    date: DateTime<Utc>,
    location: String,
    organizer_id: Uuid,
    max_attendees: Option<i32>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    organizer_username: String,
    organizer_email: String,
    attendees_count: i64,
    is_registered: bool,
}

impl From<EventViewRow> for EventView {
    fn from(row: EventViewRow) -> Self {
        EventView {
            organizer: OrganizerInfo {
                id: row.organizer_id,
                username: row.organizer_username,
                email: row.organizer_email,
            },
            event: Event {
                id: row.id,
                title: row.title,
                description: row.description,
                date: row.date,
                location: row.location,
                organizer_id: row.organizer_id,
                max_attendees: row.max_attendees,
                is_active: row.is_active,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            attendees_count: row.attendees_count,
            is_registered: row.is_registered,
        }
    }
}

#[derive(FromRow)]
struct RegistrationViewRow {
    id: Uuid,
    user_id: Uuid,
    username: String,
    email: String,
    first_name: String,
    last_name: String,
    event_id: Uuid,
    event_title: String,
    event_date: DateTime<Utc>,
    registered_at: DateTime<Utc>,
    is_cancelled: bool,
    cancelled_at: Option<DateTime<Utc>>,
}

impl From<RegistrationViewRow> for RegistrationView {
    fn from(row: RegistrationViewRow) -> Self {
        RegistrationView {
            id: row.id,
            user: UserProfile {
                id: row.user_id,
                username: row.username,
                email: row.email,
                first_name: row.first_name,
                last_name: row.last_name,
            },
            event: row.event_id,
            event_title: row.event_title,
            event_date: row.event_date,
            registered_at: row.registered_at,
            is_cancelled: row.is_cancelled,
            cancelled_at: row.cancelled_at,
        }
    }
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_event_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    filter: &EventFilter,
    now: DateTime<Utc>,
) {
    qb.push(" WHERE TRUE");

    if let Some(title) = &filter.title {
        qb.push(" AND e.title ILIKE ").push_bind(like_pattern(title));
    }
    if let Some(location) = &filter.location {
        qb.push(" AND e.location ILIKE ")
            .push_bind(like_pattern(location));
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND e.date >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND e.date <= ").push_bind(to);
    }
    if let Some(organizer) = filter.organizer {
        qb.push(" AND e.organizer_id = ").push_bind(organizer);
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND e.is_active = ").push_bind(is_active);
    }
    if filter.has_spots == Some(true) {
        qb.push(
            " AND (e.max_attendees IS NULL OR e.max_attendees > \
             (SELECT COUNT(*) FROM event_registration c \
              WHERE c.event_id = e.id AND NOT c.is_cancelled))",
        );
    }
    match filter.is_past {
        Some(true) => {
            qb.push(" AND e.date < ").push_bind(now);
        }
        Some(false) => {
            qb.push(" AND e.date >= ").push_bind(now);
        }
        None => {}
    }
    if let Some(term) = &filter.search {
        let pattern = like_pattern(term);
        qb.push(" AND (e.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR e.description ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR e.location ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn event_view_query(viewer: Option<Uuid>) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT e.id, e.title, e.description, e.date, e.location, e.organizer_id, \
         e.max_attendees, e.is_active, e.created_at, e.updated_at, \
         u.username AS organizer_username, u.email AS organizer_email, \
         (SELECT COUNT(*) FROM event_registration c \
          WHERE c.event_id = e.id AND NOT c.is_cancelled) AS attendees_count, \
         EXISTS (SELECT 1 FROM event_registration v \
          WHERE v.event_id = e.id AND NOT v.is_cancelled AND v.user_id = ",
    );
    qb.push_bind(viewer);
    qb.push(") AS is_registered FROM event e JOIN users u ON u.id = e.organizer_id");
    qb
}

fn push_registration_scope(
    qb: &mut QueryBuilder<'_, Postgres>,
    scope: RegistrationScope,
    now: DateTime<Utc>,
) {
    match scope {
        RegistrationScope::All => {}
        RegistrationScope::Active => {
            qb.push(" AND NOT r.is_cancelled AND e.date >= ")
                .push_bind(now);
        }
        RegistrationScope::Past => {
            qb.push(" AND NOT r.is_cancelled AND e.date < ").push_bind(now);
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (id, username, email, first_name, last_name, password_hash, \
             is_active, date_joined, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.date_joined)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            "UPDATE users SET username = $2, email = $3, first_name = $4, last_name = $5, \
             password_hash = $6, is_active = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO event ({EVENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(event.id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.date)
        .bind(&event.location)
        .bind(event.organizer_id)
        .bind(event.max_attendees)
        .bind(event.is_active)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM event WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }

    async fn find_event_view(
        &self,
        id: Uuid,
        viewer: Option<Uuid>,
    ) -> StoreResult<Option<EventView>> {
        let mut qb = event_view_query(viewer);
        qb.push(" WHERE e.id = ").push_bind(id);
        let row = qb
            .build_query_as::<EventViewRow>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(EventView::from))
    }

    async fn list_events(
        &self,
        filter: &EventFilter,
        viewer: Option<Uuid>,
        page: PageRequest,
    ) -> StoreResult<Page<EventView>> {
        let now = Utc::now();

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM event e");
        push_event_filters(&mut count_qb, filter, now);
        let count = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = event_view_query(viewer);
        push_event_filters(&mut qb, filter, now);
        qb.push(" ORDER BY ").push(filter.ordering.sql());
        qb.push(" LIMIT ").push_bind(page.limit());
        qb.push(" OFFSET ").push_bind(page.offset());
        let rows = qb
            .build_query_as::<EventViewRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(
            rows.into_iter().map(EventView::from).collect(),
            count,
            page,
        ))
    }

    async fn update_event(&self, event: &Event) -> StoreResult<()> {
        sqlx::query(
            "UPDATE event SET title = $2, description = $3, date = $4, location = $5, \
             max_attendees = $6, is_active = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(event.id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.date)
        .bind(&event.location)
        .bind(event.max_attendees)
        .bind(event.is_active)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_event(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM event WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn events_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM event \
             WHERE is_active AND date >= $1 AND date < $2 ORDER BY date"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn count_active_registrations(&self, event_id: Uuid) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM event_registration WHERE event_id = $1 AND NOT is_cancelled",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn find_registration_view(&self, id: Uuid) -> StoreResult<Option<RegistrationView>> {
        let row = sqlx::query_as::<_, RegistrationViewRow>(&format!(
            "{REGISTRATION_VIEW_SELECT} WHERE r.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RegistrationView::from))
    }

    async fn list_attendees(
        &self,
        event_id: Uuid,
        page: PageRequest,
    ) -> StoreResult<Page<RegistrationView>> {
        let count = self.count_active_registrations(event_id).await?;
        let rows = sqlx::query_as::<_, RegistrationViewRow>(&format!(
            "{REGISTRATION_VIEW_SELECT} WHERE r.event_id = $1 AND NOT r.is_cancelled \
             ORDER BY r.registered_at ASC, r.id ASC LIMIT $2 OFFSET $3"
        ))
        .bind(event_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        Ok(Page::new(
            rows.into_iter().map(RegistrationView::from).collect(),
            count,
            page,
        ))
    }

    async fn list_user_registrations(
        &self,
        user_id: Uuid,
        scope: RegistrationScope,
        page: PageRequest,
    ) -> StoreResult<Page<RegistrationView>> {
        let now = Utc::now();

        let mut count_qb = QueryBuilder::new(
            "SELECT COUNT(*) FROM event_registration r JOIN event e ON e.id = r.event_id \
             WHERE r.user_id = ",
        );
        count_qb.push_bind(user_id);
        push_registration_scope(&mut count_qb, scope, now);
        let count = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::new(REGISTRATION_VIEW_SELECT);
        qb.push(" WHERE r.user_id = ").push_bind(user_id);
        push_registration_scope(&mut qb, scope, now);
        qb.push(" ORDER BY r.registered_at DESC, r.id ASC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb
            .build_query_as::<RegistrationViewRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(
            rows.into_iter().map(RegistrationView::from).collect(),
            count,
            page,
        ))
    }

    async fn begin(&self) -> StoreResult<Box<dyn RegistrationTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgRegistrationTx { tx }))
    }
}

/// Registration unit of work. The event row stays locked `FOR UPDATE` until commit,
/// which serializes count-and-insert across concurrent registrants of one event.
pub struct PgRegistrationTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RegistrationTx for PgRegistrationTx {
    async fn lock_event(&mut self, id: Uuid) -> StoreResult<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM event WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(event)
    }

    async fn count_active_registrations(&mut self, event_id: Uuid) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM event_registration WHERE event_id = $1 AND NOT is_cancelled",
        )
        .bind(event_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn find_registration(
        &mut self,
        user_id: Uuid,
        event_id: Uuid,
    ) -> StoreResult<Option<Registration>> {
        let registration = sqlx::query_as::<_, Registration>(
            "SELECT id, user_id, event_id, registered_at, is_cancelled, cancelled_at \
             FROM event_registration WHERE user_id = $1 AND event_id = $2",
        )
        .bind(user_id)
        .bind(event_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(registration)
    }

    async fn insert_registration(&mut self, registration: &Registration) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO event_registration \
             (id, user_id, event_id, registered_at, is_cancelled, cancelled_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(registration.id)
        .bind(registration.user_id)
        .bind(registration.event_id)
        .bind(registration.registered_at)
        .bind(registration.is_cancelled)
        .bind(registration.cancelled_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_registration(&mut self, registration: &Registration) -> StoreResult<()> {
        sqlx::query(
            "UPDATE event_registration SET is_cancelled = $2, cancelled_at = $3 WHERE id = $1",
        )
        .bind(registration.id)
        .bind(registration.is_cancelled)
        .bind(registration.cancelled_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use eventhub_server::config::Config;
use eventhub_server::db::{MemoryStore, PgStore, Store};
use eventhub_server::notify::reminders::spawn_reminder_sweep;
use eventhub_server::notify::{LogMailer, Mailer, NotificationQueue, Notifier, SmtpMailer};
use eventhub_server::routes::create_routes;
use eventhub_server::state::AppState;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info,sqlx=warn")),
        )
        .init();

    let config = Config::from_env().expect("Invalid configuration");

    let store: Arc<dyn Store> = if config.uses_memory_store() {
        tracing::warn!("Using the in-memory store, data will not survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        let store = PgStore::connect(&config.database_url, config.database_max_connections)
            .await
            .expect("Failed to connect to database");
        tracing::info!("Successfully connected to database");

        store.migrate().await.expect("Failed to run migrations");
        tracing::info!("Migrations run successfully");
        Arc::new(store)
    };

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(
            SmtpMailer::new(smtp, &config.default_from_email)
                .expect("Failed to configure SMTP mailer"),
        ),
        None => {
            tracing::info!("SMTP_HOST not set, emails will be written to the log");
            Arc::new(LogMailer)
        }
    };

    let (queue, _worker) = NotificationQueue::start(store.clone(), mailer);
    let notifier: Arc<dyn Notifier> = Arc::new(queue);

    if config.reminder_interval_secs > 0 {
        spawn_reminder_sweep(
            store.clone(),
            notifier.clone(),
            Duration::from_secs(config.reminder_interval_secs),
        );
    }

    let state = AppState::new(store, notifier, &config);
    let app = create_routes(state, &config);

    tracing::info!("Server running at http://{}", config.bind_addr);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}

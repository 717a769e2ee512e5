use std::sync::Arc;

use chrono::Duration;

use crate::auth::TokenService;
use crate::config::Config;
use crate::db::Store;
use crate::notify::Notifier;
use crate::services::registration::RegistrationEngine;

/// Shared handles passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub tokens: Arc<TokenService>,
    pub registrations: RegistrationEngine,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, config: &Config) -> Self {
        let tokens = TokenService::new(
            &config.jwt.secret,
            Duration::minutes(config.jwt.access_ttl_minutes),
            Duration::days(config.jwt.refresh_ttl_days),
        );
        Self {
            registrations: RegistrationEngine::new(store.clone(), notifier),
            store,
            tokens: Arc::new(tokens),
        }
    }
}

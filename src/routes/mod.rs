use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer, Config};
use crate::handlers::{accounts, events, health_check, registrations};
use crate::state::AppState;

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register/", post(accounts::register_user))
        .route("/api/auth/login/", post(accounts::login))
        .route("/api/auth/token/refresh/", post(accounts::refresh_token))
        .route("/api/auth/profile/", get(accounts::profile))
        .route(
            "/api/auth/profile/update/",
            put(accounts::update_profile).patch(accounts::update_profile),
        )
        .route(
            "/api/auth/change-password/",
            post(accounts::change_password),
        )
}

fn event_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/events/",
            get(events::list_events).post(events::create_event),
        )
        .route("/api/events/my_events/", get(events::my_events))
        .route("/api/events/upcoming/", get(events::upcoming_events))
        .route(
            "/api/events/:id/",
            get(events::get_event)
                .put(events::replace_event)
                .patch(events::patch_event)
                .delete(events::delete_event),
        )
        .route(
            "/api/events/:id/register/",
            post(registrations::register_for_event),
        )
        .route(
            "/api/events/:id/unregister/",
            post(registrations::unregister_from_event),
        )
        .route(
            "/api/events/:id/attendees/",
            get(registrations::event_attendees),
        )
}

fn my_registration_routes() -> Router<AppState> {
    Router::new()
        .route("/api/my-registrations/", get(registrations::my_registrations))
        .route(
            "/api/my-registrations/active/",
            get(registrations::my_active_registrations),
        )
        .route(
            "/api/my-registrations/past/",
            get(registrations::my_past_registrations),
        )
        .route(
            "/api/my-registrations/:id/",
            get(registrations::my_registration),
        )
}

pub fn create_routes(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(auth_routes())
        .merge(event_routes())
        .merge(my_registration_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer(config))
        .layer(create_cors_layer(&config.cors_allowed_origins))
}

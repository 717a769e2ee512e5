use std::env;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::str::FromStr;

use thiserror::Error;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/eventhub";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";
const DEFAULT_FROM_EMAIL: &str = "noreply@eventhub.local";
const DEVELOPMENT_JWT_SECRET: &str = "development-only-insecure-secret";
const ACCESS_TTL_MINUTES: RangeInclusive<i64> = 1..=7 * 24 * 60;
const REFRESH_TTL_DAYS: RangeInclusive<i64> = 1..=365;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JWT_SECRET must be set in production")]
    MissingJwtSecret,

    #[error("Invalid BIND_ADDR '{0}'")]
    InvalidBindAddr(String),

    #[error("{key} must be an integer between {min} and {max}, got '{value}'")]
    OutOfRange {
        key: &'static str,
        value: String,
        min: i64,
        max: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub jwt: JwtConfig,
    pub cors_allowed_origins: Vec<String>,
    pub smtp: Option<SmtpConfig>,
    pub default_from_email: String,
    /// Zero disables the reminder sweep.
    pub reminder_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let environment = match var("RUST_ENV") {
            Some(value) if value.eq_ignore_ascii_case("production") => Environment::Production,
            _ => Environment::Development,
        };

        let secret = match var("JWT_SECRET") {
            Some(secret) => secret,
            None if environment.is_production() => return Err(ConfigError::MissingJwtSecret),
            None => {
                tracing::warn!("JWT_SECRET not set, using the insecure development secret");
                DEVELOPMENT_JWT_SECRET.to_string()
            }
        };

        let bind = var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(bind.clone()))?;

        let smtp = var("SMTP_HOST").map(|host| SmtpConfig {
            host,
            port: parse_or(&var, "SMTP_PORT", 587),
            username: var("SMTP_USERNAME"),
            password: var("SMTP_PASSWORD"),
        });

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let jwt = JwtConfig {
            secret,
            access_ttl_minutes: parse_bounded(
                &var,
                "JWT_ACCESS_TTL_MINUTES",
                60,
                ACCESS_TTL_MINUTES,
            )?,
            refresh_ttl_days: parse_bounded(&var, "JWT_REFRESH_TTL_DAYS", 1, REFRESH_TTL_DAYS)?,
        };

        Ok(Self {
            environment,
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            database_max_connections: parse_or(&var, "DATABASE_MAX_CONNECTIONS", 5),
            bind_addr,
            jwt,
            cors_allowed_origins,
            smtp,
            default_from_email: var("DEFAULT_FROM_EMAIL")
                .unwrap_or_else(|| DEFAULT_FROM_EMAIL.to_string()),
            reminder_interval_secs: parse_or(&var, "REMINDER_INTERVAL_SECS", 3600),
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url.starts_with("memory://")
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, %default, "Invalid value, using default");
            default
        }),
    }
}

/// Token lifetimes feed `chrono::Duration` constructors, which panic on overflow.
fn parse_bounded<F>(
    var: &F,
    key: &'static str,
    default: i64,
    range: RangeInclusive<i64>,
) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<i64>() {
        Ok(value) if range.contains(&value) => Ok(value),
        _ => Err(ConfigError::OutOfRange {
            key,
            value: raw,
            min: *range.start(),
            max: *range.end(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_in_development() {
        let config = config(&[]).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.bind_addr.port(), 3001);
        assert_eq!(config.jwt.secret, DEVELOPMENT_JWT_SECRET);
        assert_eq!(config.jwt.access_ttl_minutes, 60);
        assert_eq!(config.cors_allowed_origins.len(), 2);
        assert!(config.smtp.is_none());
        assert_eq!(config.reminder_interval_secs, 3600);
        assert!(!config.uses_memory_store());
    }

    #[test]
    fn production_requires_a_jwt_secret() {
        assert!(matches!(
            config(&[("RUST_ENV", "production")]),
            Err(ConfigError::MissingJwtSecret)
        ));

        let config = config(&[("RUST_ENV", "Production"), ("JWT_SECRET", "s3cret")]).unwrap();
        assert!(config.environment.is_production());
        assert_eq!(config.jwt.secret, "s3cret");
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config(&[
            ("DATABASE_MAX_CONNECTIONS", "lots"),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PORT", "not-a-port"),
        ])
        .unwrap();
        assert_eq!(config.database_max_connections, 5);
        let smtp = config.smtp.unwrap();
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 587);
        assert!(smtp.username.is_none());
    }

    #[test]
    fn invalid_bind_addr_is_an_error() {
        assert!(matches!(
            config(&[("BIND_ADDR", "nowhere")]),
            Err(ConfigError::InvalidBindAddr(_))
        ));
    }

    #[test]
    fn memory_store_is_selected_by_url_scheme() {
        let config = config(&[("DATABASE_URL", "memory://")]).unwrap();
        assert!(config.uses_memory_store());
    }

    #[test]
    fn token_lifetimes_are_bounded() {
        assert!(matches!(
            config(&[("JWT_ACCESS_TTL_MINUTES", "9223372036854775807")]),
            Err(ConfigError::OutOfRange { key: "JWT_ACCESS_TTL_MINUTES", .. })
        ));
        assert!(matches!(
            config(&[("JWT_REFRESH_TTL_DAYS", "0")]),
            Err(ConfigError::OutOfRange { key: "JWT_REFRESH_TTL_DAYS", .. })
        ));
        assert!(matches!(
            config(&[("JWT_REFRESH_TTL_DAYS", "soon")]),
            Err(ConfigError::OutOfRange { .. })
        ));

        let config = config(&[
            ("JWT_ACCESS_TTL_MINUTES", "15"),
            ("JWT_REFRESH_TTL_DAYS", "30"),
        ])
        .unwrap();
        assert_eq!(config.jwt.access_ttl_minutes, 15);
        assert_eq!(config.jwt.refresh_ttl_days, 30);
    }
}

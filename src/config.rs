use std::env;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::str::FromStr;

use chrono::Duration;

use crate::policy::{CompletionThresholds, RegistrationRules};

/// Accepted session lifetimes, in days.
const SESSION_TTL_RANGE: RangeInclusive<i64> = 1..=365;

/// Which storage implementation the server is composed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres { url: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: StoreBackend,
    pub session_ttl: Duration,
    pub rules: RegistrationRules,
    pub admin_password: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            backend: StoreBackend::Memory,
            session_ttl: Duration::days(2),
            rules: RegistrationRules::default(),
            admin_password: "adminpassword".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads the environment (and `.env`, when present).
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("STORE_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("memory") => StoreBackend::Memory,
            Some("postgres") => StoreBackend::Postgres {
                url: lookup("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?,
            },
            Some(other) => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        let ttl_days: i64 = parse_or(&lookup, "SESSION_TTL_DAYS", 2)?;
        if !SESSION_TTL_RANGE.contains(&ttl_days) {
            return Err(ConfigError::Invalid {
                key: "SESSION_TTL_DAYS",
                value: ttl_days.to_string(),
            });
        }
        let review_subject_limit =
            parse_or(&lookup, "REVIEW_SUBJECT_LIMIT", defaults.rules.review_subject_limit)?;
        let completion = CompletionThresholds {
            review_subjects: parse_or(
                &lookup,
                "REVIEW_COMPLETION_COUNT",
                defaults.rules.completion.review_subjects,
            )?,
            exam_subjects: parse_or(
                &lookup,
                "EXAM_COMPLETION_COUNT",
                defaults.rules.completion.exam_subjects,
            )?,
        };

        Ok(Self {
            host: lookup("APP_HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "APP_PORT", defaults.port)?,
            backend,
            session_ttl: Duration::days(ttl_days),
            rules: RegistrationRules {
                review_subject_limit,
                completion,
            },
            admin_password: lookup("ADMIN_PASSWORD").unwrap_or(defaults.admin_password),
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.host.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        _ => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value `{value}`")]
    Invalid { key: &'static str, value: String },
    #[error("APP_HOST must parse to an IPv4 or IPv6 address, got `{0}`")]
    InvalidHost(String),
    #[error("STORE_BACKEND=postgres requires DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("unknown STORE_BACKEND `{0}`, expected `memory` or `postgres`")]
    UnknownBackend(String),
}

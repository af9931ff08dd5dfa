use crate::error::AppError;
use crate::websocket::relay::DeletePolicy;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_expires_in_secs: i64,
    /// Upper bound on every store call
    pub store_timeout: Duration,
    /// Persist broadcast fan-out in one transaction instead of independent writes
    pub fanout_transactional: bool,
    pub history_max_limit: i64,
    pub relay_queue_capacity: usize,
    pub relay_delete_policy: DeletePolicy,
    pub ws_heartbeat_interval: Duration,
    pub ws_client_timeout: Duration,
    pub cors_allowed_origins: Vec<String>,
}

impl Config {
    /// Defaults for everything except the two required values
    pub fn with_defaults(database_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            port: 5000,
            jwt_secret: jwt_secret.into(),
            jwt_expires_in_secs: 3600,
            store_timeout: Duration::from_millis(5000),
            fanout_transactional: false,
            history_max_limit: 200,
            relay_queue_capacity: 1024,
            relay_delete_policy: DeletePolicy::default(),
            ws_heartbeat_interval: Duration::from_secs(5),
            ws_client_timeout: Duration::from_secs(30),
            cors_allowed_origins: Vec::new(),
        }
    }

    fn parse_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
        match env::var(key) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}"))),
            Err(_) => Ok(default),
        }
    }

    fn parse_bool(key: &str, default: bool) -> bool {
        env::var(key)
            .ok()
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(default)
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;
        if jwt_secret.trim().is_empty() {
            return Err(AppError::Config("JWT_SECRET must not be empty".into()));
        }

        let defaults = Self::with_defaults(database_url, jwt_secret);

        let history_max_limit: i64 =
            Self::parse_or("HISTORY_MAX_LIMIT", defaults.history_max_limit)?;
        if history_max_limit <= 0 {
            return Err(AppError::Config("HISTORY_MAX_LIMIT must be positive".into()));
        }
        let relay_queue_capacity: usize =
            Self::parse_or("RELAY_QUEUE_CAPACITY", defaults.relay_queue_capacity)?;
        if relay_queue_capacity == 0 {
            return Err(AppError::Config("RELAY_QUEUE_CAPACITY must be positive".into()));
        }

        let relay_delete_policy = match env::var("RELAY_DELETE_POLICY") {
            Ok(raw) => raw.parse().map_err(AppError::Config)?,
            Err(_) => defaults.relay_delete_policy,
        };

        Ok(Self {
            port: Self::parse_or("PORT", defaults.port)?,
            jwt_expires_in_secs: Self::parse_or("JWT_EXPIRES_IN_SECS", defaults.jwt_expires_in_secs)?,
            store_timeout: Duration::from_millis(Self::parse_or("STORE_TIMEOUT_MS", 5000u64)?),
            fanout_transactional: Self::parse_bool(
                "FANOUT_TRANSACTIONAL",
                defaults.fanout_transactional,
            ),
            history_max_limit,
            relay_queue_capacity,
            relay_delete_policy,
            ws_heartbeat_interval: Duration::from_secs(Self::parse_or(
                "WS_HEARTBEAT_INTERVAL_SECS",
                5u64,
            )?),
            ws_client_timeout: Duration::from_secs(Self::parse_or("WS_CLIENT_TIMEOUT_SECS", 30u64)?),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|v| Self::parse_list(&v))
                .unwrap_or_default(),
            ..defaults
        })
    }
}

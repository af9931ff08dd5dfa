//! Environment variable parsing for pool tuning

use std::str::FromStr;

/// Parse an environment variable, falling back to `default` when missing or unparseable
pub(crate) fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable pool setting");
            default
        }),
        Err(_) => default,
    }
}

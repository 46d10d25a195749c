//! Runtime settings. Read once from the environment and carried explicitly.

use crate::error::{AppError, ConfigError};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    /// Page size used when `page[size]` is missing or zero.
    pub pagination_size: u64,
    /// String column filters use case-insensitive containment instead of equality.
    pub queryable_use_like: bool,
    pub delete_status_code: u16,
    /// Testing override: the root request transaction is opened as a savepoint,
    /// and flat scopes inside a savepoint open their own savepoint instead of failing.
    pub allow_nesting_root_transaction: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: "sqlite://solo.db?mode=rwc".into(),
            max_connections: 5,
            pagination_size: 20,
            queryable_use_like: false,
            delete_status_code: 204,
            allow_nesting_root_transaction: false,
        }
    }
}

impl Settings {
    /// Reads `DATABASE_URL` and the `SOLO_*` variables; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, AppError> {
        let mut s = Settings::default();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            s.database_url = url;
        }
        s.max_connections = env_or("SOLO_MAX_CONNECTIONS", s.max_connections)?;
        s.pagination_size = env_or("SOLO_PAGINATION_SIZE", s.pagination_size)?;
        s.queryable_use_like = env_or("SOLO_QUERYABLE_USE_LIKE", s.queryable_use_like)?;
        s.delete_status_code = env_or("SOLO_DELETE_STATUS_CODE", s.delete_status_code)?;
        s.allow_nesting_root_transaction =
            env_or("SOLO_ALLOW_NESTING_ROOT_TRANSACTION", s.allow_nesting_root_transaction)?;
        Ok(s)
    }

    /// Loads `.env` from the working directory when present, then [`Settings::from_env`].
    pub fn from_dotenv() -> Result<Self, AppError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Settings::from_env()
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(ConfigError::Load(format!("{} has invalid value '{}'", key, raw)))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.pagination_size, 20);
        assert!(!s.queryable_use_like);
        assert_eq!(s.delete_status_code, 204);
        assert!(!s.allow_nesting_root_transaction);
    }

    #[test]
    fn deserializes_partial() {
        let s: Settings = serde_json::from_str(r#"{"pagination_size": 5}"#).unwrap();
        assert_eq!(s.pagination_size, 5);
        assert_eq!(s.max_connections, 5);
    }
}

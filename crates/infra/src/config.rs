//! Ledger configuration loading and representation.
//!
//! Values come from environment variables (see [`LedgerConfig::from_env`]).
//! Anything unrecognised is a [`ConfigError`]; there is no silent fallback to
//! a different backend.

use core::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use tokenledger_core::TokenLifetimes;

/// Default TTL safety margin applied to token lifetimes.
pub const DEFAULT_TTL_MARGIN: f64 = 1.2;

/// Default namespace for networked-cache keys.
pub const DEFAULT_KEY_PREFIX: &str = "tokenledger:jti:";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Not supported storage type: {0}.")]
    UnsupportedBackend(String),

    #[error("{backend} backend is not available in this build")]
    BackendUnavailable { backend: BackendKind },

    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

/// Storage backend selector.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Process-local map. Single process only.
    Memory,
    /// Key/value cache with native TTL (Redis).
    NetworkedCache,
    /// Durable rows (Postgres).
    Relational,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::NetworkedCache => "networked-cache",
            BackendKind::Relational => "relational",
        }
    }
}

impl core::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "networked-cache" | "redis" => Ok(BackendKind::NetworkedCache),
            "relational" | "postgres" => Ok(BackendKind::Relational),
            _ => Err(ConfigError::UnsupportedBackend(s.to_string())),
        }
    }
}

/// Connection parameters for the networked cache.
#[derive(Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    pub key_prefix: String,
}

impl core::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

/// Everything needed to construct a `TokenLedger` at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    pub backend: BackendKind,
    pub redis: RedisConfig,
    pub database_url: Option<String>,
    pub lifetimes: TokenLifetimes,
    pub ttl_margin: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            redis: RedisConfig::default(),
            database_url: None,
            lifetimes: TokenLifetimes::default(),
            ttl_margin: DEFAULT_TTL_MARGIN,
        }
    }
}

impl LedgerConfig {
    /// In-memory ledger with the given lifetimes (tests/dev).
    pub fn memory(lifetimes: TokenLifetimes) -> Self {
        Self {
            lifetimes,
            ..Self::default()
        }
    }

    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment, file, test map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("LEDGER_BACKEND") {
            Some(v) => v.parse()?,
            None => defaults.backend,
        };

        let redis = RedisConfig {
            host: get("REDIS_HOST").unwrap_or(defaults.redis.host),
            port: parse_or("REDIS_PORT", get("REDIS_PORT"), defaults.redis.port)?,
            db: parse_or("REDIS_DB", get("REDIS_DB"), defaults.redis.db)?,
            password: get("REDIS_PASSWORD"),
            key_prefix: get("REDIS_KEY_PREFIX").unwrap_or(defaults.redis.key_prefix),
        };
        if redis.db < 0 {
            return Err(ConfigError::invalid("REDIS_DB", "must be >= 0"));
        }

        let ttl_margin: f64 = parse_or(
            "LEDGER_TTL_MARGIN",
            get("LEDGER_TTL_MARGIN"),
            defaults.ttl_margin,
        )?;
        if !ttl_margin.is_finite() || ttl_margin < 1.0 {
            return Err(ConfigError::invalid("LEDGER_TTL_MARGIN", "must be a number >= 1.0"));
        }

        let access: u64 = parse_or(
            "ACCESS_TOKEN_EXPIRES",
            get("ACCESS_TOKEN_EXPIRES"),
            defaults.lifetimes.access().as_secs(),
        )?;
        let refresh: u64 = parse_or(
            "REFRESH_TOKEN_EXPIRES",
            get("REFRESH_TOKEN_EXPIRES"),
            defaults.lifetimes.refresh().as_secs(),
        )?;
        let lifetimes =
            TokenLifetimes::new(Duration::from_secs(access), Duration::from_secs(refresh))
                .map_err(|e| ConfigError::invalid("ACCESS_TOKEN_EXPIRES", e.to_string()))?;

        let database_url = get("DATABASE_URL");
        if backend == BackendKind::Relational && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        Ok(Self {
            backend,
            redis,
            database_url,
            lifetimes,
            ttl_margin,
        })
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match raw {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, format!("{v:?}: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<LedgerConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LedgerConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_to_memory_backend() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.backend, BackendKind::Memory);
        assert_eq!(cfg.ttl_margin, DEFAULT_TTL_MARGIN);
        assert_eq!(cfg.lifetimes, TokenLifetimes::default());
        assert_eq!(cfg.redis.port, 6379);
    }

    #[test]
    fn parses_selectors_and_aliases() {
        assert_eq!("networked-cache".parse::<BackendKind>().unwrap(), BackendKind::NetworkedCache);
        assert_eq!("redis".parse::<BackendKind>().unwrap(), BackendKind::NetworkedCache);
        assert_eq!("Relational".parse::<BackendKind>().unwrap(), BackendKind::Relational);
    }

    #[test]
    fn unknown_backend_fails_fast() {
        let err = load(&[("LEDGER_BACKEND", "mongodb")]).unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedBackend("mongodb".to_string()));
        assert_eq!(err.to_string(), "Not supported storage type: mongodb.");
    }

    #[test]
    fn relational_requires_database_url() {
        assert_eq!(
            load(&[("LEDGER_BACKEND", "relational")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
        let cfg = load(&[
            ("LEDGER_BACKEND", "relational"),
            ("DATABASE_URL", "postgres://x/y"),
        ])
        .unwrap();
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://x/y"));
    }

    #[test]
    fn reads_cache_parameters() {
        let cfg = load(&[
            ("LEDGER_BACKEND", "networked-cache"),
            ("REDIS_HOST", "cache"),
            ("REDIS_PORT", "6380"),
            ("REDIS_DB", "3"),
            ("REDIS_PASSWORD", "hunter2"),
        ])
        .unwrap();
        assert_eq!(cfg.redis.host, "cache");
        assert_eq!(cfg.redis.port, 6380);
        assert_eq!(cfg.redis.db, 3);
        assert!(!format!("{:?}", cfg.redis).contains("hunter2"));
    }

    #[test]
    fn rejects_bad_numbers_and_margins() {
        assert!(matches!(
            load(&[("REDIS_PORT", "abc")]),
            Err(ConfigError::Invalid { key: "REDIS_PORT", .. })
        ));
        assert!(matches!(
            load(&[("LEDGER_TTL_MARGIN", "0.5")]),
            Err(ConfigError::Invalid { key: "LEDGER_TTL_MARGIN", .. })
        ));
        assert!(matches!(
            load(&[("ACCESS_TOKEN_EXPIRES", "100"), ("REFRESH_TOKEN_EXPIRES", "50")]),
            Err(ConfigError::Invalid { .. })
        ));
    }
}

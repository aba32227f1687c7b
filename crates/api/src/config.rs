//! Process configuration (environment variables).

use std::net::SocketAddr;
use std::time::Duration;

use tokenledger_infra::{ConfigError, LedgerConfig};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEV_JWT_SECRET: &str = "dev-secret";

/// Account registered in the in-memory user directory at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct SeedUser {
    pub email: String,
    pub password: String,
}

impl core::fmt::Debug for SeedUser {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SeedUser")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Upper bound for a whole request, ledger round trips included.
    pub request_timeout: Duration,
    pub jwt_secret: String,
    pub ledger: LedgerConfig,
    pub seed_user: Option<SeedUser>,
}

impl core::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("request_timeout", &self.request_timeout)
            .field("ledger", &self.ledger)
            .field("seed_user", &self.seed_user)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ledger = LedgerConfig::from_lookup(&lookup)?;

        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "BIND_ADDR",
                message: e.to_string(),
            })?;

        let request_timeout = match get("REQUEST_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "REQUEST_TIMEOUT_SECS",
                        message: format!("{raw:?} is not a positive number of seconds"),
                    });
                }
            },
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let seed_user = match (get("SEED_USER_EMAIL"), get("SEED_USER_PASSWORD")) {
            (Some(email), Some(password)) => Some(SeedUser { email, password }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("SEED_USER_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("SEED_USER_EMAIL")),
        };

        Ok(Self {
            bind_addr,
            request_timeout,
            jwt_secret,
            ledger,
            seed_user,
        })
    }
}

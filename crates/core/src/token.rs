//! Token type namespace and lifetimes.

use core::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Kind of a signed token. Identifiers are unique within each namespace.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    /// Short name used in token claims and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }

    /// Name persisted in the `token_type_hint` column.
    pub fn hint(&self) -> &'static str {
        match self {
            TokenType::Access => "access_token",
            TokenType::Refresh => "refresh_token",
        }
    }
}

impl core::fmt::Display for TokenType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = DomainError;

    /// Accepts both the claim form (`access`) and the hint form (`access_token`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" | "access_token" => Ok(TokenType::Access),
            "refresh" | "refresh_token" => Ok(TokenType::Refresh),
            other => Err(DomainError::invalid_token_type(other)),
        }
    }
}

/// Cryptographic lifetimes of issued tokens.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TokenLifetimes {
    access: Duration,
    refresh: Duration,
}

impl TokenLifetimes {
    pub const DEFAULT_ACCESS: Duration = Duration::from_secs(15 * 60);
    pub const DEFAULT_REFRESH: Duration = Duration::from_secs(30 * 24 * 60 * 60);

    /// Access tokens must be strictly shorter-lived than refresh tokens.
    pub fn new(access: Duration, refresh: Duration) -> DomainResult<Self> {
        if access.as_secs() == 0 || refresh.as_secs() == 0 {
            return Err(DomainError::validation("token lifetimes must be at least one second"));
        }
        if access >= refresh {
            return Err(DomainError::validation(format!(
                "access lifetime ({}s) must be shorter than refresh lifetime ({}s)",
                access.as_secs(),
                refresh.as_secs()
            )));
        }
        Ok(Self { access, refresh })
    }

    pub fn access(&self) -> Duration {
        self.access
    }

    pub fn refresh(&self) -> Duration {
        self.refresh
    }

    pub fn for_type(&self, token_type: TokenType) -> Duration {
        match token_type {
            TokenType::Access => self.access,
            TokenType::Refresh => self.refresh,
        }
    }

    /// Ledger entry TTL for a token type: `ceil(lifetime × margin)` seconds.
    ///
    /// Margins below 1.0 are clamped to 1.0 so an entry never expires before
    /// the token it tracks.
    pub fn ledger_ttl(&self, token_type: TokenType, margin: f64) -> Duration {
        let margin = if margin.is_finite() { margin.max(1.0) } else { 1.0 };
        let secs = (self.for_type(token_type).as_secs() as f64 * margin).ceil() as u64;
        Duration::from_secs(secs)
    }
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access: Self::DEFAULT_ACCESS,
            refresh: Self::DEFAULT_REFRESH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_claim_and_hint_forms() {
        assert_eq!("access".parse::<TokenType>().unwrap(), TokenType::Access);
        assert_eq!("refresh_token".parse::<TokenType>().unwrap(), TokenType::Refresh);
        assert!("id_token".parse::<TokenType>().is_err());
        assert_eq!(TokenType::Refresh.hint(), "refresh_token");
    }

    #[test]
    fn serializes_as_lowercase_claim() {
        assert_eq!(serde_json::to_string(&TokenType::Access).unwrap(), "\"access\"");
    }

    #[test]
    fn lifetimes_require_access_shorter_than_refresh() {
        let s = Duration::from_secs;
        assert!(TokenLifetimes::new(s(60), s(60)).is_err());
        assert!(TokenLifetimes::new(s(0), s(60)).is_err());
        assert!(TokenLifetimes::new(s(60), s(3600)).is_ok());
    }

    #[test]
    fn ledger_ttl_applies_margin() {
        let l = TokenLifetimes::new(Duration::from_secs(100), Duration::from_secs(1000)).unwrap();
        assert_eq!(l.ledger_ttl(TokenType::Access, 1.2), Duration::from_secs(120));
        assert_eq!(l.ledger_ttl(TokenType::Refresh, 0.5), Duration::from_secs(1000));
        assert_eq!(l.ledger_ttl(TokenType::Access, f64::NAN), Duration::from_secs(100));
    }

    proptest! {
        #[test]
        fn ledger_ttl_never_shorter_than_token(
            access in 1u64..100_000,
            extra in 1u64..100_000,
            margin in 0.0f64..5.0,
        ) {
            let l = TokenLifetimes::new(
                Duration::from_secs(access),
                Duration::from_secs(access + extra),
            )
            .unwrap();
            for t in [TokenType::Access, TokenType::Refresh] {
                prop_assert!(l.ledger_ttl(t, margin) >= l.for_type(t));
            }
        }
    }
}

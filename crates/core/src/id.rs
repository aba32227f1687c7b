//! Token identifiers (`jti` claim).

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Shortest identifier the ledger accepts.
pub const MIN_JTI_LEN: usize = 4;

/// Unique identifier claim carried by a token; the ledger's key.
///
/// The ledger assumes identifiers are never reused by the issuer and does not
/// itself guarantee uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jti(String);

impl Jti {
    /// Mint a fresh identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing identifiers explicitly in
    /// tests for determinism.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        if value.trim().len() < MIN_JTI_LEN {
            return Err(DomainError::invalid_id(format!(
                "jti must be at least {MIN_JTI_LEN} characters, got {:?}",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Jti {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Jti {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Jti {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Jti> for String {
    fn from(value: Jti) -> Self {
        value.0
    }
}

impl FromStr for Jti {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let a = Jti::generate();
        let b = Jti::generate();
        assert_ne!(a, b);
        assert!(a.as_str().len() >= MIN_JTI_LEN);
    }

    #[test]
    fn rejects_short_identifiers() {
        assert!(matches!(Jti::new("abc"), Err(DomainError::InvalidId(_))));
        assert!(matches!(Jti::new("   "), Err(DomainError::InvalidId(_))));
        assert_eq!(Jti::new("abcd").unwrap().as_str(), "abcd");
    }

    #[test]
    fn deserialization_enforces_length() {
        let ok: Jti = serde_json::from_str("\"token-1\"").unwrap();
        assert_eq!(ok.as_str(), "token-1");
        assert!(serde_json::from_str::<Jti>("\"x\"").is_err());
    }
}

//! Ledger entries and the three observable ledger states.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DomainError, DomainResult, Jti, TokenType};

/// Observable revocation state of a `jti`.
///
/// Exactly one holds at any time:
/// - `Unknown`: no entry
/// - `Probationary`: entry, `revoked = false`
/// - `Revoked`: entry, `revoked = true`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    Unknown,
    Probationary,
    Revoked,
}

impl LedgerState {
    pub fn is_revoked(&self) -> bool {
        matches!(self, LedgerState::Revoked)
    }

    pub fn is_tracked(&self) -> bool {
        !matches!(self, LedgerState::Unknown)
    }
}

/// One ledger record per `(jti, token_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub jti: Jti,
    pub token_type: TokenType,
    pub revoked: bool,
    /// Entry TTL in seconds, measured from `created_at`.
    pub expires_in: u64,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// A fresh Probationary entry.
    pub fn probationary(
        jti: Jti,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            jti,
            token_type,
            revoked: false,
            expires_in: ttl.as_secs().max(1),
            revoked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A fresh Revoked entry (revoking an identifier the ledger never saw).
    pub fn revoked(jti: Jti, token_type: TokenType, ttl: Duration, now: DateTime<Utc>) -> Self {
        let mut entry = Self::probationary(jti, token_type, ttl, now);
        entry.revoke(ttl, now);
        entry
    }

    pub fn state(&self) -> LedgerState {
        if self.revoked {
            LedgerState::Revoked
        } else {
            LedgerState::Probationary
        }
    }

    /// Mark revoked. Keeps the original `revoked_at` when already revoked.
    ///
    /// The TTL is extended (never shortened) so the record outlives the token.
    pub fn revoke(&mut self, ttl: Duration, now: DateTime<Utc>) {
        if !self.revoked {
            self.revoked = true;
            self.revoked_at = Some(now);
        }
        self.extend_ttl(ttl, now);
        self.updated_at = now;
    }

    /// Restore Probationary state (logout compensation).
    pub fn reinstate(&mut self, ttl: Duration, now: DateTime<Utc>) {
        self.revoked = false;
        self.revoked_at = None;
        self.extend_ttl(ttl, now);
        self.updated_at = now;
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + chrono::Duration::seconds(self.expires_in as i64)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Check the persisted-record constraints (`jti` length, `expires_in >= 1`).
    pub fn validate(&self) -> DomainResult<()> {
        Jti::new(self.jti.as_str())?;
        if self.expires_in < 1 {
            return Err(DomainError::validation("expires_in must be > 0."));
        }
        if let Some(revoked_at) = self.revoked_at {
            if !self.revoked {
                return Err(DomainError::validation("revoked_at set on a non-revoked entry"));
            }
            if revoked_at < self.created_at {
                return Err(DomainError::validation("revoked_at precedes created_at"));
            }
        }
        Ok(())
    }

    fn extend_ttl(&mut self, ttl: Duration, now: DateTime<Utc>) {
        let elapsed = (now - self.created_at).num_seconds().max(0) as u64;
        let needed = elapsed.saturating_add(ttl.as_secs());
        if needed > self.expires_in {
            self.expires_in = needed;
        }
    }
}

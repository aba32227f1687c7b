use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use tokenledger_core::{Jti, LedgerEntry, TokenType};

use crate::config::{BackendKind, ConfigError};

/// Ledger operation error.
///
/// `AlreadyTracked` is a protocol-level signal (identifier replay/collision);
/// the rest are infrastructure failures that must never be papered over by
/// switching backends.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("token identifier {jti} is already tracked")]
    AlreadyTracked { jti: Jti },

    #[error("{backend} backend failed during {operation}: {message}")]
    Storage {
        backend: BackendKind,
        operation: &'static str,
        message: String,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl LedgerError {
    pub fn storage(
        backend: BackendKind,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Storage {
            backend,
            operation,
            message: message.into(),
        }
    }
}

/// Storage contract shared by every ledger backend.
///
/// Each method is a single round trip to the backing store. Implementations
/// treat an entry past its TTL as absent, whether the store evicts it natively
/// or not.
///
/// ## Atomicity
///
/// `insert_probationary` must be an atomic "insert if absent": two racing
/// inserts for the same fresh `jti` must produce exactly one `true`.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Current live entry for `jti`, if any.
    async fn get(&self, jti: &Jti, now: DateTime<Utc>) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Insert a Probationary entry unless a live entry exists.
    ///
    /// Returns `false` when the identifier is already tracked.
    async fn insert_probationary(&self, entry: &LedgerEntry) -> Result<bool, LedgerError>;

    /// Upsert an entry as Probationary (no existence check).
    async fn set_probationary(
        &self,
        jti: &Jti,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    /// Upsert an entry as Revoked. Never fails because of prior state.
    async fn set_revoked(
        &self,
        jti: &Jti,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    /// Remove every entry for `jti`. Returns whether anything was removed.
    async fn delete(&self, jti: &Jti) -> Result<bool, LedgerError>;

    /// Remove every entry. Returns the number removed.
    async fn flush_all(&self) -> Result<u64, LedgerError>;

    /// Physically remove entries past their TTL. Returns the number removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, LedgerError>;
}

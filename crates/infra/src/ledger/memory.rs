use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tokenledger_core::{Jti, LedgerEntry, TokenType};

use super::backend::{LedgerBackend, LedgerError};
use crate::config::BackendKind;

/// Process-local ledger backend.
///
/// Intended for tests/dev. State lives in this process only and is lost on
/// restart; it is **unsuitable for any multi-process or multi-instance
/// deployment**, where every instance must share the networked-cache or
/// relational backend as a single source of truth.
///
/// Expired entries are hidden on read and removed by `purge_expired`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<Jti, LedgerEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        tracing::warn!(
            backend = "memory",
            "token ledger is stored in process memory; revocations are lost on restart \
             and are not shared between instances"
        );
        Self::default()
    }

    pub fn len(&self) -> Result<usize, LedgerError> {
        let entries = self.entries.read().map_err(|_| Self::poisoned("len"))?;
        Ok(entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }

    fn poisoned(operation: &'static str) -> LedgerError {
        LedgerError::storage(BackendKind::Memory, operation, "lock poisoned")
    }

    fn upsert(
        &self,
        operation: &'static str,
        jti: &Jti,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
        revoked: bool,
    ) -> Result<(), LedgerError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned(operation))?;

        match entries.get_mut(jti) {
            Some(entry) if !entry.is_expired(now) => {
                if revoked {
                    entry.revoke(ttl, now);
                } else {
                    entry.reinstate(ttl, now);
                }
            }
            _ => {
                let entry = if revoked {
                    LedgerEntry::revoked(jti.clone(), token_type, ttl, now)
                } else {
                    LedgerEntry::probationary(jti.clone(), token_type, ttl, now)
                };
                entries.insert(jti.clone(), entry);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get(&self, jti: &Jti, now: DateTime<Utc>) -> Result<Option<LedgerEntry>, LedgerError> {
        let entries = self.entries.read().map_err(|_| Self::poisoned("get"))?;
        Ok(entries.get(jti).filter(|e| !e.is_expired(now)).cloned())
    }

    async fn insert_probationary(&self, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Self::poisoned("insert_probationary"))?;

        if let Some(existing) = entries.get(&entry.jti) {
            if !existing.is_expired(entry.created_at) {
                return Ok(false);
            }
        }
        entries.insert(entry.jti.clone(), entry.clone());
        Ok(true)
    }

    async fn set_probationary(
        &self,
        jti: &Jti,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.upsert("set_probationary", jti, token_type, ttl, now, false)
    }

    async fn set_revoked(
        &self,
        jti: &Jti,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.upsert("set_revoked", jti, token_type, ttl, now, true)
    }

    async fn delete(&self, jti: &Jti) -> Result<bool, LedgerError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned("delete"))?;
        Ok(entries.remove(jti).is_some())
    }

    async fn flush_all(&self) -> Result<u64, LedgerError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned("flush_all"))?;
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, LedgerError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned("purge_expired"))?;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;
    use tokenledger_core::LedgerState;

    const TTL: Duration = Duration::from_secs(60);

    fn jti(s: &str) -> Jti {
        Jti::new(s).unwrap()
    }

    #[tokio::test]
    async fn insert_if_absent() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let entry = LedgerEntry::probationary(jti("jti-a"), TokenType::Access, TTL, now);

        assert!(backend.insert_probationary(&entry).await.unwrap());
        assert!(!backend.insert_probationary(&entry).await.unwrap());
        assert_eq!(backend.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn revoke_unknown_creates_revoked_entry() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend.set_revoked(&jti("jti-b"), TokenType::Refresh, TTL, now).await.unwrap();

        let entry = backend.get(&jti("jti-b"), now).await.unwrap().unwrap();
        assert_eq!(entry.state(), LedgerState::Revoked);
        assert_eq!(entry.token_type, TokenType::Refresh);
        assert_eq!(entry.revoked_at, Some(now));
    }

    #[tokio::test]
    async fn expired_entries_are_invisible_and_replaceable() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let entry = LedgerEntry::probationary(jti("jti-c"), TokenType::Access, TTL, now);
        backend.insert_probationary(&entry).await.unwrap();

        let later = now + ChronoDuration::seconds(61);
        assert!(backend.get(&jti("jti-c"), later).await.unwrap().is_none());

        let fresh = LedgerEntry::probationary(jti("jti-c"), TokenType::Access, TTL, later);
        assert!(backend.insert_probationary(&fresh).await.unwrap());
    }

    #[tokio::test]
    async fn purge_drops_only_expired_entries() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let short = LedgerEntry::probationary(
            jti("jti-short"),
            TokenType::Access,
            Duration::from_secs(5),
            now,
        );
        let long = LedgerEntry::probationary(jti("jti-long"), TokenType::Refresh, TTL, now);
        backend.insert_probationary(&short).await.unwrap();
        backend.insert_probationary(&long).await.unwrap();

        let removed = backend.purge_expired(now + ChronoDuration::seconds(10)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_and_flush() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend.set_revoked(&jti("jti-d"), TokenType::Access, TTL, now).await.unwrap();
        backend.set_revoked(&jti("jti-e"), TokenType::Access, TTL, now).await.unwrap();

        assert!(backend.delete(&jti("jti-d")).await.unwrap());
        assert!(!backend.delete(&jti("jti-d")).await.unwrap());
        assert_eq!(backend.flush_all().await.unwrap(), 1);
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn poisoned_lock_surfaces_as_storage_error() {
        let backend = Arc::new(MemoryBackend::default());
        let holder = Arc::clone(&backend);
        let _ = std::thread::spawn(move || {
            let _guard = holder.entries.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        let err = backend.len().unwrap_err();
        assert!(err.to_string().contains("lock poisoned"), "{err}");
    }
}

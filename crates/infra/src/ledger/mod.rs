//! Token revocation ledger.
//!
//! [`TokenLedger`] is the only entry point the rest of the system uses. It
//! owns TTL computation (`ceil(lifetime * margin)`) and the state machine:
//!
//! ```text
//! Unknown --probate--> Probationary --revoke--> Revoked
//! Unknown --revoke---> Revoked
//! Probationary | Revoked --TTL expiry / delete / flush--> Unknown
//! ```
//!
//! Revoked never returns to Probationary through `probate`; only `reinstate`
//! (logout compensation) or `delete` followed by a fresh `probate` does that.

mod backend;
mod memory;
mod postgres;
#[cfg(feature = "redis")]
mod redis;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::instrument;

use tokenledger_core::{Jti, LedgerEntry, LedgerState, TokenLifetimes, TokenType};

use crate::config::{BackendKind, ConfigError, LedgerConfig};

pub use backend::{LedgerBackend, LedgerError};
pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;

/// Backend-agnostic revocation ledger.
#[derive(Clone)]
pub struct TokenLedger {
    backend: Arc<dyn LedgerBackend>,
    lifetimes: TokenLifetimes,
    ttl_margin: f64,
}

impl core::fmt::Debug for TokenLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenLedger")
            .field("backend", &self.backend.kind())
            .field("lifetimes", &self.lifetimes)
            .field("ttl_margin", &self.ttl_margin)
            .finish()
    }
}

impl TokenLedger {
    pub fn new(
        backend: Arc<dyn LedgerBackend>,
        lifetimes: TokenLifetimes,
        ttl_margin: f64,
    ) -> Self {
        Self {
            backend,
            lifetimes,
            ttl_margin,
        }
    }

    /// In-memory ledger (tests/dev).
    pub fn in_memory(lifetimes: TokenLifetimes) -> Self {
        let config = LedgerConfig::memory(lifetimes);
        Self::new(Arc::new(MemoryBackend::new()), config.lifetimes, config.ttl_margin)
    }

    /// Build the backend named by `config`. Fails rather than falling back
    /// to another backend.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let backend = connect_backend(config).await?;
        tracing::info!(
            backend = %backend.kind(),
            ttl_margin = config.ttl_margin,
            "token ledger ready"
        );
        Ok(Self::new(backend, config.lifetimes, config.ttl_margin))
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Entry TTL for a token type: its lifetime times the safety margin, rounded up.
    pub fn ttl_for(&self, token_type: TokenType) -> Duration {
        self.lifetimes.ledger_ttl(token_type, self.ttl_margin)
    }

    /// Register a freshly issued identifier as Probationary.
    pub async fn probate(&self, jti: &Jti, token_type: TokenType) -> Result<(), LedgerError> {
        self.probate_at(jti, token_type, Utc::now()).await
    }

    #[instrument(skip(self), fields(operation = "probate", token_type = token_type.as_str()), err)]
    pub async fn probate_at(
        &self,
        jti: &Jti,
        token_type: TokenType,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let ttl = self.ttl_for(token_type);
        let entry = LedgerEntry::probationary(jti.clone(), token_type, ttl, now);
        if self.backend.insert_probationary(&entry).await? {
            Ok(())
        } else {
            tracing::warn!(
                %jti,
                token_type = token_type.as_str(),
                "identifier already tracked at probation"
            );
            Err(LedgerError::AlreadyTracked { jti: jti.clone() })
        }
    }

    /// Mark an identifier Revoked. Idempotent; unknown identifiers are
    /// recorded as Revoked.
    pub async fn revoke(&self, jti: &Jti, token_type: TokenType) -> Result<(), LedgerError> {
        self.revoke_at(jti, token_type, Utc::now()).await
    }

    #[instrument(skip(self), fields(operation = "revoke", token_type = token_type.as_str()), err)]
    pub async fn revoke_at(
        &self,
        jti: &Jti,
        token_type: TokenType,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.backend
            .set_revoked(jti, token_type, self.ttl_for(token_type), now)
            .await?;
        tracing::info!(%jti, token_type = token_type.as_str(), "token revoked");
        Ok(())
    }

    /// Restore Probationary state after a failed multi-step revocation.
    #[instrument(
        skip(self),
        fields(operation = "reinstate", token_type = token_type.as_str()),
        err
    )]
    pub async fn reinstate(&self, jti: &Jti, token_type: TokenType) -> Result<(), LedgerError> {
        self.backend
            .set_probationary(jti, token_type, self.ttl_for(token_type), Utc::now())
            .await
    }

    pub async fn query(&self, jti: &Jti) -> Result<LedgerState, LedgerError> {
        self.query_at(jti, Utc::now()).await
    }

    #[instrument(skip(self), fields(operation = "query"), err)]
    pub async fn query_at(
        &self,
        jti: &Jti,
        now: DateTime<Utc>,
    ) -> Result<LedgerState, LedgerError> {
        Ok(self
            .backend
            .get(jti, now)
            .await?
            .map_or(LedgerState::Unknown, |entry| entry.state()))
    }

    /// Full live entry for `jti` (admin/diagnostics).
    pub async fn entry(&self, jti: &Jti) -> Result<Option<LedgerEntry>, LedgerError> {
        self.backend.get(jti, Utc::now()).await
    }

    pub async fn is_tracked(&self, jti: &Jti) -> Result<bool, LedgerError> {
        Ok(self.query(jti).await?.is_tracked())
    }

    pub async fn is_revoked(&self, jti: &Jti) -> Result<bool, LedgerError> {
        Ok(self.query(jti).await?.is_revoked())
    }

    #[instrument(skip(self), fields(operation = "delete"), err)]
    pub async fn delete(&self, jti: &Jti) -> Result<bool, LedgerError> {
        self.backend.delete(jti).await
    }

    /// Clear every entry (test/ops only).
    #[instrument(skip(self), fields(operation = "flush"), err)]
    pub async fn flush(&self) -> Result<u64, LedgerError> {
        let removed = self.backend.flush_all().await?;
        tracing::warn!(removed, backend = %self.backend.kind(), "token ledger flushed");
        Ok(removed)
    }

    /// Retention sweep for backends without native expiry.
    #[instrument(skip(self), fields(operation = "purge_expired"), err)]
    pub async fn purge_expired(&self) -> Result<u64, LedgerError> {
        self.backend.purge_expired(Utc::now()).await
    }
}

async fn connect_backend(config: &LedgerConfig) -> Result<Arc<dyn LedgerBackend>, LedgerError> {
    match config.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        BackendKind::NetworkedCache => connect_cache(config).await,
        BackendKind::Relational => {
            let url = config
                .database_url
                .as_deref()
                .ok_or(ConfigError::Missing("DATABASE_URL"))?;
            Ok(Arc::new(PostgresBackend::connect(url).await?))
        }
    }
}

#[cfg(feature = "redis")]
async fn connect_cache(config: &LedgerConfig) -> Result<Arc<dyn LedgerBackend>, LedgerError> {
    Ok(Arc::new(RedisBackend::connect(&config.redis).await?))
}

#[cfg(not(feature = "redis"))]
async fn connect_cache(_config: &LedgerConfig) -> Result<Arc<dyn LedgerBackend>, LedgerError> {
    Err(ConfigError::BackendUnavailable {
        backend: BackendKind::NetworkedCache,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use proptest::prelude::*;

    fn lifetimes() -> TokenLifetimes {
        TokenLifetimes::new(Duration::from_secs(60), Duration::from_secs(600)).unwrap()
    }

    fn ledger() -> TokenLedger {
        TokenLedger::in_memory(lifetimes())
    }

    #[tokio::test]
    async fn fresh_identifiers_are_unknown() {
        let ledger = ledger();
        assert_eq!(ledger.query(&Jti::generate()).await.unwrap(), LedgerState::Unknown);
    }

    #[tokio::test]
    async fn probate_revoke_flush() {
        let ledger = ledger();
        let jti = Jti::generate();

        ledger.probate(&jti, TokenType::Access).await.unwrap();
        assert_eq!(ledger.query(&jti).await.unwrap(), LedgerState::Probationary);
        assert!(ledger.is_tracked(&jti).await.unwrap());

        ledger.revoke(&jti, TokenType::Access).await.unwrap();
        ledger.revoke(&jti, TokenType::Access).await.unwrap();
        assert!(ledger.is_revoked(&jti).await.unwrap());

        assert_eq!(ledger.flush().await.unwrap(), 1);
        assert_eq!(ledger.query(&jti).await.unwrap(), LedgerState::Unknown);
    }

    #[tokio::test]
    async fn probate_twice_is_already_tracked() {
        let ledger = ledger();
        let jti = Jti::generate();
        ledger.probate(&jti, TokenType::Refresh).await.unwrap();

        let err = ledger.probate(&jti, TokenType::Refresh).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyTracked { jti: ref j } if *j == jti));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_probates_have_one_winner() {
        let ledger = ledger();
        let jti = Jti::generate();

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let ledger = ledger.clone();
                let jti = jti.clone();
                tokio::spawn(async move { ledger.probate(&jti, TokenType::Access).await })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => winners += 1,
                Err(LedgerError::AlreadyTracked { jti: ref j }) => assert_eq!(*j, jti),
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(ledger.query(&jti).await.unwrap(), LedgerState::Probationary);
    }

    #[tokio::test]
    async fn revoked_cannot_be_probated_until_deleted() {
        let ledger = ledger();
        let jti = Jti::generate();
        ledger.revoke(&jti, TokenType::Access).await.unwrap();

        assert!(ledger.probate(&jti, TokenType::Access).await.is_err());
        assert_eq!(ledger.query(&jti).await.unwrap(), LedgerState::Revoked);

        assert!(ledger.delete(&jti).await.unwrap());
        ledger.probate(&jti, TokenType::Access).await.unwrap();
        assert_eq!(ledger.query(&jti).await.unwrap(), LedgerState::Probationary);
    }

    #[tokio::test]
    async fn reinstate_restores_probation() {
        let ledger = ledger();
        let jti = Jti::generate();
        ledger.probate(&jti, TokenType::Refresh).await.unwrap();
        ledger.revoke(&jti, TokenType::Refresh).await.unwrap();
        ledger.reinstate(&jti, TokenType::Refresh).await.unwrap();

        let entry = ledger.entry(&jti).await.unwrap().unwrap();
        assert_eq!(entry.state(), LedgerState::Probationary);
        assert!(entry.revoked_at.is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_margin_ttl() {
        let ledger = ledger();
        let jti = Jti::generate();
        let now = Utc::now();
        ledger.revoke_at(&jti, TokenType::Access, now).await.unwrap();

        // 60s * 1.2 = 72s
        assert_eq!(ledger.ttl_for(TokenType::Access), Duration::from_secs(72));
        let just_before = now + chrono::Duration::seconds(71);
        let after = now + chrono::Duration::seconds(72);
        assert_eq!(ledger.query_at(&jti, just_before).await.unwrap(), LedgerState::Revoked);
        assert_eq!(ledger.query_at(&jti, after).await.unwrap(), LedgerState::Unknown);

        // Expired identifiers may be probated again.
        ledger.probate_at(&jti, TokenType::Access, after).await.unwrap();
    }

    #[tokio::test]
    async fn unavailable_backend_is_a_configuration_error() {
        let config = LedgerConfig {
            backend: BackendKind::Relational,
            database_url: None,
            ..LedgerConfig::default()
        };
        let err = TokenLedger::connect(&config).await.unwrap_err();
        assert!(matches!(err, LedgerError::Configuration(ConfigError::Missing("DATABASE_URL"))));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Probate(usize),
        Revoke(usize),
        Delete(usize),
        Flush,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0usize..4).prop_map(Op::Probate),
            4 => (0usize..4).prop_map(Op::Revoke),
            2 => (0usize..4).prop_map(Op::Delete),
            1 => Just(Op::Flush),
        ]
    }

    proptest! {
        #[test]
        fn memory_ledger_follows_the_state_machine(ops in proptest::collection::vec(op(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let ledger = ledger();
                let jtis: Vec<Jti> = (0..4).map(|_| Jti::generate()).collect();
                let mut model: HashMap<usize, LedgerState> = HashMap::new();

                for op in ops {
                    match op {
                        Op::Probate(i) => {
                            let result = ledger.probate(&jtis[i], TokenType::Access).await;
                            let prior = model.get(&i).copied().unwrap_or(LedgerState::Unknown);
                            if prior.is_tracked() {
                                prop_assert!(matches!(
                                    result,
                                    Err(LedgerError::AlreadyTracked { .. })
                                ), "expected AlreadyTracked error");
                            } else {
                                prop_assert!(result.is_ok());
                                model.insert(i, LedgerState::Probationary);
                            }
                        }
                        Op::Revoke(i) => {
                            prop_assert!(ledger.revoke(&jtis[i], TokenType::Access).await.is_ok());
                            model.insert(i, LedgerState::Revoked);
                        }
                        Op::Delete(i) => {
                            let removed = ledger.delete(&jtis[i]).await.unwrap();
                            prop_assert_eq!(removed, model.remove(&i).is_some());
                        }
                        Op::Flush => {
                            ledger.flush().await.unwrap();
                            model.clear();
                        }
                    }

                    for (i, jti) in jtis.iter().enumerate() {
                        let expected = model.get(&i).copied().unwrap_or(LedgerState::Unknown);
                        prop_assert_eq!(ledger.query(jti).await.unwrap(), expected);
                    }
                }
                Ok(())
            })?;
        }
    }
}

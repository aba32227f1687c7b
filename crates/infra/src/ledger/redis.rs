//! Networked-cache ledger backend (Redis).
//!
//! One hash per `jti` under `<prefix><jti>`:
//!
//! | field        | value                         |
//! |--------------|-------------------------------|
//! | `token_type` | `access` / `refresh`          |
//! | `revoked`    | `0` / `1`                     |
//! | `revoked_at` | RFC 3339, only while revoked  |
//! | `created_at` | RFC 3339                      |
//! | `updated_at` | RFC 3339                      |
//!
//! Expiry is native (`EXPIRE`), so `purge_expired` has nothing to do.
//! Writes go through Lua scripts so check-and-set is a single round trip.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, Script};

use tokenledger_core::{Jti, LedgerEntry, TokenType};

use super::backend::{LedgerBackend, LedgerError};
use crate::config::{BackendKind, RedisConfig};

const PROBATE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'token_type', ARGV[1], 'revoked', '0',
  'created_at', ARGV[2], 'updated_at', ARGV[2])
redis.call('EXPIRE', KEYS[1], ARGV[3])
return 1
";

const WRITE_SCRIPT: &str = r"
local key = KEYS[1]
if redis.call('EXISTS', key) == 0 then
  redis.call('HSET', key, 'token_type', ARGV[1], 'created_at', ARGV[3])
end
if ARGV[2] == '1' then
  if redis.call('HGET', key, 'revoked') ~= '1' then
    redis.call('HSET', key, 'revoked_at', ARGV[3])
  end
else
  redis.call('HDEL', key, 'revoked_at')
end
redis.call('HSET', key, 'revoked', ARGV[2], 'updated_at', ARGV[3])
local ttl = tonumber(ARGV[4])
if redis.call('TTL', key) < ttl then
  redis.call('EXPIRE', key, ttl)
end
return 1
";

const SCAN_BATCH: usize = 500;

/// Redis-backed ledger. Cheap to clone; the connection manager multiplexes
/// and reconnects on its own.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    key_prefix: String,
    probate: Script,
    write: Script,
}

impl core::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    pub async fn connect(config: &RedisConfig) -> Result<Self, LedgerError> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
            redis: RedisConnectionInfo {
                db: config.db,
                password: config.password.clone(),
                ..Default::default()
            },
        };
        let client = redis::Client::open(info).map_err(|e| redis_error("connect", e))?;
        Self::from_client(client, config.key_prefix.clone()).await
    }

    /// Connect using a `redis://` URL (tests, ad-hoc tooling).
    pub async fn from_url(url: &str, key_prefix: impl Into<String>) -> Result<Self, LedgerError> {
        let client = redis::Client::open(url).map_err(|e| redis_error("connect", e))?;
        Self::from_client(client, key_prefix.into()).await
    }

    async fn from_client(client: redis::Client, key_prefix: String) -> Result<Self, LedgerError> {
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| redis_error("connect", e))?;
        Ok(Self {
            conn,
            key_prefix,
            probate: Script::new(PROBATE_SCRIPT),
            write: Script::new(WRITE_SCRIPT),
        })
    }

    fn key(&self, jti: &Jti) -> String {
        format!("{}{}", self.key_prefix, jti)
    }

    async fn write(
        &self,
        operation: &'static str,
        jti: &Jti,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
        revoked: bool,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .write
            .key(self.key(jti))
            .arg(token_type.as_str())
            .arg(if revoked { "1" } else { "0" })
            .arg(timestamp(now))
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_error(operation, e))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerBackend for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NetworkedCache
    }

    #[tracing::instrument(skip(self), fields(backend = "networked-cache"), err)]
    async fn get(&self, jti: &Jti, now: DateTime<Utc>) -> Result<Option<LedgerEntry>, LedgerError> {
        let key = self.key(jti);
        let mut conn = self.conn.clone();
        let (fields, ttl): (HashMap<String, String>, i64) = redis::pipe()
            .atomic()
            .hgetall(&key)
            .ttl(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("get", e))?;

        if fields.is_empty() || ttl == -2 {
            return Ok(None);
        }
        entry_from_hash(jti, &fields, ttl, now).map(Some)
    }

    #[tracing::instrument(
        skip(self, entry),
        fields(jti = %entry.jti, backend = "networked-cache"),
        err
    )]
    async fn insert_probationary(&self, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        let mut conn = self.conn.clone();
        let inserted: i64 = self
            .probate
            .key(self.key(&entry.jti))
            .arg(entry.token_type.as_str())
            .arg(timestamp(entry.created_at))
            .arg(entry.expires_in.max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_error("insert_probationary", e))?;
        Ok(inserted == 1)
    }

    async fn set_probationary(
        &self,
        jti: &Jti,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.write("set_probationary", jti, token_type, ttl, now, false).await
    }

    async fn set_revoked(
        &self,
        jti: &Jti,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.write("set_revoked", jti, token_type, ttl, now, true).await
    }

    async fn delete(&self, jti: &Jti) -> Result<bool, LedgerError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .del(self.key(jti))
            .await
            .map_err(|e| redis_error("delete", e))?;
        Ok(removed > 0)
    }

    /// Deletes every key under the configured prefix, leaving the rest of
    /// the database alone.
    #[tracing::instrument(
        skip(self),
        fields(backend = "networked-cache", prefix = %self.key_prefix),
        err
    )]
    async fn flush_all(&self) -> Result<u64, LedgerError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("flush_all", e))?;

            if !keys.is_empty() {
                let n: u64 = conn.del(&keys).await.map_err(|e| redis_error("flush_all", e))?;
                removed += n;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, LedgerError> {
        Ok(0)
    }
}

fn redis_error(operation: &'static str, err: redis::RedisError) -> LedgerError {
    LedgerError::storage(BackendKind::NetworkedCache, operation, err.to_string())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            LedgerError::storage(BackendKind::NetworkedCache, "get", format!("bad {field}: {e}"))
        })
}

fn entry_from_hash(
    jti: &Jti,
    fields: &HashMap<String, String>,
    ttl: i64,
    now: DateTime<Utc>,
) -> Result<LedgerEntry, LedgerError> {
    let field = |name: &'static str| {
        fields.get(name).ok_or_else(|| {
            LedgerError::storage(
                BackendKind::NetworkedCache,
                "get",
                format!("missing field {name}"),
            )
        })
    };

    let token_type: TokenType = field("token_type")?
        .parse()
        .map_err(|e: tokenledger_core::DomainError| {
            LedgerError::storage(BackendKind::NetworkedCache, "get", e.to_string())
        })?;
    let revoked = field("revoked")? == "1";
    let created_at = parse_timestamp("created_at", field("created_at")?)?;
    let updated_at = parse_timestamp("updated_at", field("updated_at")?)?;
    let revoked_at = match fields.get("revoked_at") {
        Some(raw) if revoked => Some(parse_timestamp("revoked_at", raw)?),
        _ => None,
    };

    // TTL counts down from now; the entry model counts from created_at.
    let elapsed = (now - created_at).num_seconds().max(0) as u64;
    let remaining = if ttl > 0 { ttl as u64 } else { 0 };

    Ok(LedgerEntry {
        jti: jti.clone(),
        token_type,
        revoked,
        expires_in: (elapsed + remaining).max(1),
        revoked_at,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenledger_core::LedgerState;

    const TTL: Duration = Duration::from_secs(60);

    /// Connects to `TEST_REDIS_URL` under a throwaway prefix, or returns `None`.
    async fn backend() -> Option<RedisBackend> {
        let url = std::env::var("TEST_REDIS_URL").ok()?;
        let prefix = format!("tokenledger-test:{}:", Jti::generate());
        Some(RedisBackend::from_url(&url, prefix).await.unwrap())
    }

    #[test]
    fn hash_decoding_tracks_remaining_ttl() {
        let now = Utc::now();
        let created = now - chrono::Duration::seconds(10);
        let mut fields = HashMap::new();
        fields.insert("token_type".to_string(), "refresh".to_string());
        fields.insert("revoked".to_string(), "1".to_string());
        fields.insert("revoked_at".to_string(), timestamp(now));
        fields.insert("created_at".to_string(), timestamp(created));
        fields.insert("updated_at".to_string(), timestamp(now));

        let jti = Jti::new("jti-hash").unwrap();
        let entry = entry_from_hash(&jti, &fields, 50, now).unwrap();
        assert_eq!(entry.state(), LedgerState::Revoked);
        assert_eq!(entry.token_type, TokenType::Refresh);
        assert_eq!(entry.expires_in, 60);
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn hash_decoding_rejects_missing_fields() {
        let jti = Jti::new("jti-hash").unwrap();
        assert!(entry_from_hash(&jti, &HashMap::new(), 10, Utc::now()).is_err());
    }

    #[tokio::test]
    async fn probate_is_insert_if_absent() {
        let Some(backend) = backend().await else { return };
        let now = Utc::now();
        let entry = LedgerEntry::probationary(Jti::generate(), TokenType::Access, TTL, now);

        assert!(backend.insert_probationary(&entry).await.unwrap());
        assert!(!backend.insert_probationary(&entry).await.unwrap());

        let stored = backend.get(&entry.jti, now).await.unwrap().unwrap();
        assert_eq!(stored.state(), LedgerState::Probationary);
        backend.flush_all().await.unwrap();
    }

    #[tokio::test]
    async fn revoke_keeps_first_timestamp_and_flush_clears_prefix() {
        let Some(backend) = backend().await else { return };
        let now = Utc::now();
        let jti = Jti::generate();

        backend.set_revoked(&jti, TokenType::Refresh, TTL, now).await.unwrap();
        let first = backend.get(&jti, now).await.unwrap().unwrap();
        backend
            .set_revoked(&jti, TokenType::Refresh, TTL, now + chrono::Duration::seconds(2))
            .await
            .unwrap();
        let second = backend.get(&jti, now).await.unwrap().unwrap();
        assert_eq!(first.revoked_at, second.revoked_at);

        backend.set_probationary(&jti, TokenType::Refresh, TTL, now).await.unwrap();
        let reinstated = backend.get(&jti, now).await.unwrap().unwrap();
        assert_eq!(reinstated.state(), LedgerState::Probationary);
        assert!(reinstated.revoked_at.is_none());

        assert_eq!(backend.flush_all().await.unwrap(), 1);
        assert!(backend.get(&jti, now).await.unwrap().is_none());
    }
}

//! Relational ledger backend (PostgreSQL).
//!
//! Rows live in `token_ledger` (see `migrations/0001_token_ledger.sql`), one
//! per `(jti, token_type_hint)`. Postgres has no native row expiry, so every
//! read filters on `created_at + expires_in` and `purge_expired` deletes dead
//! rows.
//!
//! ## Error Mapping
//!
//! | SQLx error                       | LedgerError                |
//! |----------------------------------|----------------------------|
//! | Database (any code)              | `Storage` with PG message  |
//! | PoolClosed / PoolTimedOut / Io   | `Storage`                  |
//! | Row decode failures              | `Storage`                  |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use tokenledger_core::{Jti, LedgerEntry, TokenType};

use super::backend::{LedgerBackend, LedgerError};
use crate::config::BackendKind;

const SCHEMA: &str = include_str!("../../migrations/0001_token_ledger.sql");

const LIVE: &str = "created_at + expires_in * INTERVAL '1 second'";
const LIVE_EXISTING: &str =
    "token_ledger.created_at + token_ledger.expires_in * INTERVAL '1 second'";

/// Postgres-backed ledger.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url` and make sure the table exists.
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let backend = Self::new(pool);
        backend.ensure_schema().await?;
        Ok(backend)
    }

    /// Idempotent `CREATE TABLE IF NOT EXISTS`.
    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn upsert(
        &self,
        operation: &'static str,
        jti: &Jti,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
        revoked: bool,
    ) -> Result<(), LedgerError> {
        // Expired rows are reset as if freshly created; live rows keep
        // created_at, keep the first revoked_at and only ever grow expires_in.
        let sql = format!(
            r#"
            INSERT INTO token_ledger
                (jti, revoked, token_type_hint, expires_in, revoked_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, CASE WHEN $2 THEN $5 END, $5, $5)
            ON CONFLICT (jti, token_type_hint) DO UPDATE SET
                revoked = EXCLUDED.revoked,
                revoked_at = CASE
                    WHEN NOT EXCLUDED.revoked THEN NULL
                    WHEN {LIVE_EXISTING} > EXCLUDED.updated_at AND token_ledger.revoked
                        THEN token_ledger.revoked_at
                    ELSE EXCLUDED.updated_at
                END,
                expires_in = CASE
                    WHEN {LIVE_EXISTING} > EXCLUDED.updated_at THEN GREATEST(
                        token_ledger.expires_in,
                        FLOOR(EXTRACT(EPOCH FROM (
                            EXCLUDED.updated_at - token_ledger.created_at
                        )))::BIGINT + EXCLUDED.expires_in
                    )
                    ELSE EXCLUDED.expires_in
                END,
                created_at = CASE
                    WHEN {LIVE_EXISTING} > EXCLUDED.updated_at THEN token_ledger.created_at
                    ELSE EXCLUDED.created_at
                END,
                updated_at = EXCLUDED.updated_at
            "#
        );

        sqlx::query(&sql)
            .bind(jti.as_str())
            .bind(revoked)
            .bind(token_type.hint())
            .bind(ttl_secs(ttl))
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerBackend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    #[instrument(skip(self), fields(backend = "relational"), err)]
    async fn get(&self, jti: &Jti, now: DateTime<Utc>) -> Result<Option<LedgerEntry>, LedgerError> {
        // A revoked row wins over a probationary one for the same jti.
        let sql = format!(
            r#"
            SELECT jti, revoked, token_type_hint, expires_in, revoked_at, created_at, updated_at
            FROM token_ledger
            WHERE jti = $1 AND {LIVE} > $2
            ORDER BY revoked DESC, updated_at DESC
            LIMIT 1
            "#
        );

        let row = sqlx::query(&sql)
            .bind(jti.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        match row {
            Some(row) => {
                let row = LedgerRow::from_row(&row).map_err(|e| map_sqlx_error("get", e))?;
                row.try_into().map(Some)
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, entry), fields(jti = %entry.jti, backend = "relational"), err)]
    async fn insert_probationary(&self, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        // Insert unless a live row exists for the jti; an expired row under
        // the same key is overwritten in place.
        let sql = format!(
            r#"
            INSERT INTO token_ledger
                (jti, revoked, token_type_hint, expires_in, revoked_at, created_at, updated_at)
            SELECT $1, FALSE, $2, $3, NULL, $4, $4
            WHERE NOT EXISTS (
                SELECT 1 FROM token_ledger WHERE jti = $1 AND {LIVE} > $4
            )
            ON CONFLICT (jti, token_type_hint) DO UPDATE SET
                revoked = FALSE,
                revoked_at = NULL,
                expires_in = EXCLUDED.expires_in,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at
            WHERE {LIVE_EXISTING} <= EXCLUDED.created_at
            "#
        );

        let result = sqlx::query(&sql)
            .bind(entry.jti.as_str())
            .bind(entry.token_type.hint())
            .bind(entry.expires_in.max(1) as i64)
            .bind(entry.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_probationary", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_probationary(
        &self,
        jti: &Jti,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.upsert("set_probationary", jti, token_type, ttl, now, false).await
    }

    async fn set_revoked(
        &self,
        jti: &Jti,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.upsert("set_revoked", jti, token_type, ttl, now, true).await
    }

    #[instrument(skip(self), fields(backend = "relational"), err)]
    async fn delete(&self, jti: &Jti) -> Result<bool, LedgerError> {
        let result = sqlx::query("DELETE FROM token_ledger WHERE jti = $1")
            .bind(jti.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(backend = "relational"), err)]
    async fn flush_all(&self) -> Result<u64, LedgerError> {
        let result = sqlx::query("DELETE FROM token_ledger")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("flush_all", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(backend = "relational"), err)]
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, LedgerError> {
        let sql = format!("DELETE FROM token_ledger WHERE {LIVE} <= $1");
        let result = sqlx::query(&sql)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired", e))?;
        Ok(result.rows_affected())
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_secs().clamp(1, i64::MAX as u64) as i64
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> LedgerError {
    let message = match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => format!("database error {code}: {}", db_err.message()),
            None => format!("database error: {}", db_err.message()),
        },
        sqlx::Error::PoolClosed => "connection pool closed".to_string(),
        sqlx::Error::PoolTimedOut => "timed out acquiring a connection".to_string(),
        other => other.to_string(),
    };
    LedgerError::storage(BackendKind::Relational, operation, message)
}

#[derive(Debug)]
struct LedgerRow {
    jti: String,
    revoked: bool,
    token_type_hint: String,
    expires_in: i64,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LedgerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LedgerRow {
            jti: row.try_get("jti")?,
            revoked: row.try_get("revoked")?,
            token_type_hint: row.try_get("token_type_hint")?,
            expires_in: row.try_get("expires_in")?,
            revoked_at: row.try_get("revoked_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let corrupt = |e: tokenledger_core::DomainError| {
            LedgerError::storage(BackendKind::Relational, "get", format!("corrupt ledger row: {e}"))
        };
        Ok(LedgerEntry {
            jti: Jti::new(row.jti).map_err(corrupt)?,
            token_type: row.token_type_hint.parse().map_err(corrupt)?,
            revoked: row.revoked,
            expires_in: row.expires_in.max(1) as u64,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

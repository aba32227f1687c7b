//! Infrastructure layer: ledger backends (memory, Redis, Postgres) and
//! their configuration.

pub mod config;
pub mod ledger;

pub use config::{BackendKind, ConfigError, LedgerConfig, RedisConfig};
pub use ledger::{LedgerBackend, LedgerError, MemoryBackend, PostgresBackend, TokenLedger};
#[cfg(feature = "redis")]
pub use ledger::RedisBackend;

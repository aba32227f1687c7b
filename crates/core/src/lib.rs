//! `tokenledger-core`: token ledger domain primitives.
//!
//! This crate contains **pure domain** types (no storage, no transport).

pub mod entry;
pub mod error;
pub mod id;
pub mod token;

pub use entry::{LedgerEntry, LedgerState};
pub use error::{DomainError, DomainResult};
pub use id::Jti;
pub use token::{TokenLifetimes, TokenType};

//! `tokenledger-auth`: token minting/verification and credential checks.
//!
//! These are the collaborators the ledger never looks inside: it only ever
//! sees the `jti` and token type extracted here. This crate is intentionally
//! decoupled from HTTP and storage.

pub mod claims;
pub mod jwt;
pub mod password;
pub mod users;

pub use claims::{TokenClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256Jwt, IssuedToken, JwtValidator, TokenIssueError, TokenIssuer};
pub use password::{PasswordError, hash_password, verify_password};
pub use users::{CredentialError, InMemoryUserDirectory, UserDirectory, UserRecord, authenticate};

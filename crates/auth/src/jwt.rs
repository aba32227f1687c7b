//! HS256 token issuer and verifier.
//!
//! The API depends on the [`TokenIssuer`] and [`JwtValidator`] traits only;
//! [`Hs256Jwt`] is the shared-secret implementation used in every deployment
//! and in tests.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use thiserror::Error;

use tokenledger_core::{Jti, TokenLifetimes, TokenType};

use crate::claims::{TokenClaims, TokenValidationError, validate_claims};

/// A freshly minted token together with the claims it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

impl IssuedToken {
    pub fn jti(&self) -> &Jti {
        &self.claims.jti
    }

    pub fn token_type(&self) -> TokenType {
        self.claims.token_type
    }

    /// Expiry window in seconds (as reported to clients).
    pub fn expires_in(&self) -> u64 {
        self.claims.lifetime_secs()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("token signing failed: {0}")]
pub struct TokenIssueError(pub String);

/// Mints signed tokens. Every call produces a fresh `jti`.
pub trait TokenIssuer: Send + Sync {
    fn issue(
        &self,
        identity: &str,
        token_type: TokenType,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenIssueError>;
}

/// Verifies signed tokens.
pub trait JwtValidator: Send + Sync {
    /// Verify the signature and decode claims without checking the time window.
    fn decode(&self, token: &str) -> Result<TokenClaims, TokenValidationError>;

    /// Verify the signature and the time window.
    fn validate(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenValidationError> {
        let claims = self.decode(token)?;
        validate_claims(&claims, now)?;
        Ok(claims)
    }
}

/// Shared-secret (HMAC-SHA256) JWT codec.
#[derive(Clone)]
pub struct Hs256Jwt {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetimes: TokenLifetimes,
}

impl core::fmt::Debug for Hs256Jwt {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256Jwt")
            .field("lifetimes", &self.lifetimes)
            .finish_non_exhaustive()
    }
}

impl Hs256Jwt {
    pub fn new(secret: impl AsRef<[u8]>, lifetimes: TokenLifetimes) -> Self {
        let secret = secret.as_ref();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            lifetimes,
        }
    }

    fn validation() -> Validation {
        // Time checks are done by `validate_claims` against an injected clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation
    }
}

impl TokenIssuer for Hs256Jwt {
    fn issue(
        &self,
        identity: &str,
        token_type: TokenType,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenIssueError> {
        let lifetime =
            ChronoDuration::seconds(self.lifetimes.for_type(token_type).as_secs() as i64);
        let claims = TokenClaims {
            jti: Jti::generate(),
            token_type,
            sub: identity.to_string(),
            issued_at: now,
            expires_at: now + lifetime,
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenIssueError(e.to_string()))?;

        Ok(IssuedToken { token, claims })
    }
}

impl JwtValidator for Hs256Jwt {
    fn decode(&self, token: &str) -> Result<TokenClaims, TokenValidationError> {
        jsonwebtoken::decode::<TokenClaims>(token, &self.decoding, &Self::validation())
            .map(|data| data.claims)
            .map_err(|e| TokenValidationError::Malformed(decode_failure_reason(e.kind())))
    }
}

fn decode_failure_reason(kind: &ErrorKind) -> String {
    match kind {
        ErrorKind::InvalidSignature => "signature verification failed".to_string(),
        ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::MissingAlgorithm => "invalid token algorithm".to_string(),
        ErrorKind::MissingRequiredClaim(claim) => format!("missing claim: {claim}"),
        ErrorKind::Json(_) => "invalid token claims".to_string(),
        ErrorKind::Base64(_) | ErrorKind::Utf8(_) => "invalid token encoding".to_string(),
        _ => "invalid token".to_string(),
    }
}

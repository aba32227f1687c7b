use tokenledger_auth::TokenClaims;
use tokenledger_core::{Jti, TokenType};

/// Verified token of the current request, inserted by the auth gate.
///
/// Present on every route behind the gate; the token has passed signature,
/// expiry, type and revocation checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenContext {
    claims: TokenClaims,
}

impl TokenContext {
    pub fn new(claims: TokenClaims) -> Self {
        Self { claims }
    }

    pub fn jti(&self) -> &Jti {
        &self.claims.jti
    }

    pub fn token_type(&self) -> TokenType {
        self.claims.token_type
    }

    pub fn identity(&self) -> &str {
        &self.claims.sub
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }
}

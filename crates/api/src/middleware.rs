use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::instrument;

use tokenledger_auth::{JwtValidator, TokenClaims};
use tokenledger_core::TokenType;
use tokenledger_infra::TokenLedger;

use crate::app::errors::ApiError;
use crate::context::TokenContext;
use crate::protocol::ProtocolError;

/// Request-time token check: signature and expiry, then type, then ledger.
///
/// A token failing verification is rejected without a ledger lookup.
/// Unknown identifiers pass; only Revoked ones are refused.
#[derive(Clone)]
pub struct AuthGate {
    validator: Arc<dyn JwtValidator>,
    ledger: TokenLedger,
    required: TokenType,
}

impl AuthGate {
    pub fn new(validator: Arc<dyn JwtValidator>, ledger: TokenLedger, required: TokenType) -> Self {
        Self {
            validator,
            ledger,
            required,
        }
    }

    /// Same gate, different required token type.
    pub fn requiring(&self, required: TokenType) -> Self {
        Self {
            required,
            ..self.clone()
        }
    }

    #[instrument(skip_all, fields(required = self.required.as_str()), err(level = "warn"))]
    pub async fn authorize(&self, headers: &HeaderMap) -> Result<TokenClaims, ProtocolError> {
        let token = extract_bearer(headers).ok_or(ProtocolError::MissingAuthorization)?;
        let claims = self.validator.validate(token, Utc::now())?;

        if claims.token_type != self.required {
            return Err(ProtocolError::WrongTokenType {
                expected: self.required,
            });
        }

        if self.ledger.query(&claims.jti).await?.is_revoked() {
            tracing::warn!(
                jti = %claims.jti,
                token_type = claims.token_type.as_str(),
                "revoked token presented"
            );
            return Err(ProtocolError::TokenRevoked);
        }

        Ok(claims)
    }
}

pub async fn auth_middleware(
    State(gate): State<AuthGate>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = gate.authorize(req.headers()).await?;
    req.extensions_mut().insert(TokenContext::new(claims));
    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::{HeaderValue, header::AUTHORIZATION};
    use tokenledger_auth::{Hs256Jwt, TokenIssuer, TokenValidationError};
    use tokenledger_core::TokenLifetimes;

    fn gate() -> (AuthGate, Arc<Hs256Jwt>) {
        let lifetimes =
            TokenLifetimes::new(Duration::from_secs(60), Duration::from_secs(600)).unwrap();
        let jwt = Arc::new(Hs256Jwt::new("gate-secret", lifetimes));
        let ledger = TokenLedger::in_memory(lifetimes);
        (AuthGate::new(jwt.clone(), ledger, TokenType::Access), jwt)
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}")).unwrap());
        headers
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer(&bearer("abc")), Some("abc"));
        assert_eq!(extract_bearer(&HeaderMap::new()), None);

        let mut basic = HeaderMap::new();
        basic.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&basic), None);

        let mut blank = HeaderMap::new();
        blank.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer(&blank), None);
    }

    #[tokio::test]
    async fn unknown_identifiers_are_permitted() {
        let (gate, jwt) = gate();
        let issued = jwt.issue("a@b.c", TokenType::Access, Utc::now()).unwrap();
        let claims = gate.authorize(&bearer(&issued.token)).await.unwrap();
        assert_eq!(claims.jti, *issued.jti());
    }

    #[tokio::test]
    async fn revoked_identifiers_are_refused() {
        let (gate, jwt) = gate();
        let issued = jwt.issue("a@b.c", TokenType::Access, Utc::now()).unwrap();
        gate.ledger.revoke(issued.jti(), TokenType::Access).await.unwrap();

        let err = gate.authorize(&bearer(&issued.token)).await.unwrap_err();
        assert!(matches!(err, ProtocolError::TokenRevoked));
    }

    #[tokio::test]
    async fn wrong_type_is_refused_before_ledger_lookup() {
        let (gate, jwt) = gate();
        let refresh = jwt.issue("a@b.c", TokenType::Refresh, Utc::now()).unwrap();
        let err = gate.authorize(&bearer(&refresh.token)).await.unwrap_err();
        assert_eq!(err.to_string(), "Only access tokens are allowed.");

        let refresh_gate = gate.requiring(TokenType::Refresh);
        assert!(refresh_gate.authorize(&bearer(&refresh.token)).await.is_ok());
    }

    #[tokio::test]
    async fn expired_tokens_are_refused() {
        let (gate, jwt) = gate();
        let stale = jwt
            .issue("a@b.c", TokenType::Access, Utc::now() - chrono::Duration::seconds(120))
            .unwrap();
        let err = gate.authorize(&bearer(&stale.token)).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidToken(TokenValidationError::Expired {
                token_type: TokenType::Access,
            })
        ));
    }

    #[tokio::test]
    async fn missing_header() {
        let (gate, _) = gate();
        let err = gate.authorize(&HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing authorization header.");
    }
}

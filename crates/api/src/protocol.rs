//! Token protocol handler: sign-in, refresh and logout.
//!
//! Every operation validates its input completely before the first ledger
//! write, so a rejected request leaves the ledger untouched. Once a write has
//! happened, any later failure is reported as a storage error (500).
//!
//! Logout revokes two identifiers in two round trips. If the second revoke
//! fails, identifiers revoked earlier in the same call are reinstated
//! (Probationary) unless they were already Revoked beforehand. This is best
//! effort; a crash between the writes can still leave one side revoked.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::instrument;

use tokenledger_auth::{
    CredentialError, JwtValidator, TokenClaims, TokenIssueError, TokenIssuer,
    TokenValidationError, UserDirectory, authenticate, validate_claims,
};
use tokenledger_core::{Jti, LedgerState, TokenType};
use tokenledger_infra::{LedgerError, TokenLedger};

use crate::app::dto::{
    FieldErrors, LogoutRequest, RefreshRequest, RefreshResponse, SignInRequest, SignInResponse,
};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid request was sent.")]
    Validation(FieldErrors),

    #[error("Missing authorization header.")]
    MissingAuthorization,

    #[error("{0}")]
    InvalidToken(#[from] TokenValidationError),

    #[error("Only {expected} tokens are allowed.")]
    WrongTokenType { expected: TokenType },

    #[error("Token has been revoked.")]
    TokenRevoked,

    #[error("{0} token does not belong to the caller.")]
    ForeignToken(&'static str),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("Token identifier {jti} is already in use.")]
    AlreadyTracked { jti: Jti },

    #[error("token ledger unavailable: {0}")]
    Storage(LedgerError),

    /// Unexpected failure; `after_write` records whether the ledger was
    /// already modified by this request.
    #[error("{message}")]
    Internal { message: String, after_write: bool },
}

impl From<LedgerError> for ProtocolError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AlreadyTracked { jti } => ProtocolError::AlreadyTracked { jti },
            other => ProtocolError::Storage(other),
        }
    }
}

impl ProtocolError {
    fn issue(err: TokenIssueError, after_write: bool) -> Self {
        ProtocolError::Internal {
            message: err.to_string(),
            after_write,
        }
    }
}

/// Orchestrates issuance and revocation against one [`TokenLedger`].
#[derive(Clone)]
pub struct TokenProtocol {
    ledger: TokenLedger,
    issuer: Arc<dyn TokenIssuer>,
    validator: Arc<dyn JwtValidator>,
    users: Arc<dyn UserDirectory>,
}

impl TokenProtocol {
    pub fn new(
        ledger: TokenLedger,
        issuer: Arc<dyn TokenIssuer>,
        validator: Arc<dyn JwtValidator>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            ledger,
            issuer,
            validator,
            users,
        }
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    /// Check credentials, mint an access/refresh pair and probate both.
    #[instrument(skip_all, fields(operation = "sign_in", email = %request.email), err)]
    pub async fn sign_in(&self, request: SignInRequest) -> Result<SignInResponse, ProtocolError> {
        let user = authenticate(self.users.as_ref(), &request.email, &request.password)?;
        let now = Utc::now();

        let access = self
            .issuer
            .issue(&user.email, TokenType::Access, now)
            .map_err(|e| ProtocolError::issue(e, false))?;
        let refresh = self
            .issuer
            .issue(&user.email, TokenType::Refresh, now)
            .map_err(|e| ProtocolError::issue(e, false))?;

        self.ledger.probate(access.jti(), TokenType::Access).await?;
        self.ledger.probate(refresh.jti(), TokenType::Refresh).await?;

        tracing::info!(
            access_jti = %access.jti(),
            refresh_jti = %refresh.jti(),
            "issued token pair"
        );

        Ok(SignInResponse {
            access_expires_in: access.expires_in(),
            refresh_expires_in: refresh.expires_in(),
            access_token: access.token,
            refresh_token: refresh.token,
        })
    }

    /// Mint a new access token for the holder of `caller` (a refresh token)
    /// and revoke the access token presented in the body.
    ///
    /// An expired old access token is not revoked; it is already unusable.
    #[instrument(skip_all, fields(operation = "refresh", refresh_jti = %caller.jti), err)]
    pub async fn refresh(
        &self,
        caller: &TokenClaims,
        request: RefreshRequest,
    ) -> Result<RefreshResponse, ProtocolError> {
        let now = Utc::now();
        let old = self.inspect(&request.access_token, TokenType::Access, caller, now)?;

        let access = self
            .issuer
            .issue(&caller.sub, TokenType::Access, now)
            .map_err(|e| ProtocolError::issue(e, false))?;
        self.ledger.probate(access.jti(), TokenType::Access).await?;

        match old {
            Some(old) => self.ledger.revoke(&old.jti, TokenType::Access).await?,
            None => tracing::info!("old access token already expired; nothing to revoke"),
        }

        Ok(RefreshResponse {
            access_expires_in: access.expires_in(),
            access_token: access.token,
        })
    }

    /// Revoke the body's refresh token, then the caller's access token.
    ///
    /// An expired refresh token is skipped; the access token is still revoked.
    #[instrument(skip_all, fields(operation = "logout", access_jti = %caller.jti), err)]
    pub async fn logout(
        &self,
        caller: &TokenClaims,
        request: LogoutRequest,
    ) -> Result<(), ProtocolError> {
        let now = Utc::now();
        let refresh = self.inspect(&request.refresh_token, TokenType::Refresh, caller, now)?;

        let mut steps = Vec::with_capacity(2);
        match &refresh {
            Some(refresh) => steps.push((refresh.jti.clone(), TokenType::Refresh)),
            None => tracing::info!("refresh token already expired; revoking access token only"),
        }
        steps.push((caller.jti.clone(), TokenType::Access));

        let mut prior = Vec::with_capacity(steps.len());
        for (jti, _) in &steps {
            prior.push(self.ledger.query(jti).await?);
        }

        let mut revoked: Vec<usize> = Vec::with_capacity(steps.len());
        for (i, (jti, token_type)) in steps.iter().enumerate() {
            if let Err(err) = self.ledger.revoke(jti, *token_type).await {
                tracing::error!(
                    %jti,
                    token_type = token_type.as_str(),
                    error = %err,
                    "logout revoke failed"
                );
                self.compensate(&steps, &prior, &revoked).await;
                return Err(err.into());
            }
            revoked.push(i);
        }

        tracing::info!(revoked = revoked.len(), "logged out");
        Ok(())
    }

    async fn compensate(
        &self,
        steps: &[(Jti, TokenType)],
        prior: &[LedgerState],
        revoked: &[usize],
    ) {
        for &i in revoked {
            let (jti, token_type) = &steps[i];
            if prior[i].is_revoked() {
                continue;
            }
            match self.ledger.reinstate(jti, *token_type).await {
                Ok(()) => tracing::warn!(
                    %jti,
                    token_type = token_type.as_str(),
                    "reinstated after failed logout"
                ),
                Err(err) => tracing::error!(
                    %jti,
                    token_type = token_type.as_str(),
                    error = %err,
                    "compensation failed; token left revoked"
                ),
            }
        }
    }

    /// Decode a token taken from a request body and check it belongs with
    /// `caller`. Returns `None` when it has merely expired.
    fn inspect(
        &self,
        token: &str,
        expected: TokenType,
        caller: &TokenClaims,
        now: DateTime<Utc>,
    ) -> Result<Option<TokenClaims>, ProtocolError> {
        let claims = self.validator.decode(token)?;

        if claims.token_type != expected {
            return Err(ProtocolError::WrongTokenType { expected });
        }
        if claims.sub != caller.sub {
            let label = match expected {
                TokenType::Access => "Access",
                TokenType::Refresh => "Refresh",
            };
            return Err(ProtocolError::ForeignToken(label));
        }

        match validate_claims(&claims, now) {
            Ok(()) => Ok(Some(claims)),
            Err(TokenValidationError::Expired { .. }) => {
                tracing::info!(
                    jti = %claims.jti,
                    token_type = expected.as_str(),
                    "body token expired"
                );
                Ok(None)
            }
            Err(other) => Err(other.into()),
        }
    }
}

//! Service wiring: ledger backend, token codec, user directory, protocol.

use std::sync::Arc;

use thiserror::Error;

use tokenledger_auth::{Hs256Jwt, InMemoryUserDirectory, JwtValidator, PasswordError};
use tokenledger_core::TokenType;
use tokenledger_infra::{LedgerError, TokenLedger};

use crate::config::AppConfig;
use crate::middleware::AuthGate;
use crate::protocol::TokenProtocol;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("token ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("seed user: {0}")]
    SeedUser(#[from] PasswordError),
}

/// Everything the HTTP layer needs, built once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub protocol: TokenProtocol,
    pub ledger: TokenLedger,
    pub validator: Arc<dyn JwtValidator>,
}

impl AppServices {
    /// Gate for routes requiring `token_type`.
    pub fn gate(&self, token_type: TokenType) -> AuthGate {
        AuthGate::new(self.validator.clone(), self.ledger.clone(), token_type)
    }
}

/// Connect the configured ledger backend. A backend that cannot be reached
/// or is not compiled in aborts startup.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, StartupError> {
    let ledger = TokenLedger::connect(&config.ledger).await?;
    assemble(config, ledger)
}

/// Wire services around an already constructed ledger.
pub fn assemble(config: &AppConfig, ledger: TokenLedger) -> Result<AppServices, StartupError> {
    let jwt = Arc::new(Hs256Jwt::new(config.jwt_secret.as_bytes(), config.ledger.lifetimes));

    let users = InMemoryUserDirectory::new();
    if let Some(seed) = &config.seed_user {
        users.register(seed.email.clone(), &seed.password)?;
        tracing::info!(email = %seed.email, "seed user registered");
    }

    let protocol = TokenProtocol::new(ledger.clone(), jwt.clone(), jwt.clone(), Arc::new(users));

    Ok(AppServices {
        protocol,
        ledger,
        validator: jwt,
    })
}

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tokenledger_auth::{CredentialError, TokenValidationError};

use crate::app::dto::FieldErrors;
use crate::protocol::ProtocolError;

/// HTTP error: status plus the `{"error": {"message": ..}}` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub fields: Option<FieldErrors>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            fields: None,
        }
    }
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        let message = err.to_string();
        match err {
            ProtocolError::Validation(fields) => Self {
                status: StatusCode::BAD_REQUEST,
                message,
                fields: Some(fields),
            },
            ProtocolError::MissingAuthorization
            | ProtocolError::TokenRevoked
            | ProtocolError::AlreadyTracked { .. } => Self::new(StatusCode::UNAUTHORIZED, message),
            ProtocolError::InvalidToken(TokenValidationError::Expired { .. }) => {
                Self::new(StatusCode::UNAUTHORIZED, message)
            }
            ProtocolError::InvalidToken(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, normalize_message(&message))
            }
            ProtocolError::WrongTokenType { .. } | ProtocolError::ForeignToken(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
            }
            ProtocolError::Credentials(CredentialError::UnknownUser(_)) => {
                Self::new(StatusCode::NOT_FOUND, message)
            }
            ProtocolError::Credentials(CredentialError::WrongPassword) => {
                Self::new(StatusCode::UNAUTHORIZED, message)
            }
            ProtocolError::Credentials(CredentialError::Password(e)) => {
                tracing::error!(error = %e, "stored password hash unusable");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
            }
            ProtocolError::Storage(e) => {
                tracing::error!(error = %e, "token ledger failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
            }
            ProtocolError::Internal { after_write, .. } => {
                tracing::error!(error = %message, after_write, "unexpected protocol failure");
                if after_write {
                    Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
                } else {
                    Self::new(StatusCode::BAD_REQUEST, normalize_message(&message))
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = match self.fields {
            Some(fields) => json!({ "error": { "message": self.message, "fields": fields } }),
            None => json!({ "error": { "message": self.message } }),
        };
        (self.status, axum::Json(body)).into_response()
    }
}

/// Capitalise the first letter and end with exactly one period.
pub fn normalize_message(message: &str) -> String {
    let trimmed = message.trim().trim_end_matches('.');
    let mut chars = trimmed.chars();
    let mut out = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    out.push('.');
    out
}

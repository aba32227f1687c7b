use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;

pub const MISSING_FIELD: &str = "Missing data for required field.";
pub const EMPTY_FIELD: &str = "Field may not be empty.";
pub const INVALID_EMAIL: &str = "Not a valid email address.";
pub const INVALID_INPUT: &str = "Invalid input type.";

/// Field name -> messages, rendered under `error.fields`.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
struct RawSignIn {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRefresh {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLogout {
    refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// `PUT /token` body: the access token being replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub access_token: String,
}

/// `DELETE /token` body: the refresh token to retire with the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

impl SignInRequest {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawSignIn = decode(body)?;
        let mut errors = FieldErrors::new();
        let email = required(&mut errors, "email", raw.email);
        let password = required(&mut errors, "password", raw.password);

        if let Some(email) = &email {
            if !looks_like_email(email) {
                errors.entry("email".to_string()).or_default().push(INVALID_EMAIL.to_string());
            }
        }

        match (email, password) {
            (Some(email), Some(password)) if errors.is_empty() => Ok(Self { email, password }),
            _ => Err(ProtocolError::Validation(errors)),
        }
    }
}

impl RefreshRequest {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawRefresh = decode(body)?;
        let mut errors = FieldErrors::new();
        required(&mut errors, "access_token", raw.access_token)
            .map(|access_token| Self { access_token })
            .ok_or(ProtocolError::Validation(errors))
    }
}

impl LogoutRequest {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawLogout = decode(body)?;
        let mut errors = FieldErrors::new();
        required(&mut errors, "refresh_token", raw.refresh_token)
            .map(|refresh_token| Self { refresh_token })
            .ok_or(ProtocolError::Validation(errors))
    }
}

/// An empty body is treated as `{}` so missing fields are reported per field.
fn decode<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, ProtocolError> {
    let body = if body.iter().all(u8::is_ascii_whitespace) { b"{}".as_slice() } else { body };
    serde_json::from_slice(body).map_err(|_| {
        let mut errors = FieldErrors::new();
        errors.insert("_schema".to_string(), vec![INVALID_INPUT.to_string()]);
        ProtocolError::Validation(errors)
    })
}

fn required(errors: &mut FieldErrors, field: &str, value: Option<String>) -> Option<String> {
    match value {
        None => {
            errors.insert(field.to_string(), vec![MISSING_FIELD.to_string()]);
            None
        }
        Some(v) if v.trim().is_empty() => {
            errors.insert(field.to_string(), vec![EMPTY_FIELD.to_string()]);
            None
        }
        Some(v) => Some(v),
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignInResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_in: u64,
    pub refresh_expires_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshResponse {
    pub access_token: String,
    pub access_expires_in: u64,
}

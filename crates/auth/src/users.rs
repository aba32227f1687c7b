//! Credential source for sign-in.
//!
//! Account persistence is out of scope here: the directory is a lookup seam
//! with an in-memory implementation seeded at startup.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::password::{PasswordError, hash_password, verify_password};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub email: String,
    pub password_hash: String,
}

/// Lookup of user accounts by email.
pub trait UserDirectory: Send + Sync {
    fn find_by_email(&self, email: &str) -> Option<UserRecord>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("User:({0}) not found.")]
    UnknownUser(String),

    #[error("Wrong password.")]
    WrongPassword,

    #[error(transparent)]
    Password(#[from] PasswordError),
}

/// Check an email/password pair against a directory.
pub fn authenticate(
    directory: &dyn UserDirectory,
    email: &str,
    password: &str,
) -> Result<UserRecord, CredentialError> {
    let user = directory
        .find_by_email(email)
        .ok_or_else(|| CredentialError::UnknownUser(email.to_string()))?;

    if verify_password(password, &user.password_hash)? {
        Ok(user)
    } else {
        Err(CredentialError::WrongPassword)
    }
}

/// In-memory user directory for tests/dev and single-account deployments.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an account, hashing the password.
    pub fn register(&self, email: impl Into<String>, password: &str) -> Result<(), PasswordError> {
        let email = email.into();
        let record = UserRecord {
            email: email.clone(),
            password_hash: hash_password(password)?,
        };
        let mut users = self.users.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        users.insert(email, record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        let users = self.users.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn find_by_email(&self, email: &str) -> Option<UserRecord> {
        let users = self.users.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        users.get(email).cloned()
    }
}

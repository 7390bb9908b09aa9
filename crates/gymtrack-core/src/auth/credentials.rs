//! Durable storage for the signed-in user and their bearer token.
//!
//! The profile and the token live under separate keys so rewriting one can
//! never clobber the other.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use keyring::Entry;
use thiserror::Error;
use tracing::debug;

use crate::models::UserProfile;

/// Keychain service name
const SERVICE_NAME: &str = "gymtrack";

/// Key holding the serialized `UserProfile`
pub const USER_KEY: &str = "gymtrack.user";

/// Key holding the opaque bearer token
pub const TOKEN_KEY: &str = "gymtrack.token";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Failed to read {key}: {reason}")]
    Read { key: &'static str, reason: String },

    #[error("Failed to write {key}: {reason}")]
    Write { key: &'static str, reason: String },
}

impl StoreError {
    fn read(key: &'static str, reason: impl ToString) -> Self {
        StoreError::Read {
            key,
            reason: reason.to_string(),
        }
    }

    fn write(key: &'static str, reason: impl ToString) -> Self {
        StoreError::Write {
            key,
            reason: reason.to_string(),
        }
    }
}

/// Key/value persistence for the session.
///
/// `get_*` return `Ok(None)` when nothing is stored; an error means the
/// medium failed or held data that could not be decoded. `remove_*` succeed
/// when the entry is already gone.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save_user(&self, user: &UserProfile) -> Result<(), StoreError>;
    async fn get_user(&self) -> Result<Option<UserProfile>, StoreError>;
    async fn remove_user(&self) -> Result<(), StoreError>;

    async fn save_token(&self, token: &str) -> Result<(), StoreError>;
    async fn get_token(&self) -> Result<Option<String>, StoreError>;
    async fn remove_token(&self) -> Result<(), StoreError>;
}

fn encode_user(user: &UserProfile) -> Result<String, StoreError> {
    serde_json::to_string(user).map_err(|e| StoreError::write(USER_KEY, e))
}

fn decode_user(raw: Option<String>) -> Result<Option<UserProfile>, StoreError> {
    raw.map(|contents| serde_json::from_str(&contents).map_err(|e| StoreError::read(USER_KEY, e)))
        .transpose()
}

// ============================================================================
// OS keychain
// ============================================================================

/// Credential store backed by the OS keychain.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Store under a custom service name, e.g. to keep test data apart
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    async fn set(&self, key: &'static str, value: String) -> Result<(), StoreError> {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, key).map_err(|e| StoreError::write(key, e))?;
            entry.set_password(&value).map_err(|e| StoreError::write(key, e))
        })
        .await
        .map_err(|e| StoreError::write(key, e))?
    }

    async fn get(&self, key: &'static str) -> Result<Option<String>, StoreError> {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, key).map_err(|e| StoreError::read(key, e))?;
            match entry.get_password() {
                Ok(value) => Ok(Some(value)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(StoreError::read(key, e)),
            }
        })
        .await
        .map_err(|e| StoreError::read(key, e))?
    }

    async fn delete(&self, key: &'static str) -> Result<(), StoreError> {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, key).map_err(|e| StoreError::write(key, e))?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(StoreError::write(key, e)),
            }
        })
        .await
        .map_err(|e| StoreError::write(key, e))?
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn save_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        self.set(USER_KEY, encode_user(user)?).await
    }

    async fn get_user(&self) -> Result<Option<UserProfile>, StoreError> {
        decode_user(self.get(USER_KEY).await?)
    }

    async fn remove_user(&self) -> Result<(), StoreError> {
        self.delete(USER_KEY).await
    }

    async fn save_token(&self, token: &str) -> Result<(), StoreError> {
        self.set(TOKEN_KEY, token.to_string()).await
    }

    async fn get_token(&self) -> Result<Option<String>, StoreError> {
        self.get(TOKEN_KEY).await
    }

    async fn remove_token(&self) -> Result<(), StoreError> {
        self.delete(TOKEN_KEY).await
    }
}

// ============================================================================
// Plain files
// ============================================================================

/// Credential store writing one file per key into a data directory.
///
/// Used where no keychain is available (headless machines, CI).
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    async fn write(&self, key: &'static str, contents: String) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::write(key, e))?;
        tokio::fs::write(self.path(key), contents)
            .await
            .map_err(|e| StoreError::write(key, e))?;
        debug!(key = key, "Credential file written");
        Ok(())
    }

    async fn read(&self, key: &'static str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::read(key, e)),
        }
    }

    async fn remove(&self, key: &'static str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::write(key, e)),
        }
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn save_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        self.write(USER_KEY, encode_user(user)?).await
    }

    async fn get_user(&self) -> Result<Option<UserProfile>, StoreError> {
        decode_user(self.read(USER_KEY).await?)
    }

    async fn remove_user(&self) -> Result<(), StoreError> {
        self.remove(USER_KEY).await
    }

    async fn save_token(&self, token: &str) -> Result<(), StoreError> {
        self.write(TOKEN_KEY, token.to_string()).await
    }

    async fn get_token(&self) -> Result<Option<String>, StoreError> {
        self.read(TOKEN_KEY).await
    }

    async fn remove_token(&self) -> Result<(), StoreError> {
        self.remove(TOKEN_KEY).await
    }
}

//! Fault-injecting credential store shared by the auth tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::models::UserProfile;

use super::credentials::{CredentialStore, FileStore, StoreError, TOKEN_KEY, USER_KEY};

pub(crate) struct FlakyStore {
    inner: FileStore,
    pub fail_user_write: AtomicBool,
    pub fail_token_write: AtomicBool,
    pub fail_remove: AtomicBool,
    pub fail_read: AtomicBool,
    /// Notified when a gated `save_user` starts waiting
    pub user_write_started: Notify,
    user_write_gate: Mutex<Option<Arc<Notify>>>,
    user_read_gate: Mutex<Option<Arc<Notify>>>,
}

impl FlakyStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            inner: FileStore::new(dir),
            fail_user_write: AtomicBool::new(false),
            fail_token_write: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
            fail_read: AtomicBool::new(false),
            user_write_started: Notify::new(),
            user_write_gate: Mutex::new(None),
            user_read_gate: Mutex::new(None),
        }
    }

    /// Hold every later `save_user` until `gate` is notified
    pub fn set_user_write_gate(&self, gate: Arc<Notify>) {
        *self.user_write_gate.lock().unwrap() = Some(gate);
    }

    /// Hold every later `get_user` until `gate` is notified
    pub fn set_user_read_gate(&self, gate: Arc<Notify>) {
        *self.user_read_gate.lock().unwrap() = Some(gate);
    }

    /// What is on disk, bypassing injected faults and gates
    pub async fn stored_user(&self) -> Option<UserProfile> {
        self.inner.get_user().await.ok().flatten()
    }

    fn injected(flag: &AtomicBool, err: StoreError) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(err)
        } else {
            Ok(())
        }
    }

    fn write_failure(key: &'static str) -> StoreError {
        StoreError::Write {
            key,
            reason: "injected write failure".to_string(),
        }
    }

    fn read_failure(key: &'static str) -> StoreError {
        StoreError::Read {
            key,
            reason: "injected read failure".to_string(),
        }
    }
}

#[async_trait]
impl CredentialStore for FlakyStore {
    async fn save_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        let gate = self.user_write_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.user_write_started.notify_one();
            gate.notified().await;
        }
        Self::injected(&self.fail_user_write, Self::write_failure(USER_KEY))?;
        self.inner.save_user(user).await
    }

    async fn get_user(&self) -> Result<Option<UserProfile>, StoreError> {
        let gate = self.user_read_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Self::injected(&self.fail_read, Self::read_failure(USER_KEY))?;
        self.inner.get_user().await
    }

    async fn remove_user(&self) -> Result<(), StoreError> {
        Self::injected(&self.fail_remove, Self::write_failure(USER_KEY))?;
        self.inner.remove_user().await
    }

    async fn save_token(&self, token: &str) -> Result<(), StoreError> {
        Self::injected(&self.fail_token_write, Self::write_failure(TOKEN_KEY))?;
        self.inner.save_token(token).await
    }

    async fn get_token(&self) -> Result<Option<String>, StoreError> {
        Self::injected(&self.fail_read, Self::read_failure(TOKEN_KEY))?;
        self.inner.get_token().await
    }

    async fn remove_token(&self) -> Result<(), StoreError> {
        Self::injected(&self.fail_remove, Self::write_failure(TOKEN_KEY))?;
        self.inner.remove_token().await
    }
}

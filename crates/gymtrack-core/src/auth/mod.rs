//! Authentication module for managing the signed-in session.
//!
//! This module provides:
//! - `SessionManager`: owns the session state, publishes it to subscribers
//!   and keeps the API client's authorization header in step with it
//! - `CredentialStore`: durable storage for the user profile and token, with
//!   OS keychain (`KeyringStore`) and plain file (`FileStore`) backends

pub mod credentials;
mod profile;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use credentials::{CredentialStore, FileStore, KeyringStore, StoreError};
pub use session::{SessionError, SessionManager, SessionSnapshot, SessionState, SignOutReport};

//! Core library for the gymtrack fitness client.
//!
//! The interesting part is the session layer: `auth::SessionManager` owns who
//! is signed in, persists that through an `auth::CredentialStore`, and keeps
//! the shared `api::ApiClient` sending the matching bearer token.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{
    CredentialStore, FileStore, KeyringStore, SessionError, SessionManager, SessionSnapshot,
    SessionState, SignOutReport, StoreError,
};
pub use config::{Config, CredentialBackend};
pub use models::UserProfile;

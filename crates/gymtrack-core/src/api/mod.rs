//! REST API client module for the gymtrack service.
//!
//! This module provides the shared `ApiClient` used by every screen and by
//! the session manager, plus the `ApiError` taxonomy that normalizes server
//! rejections and transport failures.
//!
//! Authenticated calls carry an opaque bearer token issued by `POST /sessions`.

pub mod client;
pub mod error;

pub use client::{ApiClient, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::ApiError;

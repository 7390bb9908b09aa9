//! Data models exchanged with the gymtrack service.
//!
//! - `UserProfile`: the signed-in user's identity, persisted alongside the token
//! - Request/response bodies for the session and profile endpoints

pub mod user;

pub use user::{AvatarResponse, SignInRequest, SignInResponse, UpdateUserRequest, UserProfile};

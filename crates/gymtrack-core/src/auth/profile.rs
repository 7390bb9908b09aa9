//! Profile edits that go through the service before updating the session.
//!
//! The session epoch is captured before the request; if the user signs out
//! (or someone else signs in) while it is in flight, the result is dropped
//! with `Superseded` instead of landing on the new session.

use std::path::Path;

use tracing::info;

use crate::models::{UpdateUserRequest, UserProfile};

use super::session::{SessionError, SessionManager};

impl SessionManager {
    /// Rename the user (and optionally change their password) via `PUT /users`,
    /// then publish the renamed profile.
    pub async fn change_profile(
        &self,
        name: &str,
        password: Option<String>,
        old_password: Option<String>,
    ) -> Result<UserProfile, SessionError> {
        let epoch = self.session_epoch();
        let current = self.current_user().ok_or(SessionError::NotAuthenticated)?;

        self.api()
            .update_user(&UpdateUserRequest {
                name: name.to_string(),
                password,
                old_password,
            })
            .await?;

        let updated = current.with_name(name);
        self.update_profile_in(updated.clone(), Some(epoch)).await?;
        info!(user_id = %updated.id, "Profile details changed");
        Ok(updated)
    }

    /// Upload a new avatar image and publish the profile pointing at it.
    pub async fn change_avatar(&self, image: &Path) -> Result<UserProfile, SessionError> {
        let epoch = self.session_epoch();
        let current = self.current_user().ok_or(SessionError::NotAuthenticated)?;

        let avatar = self.api().update_avatar(image, &current.name).await?;

        let updated = current.with_avatar(avatar);
        self.update_profile_in(updated.clone(), Some(epoch)).await?;
        info!(user_id = %updated.id, "Avatar changed");
        Ok(updated)
    }
}

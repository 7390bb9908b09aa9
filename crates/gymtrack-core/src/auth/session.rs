//! Session manager: the single source of truth for who is signed in.
//!
//! State is published through a `tokio::sync::watch` channel. Every change to
//! the published state happens while the control lock is held and after the
//! API client's authorization header has been updated, so a subscriber that
//! sees `Authenticated` can rely on the header already carrying that token.
//!
//! Sequencing is "latest caller wins": each sign-in/sign-out bumps an epoch,
//! and a sign-in only activates if no sign-out has bumped it since it started.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join;
use reqwest::header::HeaderValue;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::models::UserProfile;

use super::credentials::{CredentialStore, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Stored credentials have not been read yet
    Bootstrapping,
    Unauthenticated,
    Authenticated(UserProfile),
}

impl SessionState {
    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

/// What subscribers observe.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// True while bootstrapping, signing in or signing out
    pub loading: bool,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Sign-in response did not contain a usable user and token")]
    UnexpectedResponse,

    #[error("Could not save the session on this device: {0}")]
    Persist(#[source] StoreError),

    #[error("Another session operation is in progress")]
    Busy,

    #[error("No user is signed in")]
    NotAuthenticated,

    /// A sign-out (or a new session) happened while the operation was running
    #[error("The session changed while the operation was running")]
    Superseded,
}

/// Outcome of a sign-out. The user is signed out either way; a storage
/// failure only means stale entries may remain on disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignOutReport {
    pub storage_error: Option<StoreError>,
}

impl SignOutReport {
    pub fn is_clean(&self) -> bool {
        self.storage_error.is_none()
    }
}

#[derive(Debug, Default)]
struct Control {
    /// Bumped by every sign-in and sign-out
    epoch: u64,
    in_flight: usize,
    loading_ops: usize,
    bootstrap_started: bool,
    ready: bool,
}

pub struct SessionManager {
    api: ApiClient,
    store: Arc<dyn CredentialStore>,
    control: Mutex<Control>,
    state: watch::Sender<SessionSnapshot>,
}

/// Tracks one running operation; releases its slot and loading flag on drop.
struct OperationGuard<'a> {
    manager: &'a SessionManager,
    loading: bool,
    bootstrap: bool,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        let mut control = self.manager.lock();
        control.in_flight -= 1;
        if self.bootstrap && !control.ready {
            // Dropped before the stored session was read; allow a retry
            control.bootstrap_started = false;
        }
        if self.loading {
            control.loading_ops -= 1;
            self.manager.publish_loading(&control);
        }
    }
}

impl SessionManager {
    pub fn new(api: ApiClient, store: Arc<dyn CredentialStore>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot {
            state: SessionState::Bootstrapping,
            loading: true,
        });
        Self {
            api,
            store,
            control: Mutex::new(Control::default()),
            state,
        }
    }

    /// The shared API client; its authorization follows this session.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.state.borrow().state.user().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, control: &mut Control, loading: bool) -> OperationGuard<'_> {
        control.in_flight += 1;
        if loading {
            control.loading_ops += 1;
            self.publish_loading(control);
        }
        OperationGuard {
            manager: self,
            loading,
            bootstrap: false,
        }
    }

    fn publish_loading(&self, control: &Control) {
        // Bootstrapping is always loading until it resolves
        let loading = control.loading_ops > 0 || !control.ready;
        self.state.send_if_modified(|snapshot| {
            let changed = snapshot.loading != loading;
            snapshot.loading = loading;
            changed
        });
    }

    fn publish(&self, control: &Control, state: SessionState) {
        let loading = control.loading_ops > 0 || !control.ready;
        self.state.send_modify(|snapshot| {
            snapshot.state = state;
            snapshot.loading = loading;
        });
    }

    /// Header first, then the state, under the control lock.
    fn activate(&self, control: &Control, user: UserProfile, authorization: HeaderValue) {
        self.api.set_authorization(Some(authorization));
        self.publish(control, SessionState::Authenticated(user));
    }

    fn deactivate(&self, control: &Control) {
        self.api.set_authorization(None);
        self.publish(control, SessionState::Unauthenticated);
    }

    async fn discard_persisted(&self) {
        let (user, token) = join(self.store.remove_user(), self.store.remove_token()).await;
        if let Err(e) = user.and(token) {
            warn!(error = %e, "Failed to discard stored credentials");
        }
    }

    /// Restore the session saved by a previous run.
    ///
    /// Read failures are logged and treated as "no session". Calling this
    /// again after it finished returns the current state without touching
    /// storage.
    pub async fn bootstrap(&self) -> Result<SessionState, SessionError> {
        let _guard = {
            let mut control = self.lock();
            if control.bootstrap_started {
                if !control.ready {
                    return Err(SessionError::Busy);
                }
                let current = self.state.borrow().state.clone();
                return Ok(current);
            }
            control.bootstrap_started = true;
            let mut guard = self.enter(&mut control, true);
            guard.bootstrap = true;
            guard
        };

        let (user, token) = join(self.store.get_user(), self.store.get_token()).await;
        let user = user.unwrap_or_else(|e| {
            warn!(error = %e, "Stored user unreadable, starting signed out");
            None
        });
        let token = token.unwrap_or_else(|e| {
            warn!(error = %e, "Stored token unreadable, starting signed out");
            None
        });

        let restored = match (user, token) {
            (Some(user), Some(token)) => match ApiClient::bearer_header(&token) {
                Ok(authorization) => Some((user, authorization)),
                Err(e) => {
                    warn!(error = %e, "Stored token unusable, starting signed out");
                    None
                }
            },
            _ => None,
        };

        let state = {
            let mut control = self.lock();
            control.ready = true;
            match restored {
                Some((user, authorization)) => {
                    info!(user_id = %user.id, "Session restored");
                    self.activate(&control, user.clone(), authorization);
                    SessionState::Authenticated(user)
                }
                None => {
                    debug!("No stored session");
                    self.publish(&control, SessionState::Unauthenticated);
                    SessionState::Unauthenticated
                }
            }
        };
        Ok(state)
    }

    /// Sign in against `POST /sessions` and remember the session on this device.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserProfile, SessionError> {
        let (_guard, epoch) = {
            let mut control = self.lock();
            if !control.ready || control.in_flight > 0 {
                return Err(SessionError::Busy);
            }
            control.epoch += 1;
            let epoch = control.epoch;
            let guard = self.enter(&mut control, true);
            (guard, epoch)
        };

        let response = self.api.create_session(email, password).await?;
        let (user, token) = match (response.user, response.token) {
            (Some(user), Some(token)) => (user, token),
            (user, token) => {
                error!(
                    has_user = user.is_some(),
                    has_token = token.is_some(),
                    "Sign-in response missing user or token"
                );
                return Err(SessionError::UnexpectedResponse);
            }
        };
        let authorization = ApiClient::bearer_header(&token).map_err(|e| {
            error!(error = %e, "Sign-in returned an unusable token");
            SessionError::UnexpectedResponse
        })?;

        if self.lock().epoch != epoch {
            debug!("Sign-in superseded before persisting");
            return Err(SessionError::Superseded);
        }

        let (saved_user, saved_token) =
            join(self.store.save_user(&user), self.store.save_token(&token)).await;
        if let Err(e) = saved_user.and(saved_token) {
            error!(error = %e, "Signed in but could not persist the session");
            self.discard_persisted().await;
            {
                let control = self.lock();
                if control.epoch == epoch {
                    self.deactivate(&control);
                }
            }
            return Err(SessionError::Persist(e));
        }

        let activated = {
            let control = self.lock();
            let current = control.epoch == epoch;
            if current {
                self.activate(&control, user.clone(), authorization);
            }
            current
        };
        if !activated {
            debug!("Sign-in superseded after persisting, discarding");
            self.discard_persisted().await;
            return Err(SessionError::Superseded);
        }

        info!(user_id = %user.id, "Signed in");
        Ok(user)
    }

    /// Sign out immediately, then forget the stored session.
    ///
    /// Always accepted once bootstrapped, and cancels an in-flight sign-in.
    pub async fn sign_out(&self) -> Result<SignOutReport, SessionError> {
        let _guard = {
            let mut control = self.lock();
            if !control.ready {
                return Err(SessionError::Busy);
            }
            control.epoch += 1;
            let guard = self.enter(&mut control, true);
            self.deactivate(&control);
            guard
        };

        let (token, user) = join(self.store.remove_token(), self.store.remove_user()).await;
        let storage_error = token.and(user).err();
        if let Some(ref e) = storage_error {
            warn!(error = %e, "Signed out, but stored credentials could not be removed");
        }

        info!("Signed out");
        Ok(SignOutReport { storage_error })
    }

    /// Epoch of the current session, for flows that update the profile
    /// after a round trip to the service.
    pub(crate) fn session_epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Replace the signed-in user's profile.
    ///
    /// The new value is published before it is written; when the write fails
    /// the published profile is kept and `Persist` is returned, so the next
    /// restart falls back to the last profile that was saved. A profile whose
    /// `id` differs from the signed-in user's is refused with `Superseded`.
    pub async fn update_user_profile(&self, user: UserProfile) -> Result<(), SessionError> {
        self.update_profile_in(user, None).await
    }

    /// `update_user_profile` that also refuses when the session epoch is no
    /// longer `expected_epoch`.
    pub(crate) async fn update_profile_in(
        &self,
        user: UserProfile,
        expected_epoch: Option<u64>,
    ) -> Result<(), SessionError> {
        let (_guard, epoch) = {
            let mut control = self.lock();
            if !control.ready || control.in_flight > 0 {
                return Err(SessionError::Busy);
            }
            let current_id = self.state.borrow().state.user().map(|u| u.id.clone());
            let Some(current_id) = current_id else {
                return Err(SessionError::NotAuthenticated);
            };
            if current_id != user.id || expected_epoch.is_some_and(|e| e != control.epoch) {
                debug!(user_id = %user.id, "Profile update belongs to an earlier session");
                return Err(SessionError::Superseded);
            }
            let guard = self.enter(&mut control, false);
            self.publish(&control, SessionState::Authenticated(user.clone()));
            (guard, control.epoch)
        };

        if let Err(e) = self.store.save_user(&user).await {
            warn!(error = %e, "Profile updated in memory only");
            return Err(SessionError::Persist(e));
        }

        let signed_out_meanwhile = self.lock().epoch != epoch;
        if signed_out_meanwhile {
            if let Err(e) = self.store.remove_user().await {
                warn!(error = %e, "Failed to remove profile saved after sign-out");
            }
            return Err(SessionError::Superseded);
        }
        debug!(user_id = %user.id, "Profile updated");
        Ok(())
    }
}

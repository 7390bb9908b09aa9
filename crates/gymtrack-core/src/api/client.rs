//! API client for communicating with the gymtrack REST API.
//!
//! `ApiClient` is the single HTTP client shared by every consumer. Clones share
//! both the connection pool and the default `Authorization` slot, so when the
//! session manager swaps the token every holder sees it on its next request.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::header::{self, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::models::{AvatarResponse, SignInRequest, SignInResponse, UpdateUserRequest};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Largest avatar accepted for upload (5 MiB)
const MAX_AVATAR_BYTES: u64 = 5 * 1024 * 1024;

/// Multipart field name expected by `PATCH /users/avatar`
const AVATAR_FIELD: &str = "avatar";

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    authorization: Arc<RwLock<Option<HeaderValue>>>,
}

impl ApiClient {
    /// Create a new API client with the default timeout
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            authorization: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Encode a token as a `Bearer` header value.
    pub fn bearer_header(token: &str) -> Result<HeaderValue, ApiError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            ApiError::InvalidRequest("token contains characters not allowed in a header".into())
        })?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Replace the default authorization header for all subsequent requests.
    ///
    /// Only the session manager calls this.
    pub(crate) fn set_authorization(&self, value: Option<HeaderValue>) {
        let mut slot = self
            .authorization
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        debug!(present = value.is_some(), "Authorization header updated");
        *slot = value;
    }

    /// Current default authorization header, e.g. `Bearer T1`
    pub fn authorization(&self) -> Option<String> {
        self.current_authorization()
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }

    fn current_authorization(&self) -> Option<HeaderValue> {
        self.authorization
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Start a request against the service with the default headers applied.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match self.current_authorization() {
            Some(value) => builder.header(header::AUTHORIZATION, value),
            None => builder,
        }
    }

    /// Check if response is successful, turning error bodies into `ApiError`.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let err = ApiError::from_status(status, &body);
        warn!(status = status.as_u16(), error = %err, "Request rejected");
        Err(err)
    }

    /// Send a request and decode the JSON body of a successful response.
    pub async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = Self::check_response(builder.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Send a request whose successful response body is ignored.
    pub async fn send(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        Self::check_response(builder.send().await?).await?;
        Ok(())
    }

    // ===== Session and profile endpoints =====

    /// `POST /sessions`
    pub async fn create_session(&self, email: &str, password: &str) -> Result<SignInResponse, ApiError> {
        debug!(email = email, "Creating session");
        let builder = self
            .request(Method::POST, "/sessions")
            .json(&SignInRequest { email, password });
        self.send_json(builder).await
    }

    /// `PUT /users`
    pub async fn update_user(&self, update: &UpdateUserRequest) -> Result<(), ApiError> {
        let builder = self.request(Method::PUT, "/users").json(update);
        self.send(builder).await
    }

    /// `PATCH /users/avatar` with the image at `path`; returns the new avatar reference.
    pub async fn update_avatar(&self, path: &Path, user_name: &str) -> Result<String, ApiError> {
        let part = avatar_part(path, user_name).await?;
        let form = Form::new().part(AVATAR_FIELD, part);
        let builder = self.request(Method::PATCH, "/users/avatar").multipart(form);
        let response: AvatarResponse = self.send_json(builder).await?;
        Ok(response.avatar)
    }

    /// Where the media server serves an avatar reference
    pub fn avatar_url(&self, avatar: &str) -> String {
        format!("{}/avatar/{}", self.base_url, avatar)
    }
}

async fn avatar_part(path: &Path, user_name: &str) -> Result<Part, ApiError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        ApiError::InvalidRequest(format!("Failed to read {}: {}", path.display(), e))
    })?;
    if metadata.len() > MAX_AVATAR_BYTES {
        return Err(ApiError::InvalidRequest(
            "Image is too large. Choose one up to 5MB".to_string(),
        ));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .ok_or_else(|| ApiError::InvalidRequest("Image file has no extension".to_string()))?;

    let bytes = tokio::fs::read(path).await.map_err(|e| {
        ApiError::InvalidRequest(format!("Failed to read {}: {}", path.display(), e))
    })?;

    Part::bytes(bytes)
        .file_name(format!("{}.{}", user_name, extension).to_lowercase())
        .mime_str(&image_mime(&extension))
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid image type: {}", e)))
}

fn image_mime(extension: &str) -> String {
    match extension {
        "jpg" => "image/jpeg".to_string(),
        other => format!("image/{}", other),
    }
}

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// The service rejected the request with a human-readable reason
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Error status without a `message` in the body
    #[error("Request failed with status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Fallback shown to the user when the service gave no message
const GENERIC_FAILURE_MESSAGE: &str = "Unable to reach the server. Please try again later.";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Build the error for a non-success response.
    ///
    /// A JSON body carrying a string `message` becomes `ApiError::Api`;
    /// anything else is a generic transport-level failure.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(ErrorBody {
                message: Some(message),
            }) => ApiError::Api {
                status: status.as_u16(),
                message,
            },
            _ => ApiError::HttpStatus {
                status: status.as_u16(),
                body: Self::truncate_body(body),
            },
        }
    }

    /// True for failures that carry no server-supplied reason
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::HttpStatus { .. })
    }

    /// Text suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Api { message, .. } => message.clone(),
            ApiError::InvalidRequest(reason) => reason.clone(),
            ApiError::Network(_) | ApiError::HttpStatus { .. } => {
                GENERIC_FAILURE_MESSAGE.to_string()
            }
        }
    }
}

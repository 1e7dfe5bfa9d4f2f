//! Error types for the Microsoft 365 connector.
//!
//! Remote HTTP failures are classified exactly once, at the client boundary,
//! by [`classify_response`]. Everything above the clients matches on the
//! resulting variant and never re-inspects status codes.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Result type alias using `ProvisionError`.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors that can occur while provisioning groups and distribution lists.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Malformed input or principals that do not exist in the directory.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        /// Every principal that could not be resolved, in input order.
        not_found: Vec<String>,
    },

    /// Naming collision or duplicate membership.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource does not exist remotely.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// 429/503 that persisted through every retry attempt.
    #[error("Remote service unavailable ({status}) after {attempts} attempt(s): {message}")]
    TransientRemote {
        status: u16,
        attempts: u32,
        message: String,
    },

    /// Polling for an asynchronous remote resource was exhausted.
    #[error("Timed out: {message}")]
    Timeout {
        message: String,
        /// Identifier of the owning resource, which remains valid.
        resource_id: Option<String>,
    },

    /// Any other non-2xx remote response.
    #[error("Remote API error: {status} {code} - {message}")]
    RemoteApi {
        status: u16,
        code: String,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// The identity provider rejected the credential or returned no token.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl ProvisionError {
    /// Builds a validation error listing unresolvable principals.
    #[must_use]
    pub fn principals_not_found(not_found: Vec<String>) -> Self {
        Self::Validation {
            message: format!("The following users do not exist: {}", not_found.join(", ")),
            not_found,
        }
    }

    /// Returns true for errors a caller may retry with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientRemote { .. })
    }

    /// Returns true when the error means the target is already absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true for naming collisions and duplicate memberships.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// `OData` error response returned by Graph and the Exchange admin API.
#[derive(Debug, Deserialize)]
pub struct ODataError {
    pub error: ODataErrorBody,
}

/// `OData` error body.
#[derive(Debug, Deserialize)]
pub struct ODataErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "innerError")]
    pub inner_error: Option<serde_json::Value>,
}

const CONFLICT_MARKERS: &[&str] = &[
    "already exist",
    "already a member",
    "already being used",
    "is already in use",
];

const NOT_FOUND_MARKERS: &[&str] = &["couldn't be found", "could not be found"];

/// Classifies a non-success remote response into the error taxonomy.
///
/// 429 and 503 map to [`ProvisionError::TransientRemote`] with a single
/// attempt; the retrying clients rewrite the attempt count when they give up.
#[must_use]
pub fn classify_response(status: StatusCode, body: &str) -> ProvisionError {
    let parsed = serde_json::from_str::<ODataError>(body).ok();
    let (code, message) = match &parsed {
        Some(odata) => (odata.error.code.clone(), odata.error.message.clone()),
        None => (status.to_string(), body.to_string()),
    };
    let lowered = body.to_lowercase();

    if matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    ) {
        return ProvisionError::TransientRemote {
            status: status.as_u16(),
            attempts: 1,
            message,
        };
    }

    if status == StatusCode::NOT_FOUND || NOT_FOUND_MARKERS.iter().any(|m| lowered.contains(m)) {
        return ProvisionError::NotFound(message);
    }

    let nickname_collision =
        status == StatusCode::BAD_REQUEST && lowered.contains("mailnickname");
    if status == StatusCode::CONFLICT
        || nickname_collision
        || CONFLICT_MARKERS.iter().any(|m| lowered.contains(m))
    {
        return ProvisionError::Conflict(message);
    }

    ProvisionError::RemoteApi {
        status: status.as_u16(),
        code,
        message,
        details: serde_json::from_str(body).ok(),
    }
}

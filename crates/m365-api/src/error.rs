//! API error types and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use m365_connector::ProvisionError;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

/// Error response body.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Error kind for client handling.
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    /// Structured context, when there is any.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
}

/// Error type for the provisioning API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Failure reported by the provisioning services.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Request body failed field validation.
    #[error("Validation error: {0}")]
    InvalidBody(#[from] validator::ValidationErrors),

    /// Malformed path parameter or similar.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String, Option<Value>) {
        let message = self.to_string();
        match self {
            Self::InvalidBody(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                message,
                serde_json::to_value(errors).ok(),
            ),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", message, None),
            Self::Provision(err) => provision_parts(err, message),
        }
    }
}

fn provision_parts(
    err: &ProvisionError,
    message: String,
) -> (StatusCode, &'static str, String, Option<Value>) {
    match err {
        ProvisionError::Validation { not_found, .. } => {
            let details = (!not_found.is_empty()).then(|| json!({ "notFound": not_found }));
            (StatusCode::BAD_REQUEST, "validation_error", message, details)
        }
        ProvisionError::Conflict(_) => (StatusCode::CONFLICT, "conflict", message, None),
        ProvisionError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", message, None),
        ProvisionError::TransientRemote {
            status, attempts, ..
        } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "service_unavailable",
            message,
            Some(json!({ "remoteStatus": status, "attempts": attempts })),
        ),
        ProvisionError::Timeout { resource_id, .. } => (
            StatusCode::GATEWAY_TIMEOUT,
            "timeout",
            message,
            resource_id.as_ref().map(|id| json!({ "groupId": id })),
        ),
        ProvisionError::RemoteApi {
            status,
            code,
            details,
            ..
        } => {
            warn!(status, code = %code, "Remote API rejected the request");
            (
                StatusCode::BAD_GATEWAY,
                "remote_api_error",
                message,
                Some(json!({ "remoteStatus": status, "code": code, "response": details })),
            )
        }
        ProvisionError::Auth(_) => {
            error!(error = %err, "Token acquisition failed");
            (StatusCode::BAD_GATEWAY, "authentication_error", message, None)
        }
        ProvisionError::Http(e) => {
            error!(error = %e, "Remote call failed");
            (StatusCode::BAD_GATEWAY, "http_error", message, None)
        }
        ProvisionError::Config(_) | ProvisionError::Json(_) | ProvisionError::Url(_) => {
            error!(error = %err, "Internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
                None,
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message, details) = self.parts();
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
            details,
        });
        (status, body).into_response()
    }
}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

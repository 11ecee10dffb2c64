//! HTTP error mapping for the public endpoints.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orgsync_domain::OrgSyncError;
use serde_json::json;
use tracing::error;

/// Domain error carried to the HTTP edge.
///
/// Responses never echo internal detail: the body names the error class
/// and, for client errors, the message.
#[derive(Debug)]
pub struct ApiError(pub OrgSyncError);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            OrgSyncError::Security(_) | OrgSyncError::Auth(_) => StatusCode::UNAUTHORIZED,
            OrgSyncError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            OrgSyncError::NotFound(_) => StatusCode::NOT_FOUND,
            OrgSyncError::Conflict(_) => StatusCode::CONFLICT,
            OrgSyncError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match &self.0 {
            OrgSyncError::Security(_) | OrgSyncError::Auth(_) => "unauthorized",
            OrgSyncError::InvalidInput(_) => "bad_request",
            OrgSyncError::NotFound(_) => "not_found",
            OrgSyncError::Conflict(_) => "conflict",
            OrgSyncError::RateLimited(_) => "rate_limited",
            _ => "internal_error",
        }
    }
}

impl From<OrgSyncError> for ApiError {
    fn from(err: OrgSyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match status {
            StatusCode::UNAUTHORIZED => "request could not be verified".to_string(),
            StatusCode::INTERNAL_SERVER_ERROR => {
                error!(error = %self.0, "request failed");
                "internal server error".to_string()
            }
            _ => self.0.to_string(),
        };
        (status, Json(json!({ "error": self.code(), "message": message }))).into_response()
    }
}

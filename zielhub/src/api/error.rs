//! API error taxonomy and its mapping onto HTTP status codes.
//!
//! 401 means no credential or session was presented at all; 403 means one
//! was presented but is insufficient. Conflicts (status gate) share 403 with
//! authorization failures on purpose: the status code alone never tells a
//! caller whether the code was wrong or the form is locked. 404 is used
//! wherever revealing existence would leak data across tenants.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use zielhub_core::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Authorization(_) | ApiError::Conflict(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn access_code_required() -> Self {
        ApiError::Authentication("Access code required".into())
    }

    pub fn invalid_access_code() -> Self {
        ApiError::Authorization("Invalid access code".into())
    }

    pub fn form_not_found() -> Self {
        ApiError::NotFound("Form not found".into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::FormNotFound => ApiError::NotFound("Form not found".into()),
            StoreError::EntryNotFound => ApiError::NotFound("Entry not found".into()),
            StoreError::NotificationNotFound => {
                ApiError::NotFound("Notification not found".into())
            }
            StoreError::Lifecycle(e) => ApiError::Conflict(e.to_string()),
            StoreError::Io(e) => ApiError::Internal(e.to_string()),
            StoreError::Encode(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

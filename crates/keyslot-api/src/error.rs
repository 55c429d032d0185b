//! HTTP mapping for [`KeyslotError`].
//!
//! | Error | Status |
//! |---|---|
//! | `Validation` | 400 |
//! | `Unauthorized` | 401 |
//! | `NotFound` | 404 |
//! | anything else | 500 |

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use keyslot_types::KeyslotError;
use serde_json::json;
use tracing::error;

/// Response wrapper around [`KeyslotError`].
#[derive(Debug)]
pub struct ApiError(pub KeyslotError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            KeyslotError::Validation(_) => StatusCode::BAD_REQUEST,
            KeyslotError::Unauthorized => StatusCode::UNAUTHORIZED,
            KeyslotError::NotFound(_) => StatusCode::NOT_FOUND,
            KeyslotError::Transport(_)
            | KeyslotError::Protocol(_)
            | KeyslotError::Internal(_)
            | KeyslotError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<KeyslotError> for ApiError {
    fn from(e: KeyslotError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let message = match &self.0 {
            KeyslotError::Validation(m) | KeyslotError::NotFound(m) => m.clone(),
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

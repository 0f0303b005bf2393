#![forbid(unsafe_code)]

//! Error kinds surfaced by the HTTP layer.
//!
//! Only three things can go wrong for a caller: the request was malformed
//! (400), the extraction collaborator failed (500), or the media stream broke
//! after the response headers were already sent. The last one cannot carry a
//! JSON body, so it lives in [`StreamFailure`] and travels inside the body.

use std::io;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed input. The message names the offending field.
    #[error("{0}")]
    Validation(String),

    /// The extraction collaborator failed. Only a generic message reaches the
    /// client; the cause is logged when the error is built.
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Logs `cause` and keeps only `message` for the response body.
    pub fn upstream(message: impl Into<String>, cause: anyhow::Error) -> Self {
        let message = message.into();
        error!(error = ?cause, "{message}");
        Self::Upstream(message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.to_string(),
        });
        let mut response = (self.status(), Json(body)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Raised inside a relay body when the upstream stream fails mid-transfer.
/// Handing it to the HTTP layer aborts the response instead of ending it
/// cleanly.
#[derive(Debug, Error)]
#[error("relay aborted after {bytes} bytes: {source}")]
pub struct StreamFailure {
    pub bytes: u64,
    #[source]
    pub source: io::Error,
}

// Common types for the HTTP API
//
// Errors are answered with a plain text body holding the message and a status code
// for the error kind. Malformed bodies and path parameters are rejected with one
// fixed message so clients do not depend on parser details.

use account_core::AccountError;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Body of every 400 response
pub const BAD_REQUEST_MESSAGE: &str = "Bad request. Check API spec before calling.";

/// Error returned by API handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST, BAD_REQUEST_MESSAGE)
    }
}

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        let status = match &e {
            AccountError::AccountAlreadyExists(_)
            | AccountError::TransferAlreadyExists(_)
            | AccountError::TransferIsBeingCreated(_) => StatusCode::CONFLICT,
            AccountError::AccountNotFound(_) | AccountError::TransferNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AccountError::InvalidRequest(reason) => {
                tracing::debug!(reason = %reason, "Rejecting invalid request");
                return Self::bad_request();
            }
            AccountError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AccountError::Unavailable(_) | AccountError::Storage(_) => {
                tracing::error!("Request failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(reason = %rejection.body_text(), "Rejecting request body");
        Self::bad_request()
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!(reason = %rejection.body_text(), "Rejecting path parameters");
        Self::bad_request()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // String bodies are sent as text/plain; charset=utf-8
        (self.status, self.message).into_response()
    }
}

/// JSON body extractor that rejects with [`ApiError`]
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Path extractor that rejects with [`ApiError`]
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Message returned for every client-class rejection. Which check failed is
/// only ever logged, never returned.
pub const OPAQUE_CLIENT_MESSAGE: &str = "please check the request and try again";

tokio::task_local! {
    static REQUEST_ID: String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    Unauthenticated,
    Forbidden,
    NotFound,
    PreconditionFailed,
    PayloadTooLarge,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of the `type` classifier in the error body.
    pub const fn error_type(self) -> &'static str {
        match self {
            Self::ValidationFailed => "ch:validation",
            _ => "ch:service",
        }
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ValidationFailed
            | Self::Unauthenticated
            | Self::Forbidden
            | Self::NotFound
            | Self::PreconditionFailed
            | Self::PayloadTooLarge => OPAQUE_CLIENT_MESSAGE,
            Self::InternalError => "internal server error",
        }
    }
}

/// Wire-level error response: `{"errors":[{"error":..,"type":..}]}`.
#[derive(Debug, Clone)]
pub struct ServiceError {
    code: ErrorCode,
    message: String,
    request_id: Option<String>,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), request_id: None }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let request_id = self.request_id.or_else(current_request_id);

        let mut response = (
            self.code.status(),
            Json(json!({
                "errors": [{
                    "error": self.message,
                    "type": self.code.error_type(),
                }],
                "request_id": request_id.clone(),
            })),
        )
            .into_response();

        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }

        response
    }
}

/// Failure of an engine, store or handler operation.
///
/// Client-class variants carry the concrete reason for the logs only.
#[derive(Debug)]
pub enum ApiError {
    BadRequest { reason: String },
    Unauthenticated,
    Forbidden { reason: &'static str },
    NotFound { reason: &'static str },
    PreconditionFailed,
    PayloadTooLarge,
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest { reason: reason.into() }
    }

    pub fn forbidden(reason: &'static str) -> Self {
        Self::Forbidden { reason }
    }

    pub fn not_found(reason: &'static str) -> Self {
        Self::NotFound { reason }
    }

    pub fn internal(error: anyhow::Error) -> Self {
        Self::Internal(error)
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadRequest { .. } => ErrorCode::ValidationFailed,
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::Forbidden { .. } => ErrorCode::Forbidden,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::PreconditionFailed => ErrorCode::PreconditionFailed,
            Self::PayloadTooLarge => ErrorCode::PayloadTooLarge,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        Self::Internal(error.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        match &self {
            Self::BadRequest { reason } => tracing::info!(%reason, "bad request"),
            Self::Forbidden { reason } => tracing::info!(reason, "forbidden"),
            Self::NotFound { reason } => tracing::info!(reason, "not found"),
            Self::Unauthenticated => tracing::info!("unauthenticated request"),
            Self::PreconditionFailed => tracing::info!("if-match precondition failed"),
            Self::PayloadTooLarge => tracing::info!("request body too large"),
            Self::Internal(error) => {
                tracing::error!(error = ?error, "membership api internal error")
            }
        }

        ServiceError::from_code(code).into_response()
    }
}

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}

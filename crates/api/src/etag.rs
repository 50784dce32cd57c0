// Membership etags and optional If-Match extraction.
//
// Every mutation of a membership stamps a fresh etag. Writers may send
// `If-Match`; when they do and it no longer matches, the write is refused
// with 412. Without the header the write goes ahead.

use axum::{
    extract::FromRequestParts,
    http::{header::IF_MATCH, request::Parts},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::error::ApiError;

/// Axum extractor for an optional `If-Match` header.
#[derive(Debug, Clone, Default)]
pub struct OptionalIfMatch(pub Option<String>);

impl<S> FromRequestParts<S> for OptionalIfMatch
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(IF_MATCH) else {
            return Ok(OptionalIfMatch(None));
        };

        let value = value
            .to_str()
            .map_err(|_| ApiError::bad_request("If-Match header is not utf-8").into_response())?;

        Ok(OptionalIfMatch(Some(value.to_owned())))
    }
}

impl OptionalIfMatch {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// `Ok` when no precondition was supplied or it matches `current_etag`.
pub fn check_if_match(if_match: Option<&str>, current_etag: &str) -> Result<(), ApiError> {
    match if_match {
        Some(value) if !etag_matches(value, current_etag) => Err(ApiError::PreconditionFailed),
        _ => Ok(()),
    }
}

/// Format: `"<uuid>"` (with quotes, per RFC 7232).
pub fn generate_etag() -> String {
    format!("\"{}\"", Uuid::new_v4())
}

/// `"*"` always matches; weak prefixes and surrounding quotes are ignored.
pub fn etag_matches(if_match: &str, current_etag: &str) -> bool {
    if if_match.trim() == "*" {
        return true;
    }
    normalize_etag(if_match) == normalize_etag(current_etag)
}

pub fn normalize_etag(value: &str) -> &str {
    let trimmed = value.trim();
    let without_weak = trimmed.strip_prefix("W/").unwrap_or(trimmed);
    without_weak.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(without_weak)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        routing::patch,
        Router,
    };
    use tower::ServiceExt;

    #[test]
    fn generate_etag_is_quoted_uuid() {
        let etag = generate_etag();
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert!(Uuid::parse_str(&etag[1..etag.len() - 1]).is_ok());
        assert_ne!(generate_etag(), etag);
    }

    #[test]
    fn normalize_strips_weak_prefix_quotes_and_whitespace() {
        assert_eq!(normalize_etag("\"abc\""), "abc");
        assert_eq!(normalize_etag("W/\"abc\""), "abc");
        assert_eq!(normalize_etag("  \"abc\"  "), "abc");
        assert_eq!(normalize_etag("abc"), "abc");
    }

    #[test]
    fn matching_rules() {
        assert!(etag_matches("*", "\"anything\""));
        assert!(etag_matches("\"abc\"", "\"abc\""));
        assert!(etag_matches("W/\"abc\"", "\"abc\""));
        assert!(etag_matches("abc", "\"abc\""));
        assert!(!etag_matches("\"abc\"", "\"def\""));
    }

    #[test]
    fn absent_precondition_always_passes() {
        assert!(check_if_match(None, "\"current\"").is_ok());
        assert!(check_if_match(Some("\"current\""), "\"current\"").is_ok());
        assert!(matches!(
            check_if_match(Some("\"stale\""), "\"current\""),
            Err(ApiError::PreconditionFailed)
        ));
    }

    async fn patch_handler(if_match: OptionalIfMatch) -> Response {
        match check_if_match(if_match.as_deref(), "\"current-etag\"") {
            Ok(()) => "ok".into_response(),
            Err(error) => error.into_response(),
        }
    }

    fn test_app() -> Router {
        Router::new().route("/membership", patch(patch_handler))
    }

    async fn send(if_match: Option<&str>) -> StatusCode {
        let mut builder = Request::builder().method(Method::PATCH).uri("/membership");
        if let Some(value) = if_match {
            builder = builder.header("If-Match", value);
        }
        test_app()
            .oneshot(builder.body(Body::empty()).expect("request should build"))
            .await
            .expect("request should return a response")
            .status()
    }

    #[tokio::test]
    async fn missing_if_match_is_allowed() {
        assert_eq!(send(None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn mismatched_if_match_returns_412() {
        assert_eq!(send(Some("\"wrong-etag\"")).await, StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn matching_or_wildcard_if_match_returns_ok() {
        assert_eq!(send(Some("\"current-etag\"")).await, StatusCode::OK);
        assert_eq!(send(Some("*")).await, StatusCode::OK);
    }
}

// Request validation.
//
// - `ValidatedJson<T>` / `ValidatedQuery<T>` extractors that turn axum
//   rejections into the opaque 400 body.
// - Pagination, role filter, ACSP number and email checks.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Query, Request,
    },
    http::{request::Parts, StatusCode},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};

use acsp_members_common::{permissions::is_valid_acsp_number, types::AcspRole};

use crate::error::ApiError;

/// Maximum REST request body in bytes (1 MiB).
pub const MAX_REST_BODY_BYTES: usize = 1024 * 1024;

pub const DEFAULT_PAGE_INDEX: u32 = 0;
pub const DEFAULT_ITEMS_PER_PAGE: u32 = 15;

const MAX_EMAIL_LEN: usize = 254;

/// A JSON body extractor that answers malformed bodies with the opaque 400.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                Err(ApiError::PayloadTooLarge)
            }
            Err(rejection) => Err(ApiError::bad_request(classify_json_rejection(&rejection))),
        }
    }
}

fn classify_json_rejection(rejection: &JsonRejection) -> String {
    match rejection {
        JsonRejection::JsonDataError(e) => format!("invalid JSON payload: {e}"),
        JsonRejection::JsonSyntaxError(e) => format!("malformed JSON: {e}"),
        JsonRejection::MissingJsonContentType(_) => {
            "expected Content-Type: application/json".to_string()
        }
        JsonRejection::BytesRejection(e) => format!("request body error: {e}"),
        other => format!("request body error: {other}"),
    }
}

/// Query-string extractor with the same rejection shape as [`ValidatedJson`].
pub struct ValidatedQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ValidatedQuery(value)),
            Err(rejection) => Err(ApiError::bad_request(query_rejection_reason(&rejection))),
        }
    }
}

fn query_rejection_reason(rejection: &QueryRejection) -> String {
    format!("invalid query string: {rejection}")
}

/// Raw paging parameters as they arrive on the query string.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub page_index: Option<i64>,
    pub items_per_page: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page_index: u32,
    pub items_per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page_index: DEFAULT_PAGE_INDEX, items_per_page: DEFAULT_ITEMS_PER_PAGE }
    }
}

impl Pagination {
    pub fn offset(&self) -> u64 {
        u64::from(self.page_index) * u64::from(self.items_per_page)
    }
}

/// Negative page indexes and non-positive page sizes are rejected.
pub fn validate_pagination(params: PageParams) -> Result<Pagination, ApiError> {
    let page_index = params.page_index.unwrap_or(i64::from(DEFAULT_PAGE_INDEX));
    let items_per_page = params.items_per_page.unwrap_or(i64::from(DEFAULT_ITEMS_PER_PAGE));

    if page_index < 0 {
        return Err(ApiError::bad_request(format!("page_index must be >= 0, got {page_index}")));
    }
    if items_per_page <= 0 {
        return Err(ApiError::bad_request(format!(
            "items_per_page must be > 0, got {items_per_page}"
        )));
    }

    Ok(Pagination {
        page_index: u32::try_from(page_index)
            .map_err(|_| ApiError::bad_request("page_index out of range"))?,
        items_per_page: u32::try_from(items_per_page)
            .map_err(|_| ApiError::bad_request("items_per_page out of range"))?,
    })
}

pub fn parse_role(value: &str) -> Result<AcspRole, ApiError> {
    AcspRole::parse(value).ok_or_else(|| ApiError::bad_request(format!("unknown role '{value}'")))
}

pub fn parse_optional_role(value: Option<&str>) -> Result<Option<AcspRole>, ApiError> {
    value.map(parse_role).transpose()
}

pub fn validate_acsp_number(value: &str) -> Result<(), ApiError> {
    if is_valid_acsp_number(value) {
        Ok(())
    } else {
        Err(ApiError::bad_request("malformed acsp number"))
    }
}

pub fn validate_user_id(value: &str) -> Result<(), ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() != value.len() {
        return Err(ApiError::bad_request("malformed user id"));
    }
    Ok(())
}

/// Structural email check: one `@`, non-empty local part, dotted domain.
pub fn validate_email(value: &str) -> Result<(), ApiError> {
    let valid = value.len() <= MAX_EMAIL_LEN
        && !value.chars().any(char::is_whitespace)
        && value.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty()
                && !domain.contains('@')
                && domain.split('.').count() >= 2
                && domain.split('.').all(|label| !label.is_empty())
        });

    if valid {
        Ok(())
    } else {
        Err(ApiError::bad_request("malformed email address"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        response::IntoResponse,
        routing::{get, post},
        Router,
    };
    use tower::ServiceExt;

    #[derive(Debug, Deserialize)]
    struct TestPayload {
        user_id: String,
    }

    async fn echo_handler(ValidatedJson(payload): ValidatedJson<TestPayload>) -> impl IntoResponse {
        (StatusCode::OK, payload.user_id)
    }

    async fn page_handler(ValidatedQuery(params): ValidatedQuery<PageParams>) -> impl IntoResponse {
        match validate_pagination(params) {
            Ok(page) => format!("{}:{}", page.page_index, page.items_per_page).into_response(),
            Err(error) => error.into_response(),
        }
    }

    fn test_app() -> Router {
        Router::new().route("/test", post(echo_handler)).route("/page", get(page_handler))
    }

    async fn post_body(content_type: Option<&str>, body: &'static str) -> (StatusCode, String) {
        let mut builder = Request::builder().method(Method::POST).uri("/test");
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        let response = test_app()
            .oneshot(builder.body(Body::from(body)).expect("request should build"))
            .await
            .expect("request should return a response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body should read");
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    async fn get_page(query: &str) -> (StatusCode, String) {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri(format!("/page{query}"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body should read");
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn validated_json_accepts_valid_payload() {
        let (status, body) = post_body(Some("application/json"), r#"{"user_id":"u-1"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "u-1");
    }

    #[tokio::test]
    async fn validated_json_rejections_are_opaque_400s() {
        for (content_type, body) in [
            (None, r#"{"user_id":"u-1"}"#),
            (Some("application/json"), "not json"),
            (Some("application/json"), r#"{"age": 42}"#),
        ] {
            let (status, body) = post_body(content_type, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            let parsed: serde_json::Value = serde_json::from_str(&body).expect("json body");
            assert_eq!(parsed["errors"][0]["error"], "please check the request and try again");
        }
    }

    #[tokio::test]
    async fn oversized_json_body_is_413() {
        let app = test_app().layer(axum::extract::DefaultBodyLimit::max(64));
        let payload = format!(r#"{{"user_id":"{}"}}"#, "u".repeat(128));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/test")
                    .header("content-type", "application/json")
                    .body(Body::from(payload))
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body should read");
        let parsed: serde_json::Value = serde_json::from_slice(&body).expect("json body");
        assert_eq!(parsed["errors"][0]["error"], "please check the request and try again");
        assert_eq!(parsed["errors"][0]["type"], "ch:service");
    }

    #[tokio::test]
    async fn pagination_defaults_and_bounds() {
        assert_eq!(get_page("").await, (StatusCode::OK, "0:15".to_owned()));
        assert_eq!(get_page("?page_index=2&items_per_page=5").await.1, "2:5");
        assert_eq!(get_page("?page_index=-1").await.0, StatusCode::BAD_REQUEST);
        assert_eq!(get_page("?items_per_page=0").await.0, StatusCode::BAD_REQUEST);
        assert_eq!(get_page("?items_per_page=-3").await.0, StatusCode::BAD_REQUEST);
        assert_eq!(get_page("?page_index=abc").await.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn pagination_offset() {
        let page = Pagination { page_index: 3, items_per_page: 15 };
        assert_eq!(page.offset(), 45);
    }

    #[test]
    fn role_parsing() {
        assert_eq!(parse_optional_role(None).expect("absent role is fine"), None);
        assert_eq!(parse_role("admin").expect("admin is a role"), AcspRole::Admin);
        assert!(matches!(parse_role("superuser"), Err(ApiError::BadRequest { .. })));
    }

    #[test]
    fn email_shapes() {
        assert!(validate_email("someone@example.com").is_ok());
        assert!(validate_email("a.b+c@sub.example.co.uk").is_ok());
        let malformed =
            ["", "no-at-sign", "@example.com", "x@nodot", "x@@example.com", "x y@e.com", "x@e..com"];
        for bad in malformed {
            assert!(validate_email(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn acsp_number_and_user_id_shapes() {
        assert!(validate_acsp_number("ACSP-1").is_ok());
        assert!(validate_acsp_number("ACSP/1").is_err());
        assert!(validate_user_id("u-1").is_ok());
        assert!(validate_user_id(" u-1").is_err());
        assert!(validate_user_id("").is_err());
    }
}

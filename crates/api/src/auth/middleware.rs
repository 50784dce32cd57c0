use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use acsp_members_common::context::AuthorizationContext;

use super::{credentials::parse_credentials, resolver::resolve};
use crate::{
    error::{current_request_id, request_id_from_headers_or_generate, ApiError},
    store::Store,
};

/// Request-entry filter: resolves the caller once and stores the resulting
/// [`AuthorizationContext`] in the request extensions.
///
/// Never rejects. Routes that need a caller layer [`require_authenticated`]
/// on top.
pub async fn authorization_filter(
    State(store): State<Store>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = current_request_id()
        .unwrap_or_else(|| request_id_from_headers_or_generate(request.headers()));
    let credentials = parse_credentials(request.headers());
    let caller_kind = credentials.kind_label();
    let context = resolve(&store, &request_id, credentials).await;

    let span = tracing::Span::current();
    if let Some(user_id) = context.caller_user_id() {
        span.record("user_id", user_id);
    }
    if let Some(acsp_number) = context.caller_acsp_number() {
        span.record("acsp_number", acsp_number);
    }
    tracing::debug!(
        caller_kind,
        effective_role = context.effective_role().map(|role| role.as_str()).unwrap_or("none"),
        "authorization context resolved"
    );

    request.extensions_mut().insert(context);
    next.run(request).await
}

pub async fn require_authenticated(request: Request, next: Next) -> Response {
    match request.extensions().get::<AuthorizationContext>() {
        Some(context) if context.is_authenticated() => next.run(request).await,
        _ => ApiError::Unauthenticated.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        extract::Extension,
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    use acsp_members_common::{context::AuthorizationContext, types::User};

    use super::{authorization_filter, require_authenticated};
    use crate::store::Store;

    async fn protected_app() -> Router {
        let store = Store::memory();
        store
            .upsert_user(&User {
                user_id: "u1".to_owned(),
                email: "u1@example.com".to_owned(),
                display_name: None,
            })
            .await
            .expect("user should seed");

        Router::new()
            .route(
                "/whoami",
                get(|Extension(ctx): Extension<AuthorizationContext>| async move {
                    ctx.effective_role().map(|role| role.as_str()).unwrap_or("none").to_owned()
                }),
            )
            .layer(middleware::from_fn(require_authenticated))
            .layer(middleware::from_fn_with_state(store, authorization_filter))
    }

    async fn call(request: Request<Body>) -> (StatusCode, String) {
        let response =
            protected_app().await.oneshot(request).await.expect("request should return a response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body should read");
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn rejects_requests_without_identity() {
        let (status, _) =
            call(Request::builder().uri("/whoami").body(Body::empty()).expect("request")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_sessions_for_unknown_users() {
        let request = Request::builder()
            .uri("/whoami")
            .header("ERIC-Identity-Type", "oauth2")
            .header("ERIC-Identity", "ghost")
            .body(Body::empty())
            .expect("request");
        assert_eq!(call(request).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wildcard_key_resolves_key_role() {
        let request = Request::builder()
            .uri("/whoami")
            .header("ERIC-Identity-Type", "key")
            .header("ERIC-Identity", "key-1")
            .header("ERIC-Authorised-Key-Roles", "*")
            .body(Body::empty())
            .expect("request");
        assert_eq!(call(request).await, (StatusCode::OK, "ROLE_KEY".to_owned()));
    }

    #[tokio::test]
    async fn known_user_without_membership_is_authenticated_without_role() {
        let request = Request::builder()
            .uri("/whoami")
            .header("ERIC-Identity-Type", "oauth2")
            .header("ERIC-Identity", "u1")
            .header("ERIC-Authorised-Token-Permissions", "acsp_number=A1 acsp_members=read")
            .body(Body::empty())
            .expect("request");
        assert_eq!(call(request).await, (StatusCode::OK, "none".to_owned()));
    }
}

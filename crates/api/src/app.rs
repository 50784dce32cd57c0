use std::time::Instant;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{error, info, Instrument};

use crate::{
    api::{self, ApiState},
    engine::MembershipEngine,
    error::{
        attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
        ErrorCode, ServiceError,
    },
    validation::MAX_REST_BODY_BYTES,
};

pub fn build_router(engine: MembershipEngine) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthcheck", get(healthcheck))
            .merge(api::router(ApiState { engine })),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthcheck() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            ServiceError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

/// Opens the per-request span and request-id scope, then logs one
/// `request completed` event.
async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
        user_id = tracing::field::Empty,
        acsp_number = tracing::field::Empty,
    );

    let mut response = with_request_id_scope(request_id.clone(), next.run(request))
        .instrument(span.clone())
        .await;
    attach_request_id_header(&mut response, &request_id);

    span.in_scope(|| {
        info!(
            status = response.status().as_u16(),
            latency_ms = started_at.elapsed().as_millis() as u64,
            "request completed"
        );
    });

    response
}

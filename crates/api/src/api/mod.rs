mod internal;
mod memberships;

use axum::{
    http::{header::ETAG, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use acsp_members_common::types::Membership;

use crate::{
    auth::middleware::{authorization_filter, require_authenticated},
    engine::MembershipEngine,
    error::ApiError,
};

#[derive(Clone)]
pub struct ApiState {
    pub engine: MembershipEngine,
}

pub fn router(state: ApiState) -> Router {
    let store = state.engine.store().clone();

    Router::new()
        .route(
            "/acsps/{acsp_number}/memberships",
            get(memberships::list_acsp_memberships).post(memberships::create_membership),
        )
        .route("/acsps/{acsp_number}/memberships/lookup", post(memberships::lookup_memberships))
        .route(
            "/acsps/memberships/{membership_id}",
            get(memberships::get_membership).patch(memberships::update_membership),
        )
        .route("/user/acsps/memberships", get(memberships::list_user_memberships))
        .route(
            "/user/acsps/memberships/{membership_id}/accept",
            post(memberships::accept_invitation),
        )
        .route("/internal/acsp-members/acsp/{acsp_number}", post(internal::provision_owner))
        .route(
            "/internal/acsp-members/memberships/{membership_id}/touch",
            post(internal::touch_membership),
        )
        .with_state(state)
        .route_layer(middleware::from_fn(require_authenticated))
        .route_layer(middleware::from_fn_with_state(store, authorization_filter))
}

// ── Request / response bodies ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateMembershipRequest {
    user_id: Option<String>,
    user_email: Option<String>,
    user_role: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateMembershipRequest {
    user_role: Option<String>,
    user_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LookupMembershipsRequest {
    user_email: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProvisionOwnerRequest {
    owner_user_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListMembershipsQuery {
    include_removed: Option<bool>,
    role: Option<String>,
    page_index: Option<i64>,
    items_per_page: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct UserMembershipsQuery {
    include_removed: Option<bool>,
}

#[derive(Serialize, Deserialize)]
struct UserMembershipsEnvelope {
    items: Vec<Membership>,
    total_results: usize,
}

/// A single membership with its etag echoed in the `ETag` header.
fn membership_response(status: StatusCode, membership: Membership) -> Response {
    let etag = HeaderValue::from_str(&membership.etag).ok();
    let mut response = (status, Json(membership)).into_response();
    if let Some(etag) = etag {
        response.headers_mut().insert(ETAG, etag);
    }
    response
}

fn parse_membership_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::bad_request(format!("malformed membership id '{raw}'")))
}

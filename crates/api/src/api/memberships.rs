use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::Response,
    Json,
};

use acsp_members_common::{context::AuthorizationContext, types::MembershipStatus};

use crate::{
    engine::{MembershipUpdate, NewMember},
    error::ApiError,
    etag::OptionalIfMatch,
    listing::{self, MembershipsPage},
    validation::{
        parse_optional_role, parse_role, validate_acsp_number, validate_email, validate_pagination,
        validate_user_id, PageParams, ValidatedJson, ValidatedQuery,
    },
};

use super::{
    membership_response, parse_membership_id, ApiState, CreateMembershipRequest,
    ListMembershipsQuery, LookupMembershipsRequest, UpdateMembershipRequest,
    UserMembershipsEnvelope, UserMembershipsQuery,
};

pub(super) async fn list_acsp_memberships(
    State(state): State<ApiState>,
    Extension(ctx): Extension<AuthorizationContext>,
    Path(acsp_number): Path<String>,
    ValidatedQuery(query): ValidatedQuery<ListMembershipsQuery>,
) -> Result<Json<MembershipsPage>, ApiError> {
    validate_acsp_number(&acsp_number)?;
    let pagination = validate_pagination(PageParams {
        page_index: query.page_index,
        items_per_page: query.items_per_page,
    })?;
    let role = parse_optional_role(query.role.as_deref())?;

    let page = listing::list_acsp_memberships(
        state.engine.store(),
        &ctx,
        &acsp_number,
        query.include_removed.unwrap_or(false),
        role,
        pagination,
    )
    .await?;
    Ok(Json(page))
}

pub(super) async fn lookup_memberships(
    State(state): State<ApiState>,
    Extension(ctx): Extension<AuthorizationContext>,
    Path(acsp_number): Path<String>,
    ValidatedQuery(query): ValidatedQuery<ListMembershipsQuery>,
    ValidatedJson(payload): ValidatedJson<LookupMembershipsRequest>,
) -> Result<Json<MembershipsPage>, ApiError> {
    validate_acsp_number(&acsp_number)?;
    validate_email(&payload.user_email)?;
    let pagination = validate_pagination(PageParams {
        page_index: query.page_index,
        items_per_page: query.items_per_page,
    })?;

    let page = listing::lookup_by_email(
        state.engine.store(),
        &ctx,
        &acsp_number,
        &payload.user_email,
        query.include_removed.unwrap_or(false),
        pagination,
    )
    .await?;
    Ok(Json(page))
}

pub(super) async fn create_membership(
    State(state): State<ApiState>,
    Extension(ctx): Extension<AuthorizationContext>,
    Path(acsp_number): Path<String>,
    ValidatedJson(payload): ValidatedJson<CreateMembershipRequest>,
) -> Result<Response, ApiError> {
    validate_acsp_number(&acsp_number)?;
    let role = parse_role(&payload.user_role)?;
    let member = match (payload.user_id, payload.user_email) {
        (Some(user_id), None) => {
            validate_user_id(&user_id)?;
            NewMember::Existing { user_id }
        }
        (None, Some(email)) => {
            validate_email(&email)?;
            NewMember::Invited { email }
        }
        _ => return Err(ApiError::bad_request("exactly one of user_id and user_email is required")),
    };

    let membership = state.engine.add_member(&ctx, &acsp_number, member, role).await?;
    Ok(membership_response(StatusCode::CREATED, membership))
}

pub(super) async fn get_membership(
    State(state): State<ApiState>,
    Extension(ctx): Extension<AuthorizationContext>,
    Path(membership_id): Path<String>,
) -> Result<Response, ApiError> {
    let membership_id = parse_membership_id(&membership_id)?;
    let membership = listing::get_membership(state.engine.store(), &ctx, membership_id).await?;
    Ok(membership_response(StatusCode::OK, membership))
}

pub(super) async fn update_membership(
    State(state): State<ApiState>,
    Extension(ctx): Extension<AuthorizationContext>,
    Path(membership_id): Path<String>,
    if_match: OptionalIfMatch,
    ValidatedJson(payload): ValidatedJson<UpdateMembershipRequest>,
) -> Result<Response, ApiError> {
    let membership_id = parse_membership_id(&membership_id)?;
    let update = match (payload.user_role.as_deref(), payload.user_status.as_deref()) {
        (Some(role), None) => MembershipUpdate::ChangeRole(parse_role(role)?),
        (None, Some(status)) => match MembershipStatus::parse(status) {
            Some(MembershipStatus::Removed) => MembershipUpdate::Remove,
            _ => return Err(ApiError::bad_request(format!("unsupported user_status '{status}'"))),
        },
        _ => return Err(ApiError::bad_request("exactly one of user_role and user_status expected")),
    };

    let membership =
        state.engine.update(&ctx, membership_id, update, if_match.as_deref()).await?;
    Ok(membership_response(StatusCode::OK, membership))
}

pub(super) async fn list_user_memberships(
    State(state): State<ApiState>,
    Extension(ctx): Extension<AuthorizationContext>,
    ValidatedQuery(query): ValidatedQuery<UserMembershipsQuery>,
) -> Result<Json<UserMembershipsEnvelope>, ApiError> {
    let items = listing::list_user_memberships(
        state.engine.store(),
        &ctx,
        query.include_removed.unwrap_or(false),
    )
    .await?;
    Ok(Json(UserMembershipsEnvelope { total_results: items.len(), items }))
}

pub(super) async fn accept_invitation(
    State(state): State<ApiState>,
    Extension(ctx): Extension<AuthorizationContext>,
    Path(membership_id): Path<String>,
) -> Result<Response, ApiError> {
    let membership_id = parse_membership_id(&membership_id)?;
    let membership = state.engine.activate(&ctx, membership_id).await?;
    Ok(membership_response(StatusCode::OK, membership))
}

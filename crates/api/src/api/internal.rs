// Routes reserved for other services calling with an API key.

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::Response,
};

use acsp_members_common::context::AuthorizationContext;

use crate::{
    error::ApiError,
    validation::{validate_acsp_number, validate_user_id, ValidatedJson},
};

use super::{membership_response, parse_membership_id, ApiState, ProvisionOwnerRequest};

pub(super) async fn provision_owner(
    State(state): State<ApiState>,
    Extension(ctx): Extension<AuthorizationContext>,
    Path(acsp_number): Path<String>,
    ValidatedJson(payload): ValidatedJson<ProvisionOwnerRequest>,
) -> Result<Response, ApiError> {
    validate_acsp_number(&acsp_number)?;
    validate_user_id(&payload.owner_user_id)?;

    let membership =
        state.engine.provision_owner(&ctx, &acsp_number, &payload.owner_user_id).await?;
    Ok(membership_response(StatusCode::CREATED, membership))
}

pub(super) async fn touch_membership(
    State(state): State<ApiState>,
    Extension(ctx): Extension<AuthorizationContext>,
    Path(membership_id): Path<String>,
) -> Result<Response, ApiError> {
    let membership_id = parse_membership_id(&membership_id)?;
    let membership = state.engine.touch(&ctx, membership_id).await?;
    Ok(membership_response(StatusCode::OK, membership))
}

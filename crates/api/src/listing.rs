//! Read side: single lookups and paginated listings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use acsp_members_common::{
    context::AuthorizationContext,
    guard,
    types::{AcspRole, Membership},
};

use crate::{
    error::ApiError,
    store::{MembershipFilter, MembershipPage, Store},
    validation::Pagination,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLinks {
    #[serde(rename = "self")]
    pub self_link: String,
    pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipsPage {
    pub items: Vec<Membership>,
    pub page_number: u32,
    pub items_per_page: u32,
    pub total_results: u64,
    pub total_pages: u64,
    pub links: PageLinks,
}

impl MembershipsPage {
    fn new(page: MembershipPage, pagination: Pagination, path: &str) -> Self {
        let items_per_page = u64::from(pagination.items_per_page);
        let total_pages = page.total_results.div_ceil(items_per_page);
        let link = |page_index: u32| {
            format!("{path}?page_index={page_index}&items_per_page={}", pagination.items_per_page)
        };
        let next = (u64::from(pagination.page_index) + 1 < total_pages)
            .then(|| link(pagination.page_index + 1));

        Self {
            items: page.items,
            page_number: pagination.page_index,
            items_per_page: pagination.items_per_page,
            total_results: page.total_results,
            total_pages,
            links: PageLinks { self_link: link(pagination.page_index), next },
        }
    }
}

/// One membership, visible to its ACSP, to its own user and to privileged
/// callers.
pub async fn get_membership(
    store: &Store,
    ctx: &AuthorizationContext,
    membership_id: Uuid,
) -> Result<Membership, ApiError> {
    let membership = store
        .find_by_id(membership_id)
        .await?
        .ok_or_else(|| ApiError::not_found("membership does not exist"))?;

    if !guard::can_view_membership(ctx, &membership) && !guard::is_self_action(ctx, &membership) {
        return Err(ApiError::forbidden("caller may not view this membership"));
    }
    Ok(membership)
}

pub async fn list_acsp_memberships(
    store: &Store,
    ctx: &AuthorizationContext,
    acsp_number: &str,
    include_removed: bool,
    role: Option<AcspRole>,
    pagination: Pagination,
) -> Result<MembershipsPage, ApiError> {
    require_listable_acsp(store, ctx, acsp_number).await?;

    let mut filter = MembershipFilter::for_acsp(acsp_number, include_removed);
    filter.roles.extend(role);
    let page = store.find_by_acsp_filtered(&filter, pagination).await?;

    tracing::debug!(acsp_number, total_results = page.total_results, "listed acsp memberships");
    Ok(MembershipsPage::new(page, pagination, &format!("/acsps/{acsp_number}/memberships")))
}

/// Memberships at `acsp_number` held by, or addressed to, `email`.
pub async fn lookup_by_email(
    store: &Store,
    ctx: &AuthorizationContext,
    acsp_number: &str,
    email: &str,
    include_removed: bool,
    pagination: Pagination,
) -> Result<MembershipsPage, ApiError> {
    require_listable_acsp(store, ctx, acsp_number).await?;

    let emails = vec![email.to_owned()];
    let users = store.search_users_by_email(&emails).await?;
    let filter = MembershipFilter {
        user_ids: users.into_iter().map(|user| user.user_id).collect(),
        emails,
        ..MembershipFilter::for_acsp(acsp_number, include_removed)
    };
    let page = store.find_by_acsp_filtered(&filter, pagination).await?;

    Ok(MembershipsPage::new(
        page,
        pagination,
        &format!("/acsps/{acsp_number}/memberships/lookup"),
    ))
}

/// The caller's own memberships plus pending invitations to their email,
/// oldest first.
pub async fn list_user_memberships(
    store: &Store,
    ctx: &AuthorizationContext,
    include_removed: bool,
) -> Result<Vec<Membership>, ApiError> {
    let user = ctx
        .caller_user()
        .ok_or_else(|| ApiError::forbidden("only a signed-in user has memberships"))?;

    let mut memberships = store.find_by_user(&user.user_id, include_removed).await?;
    memberships.extend(store.find_pending_by_email(&user.email).await?);
    memberships.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    Ok(memberships)
}

async fn require_listable_acsp(
    store: &Store,
    ctx: &AuthorizationContext,
    acsp_number: &str,
) -> Result<(), ApiError> {
    if !guard::can_list_memberships(ctx, acsp_number) {
        return Err(ApiError::forbidden("caller may not list this acsp"));
    }
    if store.get_acsp(acsp_number).await?.is_none() {
        return Err(ApiError::not_found("acsp does not exist"));
    }
    Ok(())
}

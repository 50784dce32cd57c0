//! Authorization guard.
//!
//! Pure decisions over an [`AuthorizationContext`] and a target membership.
//! Nothing here mutates state or fails; callers turn `false` into an
//! access-denied outcome.

use crate::{
    context::AuthorizationContext,
    types::{AcspRole, Membership},
};

/// The session's token permissions are scoped to `acsp_number`.
pub fn acts_for_acsp(ctx: &AuthorizationContext, acsp_number: &str) -> bool {
    ctx.caller_acsp_number() == Some(acsp_number)
}

/// The target membership belongs to the caller.
pub fn is_self_action(ctx: &AuthorizationContext, target: &Membership) -> bool {
    ctx.caller_user_id().is_some_and(|user_id| target.belongs_to_user(user_id))
}

pub fn can_view_membership(ctx: &AuthorizationContext, target: &Membership) -> bool {
    ctx.is_privileged_service_key()
        || ctx.is_platform_admin_with_search()
        || acts_for_acsp(ctx, &target.acsp_number)
}

/// Listing every membership of an ACSP.
pub fn can_list_memberships(ctx: &AuthorizationContext, acsp_number: &str) -> bool {
    ctx.is_privileged_service_key()
        || ctx.is_platform_admin_with_search()
        || (acts_for_acsp(ctx, acsp_number) && ctx.can_read_acsp_members())
}

/// Owners may create any role, admins anything but owners.
pub fn can_create_membership(ctx: &AuthorizationContext, target_role: AcspRole) -> bool {
    match ctx.caller_acsp_role() {
        Some(AcspRole::Owner) => true,
        Some(AcspRole::Admin) => target_role != AcspRole::Owner,
        Some(AcspRole::Standard) | None => false,
    }
}

pub fn can_change_status(ctx: &AuthorizationContext, target: &Membership) -> bool {
    acts_for_acsp(ctx, &target.acsp_number)
        && ctx.requesting_user_can_manage_membership(target.user_role)
}

pub fn can_change_role(ctx: &AuthorizationContext, target: &Membership, new_role: AcspRole) -> bool {
    if !acts_for_acsp(ctx, &target.acsp_number)
        || !ctx.requesting_user_can_manage_membership(target.user_role)
    {
        return false;
    }

    if ctx.caller_acsp_role() == Some(AcspRole::Admin) && new_role == AcspRole::Owner {
        return false;
    }

    // An owner changing their own role could leave the ACSP ownerless;
    // another owner has to do it.
    !(ctx.caller_acsp_role() == Some(AcspRole::Owner) && is_self_action(ctx, target))
}

/// Dedicated owner provisioning is reserved for privileged service keys.
pub fn can_provision_owner(ctx: &AuthorizationContext) -> bool {
    ctx.is_privileged_service_key()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::{
        permissions::TokenPermissions,
        types::{MembershipStatus, User},
    };

    const OWNER_TOKEN: &str = "acsp_number=A1 acsp_members=read \
        acsp_members_owners=create,update,delete acsp_members_admins=create,update,delete \
        acsp_members_standard=create,update,delete";
    const ADMIN_TOKEN: &str = "acsp_number=A1 acsp_members=read \
        acsp_members_admins=create,update,delete acsp_members_standard=create,update,delete";
    const STANDARD_TOKEN: &str = "acsp_number=A1 acsp_members=read";

    fn session(user_id: &str, token: &str, role: Option<AcspRole>) -> AuthorizationContext {
        AuthorizationContext::session(
            "req",
            User {
                user_id: user_id.to_owned(),
                email: format!("{user_id}@test.local"),
                display_name: None,
            },
            TokenPermissions::parse(Some(token)),
            role,
            false,
        )
    }

    fn membership(acsp_number: &str, user_id: &str, role: AcspRole) -> Membership {
        Membership {
            id: Uuid::new_v4(),
            acsp_number: acsp_number.to_owned(),
            user_id: Some(user_id.to_owned()),
            user_email: None,
            user_role: role,
            status: MembershipStatus::Active,
            created_at: Utc::now(),
            added_at: Some(Utc::now()),
            added_by: None,
            invited_at: None,
            accepted_at: None,
            removed_at: None,
            removed_by: None,
            etag: "\"etag\"".to_owned(),
        }
    }

    #[test]
    fn view_requires_same_acsp_or_privileged_caller() {
        let target = membership("A1", "u2", AcspRole::Standard);
        assert!(can_view_membership(&session("u1", STANDARD_TOKEN, Some(AcspRole::Standard)), &target));
        assert!(can_view_membership(&AuthorizationContext::service_key("r", true), &target));
        assert!(!can_view_membership(&AuthorizationContext::service_key("r", false), &target));
        assert!(!can_view_membership(&AuthorizationContext::anonymous("r"), &target));

        let elsewhere = membership("B2", "u2", AcspRole::Standard);
        assert!(!can_view_membership(&session("u1", STANDARD_TOKEN, Some(AcspRole::Standard)), &elsewhere));
    }

    #[test]
    fn wildcard_service_key_lists_any_acsp() {
        let ctx = AuthorizationContext::service_key("r", true);
        assert!(can_list_memberships(&ctx, "A1"));
        assert!(can_list_memberships(&ctx, "ANY-OTHER"));
    }

    #[test]
    fn listing_needs_read_permission() {
        let no_read = session("u1", "acsp_number=A1", Some(AcspRole::Standard));
        assert!(!can_list_memberships(&no_read, "A1"));
        assert!(can_list_memberships(&session("u1", STANDARD_TOKEN, Some(AcspRole::Standard)), "A1"));
    }

    #[test]
    fn create_follows_role_hierarchy() {
        let owner = session("u1", OWNER_TOKEN, Some(AcspRole::Owner));
        let admin = session("u1", ADMIN_TOKEN, Some(AcspRole::Admin));
        let standard = session("u1", STANDARD_TOKEN, Some(AcspRole::Standard));
        let unconfirmed = session("u1", OWNER_TOKEN, None);

        for role in AcspRole::ALL {
            assert!(can_create_membership(&owner, role));
            assert!(!can_create_membership(&standard, role));
            assert!(!can_create_membership(&unconfirmed, role));
        }
        assert!(!can_create_membership(&admin, AcspRole::Owner));
        assert!(can_create_membership(&admin, AcspRole::Admin));
        assert!(can_create_membership(&admin, AcspRole::Standard));
    }

    #[test]
    fn admin_never_promotes_to_owner() {
        let admin = session("u1", ADMIN_TOKEN, Some(AcspRole::Admin));
        let target = membership("A1", "u2", AcspRole::Standard);
        assert!(!can_change_role(&admin, &target, AcspRole::Owner));
        assert!(can_change_role(&admin, &target, AcspRole::Admin));
    }

    #[test]
    fn admin_cannot_touch_owners() {
        let admin = session("u1", ADMIN_TOKEN, Some(AcspRole::Admin));
        let owner_target = membership("A1", "u2", AcspRole::Owner);
        assert!(!can_change_status(&admin, &owner_target));
        assert!(!can_change_role(&admin, &owner_target, AcspRole::Standard));
    }

    #[test]
    fn owner_cannot_change_own_role() {
        let owner = session("u1", OWNER_TOKEN, Some(AcspRole::Owner));
        let own = membership("A1", "u1", AcspRole::Owner);
        assert!(!can_change_role(&owner, &own, AcspRole::Admin));
        // Removal is left to the last-owner check in the lifecycle engine.
        assert!(can_change_status(&owner, &own));
    }

    #[test]
    fn management_is_scoped_to_the_token_acsp() {
        let owner = session("u1", OWNER_TOKEN, Some(AcspRole::Owner));
        let foreign = membership("B2", "u2", AcspRole::Standard);
        assert!(!can_change_status(&owner, &foreign));
        assert!(!can_change_role(&owner, &foreign, AcspRole::Admin));
    }

    #[test]
    fn only_privileged_keys_provision_owners() {
        assert!(can_provision_owner(&AuthorizationContext::service_key("r", true)));
        assert!(!can_provision_owner(&AuthorizationContext::service_key("r", false)));
        assert!(!can_provision_owner(&session("u1", OWNER_TOKEN, Some(AcspRole::Owner))));
    }
}

//! Role resolver.
//!
//! Turns parsed [`Credentials`] into an [`AuthorizationContext`]. The token
//! permission string is a claim: an ACSP role is only granted when the
//! caller's active membership at the claimed ACSP has the same role. Every
//! failure resolves to less authority, never to an error.

use acsp_members_common::{
    context::AuthorizationContext, permissions::TokenPermissions, types::User,
};

use super::credentials::Credentials;
use crate::store::Store;

pub async fn resolve(
    store: &Store,
    request_id: &str,
    credentials: Credentials,
) -> AuthorizationContext {
    match credentials {
        Credentials::None => AuthorizationContext::anonymous(request_id),
        Credentials::ServiceKey { key_id, wildcard } => {
            tracing::debug!(
                key_id = key_id.as_deref().unwrap_or("-"),
                wildcard,
                "resolved service key"
            );
            AuthorizationContext::service_key(request_id, wildcard)
        }
        Credentials::Session { user_id, permissions, platform_admin_search } => {
            resolve_session(store, request_id, &user_id, permissions, platform_admin_search).await
        }
    }
}

async fn resolve_session(
    store: &Store,
    request_id: &str,
    user_id: &str,
    permissions: TokenPermissions,
    platform_admin_search: bool,
) -> AuthorizationContext {
    let user = match store.get_user(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::warn!(user_id, "session user does not exist; caller is unauthenticated");
            return AuthorizationContext::anonymous(request_id);
        }
        Err(error) => {
            tracing::warn!(user_id, error = ?error, "user lookup failed; caller unauthenticated");
            return AuthorizationContext::anonymous(request_id);
        }
    };

    if platform_admin_search {
        tracing::debug!(user_id, "resolved platform admin with acsp search");
        return AuthorizationContext::session(request_id, user, permissions, None, true);
    }

    let Some(acsp_number) = permissions.acsp_number().map(ToOwned::to_owned) else {
        return AuthorizationContext::session(request_id, user, permissions, None, false);
    };
    let claimed = permissions.claimed_role();

    let persisted = match store.find_active_by_user_and_acsp(user_id, &acsp_number).await {
        Ok(persisted) => persisted,
        Err(error) => {
            tracing::warn!(
                user_id,
                %acsp_number,
                error = ?error,
                "membership lookup failed; no role granted"
            );
            return revoked(request_id, user);
        }
    };

    match persisted {
        Some(membership) if Some(membership.user_role) == claimed => {
            let role = membership.user_role;
            tracing::debug!(user_id, %acsp_number, %role, "resolved acsp role");
            AuthorizationContext::session(request_id, user, permissions, Some(role), false)
        }
        Some(membership) => {
            tracing::warn!(
                user_id,
                %acsp_number,
                claimed = claimed.map(|role| role.as_str()).unwrap_or("none"),
                persisted = %membership.user_role,
                "token role disagrees with persisted membership; no role granted"
            );
            revoked(request_id, user)
        }
        None => {
            tracing::warn!(user_id, %acsp_number, "no active membership at claimed acsp; no role");
            revoked(request_id, user)
        }
    }
}

/// A known user whose ACSP claim was rejected keeps no token capabilities.
fn revoked(request_id: &str, user: User) -> AuthorizationContext {
    AuthorizationContext::session(request_id, user, TokenPermissions::default(), None, false)
}

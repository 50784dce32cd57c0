//! Request-scoped authorization context.
//!
//! Built once per request by the request-entry filter and handed to
//! handlers by value; nothing here is shared between requests.

use std::fmt;

use crate::{
    permissions::TokenPermissions,
    types::{AcspRole, User},
};

/// How the caller authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerKind {
    None,
    ServiceKey,
    OAuthSession,
}

/// The single authorization label resolved for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveRole {
    ServiceKey,
    PlatformAdminWithAcspSearch,
    AcspOwner,
    AcspAdmin,
    AcspStandard,
}

impl EffectiveRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServiceKey => "ROLE_KEY",
            Self::PlatformAdminWithAcspSearch => "ROLE_ADMIN_WITH_ACSP_SEARCH_PRIVILEGE",
            Self::AcspOwner => "ROLE_ACSP_OWNER",
            Self::AcspAdmin => "ROLE_ACSP_ADMIN",
            Self::AcspStandard => "ROLE_ACSP_STANDARD",
        }
    }

    pub const fn from_acsp_role(role: AcspRole) -> Self {
        match role {
            AcspRole::Owner => Self::AcspOwner,
            AcspRole::Admin => Self::AcspAdmin,
            AcspRole::Standard => Self::AcspStandard,
        }
    }
}

impl fmt::Display for EffectiveRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationContext {
    request_id: String,
    caller_kind: CallerKind,
    caller_user: Option<User>,
    key_wildcard: bool,
    permissions: TokenPermissions,
    acsp_role: Option<AcspRole>,
    platform_admin_search: bool,
}

impl AuthorizationContext {
    /// Caller could not be identified. Every guard answers "no".
    pub fn anonymous(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            caller_kind: CallerKind::None,
            caller_user: None,
            key_wildcard: false,
            permissions: TokenPermissions::default(),
            acsp_role: None,
            platform_admin_search: false,
        }
    }

    pub fn service_key(request_id: impl Into<String>, key_wildcard: bool) -> Self {
        Self { caller_kind: CallerKind::ServiceKey, key_wildcard, ..Self::anonymous(request_id) }
    }

    /// An authenticated user session.
    ///
    /// `confirmed_role` must only be set once the persisted membership has
    /// agreed with the role the token claims.
    pub fn session(
        request_id: impl Into<String>,
        user: User,
        permissions: TokenPermissions,
        confirmed_role: Option<AcspRole>,
        platform_admin_search: bool,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            caller_kind: CallerKind::OAuthSession,
            caller_user: Some(user),
            key_wildcard: false,
            permissions,
            acsp_role: confirmed_role,
            platform_admin_search,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn caller_kind(&self) -> CallerKind {
        self.caller_kind
    }

    pub fn is_authenticated(&self) -> bool {
        self.caller_kind != CallerKind::None
    }

    pub fn caller_user(&self) -> Option<&User> {
        self.caller_user.as_ref()
    }

    pub fn caller_user_id(&self) -> Option<&str> {
        self.caller_user.as_ref().map(|user| user.user_id.as_str())
    }

    pub fn caller_acsp_number(&self) -> Option<&str> {
        self.permissions.acsp_number()
    }

    pub fn caller_acsp_role(&self) -> Option<AcspRole> {
        self.acsp_role
    }

    pub fn permissions(&self) -> &TokenPermissions {
        &self.permissions
    }

    pub fn is_privileged_service_key(&self) -> bool {
        self.caller_kind == CallerKind::ServiceKey && self.key_wildcard
    }

    pub fn is_platform_admin_with_search(&self) -> bool {
        self.platform_admin_search && self.caller_user.is_some()
    }

    pub fn can_read_acsp_members(&self) -> bool {
        self.permissions.can_read_members()
    }

    /// The caller holds a confirmed ACSP role and the token grants at least
    /// one management verb over `target_role`.
    pub fn requesting_user_can_manage_membership(&self, target_role: AcspRole) -> bool {
        self.acsp_role.is_some() && self.permissions.can_manage(target_role)
    }

    pub fn effective_role(&self) -> Option<EffectiveRole> {
        match self.caller_kind {
            CallerKind::None => None,
            CallerKind::ServiceKey => self.key_wildcard.then_some(EffectiveRole::ServiceKey),
            CallerKind::OAuthSession => {
                if self.is_platform_admin_with_search() {
                    Some(EffectiveRole::PlatformAdminWithAcspSearch)
                } else {
                    self.acsp_role.map(EffectiveRole::from_acsp_role)
                }
            }
        }
    }
}

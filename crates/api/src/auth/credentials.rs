//! Credential parser.
//!
//! Reads the identity headers set by the API gateway. Nothing here fails:
//! anything missing or unrecognised yields [`Credentials::None`].

use axum::http::HeaderMap;

use acsp_members_common::permissions::TokenPermissions;

pub const IDENTITY_TYPE_HEADER: &str = "eric-identity-type";
pub const IDENTITY_HEADER: &str = "eric-identity";
pub const AUTHORISED_KEY_ROLES_HEADER: &str = "eric-authorised-key-roles";
pub const AUTHORISED_TOKEN_PERMISSIONS_HEADER: &str = "eric-authorised-token-permissions";
pub const AUTHORISED_ROLES_HEADER: &str = "eric-authorised-roles";

pub const IDENTITY_TYPE_KEY: &str = "key";
pub const IDENTITY_TYPE_OAUTH2: &str = "oauth2";
pub const KEY_ROLE_WILDCARD: &str = "*";
pub const ADMIN_ACSP_SEARCH_ROLE: &str = "/admin/acsp/search";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    None,
    ServiceKey {
        key_id: Option<String>,
        wildcard: bool,
    },
    Session {
        user_id: String,
        permissions: TokenPermissions,
        platform_admin_search: bool,
    },
}

impl Credentials {
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ServiceKey { .. } => "service-key",
            Self::Session { .. } => "oauth-session",
        }
    }
}

pub fn parse_credentials(headers: &HeaderMap) -> Credentials {
    let Some(identity_type) = header_str(headers, IDENTITY_TYPE_HEADER) else {
        return Credentials::None;
    };
    let identity = header_str(headers, IDENTITY_HEADER).map(ToOwned::to_owned);

    if identity_type.eq_ignore_ascii_case(IDENTITY_TYPE_KEY) {
        let wildcard = header_str(headers, AUTHORISED_KEY_ROLES_HEADER)
            .is_some_and(|roles| roles.split_whitespace().any(|role| role == KEY_ROLE_WILDCARD));
        return Credentials::ServiceKey { key_id: identity, wildcard };
    }

    if identity_type.eq_ignore_ascii_case(IDENTITY_TYPE_OAUTH2) {
        let Some(user_id) = identity else {
            return Credentials::None;
        };
        let permissions =
            TokenPermissions::parse(header_str(headers, AUTHORISED_TOKEN_PERMISSIONS_HEADER));
        let platform_admin_search = header_str(headers, AUTHORISED_ROLES_HEADER).is_some_and(
            |roles| roles.split_whitespace().any(|role| role == ADMIN_ACSP_SEARCH_ROLE),
        );
        return Credentials::Session { user_id, permissions, platform_admin_search };
    }

    Credentials::None
}

/// Trimmed, non-empty UTF-8 header value.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

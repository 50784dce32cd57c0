//! Token permission model.
//!
//! A session carries its ACSP-scoped capabilities as a space separated list
//! of `key=value` claims, for example:
//!
//! ```text
//! acsp_number=ACSP1 acsp_members=read acsp_members_owners=create,update,delete
//! ```
//!
//! Parsing is tolerant. Unknown keys, unknown verbs and tokens without `=`
//! are skipped, and an absent string yields [`TokenPermissions::default`],
//! for which every capability query answers "no".

use std::collections::BTreeSet;

use crate::types::AcspRole;

pub const ACSP_NUMBER_KEY: &str = "acsp_number";
pub const ACSP_MEMBERS_KEY: &str = "acsp_members";
pub const ACSP_MEMBERS_OWNERS_KEY: &str = "acsp_members_owners";
pub const ACSP_MEMBERS_ADMINS_KEY: &str = "acsp_members_admins";
pub const ACSP_MEMBERS_STANDARD_KEY: &str = "acsp_members_standard";

const READ_VALUE: &str = "read";
const MAX_ACSP_NUMBER_LEN: usize = 32;

/// A management verb granted over memberships of one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManageVerb {
    Create,
    Update,
    Delete,
}

impl ManageVerb {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Verbs granted for one role bucket.
///
/// `None` at the [`TokenPermissions`] level means the key was absent; an
/// empty set means the key was present without any recognised verb.
pub type VerbSet = BTreeSet<ManageVerb>;

/// Structured view over a token permission string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPermissions {
    acsp_number: Option<String>,
    can_read_members: bool,
    owners: Option<VerbSet>,
    admins: Option<VerbSet>,
    standard: Option<VerbSet>,
}

impl TokenPermissions {
    /// Parse a raw permission string. Never fails.
    pub fn parse(raw: Option<&str>) -> Self {
        let mut permissions = Self::default();
        let Some(raw) = raw else {
            return permissions;
        };

        for token in raw.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };

            match key {
                ACSP_NUMBER_KEY => {
                    if permissions.acsp_number.is_none() && is_valid_acsp_number(value) {
                        permissions.acsp_number = Some(value.to_owned());
                    }
                }
                ACSP_MEMBERS_KEY => {
                    if value.split(',').any(|verb| verb.trim() == READ_VALUE) {
                        permissions.can_read_members = true;
                    }
                }
                ACSP_MEMBERS_OWNERS_KEY => merge_verbs(&mut permissions.owners, value),
                ACSP_MEMBERS_ADMINS_KEY => merge_verbs(&mut permissions.admins, value),
                ACSP_MEMBERS_STANDARD_KEY => merge_verbs(&mut permissions.standard, value),
                _ => {}
            }
        }

        permissions
    }

    pub fn acsp_number(&self) -> Option<&str> {
        self.acsp_number.as_deref()
    }

    pub fn can_read_members(&self) -> bool {
        self.can_read_members
    }

    pub fn verbs_for(&self, role: AcspRole) -> Option<&VerbSet> {
        match role {
            AcspRole::Owner => self.owners.as_ref(),
            AcspRole::Admin => self.admins.as_ref(),
            AcspRole::Standard => self.standard.as_ref(),
        }
    }

    pub fn grants(&self, role: AcspRole, verb: ManageVerb) -> bool {
        self.verbs_for(role).is_some_and(|verbs| verbs.contains(&verb))
    }

    /// True iff at least one management verb is granted for `target_role`.
    pub fn can_manage(&self, target_role: AcspRole) -> bool {
        self.verbs_for(target_role).is_some_and(|verbs| !verbs.is_empty())
    }

    /// Role implied by the token's write buckets.
    ///
    /// Owner sessions are issued with verbs over owners, admin sessions with
    /// verbs over admins (but not owners), and standard sessions with read
    /// access only. Without an ACSP number there is no claim at all.
    pub fn claimed_role(&self) -> Option<AcspRole> {
        self.acsp_number.as_ref()?;

        if self.can_manage(AcspRole::Owner) {
            Some(AcspRole::Owner)
        } else if self.can_manage(AcspRole::Admin) {
            Some(AcspRole::Admin)
        } else {
            Some(AcspRole::Standard)
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn merge_verbs(bucket: &mut Option<VerbSet>, value: &str) {
    let verbs = bucket.get_or_insert_with(VerbSet::new);
    verbs.extend(value.split(',').filter_map(|verb| ManageVerb::parse(verb.trim())));
}

/// ACSP numbers are 1–32 characters of `[A-Za-z0-9_-]`.
pub fn is_valid_acsp_number(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_ACSP_NUMBER_LEN
        && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::{is_valid_acsp_number, ManageVerb, TokenPermissions};
    use crate::types::AcspRole;

    const OWNER_TOKEN: &str = "acsp_number=ACSP1 acsp_members=read \
        acsp_members_owners=create,update,delete acsp_members_admins=create,update,delete \
        acsp_members_standard=create,update,delete";
    const ADMIN_TOKEN: &str = "acsp_number=ACSP1 acsp_members=read \
        acsp_members_admins=create,update,delete acsp_members_standard=create,update,delete";
    const STANDARD_TOKEN: &str = "acsp_number=ACSP1 acsp_members=read";

    #[test]
    fn absent_and_empty_strings_grant_nothing() {
        for raw in [None, Some(""), Some("   ")] {
            let permissions = TokenPermissions::parse(raw);
            assert!(permissions.is_empty());
            assert_eq!(permissions.acsp_number(), None);
            assert!(!permissions.can_read_members());
            assert_eq!(permissions.claimed_role(), None);
            for role in AcspRole::ALL {
                assert!(!permissions.can_manage(role));
            }
        }
    }

    #[test]
    fn owner_token_grants_every_bucket() {
        let permissions = TokenPermissions::parse(Some(OWNER_TOKEN));
        assert_eq!(permissions.acsp_number(), Some("ACSP1"));
        assert!(permissions.can_read_members());
        assert!(permissions.grants(AcspRole::Owner, ManageVerb::Delete));
        assert_eq!(permissions.claimed_role(), Some(AcspRole::Owner));
    }

    #[test]
    fn admin_token_cannot_manage_owners() {
        let permissions = TokenPermissions::parse(Some(ADMIN_TOKEN));
        assert!(!permissions.can_manage(AcspRole::Owner));
        assert!(permissions.can_manage(AcspRole::Admin));
        assert!(permissions.can_manage(AcspRole::Standard));
        assert_eq!(permissions.claimed_role(), Some(AcspRole::Admin));
    }

    #[test]
    fn read_only_token_claims_standard() {
        let permissions = TokenPermissions::parse(Some(STANDARD_TOKEN));
        assert_eq!(permissions.claimed_role(), Some(AcspRole::Standard));
        for role in AcspRole::ALL {
            assert!(!permissions.can_manage(role));
        }
    }

    #[test]
    fn unknown_keys_and_malformed_tokens_are_ignored() {
        let permissions = TokenPermissions::parse(Some(
            "garbage acsp_number=ACSP9 company_number=123 acsp_members_owners=frobnicate,update =",
        ));
        assert_eq!(permissions.acsp_number(), Some("ACSP9"));
        assert!(permissions.grants(AcspRole::Owner, ManageVerb::Update));
        assert!(!permissions.grants(AcspRole::Owner, ManageVerb::Create));
    }

    #[test]
    fn present_key_without_known_verbs_is_empty_not_absent() {
        let permissions = TokenPermissions::parse(Some("acsp_members_admins=nothing"));
        assert!(permissions.verbs_for(AcspRole::Admin).is_some_and(|verbs| verbs.is_empty()));
        assert!(permissions.verbs_for(AcspRole::Owner).is_none());
        assert!(!permissions.can_manage(AcspRole::Admin));
    }

    #[test]
    fn invalid_acsp_number_is_treated_as_absent() {
        let permissions =
            TokenPermissions::parse(Some("acsp_number=ACSP/1 acsp_members_owners=create"));
        assert_eq!(permissions.acsp_number(), None);
        assert_eq!(permissions.claimed_role(), None);
    }

    #[test]
    fn first_acsp_number_wins() {
        let permissions = TokenPermissions::parse(Some("acsp_number=FIRST acsp_number=SECOND"));
        assert_eq!(permissions.acsp_number(), Some("FIRST"));
    }

    #[test]
    fn acsp_number_format() {
        assert!(is_valid_acsp_number("ACSP-123_x"));
        assert!(!is_valid_acsp_number(""));
        assert!(!is_valid_acsp_number("has space"));
        assert!(!is_valid_acsp_number(&"A".repeat(33)));
        assert!(is_valid_acsp_number(&"A".repeat(32)));
    }
}

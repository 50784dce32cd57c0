use acsp_members_common::{
    permissions::{is_valid_acsp_number, TokenPermissions},
    types::AcspRole,
};
use proptest::prelude::*;

fn token_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z_]{0,24}=[a-z,]{0,24}",
        "[ -~]{0,40}",
        Just("acsp_members=read".to_owned()),
        Just("acsp_members_owners=create,update,delete".to_owned()),
        Just("acsp_members_admins=update".to_owned()),
        "acsp_number=[A-Za-z0-9_/-]{0,40}",
    ]
}

proptest! {
    #[test]
    fn parsing_never_panics_and_scopes_to_a_valid_acsp(tokens in prop::collection::vec(token_strategy(), 0..12)) {
        let raw = tokens.join(" ");
        let permissions = TokenPermissions::parse(Some(&raw));

        if let Some(acsp_number) = permissions.acsp_number() {
            prop_assert!(is_valid_acsp_number(acsp_number));
        }
    }

    #[test]
    fn claimed_role_implies_matching_write_bucket(tokens in prop::collection::vec(token_strategy(), 0..12)) {
        let raw = tokens.join(" ");
        let permissions = TokenPermissions::parse(Some(&raw));

        match permissions.claimed_role() {
            Some(AcspRole::Owner) => prop_assert!(permissions.can_manage(AcspRole::Owner)),
            Some(AcspRole::Admin) => {
                prop_assert!(permissions.can_manage(AcspRole::Admin));
                prop_assert!(!permissions.can_manage(AcspRole::Owner));
            }
            Some(AcspRole::Standard) => {
                prop_assert!(!permissions.can_manage(AcspRole::Owner));
                prop_assert!(!permissions.can_manage(AcspRole::Admin));
            }
            None => prop_assert!(permissions.acsp_number().is_none()),
        }
    }

    #[test]
    fn unknown_keys_do_not_change_the_result(noise in "[b-z]{1,12}=[a-z,]{0,16}") {
        let base = "acsp_number=A1 acsp_members=read acsp_members_admins=create";
        let with_noise = format!("{noise} {base} {noise}");
        prop_assert_eq!(
            TokenPermissions::parse(Some(base)),
            TokenPermissions::parse(Some(&with_noise))
        );
    }
}

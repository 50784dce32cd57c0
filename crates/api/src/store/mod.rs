//! Membership, user and ACSP collaborators.
//!
//! [`Store`] dispatches every query to PostgreSQL or to an in-process map.
//! Both backends honour the same contracts: at most one live membership per
//! (ACSP, user id) and per (ACSP, email), and owner-guarded conditional
//! updates that never leave a guarded ACSP without an active owner.

mod memory;
mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use acsp_members_common::types::{Acsp, AcspRole, Membership, MembershipStatus, User};

pub use memory::MemoryStore;

use crate::{error::ApiError, validation::Pagination};

#[derive(Clone)]
pub enum Store {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryStore>>),
}

/// Field changes applied by [`Store::conditional_update`].
///
/// `None` leaves a column untouched. The etag is always replaced.
#[derive(Debug, Clone)]
pub struct MembershipChanges {
    pub user_id: Option<String>,
    pub clear_user_email: bool,
    pub user_role: Option<AcspRole>,
    pub status: Option<MembershipStatus>,
    pub added_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub removed_at: Option<DateTime<Utc>>,
    pub removed_by: Option<String>,
    pub etag: String,
}

impl MembershipChanges {
    /// Only a new etag.
    pub fn touch(etag: String) -> Self {
        Self {
            user_id: None,
            clear_user_email: false,
            user_role: None,
            status: None,
            added_at: None,
            accepted_at: None,
            removed_at: None,
            removed_by: None,
            etag,
        }
    }

    pub fn apply(&self, membership: &mut Membership) {
        if let Some(user_id) = &self.user_id {
            membership.user_id = Some(user_id.clone());
        }
        if self.clear_user_email {
            membership.user_email = None;
        }
        if let Some(role) = self.user_role {
            membership.user_role = role;
        }
        if let Some(status) = self.status {
            membership.status = status;
        }
        if let Some(added_at) = self.added_at {
            membership.added_at = Some(added_at);
        }
        if let Some(accepted_at) = self.accepted_at {
            membership.accepted_at = Some(accepted_at);
        }
        if let Some(removed_at) = self.removed_at {
            membership.removed_at = Some(removed_at);
        }
        if let Some(removed_by) = &self.removed_by {
            membership.removed_by = Some(removed_by.clone());
        }
        membership.etag = self.etag.clone();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Number of records the write matched. Zero means the etag moved.
    Updated(u64),
    /// The owner guard found no other active owner; nothing was written.
    LastOwner,
}

/// Filter for [`Store::find_by_acsp_filtered`].
///
/// Empty `statuses` or `roles` match everything. When `user_ids` or
/// `emails` are non-empty a membership must match one of them.
#[derive(Debug, Clone, Default)]
pub struct MembershipFilter {
    pub acsp_number: String,
    pub statuses: Vec<MembershipStatus>,
    pub roles: Vec<AcspRole>,
    pub user_ids: Vec<String>,
    pub emails: Vec<String>,
}

impl MembershipFilter {
    pub fn for_acsp(acsp_number: impl Into<String>, include_removed: bool) -> Self {
        let statuses = if include_removed {
            vec![MembershipStatus::Pending, MembershipStatus::Active, MembershipStatus::Removed]
        } else {
            vec![MembershipStatus::Pending, MembershipStatus::Active]
        };
        Self { acsp_number: acsp_number.into(), statuses, ..Self::default() }
    }

    pub(crate) fn matches(&self, membership: &Membership) -> bool {
        if membership.acsp_number != self.acsp_number {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&membership.status) {
            return false;
        }
        if !self.roles.is_empty() && !self.roles.contains(&membership.user_role) {
            return false;
        }
        if self.user_ids.is_empty() && self.emails.is_empty() {
            return true;
        }

        let user_match = membership
            .user_id
            .as_ref()
            .is_some_and(|user_id| self.user_ids.iter().any(|wanted| wanted == user_id));
        let email_match = membership.user_email.as_ref().is_some_and(|email| {
            self.emails.iter().any(|wanted| wanted.eq_ignore_ascii_case(email))
        });
        user_match || email_match
    }
}

#[derive(Debug, Clone)]
pub struct MembershipPage {
    pub items: Vec<Membership>,
    pub total_results: u64,
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryStore::default())))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory(_) => "memory",
        }
    }

    // ── ACSP and user directories ─────────────────────────────────────

    pub async fn get_acsp(&self, acsp_number: &str) -> Result<Option<Acsp>, ApiError> {
        match self {
            Self::Postgres(pool) => postgres::get_acsp_pg(pool, acsp_number).await,
            Self::Memory(store) => Ok(store.read().await.get_acsp(acsp_number)),
        }
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, ApiError> {
        match self {
            Self::Postgres(pool) => postgres::get_user_pg(pool, user_id).await,
            Self::Memory(store) => Ok(store.read().await.get_user(user_id)),
        }
    }

    /// Case-insensitive lookup of users by email.
    pub async fn search_users_by_email(&self, emails: &[String]) -> Result<Vec<User>, ApiError> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Postgres(pool) => postgres::search_users_by_email_pg(pool, emails).await,
            Self::Memory(store) => Ok(store.read().await.search_users_by_email(emails)),
        }
    }

    pub async fn upsert_acsp(&self, acsp: &Acsp) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => postgres::upsert_acsp_pg(pool, acsp).await,
            Self::Memory(store) => {
                store.write().await.upsert_acsp(acsp.clone());
                Ok(())
            }
        }
    }

    pub async fn upsert_user(&self, user: &User) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => postgres::upsert_user_pg(pool, user).await,
            Self::Memory(store) => {
                store.write().await.upsert_user(user.clone());
                Ok(())
            }
        }
    }

    // ── Memberships ───────────────────────────────────────────────────

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Membership>, ApiError> {
        match self {
            Self::Postgres(pool) => postgres::find_by_id_pg(pool, id).await,
            Self::Memory(store) => Ok(store.read().await.find_by_id(id)),
        }
    }

    pub async fn find_active_by_user_and_acsp(
        &self,
        user_id: &str,
        acsp_number: &str,
    ) -> Result<Option<Membership>, ApiError> {
        match self {
            Self::Postgres(pool) => {
                postgres::find_active_by_user_and_acsp_pg(pool, user_id, acsp_number).await
            }
            Self::Memory(store) => {
                Ok(store.read().await.find_active_by_user_and_acsp(user_id, acsp_number))
            }
        }
    }

    /// Live memberships of a user at any ACSP.
    pub async fn find_non_removed_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Membership>, ApiError> {
        match self {
            Self::Postgres(pool) => postgres::find_non_removed_by_user_pg(pool, user_id).await,
            Self::Memory(store) => Ok(store.read().await.find_non_removed_by_user(user_id)),
        }
    }

    /// A live membership at `acsp_number` held by `user_id` or addressed to
    /// `email`, if any.
    pub async fn find_non_removed_at_acsp(
        &self,
        acsp_number: &str,
        user_id: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<Membership>, ApiError> {
        if user_id.is_none() && email.is_none() {
            return Ok(None);
        }
        match self {
            Self::Postgres(pool) => {
                postgres::find_non_removed_at_acsp_pg(pool, acsp_number, user_id, email).await
            }
            Self::Memory(store) => {
                Ok(store.read().await.find_non_removed_at_acsp(acsp_number, user_id, email))
            }
        }
    }

    pub async fn find_by_user(
        &self,
        user_id: &str,
        include_removed: bool,
    ) -> Result<Vec<Membership>, ApiError> {
        match self {
            Self::Postgres(pool) => postgres::find_by_user_pg(pool, user_id, include_removed).await,
            Self::Memory(store) => Ok(store.read().await.find_by_user(user_id, include_removed)),
        }
    }

    /// Pending invitations addressed to `email` at any ACSP.
    pub async fn find_pending_by_email(&self, email: &str) -> Result<Vec<Membership>, ApiError> {
        match self {
            Self::Postgres(pool) => postgres::find_pending_by_email_pg(pool, email).await,
            Self::Memory(store) => Ok(store.read().await.find_pending_by_email(email)),
        }
    }

    pub async fn count_active_owners(&self, acsp_number: &str) -> Result<u64, ApiError> {
        match self {
            Self::Postgres(pool) => postgres::count_active_owners_pg(pool, acsp_number).await,
            Self::Memory(store) => Ok(store.read().await.count_active_owners(acsp_number)),
        }
    }

    pub async fn find_by_acsp_filtered(
        &self,
        filter: &MembershipFilter,
        pagination: Pagination,
    ) -> Result<MembershipPage, ApiError> {
        match self {
            Self::Postgres(pool) => {
                postgres::find_by_acsp_filtered_pg(pool, filter, pagination).await
            }
            Self::Memory(store) => Ok(store.read().await.find_by_acsp_filtered(filter, pagination)),
        }
    }

    /// Insert a new membership. A clash with an existing live membership is
    /// a bad request.
    pub async fn insert(&self, membership: &Membership) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => postgres::insert_pg(pool, membership).await,
            Self::Memory(store) => store.write().await.insert(membership.clone()),
        }
    }

    /// Apply `changes` to membership `id` only while its etag still equals
    /// `expected_etag`.
    ///
    /// With `owner_guard = Some(acsp)` the write is refused with
    /// [`UpdateOutcome::LastOwner`] unless, after it, `acsp` still has at
    /// least one active owner. The check and the write are one atomic step.
    pub async fn conditional_update(
        &self,
        id: Uuid,
        expected_etag: &str,
        changes: &MembershipChanges,
        owner_guard: Option<&str>,
    ) -> Result<UpdateOutcome, ApiError> {
        match self {
            Self::Postgres(pool) => {
                postgres::conditional_update_pg(pool, id, expected_etag, changes, owner_guard).await
            }
            Self::Memory(store) => {
                store.write().await.conditional_update(id, expected_etag, changes, owner_guard)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use acsp_members_common::types::{
        Acsp, AcspRole, AcspStatus, Membership, MembershipStatus, User,
    };

    use super::{MembershipChanges, MembershipFilter, Store, UpdateOutcome};
    use crate::{error::ApiError, etag::generate_etag, validation::Pagination};

    fn active(acsp_number: &str, user_id: &str, role: AcspRole) -> Membership {
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
            etag: generate_etag(),
        }
    }

    fn invitation(acsp_number: &str, email: &str) -> Membership {
        Membership {
            user_id: None,
            user_email: Some(email.to_owned()),
            status: MembershipStatus::Pending,
            added_at: None,
            invited_at: Some(Utc::now()),
            ..active(acsp_number, "unused", AcspRole::Standard)
        }
    }

    async fn seeded_store() -> Store {
        let store = Store::memory();
        store
            .upsert_acsp(&Acsp {
                acsp_number: "A1".to_owned(),
                name: "Acme Filings".to_owned(),
                status: AcspStatus::Active,
            })
            .await
            .expect("acsp should seed");
        store
            .upsert_user(&User {
                user_id: "u1".to_owned(),
                email: "One@Example.com".to_owned(),
                display_name: Some("One".to_owned()),
            })
            .await
            .expect("user should seed");
        store
    }

    #[tokio::test]
    async fn directories_resolve_seeded_records() {
        let store = seeded_store().await;
        assert!(store.get_acsp("A1").await.expect("lookup").is_some());
        assert!(store.get_acsp("ZZ").await.expect("lookup").is_none());
        let found = store
            .search_users_by_email(&["one@example.com".to_owned()])
            .await
            .expect("search should succeed");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id, "u1");
    }

    #[tokio::test]
    async fn insert_rejects_second_live_membership_per_acsp() {
        let store = seeded_store().await;
        store.insert(&active("A1", "u1", AcspRole::Owner)).await.expect("first insert");

        let error = store
            .insert(&active("A1", "u1", AcspRole::Standard))
            .await
            .expect_err("duplicate live membership should be rejected");
        assert!(matches!(error, ApiError::BadRequest { .. }));

        store.insert(&active("B2", "u1", AcspRole::Standard)).await.expect("other acsp is fine");

        store.insert(&invitation("A1", "new@example.com")).await.expect("invite");
        let error = store
            .insert(&invitation("A1", "NEW@example.com"))
            .await
            .expect_err("duplicate invitation should be rejected");
        assert!(matches!(error, ApiError::BadRequest { .. }));
    }

    #[tokio::test]
    async fn conditional_update_requires_current_etag() {
        let store = seeded_store().await;
        let membership = active("A1", "u1", AcspRole::Admin);
        store.insert(&membership).await.expect("insert");

        let changes = MembershipChanges::touch(generate_etag());
        let outcome = store
            .conditional_update(membership.id, "\"stale\"", &changes, None)
            .await
            .expect("update should run");
        assert_eq!(outcome, UpdateOutcome::Updated(0));

        let outcome = store
            .conditional_update(membership.id, &membership.etag, &changes, None)
            .await
            .expect("update should run");
        assert_eq!(outcome, UpdateOutcome::Updated(1));

        let stored = store.find_by_id(membership.id).await.expect("lookup").expect("present");
        assert_eq!(stored.etag, changes.etag);
        assert_eq!(stored.user_role, AcspRole::Admin);
    }

    #[tokio::test]
    async fn owner_guard_refuses_to_remove_the_last_owner() {
        let store = seeded_store().await;
        let first = active("A1", "u1", AcspRole::Owner);
        let second = active("A1", "u2", AcspRole::Owner);
        store.insert(&first).await.expect("insert first owner");
        store.insert(&second).await.expect("insert second owner");

        let remove = |etag: String| MembershipChanges {
            status: Some(MembershipStatus::Removed),
            removed_at: Some(Utc::now()),
            ..MembershipChanges::touch(etag)
        };

        let outcome = store
            .conditional_update(first.id, &first.etag, &remove(generate_etag()), Some("A1"))
            .await
            .expect("first removal should run");
        assert_eq!(outcome, UpdateOutcome::Updated(1));
        assert_eq!(store.count_active_owners("A1").await.expect("count"), 1);

        let outcome = store
            .conditional_update(second.id, &second.etag, &remove(generate_etag()), Some("A1"))
            .await
            .expect("second removal should run");
        assert_eq!(outcome, UpdateOutcome::LastOwner);
        assert_eq!(store.count_active_owners("A1").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn filtered_listing_pages_in_creation_order() {
        let store = seeded_store().await;
        for index in 0..5 {
            let mut membership = active("A1", &format!("user-{index}"), AcspRole::Standard);
            membership.created_at = Utc::now() + chrono::Duration::seconds(index);
            store.insert(&membership).await.expect("insert");
        }
        let mut removed = active("A1", "gone", AcspRole::Admin);
        removed.status = MembershipStatus::Removed;
        store.insert(&removed).await.expect("insert removed");

        let live = MembershipFilter::for_acsp("A1", false);
        let page = store
            .find_by_acsp_filtered(&live, Pagination { page_index: 1, items_per_page: 2 })
            .await
            .expect("listing should succeed");
        assert_eq!(page.total_results, 5);
        let users: Vec<_> = page.items.iter().filter_map(|m| m.user_id.as_deref()).collect();
        assert_eq!(users, vec!["user-2", "user-3"]);

        let everything = MembershipFilter::for_acsp("A1", true);
        let page = store
            .find_by_acsp_filtered(&everything, Pagination::default())
            .await
            .expect("listing should succeed");
        assert_eq!(page.total_results, 6);

        let admins = MembershipFilter { roles: vec![AcspRole::Admin], ..everything };
        let page = store
            .find_by_acsp_filtered(&admins, Pagination::default())
            .await
            .expect("listing should succeed");
        assert_eq!(page.total_results, 1);
    }

    #[tokio::test]
    async fn user_scoped_queries() {
        let store = seeded_store().await;
        let mut removed = active("B2", "u1", AcspRole::Standard);
        removed.status = MembershipStatus::Removed;
        store.insert(&removed).await.expect("insert");
        store.insert(&active("A1", "u1", AcspRole::Owner)).await.expect("insert");
        store.insert(&invitation("C3", "one@example.com")).await.expect("invite");

        assert_eq!(store.find_non_removed_by_user("u1").await.expect("query").len(), 1);
        assert_eq!(store.find_by_user("u1", true).await.expect("query").len(), 2);
        assert_eq!(store.find_pending_by_email("ONE@example.com").await.expect("query").len(), 1);
        assert!(store
            .find_non_removed_at_acsp("C3", None, Some("one@EXAMPLE.com"))
            .await
            .expect("query")
            .is_some());
        assert!(store.find_non_removed_at_acsp("C3", None, None).await.expect("query").is_none());
        assert!(store
            .find_active_by_user_and_acsp("u1", "A1")
            .await
            .expect("query")
            .is_some_and(|m| m.user_role == AcspRole::Owner));
    }
}

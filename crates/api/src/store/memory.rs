use std::collections::HashMap;

use uuid::Uuid;

use acsp_members_common::types::{Acsp, Membership, MembershipStatus, User};

use super::{MembershipChanges, MembershipFilter, MembershipPage, UpdateOutcome};
use crate::{error::ApiError, validation::Pagination};

/// In-process backend used for local development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    acsps: HashMap<String, Acsp>,
    users: HashMap<String, User>,
    memberships: HashMap<Uuid, Membership>,
}

impl MemoryStore {
    pub fn get_acsp(&self, acsp_number: &str) -> Option<Acsp> {
        self.acsps.get(acsp_number).cloned()
    }

    pub fn get_user(&self, user_id: &str) -> Option<User> {
        self.users.get(user_id).cloned()
    }

    pub fn search_users_by_email(&self, emails: &[String]) -> Vec<User> {
        let mut found: Vec<User> = self
            .users
            .values()
            .filter(|user| emails.iter().any(|email| email.eq_ignore_ascii_case(&user.email)))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        found
    }

    pub fn upsert_acsp(&mut self, acsp: Acsp) {
        self.acsps.insert(acsp.acsp_number.clone(), acsp);
    }

    pub fn upsert_user(&mut self, user: User) {
        self.users.insert(user.user_id.clone(), user);
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<Membership> {
        self.memberships.get(&id).cloned()
    }

    pub fn find_active_by_user_and_acsp(
        &self,
        user_id: &str,
        acsp_number: &str,
    ) -> Option<Membership> {
        self.memberships
            .values()
            .find(|m| {
                m.acsp_number == acsp_number
                    && m.status == MembershipStatus::Active
                    && m.belongs_to_user(user_id)
            })
            .cloned()
    }

    pub fn find_non_removed_by_user(&self, user_id: &str) -> Vec<Membership> {
        sorted(
            self.memberships
                .values()
                .filter(|m| m.status.is_live() && m.belongs_to_user(user_id))
                .cloned()
                .collect(),
        )
    }

    pub fn find_non_removed_at_acsp(
        &self,
        acsp_number: &str,
        user_id: Option<&str>,
        email: Option<&str>,
    ) -> Option<Membership> {
        let mut matching: Vec<Membership> = self
            .memberships
            .values()
            .filter(|m| {
                m.acsp_number == acsp_number
                    && m.status.is_live()
                    && (user_id.is_some_and(|user_id| m.belongs_to_user(user_id))
                        || email.is_some_and(|email| email_matches(m, email)))
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matching.into_iter().next()
    }

    pub fn find_by_user(&self, user_id: &str, include_removed: bool) -> Vec<Membership> {
        sorted(
            self.memberships
                .values()
                .filter(|m| m.belongs_to_user(user_id) && (include_removed || m.status.is_live()))
                .cloned()
                .collect(),
        )
    }

    pub fn find_pending_by_email(&self, email: &str) -> Vec<Membership> {
        sorted(
            self.memberships
                .values()
                .filter(|m| m.status == MembershipStatus::Pending && email_matches(m, email))
                .cloned()
                .collect(),
        )
    }

    pub fn count_active_owners(&self, acsp_number: &str) -> u64 {
        self.memberships
            .values()
            .filter(|m| m.acsp_number == acsp_number && m.is_active_owner())
            .count() as u64
    }

    pub fn find_by_acsp_filtered(
        &self,
        filter: &MembershipFilter,
        pagination: Pagination,
    ) -> MembershipPage {
        let matching =
            sorted(self.memberships.values().filter(|m| filter.matches(m)).cloned().collect());
        let total_results = matching.len() as u64;
        let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(pagination.items_per_page as usize)
            .collect();

        MembershipPage { items, total_results }
    }

    pub fn insert(&mut self, membership: Membership) -> Result<(), ApiError> {
        if self.memberships.contains_key(&membership.id) {
            return Err(ApiError::internal(anyhow::anyhow!(
                "membership id {} already exists",
                membership.id
            )));
        }
        if self.clashes_with_live_membership(&membership) {
            return Err(ApiError::bad_request("a live membership already exists for this member"));
        }
        self.memberships.insert(membership.id, membership);
        Ok(())
    }

    pub fn conditional_update(
        &mut self,
        id: Uuid,
        expected_etag: &str,
        changes: &MembershipChanges,
        owner_guard: Option<&str>,
    ) -> Result<UpdateOutcome, ApiError> {
        let Some(current) = self.memberships.get(&id) else {
            return Ok(UpdateOutcome::Updated(0));
        };
        if current.etag != expected_etag {
            return Ok(UpdateOutcome::Updated(0));
        }

        let mut updated = current.clone();
        changes.apply(&mut updated);

        if let Some(acsp_number) = owner_guard {
            let other_owners = self
                .memberships
                .values()
                .filter(|m| m.id != id && m.acsp_number == acsp_number && m.is_active_owner())
                .count();
            let stays_owner = updated.acsp_number == acsp_number && updated.is_active_owner();
            if other_owners + usize::from(stays_owner) == 0 {
                return Ok(UpdateOutcome::LastOwner);
            }
        }

        if updated.status.is_live() && self.clashes_with_live_membership(&updated) {
            return Err(ApiError::bad_request("a live membership already exists for this member"));
        }

        self.memberships.insert(id, updated);
        Ok(UpdateOutcome::Updated(1))
    }

    /// Mirrors the partial unique indexes on (acsp, user_id) and
    /// (acsp, lower(email)) over live memberships.
    fn clashes_with_live_membership(&self, candidate: &Membership) -> bool {
        if !candidate.status.is_live() {
            return false;
        }
        self.memberships.values().any(|existing| {
            existing.id != candidate.id
                && existing.acsp_number == candidate.acsp_number
                && existing.status.is_live()
                && (candidate
                    .user_id
                    .as_deref()
                    .is_some_and(|user_id| existing.belongs_to_user(user_id))
                    || candidate
                        .user_email
                        .as_deref()
                        .is_some_and(|email| email_matches(existing, email)))
        })
    }

    /// Every stored membership, for invariant checks.
    pub fn memberships(&self) -> impl Iterator<Item = &Membership> {
        self.memberships.values()
    }
}

fn email_matches(membership: &Membership, email: &str) -> bool {
    membership.user_email.as_deref().is_some_and(|stored| stored.eq_ignore_ascii_case(email))
}

fn sorted(mut memberships: Vec<Membership>) -> Vec<Membership> {
    memberships.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    memberships
}

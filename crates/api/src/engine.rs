//! Membership lifecycle engine.
//!
//! Every mutation follows the same shape: load the target, ask the guard,
//! check the status transition and the caller's `If-Match`, then write with
//! [`Store::conditional_update`] keyed on the etag that was read. Demoting or
//! removing an active owner of a non-terminal ACSP also passes an owner
//! guard, so the owner-count check and the write happen atomically.
//! Notifications are enqueued only after the write succeeded.

use chrono::Utc;
use uuid::Uuid;

use acsp_members_common::{
    context::AuthorizationContext,
    guard,
    types::{Acsp, AcspRole, AcspStatus, Membership, MembershipStatus},
};

use crate::{
    error::ApiError,
    etag::{check_if_match, generate_etag},
    outbox::{NotificationKind, NotificationRequest, Outbox},
    store::{MembershipChanges, Store, UpdateOutcome},
};

/// Who a new membership is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewMember {
    /// A known user, added as `active`.
    Existing { user_id: String },
    /// An email address, invited as `pending`.
    Invited { email: String },
}

/// A single PATCH against a membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipUpdate {
    ChangeRole(AcspRole),
    Remove,
}

#[derive(Clone)]
pub struct MembershipEngine {
    store: Store,
    outbox: Outbox,
}

impl MembershipEngine {
    pub fn new(store: Store, outbox: Outbox) -> Self {
        Self { store, outbox }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Add a user or invite an email at `acsp_number`. Uniqueness is scoped
    /// to this ACSP.
    pub async fn add_member(
        &self,
        ctx: &AuthorizationContext,
        acsp_number: &str,
        member: NewMember,
        role: AcspRole,
    ) -> Result<Membership, ApiError> {
        if !guard::acts_for_acsp(ctx, acsp_number) || !guard::can_create_membership(ctx, role) {
            return Err(ApiError::forbidden("caller may not create this membership"));
        }
        let acsp = self.require_open_acsp(acsp_number).await?;
        let now = Utc::now();

        let (membership, recipient_email, kind) = match member {
            NewMember::Existing { user_id } => {
                let user = self
                    .store
                    .get_user(&user_id)
                    .await?
                    .ok_or_else(|| ApiError::not_found("user does not exist"))?;
                let existing = self
                    .store
                    .find_non_removed_at_acsp(acsp_number, Some(&user.user_id), Some(&user.email))
                    .await?;
                if existing.is_some() {
                    return Err(ApiError::bad_request("user already a member of this acsp"));
                }

                let membership = Membership {
                    id: Uuid::new_v4(),
                    acsp_number: acsp_number.to_owned(),
                    user_id: Some(user.user_id),
                    user_email: None,
                    user_role: role,
                    status: MembershipStatus::Active,
                    created_at: now,
                    added_at: Some(now),
                    added_by: ctx.caller_user_id().map(ToOwned::to_owned),
                    invited_at: None,
                    accepted_at: None,
                    removed_at: None,
                    removed_by: None,
                    etag: generate_etag(),
                };
                (membership, user.email, NotificationKind::YouHaveBeenAdded)
            }
            NewMember::Invited { email } => {
                let known_user =
                    self.store.search_users_by_email(std::slice::from_ref(&email)).await?;
                let known_user_id = known_user.first().map(|user| user.user_id.as_str());
                let existing = self
                    .store
                    .find_non_removed_at_acsp(acsp_number, known_user_id, Some(&email))
                    .await?;
                if existing.is_some() {
                    return Err(ApiError::bad_request("email already a member of this acsp"));
                }

                let membership = Membership {
                    id: Uuid::new_v4(),
                    acsp_number: acsp_number.to_owned(),
                    user_id: None,
                    user_email: Some(email.clone()),
                    user_role: role,
                    status: MembershipStatus::Pending,
                    created_at: now,
                    added_at: None,
                    added_by: ctx.caller_user_id().map(ToOwned::to_owned),
                    invited_at: Some(now),
                    accepted_at: None,
                    removed_at: None,
                    removed_by: None,
                    etag: generate_etag(),
                };
                (membership, email, NotificationKind::Invitation)
            }
        };

        self.store.insert(&membership).await?;
        tracing::info!(
            membership_id = %membership.id,
            acsp_number,
            role = %membership.user_role,
            status = %membership.status,
            "membership created"
        );

        self.notify(ctx, kind, recipient_email, &acsp, &membership).await;
        Ok(membership)
    }

    /// Provision the first owner of an ACSP. A user may hold a live
    /// membership at one ACSP only on this path.
    pub async fn provision_owner(
        &self,
        ctx: &AuthorizationContext,
        acsp_number: &str,
        owner_user_id: &str,
    ) -> Result<Membership, ApiError> {
        if !guard::can_provision_owner(ctx) {
            return Err(ApiError::forbidden("owner provisioning requires a privileged key"));
        }
        let acsp = self.require_open_acsp(acsp_number).await?;
        let user = self
            .store
            .get_user(owner_user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("user does not exist"))?;

        if !self.store.find_non_removed_by_user(&user.user_id).await?.is_empty() {
            return Err(ApiError::bad_request("user already belongs to an acsp"));
        }
        // Invitations still keyed by email belong to this user too.
        if !self.store.find_pending_by_email(&user.email).await?.is_empty() {
            return Err(ApiError::bad_request("user has a pending invitation to an acsp"));
        }

        let now = Utc::now();
        let membership = Membership {
            id: Uuid::new_v4(),
            acsp_number: acsp_number.to_owned(),
            user_id: Some(user.user_id),
            user_email: None,
            user_role: AcspRole::Owner,
            status: MembershipStatus::Active,
            created_at: now,
            added_at: Some(now),
            added_by: None,
            invited_at: None,
            accepted_at: None,
            removed_at: None,
            removed_by: None,
            etag: generate_etag(),
        };

        self.store.insert(&membership).await?;
        tracing::info!(membership_id = %membership.id, acsp_number, "acsp owner provisioned");

        self.notify(ctx, NotificationKind::YouHaveBeenAdded, user.email, &acsp, &membership).await;
        Ok(membership)
    }

    /// Accept a pending invitation addressed to the caller's email.
    pub async fn activate(
        &self,
        ctx: &AuthorizationContext,
        membership_id: Uuid,
    ) -> Result<Membership, ApiError> {
        let caller = ctx
            .caller_user()
            .ok_or_else(|| ApiError::forbidden("only a signed-in user can accept an invitation"))?;
        let target = self.require_membership(membership_id).await?;

        let addressed_to_caller = target
            .user_email
            .as_deref()
            .is_some_and(|email| email.eq_ignore_ascii_case(&caller.email));
        if !addressed_to_caller {
            return Err(ApiError::not_found("invitation is not addressed to the caller"));
        }
        if !target.status.can_transition_to(MembershipStatus::Active) {
            return Err(ApiError::bad_request(format!(
                "cannot activate a {} membership",
                target.status
            )));
        }
        self.require_open_acsp(&target.acsp_number).await?;

        let already_member = self
            .store
            .find_active_by_user_and_acsp(&caller.user_id, &target.acsp_number)
            .await?;
        if already_member.is_some() {
            return Err(ApiError::bad_request("caller already a member of this acsp"));
        }

        let now = Utc::now();
        let changes = MembershipChanges {
            user_id: Some(caller.user_id.clone()),
            clear_user_email: true,
            status: Some(MembershipStatus::Active),
            added_at: Some(now),
            accepted_at: Some(now),
            ..MembershipChanges::touch(generate_etag())
        };

        let updated = self.write(&target, &changes, None).await?;
        tracing::info!(
            membership_id = %updated.id,
            acsp_number = %updated.acsp_number,
            "invitation accepted"
        );
        Ok(updated)
    }

    pub async fn update(
        &self,
        ctx: &AuthorizationContext,
        membership_id: Uuid,
        update: MembershipUpdate,
        if_match: Option<&str>,
    ) -> Result<Membership, ApiError> {
        match update {
            MembershipUpdate::ChangeRole(role) => {
                self.change_role(ctx, membership_id, role, if_match).await
            }
            MembershipUpdate::Remove => self.remove(ctx, membership_id, if_match).await,
        }
    }

    /// Owner is never a valid target role here; owners are created through
    /// `add_member` by an owner or through `provision_owner`.
    pub async fn change_role(
        &self,
        ctx: &AuthorizationContext,
        membership_id: Uuid,
        new_role: AcspRole,
        if_match: Option<&str>,
    ) -> Result<Membership, ApiError> {
        let target = self.require_membership(membership_id).await?;

        if !guard::can_change_role(ctx, &target, new_role) {
            return Err(ApiError::forbidden("caller may not change this role"));
        }
        if new_role == AcspRole::Owner {
            return Err(ApiError::forbidden("owner cannot be assigned by a role change"));
        }
        if !target.status.is_live() {
            return Err(ApiError::bad_request("cannot change the role of a removed membership"));
        }
        check_if_match(if_match, &target.etag)?;

        let owner_guard = self.owner_guard_for(&target).await?;
        let changes = MembershipChanges {
            user_role: Some(new_role),
            ..MembershipChanges::touch(generate_etag())
        };
        let updated = self.write(&target, &changes, owner_guard.as_deref()).await?;
        tracing::info!(
            membership_id = %updated.id,
            acsp_number = %updated.acsp_number,
            from = %target.user_role,
            to = %new_role,
            "membership role changed"
        );

        if let Some(recipient_email) = self.recipient_email(&updated).await {
            let acsp = match self.store.get_acsp(&updated.acsp_number).await {
                Ok(acsp) => acsp,
                Err(error) => {
                    tracing::warn!(
                        error = ?error,
                        acsp_number = %updated.acsp_number,
                        "acsp lookup for notification failed"
                    );
                    None
                }
            };
            let acsp = acsp.unwrap_or_else(|| Acsp {
                acsp_number: updated.acsp_number.clone(),
                name: updated.acsp_number.clone(),
                status: AcspStatus::Active,
            });
            self.notify(ctx, NotificationKind::RoleChanged, recipient_email, &acsp, &updated).await;
        }
        Ok(updated)
    }

    /// Remove a membership. Privileged keys may remove on the system's behalf,
    /// in which case `removed_by` stays empty.
    pub async fn remove(
        &self,
        ctx: &AuthorizationContext,
        membership_id: Uuid,
        if_match: Option<&str>,
    ) -> Result<Membership, ApiError> {
        let target = self.require_membership(membership_id).await?;

        if !ctx.is_privileged_service_key() && !guard::can_change_status(ctx, &target) {
            return Err(ApiError::forbidden("caller may not remove this membership"));
        }
        if !target.status.can_transition_to(MembershipStatus::Removed) {
            return Err(ApiError::bad_request("membership already removed"));
        }
        check_if_match(if_match, &target.etag)?;

        let owner_guard = self.owner_guard_for(&target).await?;
        let changes = MembershipChanges {
            status: Some(MembershipStatus::Removed),
            removed_at: Some(Utc::now()),
            removed_by: ctx.caller_user_id().map(ToOwned::to_owned),
            ..MembershipChanges::touch(generate_etag())
        };
        let updated = self.write(&target, &changes, owner_guard.as_deref()).await?;
        tracing::info!(
            membership_id = %updated.id,
            acsp_number = %updated.acsp_number,
            removed_by = updated.removed_by.as_deref().unwrap_or("system"),
            "membership removed"
        );
        Ok(updated)
    }

    /// Replace only the etag.
    pub async fn touch(
        &self,
        ctx: &AuthorizationContext,
        membership_id: Uuid,
    ) -> Result<Membership, ApiError> {
        let target = self.require_membership(membership_id).await?;
        if !ctx.is_privileged_service_key() && !guard::can_change_status(ctx, &target) {
            return Err(ApiError::forbidden("caller may not touch this membership"));
        }

        let updated =
            self.write(&target, &MembershipChanges::touch(generate_etag()), None).await?;
        tracing::debug!(membership_id = %updated.id, "membership etag refreshed");
        Ok(updated)
    }

    async fn require_membership(&self, membership_id: Uuid) -> Result<Membership, ApiError> {
        self.store
            .find_by_id(membership_id)
            .await?
            .ok_or_else(|| ApiError::not_found("membership does not exist"))
    }

    async fn require_open_acsp(&self, acsp_number: &str) -> Result<Acsp, ApiError> {
        let acsp = self
            .store
            .get_acsp(acsp_number)
            .await?
            .ok_or_else(|| ApiError::not_found("acsp does not exist"))?;
        if acsp.status.is_terminal() {
            return Err(ApiError::forbidden("acsp is ceased or deauthorised"));
        }
        Ok(acsp)
    }

    /// Last-owner protection for a write that takes `target` out of the
    /// active owners. Returns the ACSP to guard, or `None` when no guard is
    /// needed.
    async fn owner_guard_for(&self, target: &Membership) -> Result<Option<String>, ApiError> {
        if !target.is_active_owner() {
            return Ok(None);
        }

        let terminal = self
            .store
            .get_acsp(&target.acsp_number)
            .await?
            .is_some_and(|acsp| acsp.status.is_terminal());
        if terminal {
            return Ok(None);
        }

        let owners = self.store.count_active_owners(&target.acsp_number).await?;
        if owners <= 1 {
            return Err(ApiError::forbidden("acsp would be left without an active owner"));
        }
        Ok(Some(target.acsp_number.clone()))
    }

    async fn write(
        &self,
        target: &Membership,
        changes: &MembershipChanges,
        owner_guard: Option<&str>,
    ) -> Result<Membership, ApiError> {
        let outcome =
            self.store.conditional_update(target.id, &target.etag, changes, owner_guard).await?;

        match outcome {
            UpdateOutcome::Updated(0) => Err(ApiError::internal(anyhow::anyhow!(
                "conditional update of membership {} matched no record",
                target.id
            ))),
            UpdateOutcome::Updated(_) => {
                let mut updated = target.clone();
                changes.apply(&mut updated);
                Ok(updated)
            }
            UpdateOutcome::LastOwner => {
                Err(ApiError::forbidden("acsp would be left without an active owner"))
            }
        }
    }

    async fn recipient_email(&self, membership: &Membership) -> Option<String> {
        if let Some(email) = &membership.user_email {
            return Some(email.clone());
        }
        let user_id = membership.user_id.as_deref()?;
        match self.store.get_user(user_id).await {
            Ok(user) => user.map(|user| user.email),
            Err(error) => {
                tracing::warn!(error = ?error, user_id, "recipient lookup failed; no notification");
                None
            }
        }
    }

    async fn notify(
        &self,
        ctx: &AuthorizationContext,
        kind: NotificationKind,
        recipient_email: String,
        acsp: &Acsp,
        membership: &Membership,
    ) {
        let actor = ctx
            .caller_user()
            .map(|user| user.display_name.clone().unwrap_or_else(|| user.email.clone()));
        let request = NotificationRequest {
            kind,
            recipient_email,
            acsp_number: acsp.acsp_number.clone(),
            acsp_name: acsp.name.clone(),
            actor,
            role: membership.user_role,
            membership_id: membership.id,
        };

        if let Err(error) = self.outbox.enqueue(request).await {
            tracing::warn!(
                error = ?error,
                kind = kind.as_str(),
                membership_id = %membership.id,
                "failed to enqueue notification"
            );
        }
    }
}

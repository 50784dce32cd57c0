use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use acsp_members_common::types::{Acsp, AcspRole, AcspStatus, Membership, MembershipStatus, User};

use super::{MembershipChanges, MembershipFilter, MembershipPage, UpdateOutcome};
use crate::{error::ApiError, validation::Pagination};

const MEMBERSHIP_COLUMNS: &str = "id, acsp_number, user_id, user_email, user_role, status, \
    created_at, added_at, added_by, invited_at, accepted_at, removed_at, removed_by, etag";

// ── SQL Rows ─────────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct MembershipRow {
    id: Uuid,
    acsp_number: String,
    user_id: Option<String>,
    user_email: Option<String>,
    user_role: String,
    status: String,
    created_at: DateTime<Utc>,
    added_at: Option<DateTime<Utc>>,
    added_by: Option<String>,
    invited_at: Option<DateTime<Utc>>,
    accepted_at: Option<DateTime<Utc>>,
    removed_at: Option<DateTime<Utc>>,
    removed_by: Option<String>,
    etag: String,
}

impl TryFrom<MembershipRow> for Membership {
    type Error = ApiError;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        let user_role: AcspRole = row.user_role.parse().map_err(corrupt_row)?;
        let status: MembershipStatus = row.status.parse().map_err(corrupt_row)?;

        Ok(Self {
            id: row.id,
            acsp_number: row.acsp_number,
            user_id: row.user_id,
            user_email: row.user_email,
            user_role,
            status,
            created_at: row.created_at,
            added_at: row.added_at,
            added_by: row.added_by,
            invited_at: row.invited_at,
            accepted_at: row.accepted_at,
            removed_at: row.removed_at,
            removed_by: row.removed_by,
            etag: row.etag,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AcspRow {
    acsp_number: String,
    name: String,
    status: String,
}

impl TryFrom<AcspRow> for Acsp {
    type Error = ApiError;

    fn try_from(row: AcspRow) -> Result<Self, Self::Error> {
        let status: AcspStatus = row.status.parse().map_err(corrupt_row)?;
        Ok(Self { acsp_number: row.acsp_number, name: row.name, status })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    user_id: String,
    email: String,
    display_name: Option<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self { user_id: row.user_id, email: row.email, display_name: row.display_name }
    }
}

fn corrupt_row(error: acsp_members_common::types::UnknownValue) -> ApiError {
    ApiError::internal(anyhow::Error::new(error).context("corrupt row in membership database"))
}

fn map_sqlx_error(error: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.code().as_deref() == Some("23505") {
            return ApiError::bad_request(format!(
                "a live membership already exists for this member ({})",
                db_error.constraint().unwrap_or("unique")
            ));
        }
    }
    ApiError::internal(error.into())
}

fn into_memberships(rows: Vec<MembershipRow>) -> Result<Vec<Membership>, ApiError> {
    rows.into_iter().map(Membership::try_from).collect()
}

fn status_strings(statuses: &[MembershipStatus]) -> Vec<String> {
    let statuses = if statuses.is_empty() {
        &[MembershipStatus::Pending, MembershipStatus::Active, MembershipStatus::Removed][..]
    } else {
        statuses
    };
    statuses.iter().map(|status| status.as_str().to_owned()).collect()
}

fn role_strings(roles: &[AcspRole]) -> Vec<String> {
    let roles = if roles.is_empty() { &AcspRole::ALL[..] } else { roles };
    roles.iter().map(|role| role.as_str().to_owned()).collect()
}

// ── ACSP and user directories ────────────────────────────────────────────────

pub(super) async fn get_acsp_pg(
    pool: &PgPool,
    acsp_number: &str,
) -> Result<Option<Acsp>, ApiError> {
    let row = sqlx::query_as::<_, AcspRow>(
        "SELECT acsp_number, name, status FROM acsps WHERE acsp_number = $1",
    )
    .bind(acsp_number)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?;

    row.map(Acsp::try_from).transpose()
}

pub(super) async fn get_user_pg(pool: &PgPool, user_id: &str) -> Result<Option<User>, ApiError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT user_id, email, display_name FROM users WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(row.map(User::from))
}

pub(super) async fn search_users_by_email_pg(
    pool: &PgPool,
    emails: &[String],
) -> Result<Vec<User>, ApiError> {
    let lowered: Vec<String> = emails.iter().map(|email| email.to_lowercase()).collect();
    let rows = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, email, display_name
        FROM users
        WHERE lower(email) = ANY($1)
        ORDER BY user_id
        "#,
    )
    .bind(&lowered)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows.into_iter().map(User::from).collect())
}

pub(super) async fn upsert_acsp_pg(pool: &PgPool, acsp: &Acsp) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        INSERT INTO acsps (acsp_number, name, status)
        VALUES ($1, $2, $3)
        ON CONFLICT (acsp_number) DO UPDATE SET name = EXCLUDED.name, status = EXCLUDED.status
        "#,
    )
    .bind(&acsp.acsp_number)
    .bind(&acsp.name)
    .bind(acsp.status.as_str())
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

pub(super) async fn upsert_user_pg(pool: &PgPool, user: &User) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        INSERT INTO users (user_id, email, display_name)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id) DO UPDATE
        SET email = EXCLUDED.email, display_name = EXCLUDED.display_name
        "#,
    )
    .bind(&user.user_id)
    .bind(&user.email)
    .bind(user.display_name.as_deref())
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

// ── Memberships ──────────────────────────────────────────────────────────────

pub(super) async fn find_by_id_pg(pool: &PgPool, id: Uuid) -> Result<Option<Membership>, ApiError> {
    sqlx::query_as::<_, MembershipRow>(&format!(
        "SELECT {MEMBERSHIP_COLUMNS} FROM acsp_memberships WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?
    .map(Membership::try_from)
    .transpose()
}

pub(super) async fn find_active_by_user_and_acsp_pg(
    pool: &PgPool,
    user_id: &str,
    acsp_number: &str,
) -> Result<Option<Membership>, ApiError> {
    sqlx::query_as::<_, MembershipRow>(&format!(
        r#"
        SELECT {MEMBERSHIP_COLUMNS}
        FROM acsp_memberships
        WHERE user_id = $1 AND acsp_number = $2 AND status = 'active'
        "#
    ))
    .bind(user_id)
    .bind(acsp_number)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?
    .map(Membership::try_from)
    .transpose()
}

pub(super) async fn find_non_removed_by_user_pg(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<Membership>, ApiError> {
    find_by_user_pg(pool, user_id, false).await
}

pub(super) async fn find_non_removed_at_acsp_pg(
    pool: &PgPool,
    acsp_number: &str,
    user_id: Option<&str>,
    email: Option<&str>,
) -> Result<Option<Membership>, ApiError> {
    sqlx::query_as::<_, MembershipRow>(&format!(
        r#"
        SELECT {MEMBERSHIP_COLUMNS}
        FROM acsp_memberships
        WHERE acsp_number = $1
          AND status IN ('pending', 'active')
          AND ((user_id IS NOT NULL AND user_id = $2)
               OR (user_email IS NOT NULL AND lower(user_email) = lower($3)))
        ORDER BY created_at, id
        LIMIT 1
        "#
    ))
    .bind(acsp_number)
    .bind(user_id)
    .bind(email)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?
    .map(Membership::try_from)
    .transpose()
}

pub(super) async fn find_by_user_pg(
    pool: &PgPool,
    user_id: &str,
    include_removed: bool,
) -> Result<Vec<Membership>, ApiError> {
    let rows = sqlx::query_as::<_, MembershipRow>(&format!(
        r#"
        SELECT {MEMBERSHIP_COLUMNS}
        FROM acsp_memberships
        WHERE user_id = $1
          AND ($2 OR status IN ('pending', 'active'))
        ORDER BY created_at, id
        "#
    ))
    .bind(user_id)
    .bind(include_removed)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    into_memberships(rows)
}

pub(super) async fn find_pending_by_email_pg(
    pool: &PgPool,
    email: &str,
) -> Result<Vec<Membership>, ApiError> {
    let rows = sqlx::query_as::<_, MembershipRow>(&format!(
        r#"
        SELECT {MEMBERSHIP_COLUMNS}
        FROM acsp_memberships
        WHERE status = 'pending' AND lower(user_email) = lower($1)
        ORDER BY created_at, id
        "#
    ))
    .bind(email)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    into_memberships(rows)
}

pub(super) async fn count_active_owners_pg(
    pool: &PgPool,
    acsp_number: &str,
) -> Result<u64, ApiError> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM acsp_memberships
        WHERE acsp_number = $1 AND status = 'active' AND user_role = 'owner'
        "#,
    )
    .bind(acsp_number)
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(count.max(0) as u64)
}

pub(super) async fn find_by_acsp_filtered_pg(
    pool: &PgPool,
    filter: &MembershipFilter,
    pagination: Pagination,
) -> Result<MembershipPage, ApiError> {
    const FILTER: &str = r#"
        WHERE acsp_number = $1
          AND status = ANY($2)
          AND user_role = ANY($3)
          AND ((cardinality($4::text[]) = 0 AND cardinality($5::text[]) = 0)
               OR user_id = ANY($4)
               OR lower(user_email) = ANY($5))
    "#;

    let statuses = status_strings(&filter.statuses);
    let roles = role_strings(&filter.roles);
    let emails: Vec<String> = filter.emails.iter().map(|email| email.to_lowercase()).collect();

    let total_results = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM acsp_memberships {FILTER}"
    ))
    .bind(&filter.acsp_number)
    .bind(&statuses)
    .bind(&roles)
    .bind(&filter.user_ids)
    .bind(&emails)
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    let rows = sqlx::query_as::<_, MembershipRow>(&format!(
        "SELECT {MEMBERSHIP_COLUMNS} FROM acsp_memberships {FILTER} \
         ORDER BY created_at, id LIMIT $6 OFFSET $7"
    ))
    .bind(&filter.acsp_number)
    .bind(&statuses)
    .bind(&roles)
    .bind(&filter.user_ids)
    .bind(&emails)
    .bind(i64::from(pagination.items_per_page))
    .bind(i64::try_from(pagination.offset()).unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    let total_results = u64::try_from(total_results).unwrap_or(0);
    Ok(MembershipPage { items: into_memberships(rows)?, total_results })
}

pub(super) async fn insert_pg(pool: &PgPool, membership: &Membership) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        INSERT INTO acsp_memberships (
            id, acsp_number, user_id, user_email, user_role, status,
            created_at, added_at, added_by, invited_at, accepted_at,
            removed_at, removed_by, etag
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(membership.id)
    .bind(&membership.acsp_number)
    .bind(membership.user_id.as_deref())
    .bind(membership.user_email.as_deref())
    .bind(membership.user_role.as_str())
    .bind(membership.status.as_str())
    .bind(membership.created_at)
    .bind(membership.added_at)
    .bind(membership.added_by.as_deref())
    .bind(membership.invited_at)
    .bind(membership.accepted_at)
    .bind(membership.removed_at)
    .bind(membership.removed_by.as_deref())
    .bind(&membership.etag)
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

pub(super) async fn conditional_update_pg(
    pool: &PgPool,
    id: Uuid,
    expected_etag: &str,
    changes: &MembershipChanges,
    owner_guard: Option<&str>,
) -> Result<UpdateOutcome, ApiError> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;

    if let Some(acsp_number) = owner_guard {
        // Concurrent guarded writes at the same ACSP queue up behind these
        // row locks, so each one sees the owners the previous one left.
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM acsp_memberships
            WHERE acsp_number = $1 AND status = 'active' AND user_role = 'owner'
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(acsp_number)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
    }

    let result = sqlx::query(
        r#"
        UPDATE acsp_memberships
        SET
            user_id = COALESCE($3, user_id),
            user_email = CASE WHEN $4 THEN NULL ELSE user_email END,
            user_role = COALESCE($5, user_role),
            status = COALESCE($6, status),
            added_at = COALESCE($7, added_at),
            accepted_at = COALESCE($8, accepted_at),
            removed_at = COALESCE($9, removed_at),
            removed_by = COALESCE($10, removed_by),
            etag = $11
        WHERE id = $1 AND etag = $2
        "#,
    )
    .bind(id)
    .bind(expected_etag)
    .bind(changes.user_id.as_deref())
    .bind(changes.clear_user_email)
    .bind(changes.user_role.map(AcspRole::as_str))
    .bind(changes.status.map(MembershipStatus::as_str))
    .bind(changes.added_at)
    .bind(changes.accepted_at)
    .bind(changes.removed_at)
    .bind(changes.removed_by.as_deref())
    .bind(&changes.etag)
    .execute(&mut *tx)
    .await
    .map_err(map_sqlx_error)?;

    let matched = result.rows_affected();
    if matched == 0 {
        tx.rollback().await.map_err(map_sqlx_error)?;
        return Ok(UpdateOutcome::Updated(0));
    }

    if let Some(acsp_number) = owner_guard {
        let remaining_owners = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM acsp_memberships
            WHERE acsp_number = $1 AND status = 'active' AND user_role = 'owner'
            "#,
        )
        .bind(acsp_number)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if remaining_owners == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(UpdateOutcome::LastOwner);
        }
    }

    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(UpdateOutcome::Updated(matched))
}

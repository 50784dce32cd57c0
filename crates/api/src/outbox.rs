// Notification outbox.
//
// The lifecycle engine records a notification request only after the
// membership write has committed. Delivery happens elsewhere; a failed
// enqueue is logged and never undoes the membership change.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use acsp_members_common::types::AcspRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    YouHaveBeenAdded,
    Invitation,
    RoleChanged,
}

impl NotificationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::YouHaveBeenAdded => "you_have_been_added",
            Self::Invitation => "invitation",
            Self::RoleChanged => "role_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRequest {
    pub kind: NotificationKind,
    pub recipient_email: String,
    pub acsp_number: String,
    pub acsp_name: String,
    /// Display name or email of whoever made the change, when a user did.
    pub actor: Option<String>,
    pub role: AcspRole,
    pub membership_id: Uuid,
}

#[derive(Clone)]
pub enum Outbox {
    Postgres(PgPool),
    Memory(Arc<Mutex<Vec<NotificationRequest>>>),
    Disabled,
}

impl Outbox {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(Mutex::new(Vec::new())))
    }

    pub async fn enqueue(&self, request: NotificationRequest) -> Result<()> {
        match self {
            Self::Postgres(pool) => enqueue_pg(pool, &request).await,
            Self::Memory(queue) => {
                queue
                    .lock()
                    .map_err(|_| anyhow!("notification outbox lock poisoned"))?
                    .push(request);
                Ok(())
            }
            Self::Disabled => {
                tracing::debug!(kind = request.kind.as_str(), "notification outbox disabled");
                Ok(())
            }
        }
    }

    /// Queued requests, oldest first. Empty for non-memory backends.
    pub fn pending(&self) -> Vec<NotificationRequest> {
        match self {
            Self::Memory(queue) => queue.lock().map(|queue| queue.clone()).unwrap_or_default(),
            Self::Postgres(_) | Self::Disabled => Vec::new(),
        }
    }
}

async fn enqueue_pg(pool: &PgPool, request: &NotificationRequest) -> Result<()> {
    let payload =
        serde_json::to_value(request).context("failed to serialize notification request")?;
    let created_at: DateTime<Utc> = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO notification_outbox (id, kind, recipient_email, payload, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(request.kind.as_str())
    .bind(&request.recipient_email)
    .bind(payload)
    .bind(created_at)
    .execute(pool)
    .await
    .context("failed to insert notification outbox row")?;

    Ok(())
}

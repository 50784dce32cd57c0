// Core domain types shared by the ACSP membership crates.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A persisted or client-supplied enum value that is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! impl_from_str {
    ($ty:ty, $kind:literal) => {
        impl FromStr for $ty {
            type Err = UnknownValue;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Self::parse(value)
                    .ok_or_else(|| UnknownValue { kind: $kind, value: value.to_owned() })
            }
        }
    };
}

/// Role a user holds at an ACSP.
///
/// Variants are declared in ascending privilege so the derived `Ord` gives
/// `Standard < Admin < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcspRole {
    Standard,
    Admin,
    Owner,
}

impl AcspRole {
    pub const ALL: [AcspRole; 3] = [Self::Owner, Self::Admin, Self::Standard];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Standard => "standard",
        }
    }

    /// Parse a role string from a request body, query string or database row.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "standard" => Some(Self::Standard),
            _ => None,
        }
    }
}

impl fmt::Display for AcspRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl_from_str!(AcspRole, "role");

/// Lifecycle state of a membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Pending,
    Active,
    Removed,
}

impl MembershipStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Removed => "removed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }

    /// Status only moves forward: `pending → active → removed` or
    /// `pending → removed`. `removed` is terminal.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active) | (Self::Active, Self::Removed) | (Self::Pending, Self::Removed)
        )
    }

    pub const fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl_from_str!(MembershipStatus, "membership status");

/// Lifecycle state of the ACSP itself, as reported by the ACSP directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcspStatus {
    Active,
    Ceased,
    Deauthorised,
}

impl AcspStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ceased => "ceased",
            Self::Deauthorised => "deauthorised",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "ceased" => Some(Self::Ceased),
            "deauthorised" => Some(Self::Deauthorised),
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ceased | Self::Deauthorised)
    }
}

impl_from_str!(AcspStatus, "acsp status");

/// An Authorised Corporate Service Provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Acsp {
    pub acsp_number: String,
    pub name: String,
    pub status: AcspStatus,
}

/// A user known to the user directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
}

/// The record binding a user (or an invited email) to an ACSP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Membership {
    pub id: Uuid,
    pub acsp_number: String,
    /// Set once the membership is active.
    pub user_id: Option<String>,
    /// Set while the membership is a pending invitation.
    pub user_email: Option<String>,
    pub user_role: AcspRole,
    pub status: MembershipStatus,
    pub created_at: DateTime<Utc>,
    pub added_at: Option<DateTime<Utc>>,
    pub added_by: Option<String>,
    pub invited_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub removed_at: Option<DateTime<Utc>>,
    pub removed_by: Option<String>,
    pub etag: String,
}

impl Membership {
    pub fn is_active_owner(&self) -> bool {
        self.status == MembershipStatus::Active && self.user_role == AcspRole::Owner
    }

    pub fn belongs_to_user(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

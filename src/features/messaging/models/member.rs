use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use utoipa::ToSchema;
use uuid::Uuid;

/// Community role enum matching database enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type, ToSchema)]
#[sqlx(type_name = "member_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Member,
    Moderator,
    Admin,
}

impl MemberRole {
    /// Moderators and admins may be shielded from contact by ordinary members
    pub fn is_elevated(self) -> bool {
        matches!(self, MemberRole::Moderator | MemberRole::Admin)
    }
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberRole::Member => write!(f, "member"),
            MemberRole::Moderator => write!(f, "moderator"),
            MemberRole::Admin => write!(f, "admin"),
        }
    }
}

/// Read-only view of a community member, owned by the membership subsystem
#[derive(Debug, Clone, FromRow)]
pub struct CommunityMember {
    pub community_id: Uuid,
    pub user_id: String,
    pub role: MemberRole,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Who may open a conversation with whom inside a community
#[derive(Debug, Clone, Default, FromRow)]
pub struct ContactPolicy {
    pub restrict_member_to_elevated: bool,
}

impl ContactPolicy {
    /// Whether a member with `initiator` role may start a conversation with `target`.
    ///
    /// The rule is one-directional: elevated members can always reach out.
    pub fn allows(&self, initiator: MemberRole, target: MemberRole) -> bool {
        !self.restrict_member_to_elevated || initiator.is_elevated() || !target.is_elevated()
    }
}

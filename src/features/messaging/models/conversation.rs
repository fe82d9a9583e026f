use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database model for conversations
#[derive(Debug, Clone, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub community_id: Uuid,
    pub is_group: bool,
    pub title: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Timestamp conversations are ordered by in a participant's inbox
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

/// Key of the single 1:1 conversation two users share in a community.
///
/// Order-independent; the length prefix keeps ids containing ':' apart.
pub fn direct_pair_key(community_id: Uuid, user_a: &str, user_b: &str) -> String {
    let (low, high) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    format!("{}:{}:{}:{}", community_id, low.len(), low, high)
}

/// Database model for conversation membership
#[derive(Debug, Clone, FromRow)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
}

/// Data for creating a new conversation
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub community_id: Uuid,
    pub is_group: bool,
    pub title: Option<String>,
    pub created_by: String,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::features::messaging::models::{MemberRole, MessageType};

/// Conversation as shown in a participant's inbox
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationSummaryDto {
    pub id: Uuid,
    pub is_group: bool,
    pub title: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub participants: Vec<ParticipantDto>,
    pub last_message: Option<LastMessagePreviewDto>,
    /// Messages from others the caller has not read yet
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ParticipantDto {
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Null when the participant has left the community
    pub role: Option<MemberRole>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LastMessagePreviewDto {
    pub id: Uuid,
    pub sender_id: String,
    pub body: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

/// Request DTO for starting a conversation
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateConversationDto {
    /// Accounts to talk to; the caller is added automatically
    #[validate(length(min = 1, max = 10, message = "participant_ids must contain 1 to 10 entries"))]
    pub participant_ids: Vec<String>,
    #[validate(length(max = 100, message = "title must be at most 100 characters"))]
    pub title: Option<String>,
    /// Defaults to true when more than one participant is given
    pub is_group: Option<bool>,
}

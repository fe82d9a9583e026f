use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::features::messaging::models::{MessageType, PageDirection};
use crate::shared::constants::{DEFAULT_PAGE_SIZE, MAX_BODY_CHARS, MAX_EMOJI_BYTES, MAX_PAGE_SIZE};

// =============================================================================
// RESPONSES
// =============================================================================

/// A message as delivered to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FormattedMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub body: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Opaque metadata; `gif` holds GIF payloads, `edited`/`edited_at` mark edits
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub reply_to_message_id: Option<Uuid>,
    /// Preview of the replied-to message, absent when it was deleted
    pub reply_to: Option<ReplyPreview>,
    pub attachments: Vec<AttachmentDto>,
    pub reactions: Vec<ReactionSummary>,
    pub read_by: Vec<ReadByDto>,
    /// Whether anyone other than the viewer has read the message
    pub is_read: bool,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
}

impl FormattedMessage {
    /// Recompute the viewer-dependent read flag
    pub fn for_viewer(mut self, viewer_id: &str) -> Self {
        self.is_read = self.read_by.iter().any(|r| r.user_id != viewer_id);
        self
    }
}

/// Attachment with a time-limited download URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AttachmentDto {
    pub id: Uuid,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    /// Signed URL, null when signing failed
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Reactions on a message grouped by emoji
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReadByDto {
    pub user_id: String,
    pub name: String,
    pub read_at: DateTime<Utc>,
}

/// Small preview of the message being replied to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReplyPreview {
    pub id: Uuid,
    pub body: Option<String>,
    pub sender_name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageListDto {
    pub messages: Vec<FormattedMessage>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageEnvelopeDto {
    pub message: FormattedMessage,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReactionListDto {
    pub reactions: Vec<ReactionSummary>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MarkReadResponseDto {
    /// Number of messages newly marked as read
    pub marked: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteMessageResponseDto {
    pub deleted: bool,
}

// =============================================================================
// REQUESTS
// =============================================================================

/// Query params for reading message history
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListMessagesQuery {
    /// Page size (default: 50, max: 100)
    #[param(minimum = 1, maximum = 100)]
    pub limit: Option<i64>,
    /// Timestamp boundary returned as `created_at` of a previously seen message
    pub cursor: Option<DateTime<Utc>>,
    /// `older` (default) or `newer`, relative to the cursor
    pub direction: Option<PageDirection>,
}

impl ListMessagesQuery {
    /// Requested page size clamped to the allowed range
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

/// GIF picked from an external provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GifPayload {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Send message form for OpenAPI documentation
/// Note: the handler reads the multipart stream directly.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct SendMessageFormDto {
    /// Message text
    pub content: Option<String>,
    /// text, image, file, video, gif or voice; inferred when omitted
    #[schema(rename = "type", example = "text")]
    pub message_type: Option<String>,
    #[schema(rename = "replyToMessageId")]
    pub reply_to_message_id: Option<Uuid>,
    /// JSON object
    pub metadata: Option<String>,
    /// JSON object with at least `url`
    pub gif: Option<String>,
    /// Zero or more files
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub attachments: Option<Vec<String>>,
}

/// One file received with a send request
#[derive(Debug, Clone)]
pub struct IncomingAttachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Everything a send request carries, already parsed from the wire
#[derive(Debug, Clone, Default)]
pub struct SendMessageInput {
    pub body: Option<String>,
    pub message_type: Option<MessageType>,
    pub reply_to_message_id: Option<Uuid>,
    pub metadata: Option<Value>,
    pub gif: Option<GifPayload>,
    pub attachments: Vec<IncomingAttachment>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct EditMessageDto {
    #[validate(length(max = 5000, message = "content must be at most 5000 characters"))]
    pub content: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ReactionRequestDto {
    #[validate(custom(function = "validate_emoji"))]
    #[schema(example = "👍")]
    pub emoji: String,
}

fn validate_emoji(emoji: &str) -> Result<(), validator::ValidationError> {
    let trimmed = emoji.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_EMOJI_BYTES {
        let mut err = validator::ValidationError::new("emoji");
        err.message = Some(format!("emoji must be 1 to {} bytes", MAX_EMOJI_BYTES).into());
        return Err(err);
    }
    Ok(())
}

/// Body length check shared by send and edit
pub fn body_within_limit(body: &str) -> bool {
    body.chars().count() <= MAX_BODY_CHARS
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, Type};
use utoipa::ToSchema;
use uuid::Uuid;

/// Message type enum matching database enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type, ToSchema)]
#[sqlx(type_name = "message_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
    Video,
    Gif,
    Voice,
}

impl MessageType {
    /// Infer the type of an attachment message from the first file's MIME type
    pub fn from_mime(mime_type: &str) -> Self {
        let mime_type = mime_type.to_ascii_lowercase();
        if mime_type.starts_with("image/") {
            MessageType::Image
        } else if mime_type.starts_with("video/") {
            MessageType::Video
        } else if mime_type.starts_with("audio/") {
            MessageType::Voice
        } else {
            MessageType::File
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Text => write!(f, "text"),
            MessageType::Image => write!(f, "image"),
            MessageType::File => write!(f, "file"),
            MessageType::Video => write!(f, "video"),
            MessageType::Gif => write!(f, "gif"),
            MessageType::Voice => write!(f, "voice"),
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            "video" => Ok(MessageType::Video),
            "gif" => Ok(MessageType::Gif),
            "voice" => Ok(MessageType::Voice),
            other => Err(format!("Unknown message type '{}'", other)),
        }
    }
}

/// Which side of the cursor a history page is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PageDirection {
    /// Messages created strictly before the cursor
    #[default]
    Older,
    /// Messages created strictly after the cursor
    Newer,
}

/// Database model for messages
#[derive(Debug, Clone, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: String,
    pub body: Option<String>,
    pub message_type: MessageType,
    pub reply_to_message_id: Option<Uuid>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_edited(&self) -> bool {
        self.metadata
            .get("edited")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Data for creating a new message
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: String,
    pub body: Option<String>,
    pub message_type: MessageType,
    pub reply_to_message_id: Option<Uuid>,
    pub metadata: Value,
}

/// Database model for message attachments
#[derive(Debug, Clone, FromRow)]
pub struct Attachment {
    pub id: Uuid,
    pub message_id: Uuid,
    pub storage_path: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub thumbnail_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Data for recording an uploaded attachment
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub message_id: Uuid,
    pub storage_path: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// Database model for message reactions
#[derive(Debug, Clone, FromRow)]
pub struct Reaction {
    pub message_id: Uuid,
    pub user_id: String,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Database model for read receipts
#[derive(Debug, Clone, FromRow)]
pub struct ReadReceipt {
    pub message_id: Uuid,
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

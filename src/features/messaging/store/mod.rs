//! Persistence seam for the messaging feature
//!
//! Services only talk to [`MessagingStore`]. Production wiring uses
//! [`PostgresMessagingStore`]; tests use the in-memory store.

#[cfg(test)]
pub mod memory;
mod postgres;

pub use postgres::PostgresMessagingStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::core::error::Result;
use crate::features::messaging::models::{
    Attachment, CommunityMember, ContactPolicy, Conversation, Message, NewAttachment,
    NewConversation, NewMessage, PageDirection, Participant, Reaction, ReadReceipt,
};

/// One page of history to read
#[derive(Debug, Clone, Copy)]
pub struct MessagePage {
    pub limit: i64,
    pub cursor: Option<DateTime<Utc>>,
    pub direction: PageDirection,
}

#[async_trait]
pub trait MessagingStore: Send + Sync {
    // -- membership (read-only) ---------------------------------------------

    async fn find_member(&self, community_id: Uuid, user_id: &str)
        -> Result<Option<CommunityMember>>;

    /// Members of `community_id` among `user_ids`; unknown ids are skipped
    async fn find_members(
        &self,
        community_id: Uuid,
        user_ids: &[String],
    ) -> Result<Vec<CommunityMember>>;

    /// Contact policy of a community, default when none is configured
    async fn contact_policy(&self, community_id: Uuid) -> Result<ContactPolicy>;

    // -- conversations ------------------------------------------------------

    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Conversations `user_id` participates in, most recent activity first
    async fn list_conversations_for_user(
        &self,
        community_id: Uuid,
        user_id: &str,
    ) -> Result<Vec<Conversation>>;

    /// Non-group conversations shared by both users, oldest first
    async fn find_direct_conversations(
        &self,
        community_id: Uuid,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<Conversation>>;

    async fn insert_conversation(&self, new: NewConversation) -> Result<Conversation>;

    async fn insert_participants(&self, conversation_id: Uuid, user_ids: &[String]) -> Result<()>;

    /// Atomically create the 1:1 conversation of `new.created_by` and
    /// `peer_id` with both participants, unless the pair already has one.
    /// Returns the pair's conversation and whether this call created it.
    async fn insert_direct_conversation(
        &self,
        new: NewConversation,
        peer_id: &str,
    ) -> Result<(Conversation, bool)>;

    /// Hard delete, cascading to participants
    async fn delete_conversation(&self, id: Uuid) -> Result<()>;

    async fn list_participants(&self, conversation_id: Uuid) -> Result<Vec<Participant>>;

    async fn is_participant(&self, conversation_id: Uuid, user_id: &str) -> Result<bool>;

    async fn touch_conversation(&self, conversation_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn last_message(&self, conversation_id: Uuid) -> Result<Option<Message>>;

    async fn count_unread(&self, conversation_id: Uuid, user_id: &str) -> Result<i64>;

    // -- messages -----------------------------------------------------------

    /// Non-deleted messages of a page, always in ascending `created_at` order
    async fn list_messages(&self, conversation_id: Uuid, page: MessagePage) -> Result<Vec<Message>>;

    /// A non-deleted message by id
    async fn find_message(&self, id: Uuid) -> Result<Option<Message>>;

    /// Non-deleted messages among `ids`, in no particular order
    async fn find_messages(&self, ids: &[Uuid]) -> Result<Vec<Message>>;

    async fn insert_message(&self, new: NewMessage) -> Result<Message>;

    async fn update_message(
        &self,
        id: Uuid,
        body: Option<String>,
        metadata: Value,
    ) -> Result<Option<Message>>;

    /// Returns false when the message was missing or already deleted
    async fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    async fn insert_attachment(&self, new: NewAttachment) -> Result<Attachment>;

    async fn attachments_for(&self, message_ids: &[Uuid]) -> Result<Vec<Attachment>>;

    /// Reactions ordered by `created_at`
    async fn reactions_for(&self, message_ids: &[Uuid]) -> Result<Vec<Reaction>>;

    /// Returns false when the reaction already existed
    async fn add_reaction(&self, message_id: Uuid, user_id: &str, emoji: &str) -> Result<bool>;

    /// Returns false when there was nothing to remove
    async fn remove_reaction(&self, message_id: Uuid, user_id: &str, emoji: &str)
        -> Result<bool>;

    /// Receipts ordered by `read_at`
    async fn read_receipts_for(&self, message_ids: &[Uuid]) -> Result<Vec<ReadReceipt>>;

    /// Record receipts for every unread message from others; returns how many
    async fn mark_read(&self, conversation_id: Uuid, user_id: &str, at: DateTime<Utc>)
        -> Result<u64>;
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::{MessagePage, MessagingStore};
use crate::core::error::Result;
use crate::features::messaging::models::{
    direct_pair_key, Attachment, CommunityMember, ContactPolicy, Conversation, Message,
    NewAttachment, NewConversation, NewMessage, PageDirection, Participant, Reaction,
    ReadReceipt,
};

const CONVERSATION_COLUMNS: &str =
    "c.id, c.community_id, c.is_group, c.title, c.created_by, c.created_at, c.last_message_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, body, message_type, \
     reply_to_message_id, metadata, created_at, deleted_at";

/// [`MessagingStore`] backed by the service's Postgres database
pub struct PostgresMessagingStore {
    pool: PgPool,
}

impl PostgresMessagingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessagingStore for PostgresMessagingStore {
    async fn find_member(
        &self,
        community_id: Uuid,
        user_id: &str,
    ) -> Result<Option<CommunityMember>> {
        let member = sqlx::query_as::<_, CommunityMember>(
            r#"
            SELECT community_id, user_id, role, display_name, avatar_url
            FROM community_members
            WHERE community_id = $1 AND user_id = $2
            "#,
        )
        .bind(community_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(member)
    }

    async fn find_members(
        &self,
        community_id: Uuid,
        user_ids: &[String],
    ) -> Result<Vec<CommunityMember>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let members = sqlx::query_as::<_, CommunityMember>(
            r#"
            SELECT community_id, user_id, role, display_name, avatar_url
            FROM community_members
            WHERE community_id = $1 AND user_id = ANY($2)
            "#,
        )
        .bind(community_id)
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    async fn contact_policy(&self, community_id: Uuid) -> Result<ContactPolicy> {
        let policy = sqlx::query_as::<_, ContactPolicy>(
            r#"
            SELECT restrict_member_to_elevated
            FROM community_contact_policies
            WHERE community_id = $1
            "#,
        )
        .bind(community_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(policy.unwrap_or_default())
    }

    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {} FROM conversations c WHERE c.id = $1",
            CONVERSATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn list_conversations_for_user(
        &self,
        community_id: Uuid,
        user_id: &str,
    ) -> Result<Vec<Conversation>> {
        let conversations = sqlx::query_as::<_, Conversation>(&format!(
            r#"
            SELECT {}
            FROM conversations c
            JOIN conversation_participants p ON p.conversation_id = c.id
            WHERE c.community_id = $1 AND p.user_id = $2
            ORDER BY COALESCE(c.last_message_at, c.created_at) DESC, c.id
            "#,
            CONVERSATION_COLUMNS
        ))
        .bind(community_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(conversations)
    }

    async fn find_direct_conversations(
        &self,
        community_id: Uuid,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<Conversation>> {
        let conversations = sqlx::query_as::<_, Conversation>(&format!(
            r#"
            SELECT {}
            FROM conversations c
            JOIN conversation_participants a ON a.conversation_id = c.id AND a.user_id = $2
            JOIN conversation_participants b ON b.conversation_id = c.id AND b.user_id = $3
            WHERE c.community_id = $1 AND c.is_group = FALSE
            ORDER BY c.created_at ASC, c.id ASC
            "#,
            CONVERSATION_COLUMNS
        ))
        .bind(community_id)
        .bind(user_a)
        .bind(user_b)
        .fetch_all(&self.pool)
        .await?;

        Ok(conversations)
    }

    async fn insert_conversation(&self, new: NewConversation) -> Result<Conversation> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (community_id, is_group, title, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING id, community_id, is_group, title, created_by, created_at, last_message_at
            "#,
        )
        .bind(new.community_id)
        .bind(new.is_group)
        .bind(&new.title)
        .bind(&new.created_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn insert_participants(&self, conversation_id: Uuid, user_ids: &[String]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id)
            SELECT $1, UNNEST($2::text[])
            "#,
        )
        .bind(conversation_id)
        .bind(user_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_direct_conversation(
        &self,
        new: NewConversation,
        peer_id: &str,
    ) -> Result<(Conversation, bool)> {
        let pair_key = direct_pair_key(new.community_id, &new.created_by, peer_id);
        let mut tx = self.pool.begin().await?;

        // A concurrent insert of the same key waits here until the other
        // transaction commits or rolls back
        let inserted = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (community_id, is_group, title, created_by, direct_key)
            VALUES ($1, FALSE, NULL, $2, $3)
            ON CONFLICT (direct_key) WHERE direct_key IS NOT NULL DO NOTHING
            RETURNING id, community_id, is_group, title, created_by, created_at, last_message_at
            "#,
        )
        .bind(new.community_id)
        .bind(&new.created_by)
        .bind(&pair_key)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(conversation) = inserted else {
            tx.rollback().await?;
            let existing = sqlx::query_as::<_, Conversation>(&format!(
                "SELECT {} FROM conversations c WHERE c.direct_key = $1",
                CONVERSATION_COLUMNS
            ))
            .bind(&pair_key)
            .fetch_one(&self.pool)
            .await?;
            return Ok((existing, false));
        };

        let members = vec![new.created_by, peer_id.to_string()];
        sqlx::query(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id)
            SELECT $1, UNNEST($2::text[])
            "#,
        )
        .bind(conversation.id)
        .bind(&members)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((conversation, true))
    }

    async fn delete_conversation(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_participants(&self, conversation_id: Uuid) -> Result<Vec<Participant>> {
        let participants = sqlx::query_as::<_, Participant>(
            r#"
            SELECT conversation_id, user_id, joined_at
            FROM conversation_participants
            WHERE conversation_id = $1
            ORDER BY joined_at, user_id
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(participants)
    }

    async fn is_participant(&self, conversation_id: Uuid, user_id: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM conversation_participants
                WHERE conversation_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn touch_conversation(&self, conversation_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_at = GREATEST(COALESCE(last_message_at, $2), $2)
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn last_message(&self, conversation_id: Uuid) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(&format!(
            r#"
            SELECT {} FROM messages
            WHERE conversation_id = $1 AND deleted_at IS NULL
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn count_unread(&self, conversation_id: Uuid, user_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM messages m
            WHERE m.conversation_id = $1
              AND m.deleted_at IS NULL
              AND m.sender_id <> $2
              AND NOT EXISTS (
                  SELECT 1 FROM message_read_receipts r
                  WHERE r.message_id = m.id AND r.user_id = $2
              )
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn list_messages(&self, conversation_id: Uuid, page: MessagePage) -> Result<Vec<Message>> {
        let (predicate, order) = match (page.cursor, page.direction) {
            (None, _) => ("", "DESC"),
            (Some(_), PageDirection::Older) => ("AND created_at < $3", "DESC"),
            (Some(_), PageDirection::Newer) => ("AND created_at > $3", "ASC"),
        };

        let sql = format!(
            r#"
            SELECT {} FROM messages
            WHERE conversation_id = $1 AND deleted_at IS NULL {}
            ORDER BY created_at {order}, id {order}
            LIMIT $2
            "#,
            MESSAGE_COLUMNS,
            predicate,
            order = order
        );

        let mut query = sqlx::query_as::<_, Message>(&sql)
            .bind(conversation_id)
            .bind(page.limit);
        if let Some(cursor) = page.cursor {
            query = query.bind(cursor);
        }

        let mut messages = query.fetch_all(&self.pool).await?;
        if order == "DESC" {
            messages.reverse();
        }

        Ok(messages)
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(&format!(
            "SELECT {} FROM messages WHERE id = $1 AND deleted_at IS NULL",
            MESSAGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn find_messages(&self, ids: &[Uuid]) -> Result<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {} FROM messages WHERE id = ANY($1) AND deleted_at IS NULL",
            MESSAGE_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        let message = sqlx::query_as::<_, Message>(&format!(
            r#"
            INSERT INTO messages
                (conversation_id, sender_id, body, message_type, reply_to_message_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(new.conversation_id)
        .bind(&new.sender_id)
        .bind(&new.body)
        .bind(new.message_type)
        .bind(new.reply_to_message_id)
        .bind(&new.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(message)
    }

    async fn update_message(
        &self,
        id: Uuid,
        body: Option<String>,
        metadata: Value,
    ) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(&format!(
            r#"
            UPDATE messages SET body = $2, metadata = $3
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(id)
        .bind(&body)
        .bind(&metadata)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result =
            sqlx::query("UPDATE messages SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_attachment(&self, new: NewAttachment) -> Result<Attachment> {
        let attachment = sqlx::query_as::<_, Attachment>(
            r#"
            INSERT INTO message_attachments (message_id, storage_path, file_name, mime_type, size_bytes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, message_id, storage_path, file_name, mime_type, size_bytes,
                      thumbnail_path, created_at
            "#,
        )
        .bind(new.message_id)
        .bind(&new.storage_path)
        .bind(&new.file_name)
        .bind(&new.mime_type)
        .bind(new.size_bytes)
        .fetch_one(&self.pool)
        .await?;

        Ok(attachment)
    }

    async fn attachments_for(&self, message_ids: &[Uuid]) -> Result<Vec<Attachment>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        let attachments = sqlx::query_as::<_, Attachment>(
            r#"
            SELECT id, message_id, storage_path, file_name, mime_type, size_bytes,
                   thumbnail_path, created_at
            FROM message_attachments
            WHERE message_id = ANY($1)
            ORDER BY created_at, id
            "#,
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(attachments)
    }

    async fn reactions_for(&self, message_ids: &[Uuid]) -> Result<Vec<Reaction>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        let reactions = sqlx::query_as::<_, Reaction>(
            r#"
            SELECT message_id, user_id, emoji, created_at
            FROM message_reactions
            WHERE message_id = ANY($1)
            ORDER BY created_at
            "#,
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(reactions)
    }

    async fn add_reaction(&self, message_id: Uuid, user_id: &str, emoji: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_reactions (message_id, user_id, emoji)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, user_id, emoji) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_reaction(
        &self,
        message_id: Uuid,
        user_id: &str,
        emoji: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn read_receipts_for(&self, message_ids: &[Uuid]) -> Result<Vec<ReadReceipt>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        let receipts = sqlx::query_as::<_, ReadReceipt>(
            r#"
            SELECT message_id, user_id, read_at
            FROM message_read_receipts
            WHERE message_id = ANY($1)
            ORDER BY read_at, user_id
            "#,
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(receipts)
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO message_read_receipts (message_id, user_id, read_at)
            SELECT m.id, $2, $3 FROM messages m
            WHERE m.conversation_id = $1
              AND m.deleted_at IS NULL
              AND m.sender_id <> $2
            ON CONFLICT (message_id, user_id) DO NOTHING
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

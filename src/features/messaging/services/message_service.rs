use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::config::MessagingConfig;
use crate::core::error::{AppError, Result};
use crate::features::messaging::dtos::{
    body_within_limit, EditMessageDto, FormattedMessage, GifPayload, IncomingAttachment,
    ListMessagesQuery, ReactionSummary, SendMessageInput,
};
use crate::features::messaging::models::{
    Attachment, Conversation, Message, MessageType, NewAttachment, NewMessage,
};
use crate::features::messaging::services::formatter::{group_reactions, MessageFormatter};
use crate::features::messaging::services::message_cache::{CachedPage, MessageCache};
use crate::features::messaging::store::{MessagePage, MessagingStore};
use crate::modules::audit::{AuditDispatcher, AuditRecord};
use crate::modules::storage::BlobGateway;
use crate::shared::constants::{MAX_ATTACHMENTS_PER_MESSAGE, MAX_BODY_CHARS};
use crate::shared::context::RequestContext;

/// Sends, lists and mutates messages inside conversations
pub struct MessageService {
    store: Arc<dyn MessagingStore>,
    blobs: Arc<dyn BlobGateway>,
    cache: Arc<dyn MessageCache>,
    formatter: MessageFormatter,
    audit: AuditDispatcher,
    max_attachment_bytes: usize,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn MessagingStore>,
        blobs: Arc<dyn BlobGateway>,
        cache: Arc<dyn MessageCache>,
        audit: AuditDispatcher,
        config: &MessagingConfig,
    ) -> Self {
        let formatter = MessageFormatter::new(
            Arc::clone(&store),
            Arc::clone(&blobs),
            config.signed_url_ttl_secs,
        );
        Self {
            store,
            blobs,
            cache,
            formatter,
            audit,
            max_attachment_bytes: config.max_attachment_bytes,
        }
    }

    /// One page of history, ascending by creation time
    pub async fn list(
        &self,
        ctx: &RequestContext,
        conversation_id: Uuid,
        query: &ListMessagesQuery,
    ) -> Result<Vec<FormattedMessage>> {
        let conversation = self.authorize_participant(ctx, conversation_id).await?;
        let limit = query.limit();

        let mut generation = None;
        if query.cursor.is_none() {
            if let Some(page) = self.cache.get(conversation_id).await {
                if page.satisfies(limit as usize) {
                    debug!(%conversation_id, "Serving first page from cache");
                    return Ok(viewer_page(page.newest(limit as usize), &ctx.caller_id));
                }
            }
            generation = Some(self.cache.generation(conversation_id).await);
        }

        let page = MessagePage {
            limit,
            cursor: query.cursor,
            direction: query.direction.unwrap_or_default(),
        };
        let messages = ctx
            .bound(
                "list messages",
                self.store.list_messages(conversation_id, page),
            )
            .await?;
        let fetched = messages.len();
        let formatted = self
            .formatter
            .format_page(ctx, conversation.community_id, messages)
            .await?;

        if let Some(generation) = generation {
            self.cache
                .put(
                    conversation_id,
                    CachedPage {
                        messages: formatted.clone(),
                        exhaustive: (fetched as i64) < limit,
                    },
                    generation,
                )
                .await;
        }

        Ok(viewer_page(formatted, &ctx.caller_id))
    }

    /// Persist a message and its attachments.
    ///
    /// The message row is written first; attachments follow one by one and a
    /// file that fails to upload or record is skipped.
    pub async fn send(
        &self,
        ctx: &RequestContext,
        conversation_id: Uuid,
        input: SendMessageInput,
    ) -> Result<FormattedMessage> {
        let body = input
            .body
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string);
        let message_type = self.validate_send(body.as_deref(), &input)?;

        let conversation = self.authorize_participant(ctx, conversation_id).await?;
        let sender = ctx
            .bound(
                "load sender profile",
                self.store.find_member(conversation.community_id, &ctx.caller_id),
            )
            .await?
            .ok_or_else(|| {
                warn!(user_id = %ctx.caller_id, "Sender is no longer a community member");
                AppError::Forbidden("You are not a member of this community".to_string())
            })?;

        let reply_target = match input.reply_to_message_id {
            Some(reply_id) => Some(self.load_reply_target(ctx, conversation_id, reply_id).await?),
            None => None,
        };

        let mut metadata = match input.metadata {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(AppError::Validation(
                    "metadata must be a JSON object".to_string(),
                ))
            }
        };
        if let Some(gif) = &input.gif {
            metadata.insert("gif".to_string(), json!(gif));
        }

        let message = ctx
            .bound(
                "insert message",
                self.store.insert_message(NewMessage {
                    conversation_id,
                    sender_id: ctx.caller_id.clone(),
                    body,
                    message_type,
                    reply_to_message_id: input.reply_to_message_id,
                    metadata: Value::Object(metadata),
                }),
            )
            .await?;

        let attachments = self
            .store_attachments(ctx, &message, input.attachments)
            .await;

        if let Err(e) = ctx
            .bound(
                "touch conversation",
                self.store.touch_conversation(conversation_id, message.created_at),
            )
            .await
        {
            error!(%conversation_id, "Failed to update last_message_at: {}", e);
        }

        let attachment_count = attachments.len();
        let formatted = self
            .formatter
            .format_sent(ctx, message, attachments, &sender, reply_target.as_ref())
            .await;

        self.cache.append(conversation_id, formatted.clone()).await;
        self.audit.record(
            AuditRecord::new(
                ctx.caller_id.clone(),
                "message.send",
                "messages",
                formatted.id,
            )
            .with_payload(json!({
                "conversation_id": conversation_id,
                "type": formatted.message_type,
                "attachments": attachment_count,
            })),
        );

        info!(
            message_id = %formatted.id,
            %conversation_id,
            sender_id = %ctx.caller_id,
            attachments = attachment_count,
            "Message sent"
        );

        Ok(formatted.for_viewer(&ctx.caller_id))
    }

    /// Update body and metadata of the caller's own message
    pub async fn edit(
        &self,
        ctx: &RequestContext,
        message_id: Uuid,
        dto: EditMessageDto,
    ) -> Result<FormattedMessage> {
        let (message, conversation) = self.load_own_message(ctx, message_id).await?;

        let body = match dto.content {
            Some(content) => {
                let trimmed = content.trim().to_string();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            None => message.body.clone(),
        };
        if let Some(body) = &body {
            if !body_within_limit(body) {
                return Err(AppError::Validation(format!(
                    "content must be at most {} characters",
                    MAX_BODY_CHARS
                )));
            }
        }

        let mut metadata = match message.metadata.clone() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        match dto.metadata {
            Some(Value::Object(patch)) => metadata.extend(patch),
            Some(Value::Null) | None => {}
            Some(_) => {
                return Err(AppError::Validation(
                    "metadata must be a JSON object".to_string(),
                ))
            }
        }
        metadata.insert("edited".to_string(), Value::Bool(true));
        metadata.insert("edited_at".to_string(), json!(Utc::now()));

        let has_gif = metadata.get("gif").is_some_and(|g| !g.is_null());
        if body.is_none() && !has_gif {
            let attachments = ctx
                .bound(
                    "load attachments",
                    self.store.attachments_for(&[message.id]),
                )
                .await?;
            if attachments.is_empty() {
                return Err(AppError::Validation(
                    "A message needs text, a GIF or at least one attachment".to_string(),
                ));
            }
        }

        let updated = ctx
            .bound(
                "update message",
                self.store
                    .update_message(message.id, body, Value::Object(metadata)),
            )
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Message {} not found", message_id)))?;

        self.cache.invalidate(conversation.id).await;
        self.audit.record(AuditRecord::new(
            ctx.caller_id.clone(),
            "message.edit",
            "messages",
            message_id,
        ));

        let mut formatted = self
            .formatter
            .format_page(ctx, conversation.community_id, vec![updated])
            .await?;
        formatted
            .pop()
            .map(|m| m.for_viewer(&ctx.caller_id))
            .ok_or_else(|| AppError::Internal("Edited message could not be formatted".to_string()))
    }

    /// Soft-delete the caller's own message
    pub async fn soft_delete(&self, ctx: &RequestContext, message_id: Uuid) -> Result<()> {
        let (message, conversation) = self.load_own_message(ctx, message_id).await?;

        let deleted = ctx
            .bound(
                "delete message",
                self.store.soft_delete_message(message.id, Utc::now()),
            )
            .await?;
        if !deleted {
            return Err(AppError::NotFound(format!("Message {} not found", message_id)));
        }

        self.cache.invalidate(conversation.id).await;
        self.audit.record(
            AuditRecord::new(
                ctx.caller_id.clone(),
                "message.delete",
                "messages",
                message_id,
            )
            .with_payload(json!({ "conversation_id": conversation.id })),
        );

        info!(%message_id, conversation_id = %conversation.id, "Message deleted");
        Ok(())
    }

    /// Add the caller's reaction, or remove it when already present
    pub async fn toggle_reaction(
        &self,
        ctx: &RequestContext,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<Vec<ReactionSummary>> {
        let emoji = emoji.trim();
        let message = self.load_message(ctx, message_id).await?;
        self.authorize_participant(ctx, message.conversation_id)
            .await?;

        let removed = ctx
            .bound(
                "remove reaction",
                self.store.remove_reaction(message_id, &ctx.caller_id, emoji),
            )
            .await?;
        if !removed {
            ctx.bound(
                "add reaction",
                self.store.add_reaction(message_id, &ctx.caller_id, emoji),
            )
            .await?;
        }

        self.cache.invalidate(message.conversation_id).await;
        self.audit.record(
            AuditRecord::new(
                ctx.caller_id.clone(),
                if removed {
                    "message.unreact"
                } else {
                    "message.react"
                },
                "message_reactions",
                message_id,
            )
            .with_payload(json!({ "emoji": emoji })),
        );

        let reactions = ctx
            .bound(
                "load reactions",
                self.store.reactions_for(&[message_id]),
            )
            .await?;
        Ok(group_reactions(&reactions))
    }

    /// Record read receipts for everything others sent; returns how many were new
    pub async fn mark_read(&self, ctx: &RequestContext, conversation_id: Uuid) -> Result<u64> {
        self.authorize_participant(ctx, conversation_id).await?;

        let marked = ctx
            .bound(
                "mark read",
                self.store
                    .mark_read(conversation_id, &ctx.caller_id, Utc::now()),
            )
            .await?;

        if marked > 0 {
            self.cache.invalidate(conversation_id).await;
            self.audit.record(
                AuditRecord::new(
                    ctx.caller_id.clone(),
                    "conversation.read",
                    "conversations",
                    conversation_id,
                )
                .with_payload(json!({ "marked": marked })),
            );
        }

        debug!(%conversation_id, marked, "Marked messages as read");
        Ok(marked)
    }

    /// Every check that needs no I/O; returns the effective message type
    fn validate_send(&self, body: Option<&str>, input: &SendMessageInput) -> Result<MessageType> {
        if let Some(gif) = &input.gif {
            validate_gif(gif)?;
        }
        if body.is_none() && input.gif.is_none() && input.attachments.is_empty() {
            return Err(AppError::Validation(
                "A message needs text, a GIF or at least one attachment".to_string(),
            ));
        }
        if let Some(body) = body {
            if !body_within_limit(body) {
                return Err(AppError::Validation(format!(
                    "content must be at most {} characters",
                    MAX_BODY_CHARS
                )));
            }
        }
        if input.attachments.len() > MAX_ATTACHMENTS_PER_MESSAGE {
            return Err(AppError::Validation(format!(
                "At most {} attachments per message",
                MAX_ATTACHMENTS_PER_MESSAGE
            )));
        }
        if let Some(oversized) = input
            .attachments
            .iter()
            .find(|a| a.data.len() > self.max_attachment_bytes)
        {
            return Err(AppError::Validation(format!(
                "File '{}' is too large. Maximum size is {} bytes ({} MB)",
                oversized.file_name,
                self.max_attachment_bytes,
                self.max_attachment_bytes / 1024 / 1024
            )));
        }

        let message_type = if input.gif.is_some() {
            MessageType::Gif
        } else if let Some(first) = input.attachments.first() {
            MessageType::from_mime(&first.content_type)
        } else {
            MessageType::Text
        };
        match input.message_type {
            Some(requested) if requested != message_type => Err(AppError::Validation(format!(
                "type '{}' does not match the message content, which is '{}'",
                requested, message_type
            ))),
            _ => Ok(message_type),
        }
    }

    async fn store_attachments(
        &self,
        ctx: &RequestContext,
        message: &Message,
        files: Vec<IncomingAttachment>,
    ) -> Vec<Attachment> {
        let mut stored = Vec::with_capacity(files.len());
        for file in files {
            match self.store_attachment(ctx, message, file).await {
                Ok(attachment) => stored.push(attachment),
                Err(e) => error!(
                    message_id = %message.id,
                    "Skipping attachment that could not be stored: {}", e
                ),
            }
        }
        stored
    }

    async fn store_attachment(
        &self,
        ctx: &RequestContext,
        message: &Message,
        file: IncomingAttachment,
    ) -> Result<Attachment> {
        let size_bytes = file.data.len() as i64;
        let path = format!(
            "messages/{}/{}/{}.{}",
            message.conversation_id,
            message.id,
            Uuid::new_v4(),
            file_extension(&file.content_type, &file.file_name)
        );

        let storage_path = ctx
            .bound(
                "upload attachment",
                self.blobs.upload(&path, file.data, &file.content_type),
            )
            .await?;
        debug!("Attachment uploaded: {}", storage_path);

        ctx.bound(
            "insert attachment",
            self.store.insert_attachment(NewAttachment {
                message_id: message.id,
                storage_path,
                file_name: file.file_name,
                mime_type: file.content_type,
                size_bytes,
            }),
        )
        .await
    }

    /// The conversation must exist in the caller's community and list the
    /// caller as a participant; checked on every call.
    async fn authorize_participant(
        &self,
        ctx: &RequestContext,
        conversation_id: Uuid,
    ) -> Result<Conversation> {
        let conversation = ctx
            .bound(
                "load conversation",
                self.store.find_conversation(conversation_id),
            )
            .await?
            .filter(|c| c.community_id == ctx.community_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("Conversation {} not found", conversation_id))
            })?;

        let is_participant = ctx
            .bound(
                "check participant",
                self.store.is_participant(conversation_id, &ctx.caller_id),
            )
            .await?;
        if !is_participant {
            warn!(
                user_id = %ctx.caller_id,
                %conversation_id,
                "Rejected access by non-participant"
            );
            return Err(AppError::Forbidden(
                "You are not a participant of this conversation".to_string(),
            ));
        }

        Ok(conversation)
    }

    async fn load_message(&self, ctx: &RequestContext, message_id: Uuid) -> Result<Message> {
        ctx.bound("load message", self.store.find_message(message_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Message {} not found", message_id)))
    }

    async fn load_own_message(
        &self,
        ctx: &RequestContext,
        message_id: Uuid,
    ) -> Result<(Message, Conversation)> {
        let message = self.load_message(ctx, message_id).await?;
        let conversation = self
            .authorize_participant(ctx, message.conversation_id)
            .await?;
        if message.sender_id != ctx.caller_id {
            warn!(
                user_id = %ctx.caller_id,
                %message_id,
                "Rejected change to another user's message"
            );
            return Err(AppError::Forbidden(
                "Only the sender can change this message".to_string(),
            ));
        }
        Ok((message, conversation))
    }

    async fn load_reply_target(
        &self,
        ctx: &RequestContext,
        conversation_id: Uuid,
        reply_id: Uuid,
    ) -> Result<Message> {
        let target = ctx
            .bound("load reply target", self.store.find_message(reply_id))
            .await?;
        match target {
            Some(target) if target.conversation_id == conversation_id => Ok(target),
            _ => Err(AppError::NotFound(format!(
                "Reply target {} not found in this conversation",
                reply_id
            ))),
        }
    }
}

fn viewer_page(messages: Vec<FormattedMessage>, viewer_id: &str) -> Vec<FormattedMessage> {
    messages
        .into_iter()
        .map(|m| m.for_viewer(viewer_id))
        .collect()
}

fn validate_gif(gif: &GifPayload) -> Result<()> {
    if gif.url.trim().is_empty() {
        return Err(AppError::Validation("gif.url is required".to_string()));
    }
    Ok(())
}

/// Extension for the stored object, from the MIME type or else the file name
fn file_extension(content_type: &str, file_name: &str) -> String {
    let known = match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        "audio/mpeg" => Some("mp3"),
        "audio/ogg" => Some("ogg"),
        "audio/webm" => Some("weba"),
        "application/pdf" => Some("pdf"),
        _ => None,
    };
    if let Some(ext) = known {
        return ext.to_string();
    }

    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::messaging::models::MemberRole;
    use crate::features::messaging::services::message_cache::{LruMessageCache, NoopMessageCache};
    use crate::features::messaging::store::memory::InMemoryMessagingStore;
    use crate::modules::audit::AuditDispatcher;
    use crate::shared::test_helpers::{FakeBlobGateway, RecordingAuditSink};
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryMessagingStore>,
        blobs: Arc<FakeBlobGateway>,
        audit: Arc<RecordingAuditSink>,
        service: MessageService,
        community: Uuid,
        conversation: Uuid,
        other_conversation: Uuid,
    }

    fn fixture_with_cache(cache: Arc<dyn MessageCache>) -> Fixture {
        let community = Uuid::new_v4();
        let store = Arc::new(InMemoryMessagingStore::new());
        for user in ["alice", "bob", "carol"] {
            store.add_member(community, user, MemberRole::Member);
        }
        let conversation = store
            .seed_conversation(community, false, &["alice", "bob"])
            .id;
        let other_conversation = store
            .seed_conversation(community, false, &["alice", "carol"])
            .id;
        let blobs = Arc::new(FakeBlobGateway::default());
        let audit = Arc::new(RecordingAuditSink::default());
        let config = MessagingConfig {
            max_attachment_bytes: 1024,
            ..MessagingConfig::default()
        };
        let service = MessageService::new(
            store.clone(),
            blobs.clone(),
            cache,
            AuditDispatcher::new(audit.clone()),
            &config,
        );
        Fixture {
            store,
            blobs,
            audit,
            service,
            community,
            conversation,
            other_conversation,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_cache(Arc::new(NoopMessageCache))
    }

    fn ctx(f: &Fixture, caller: &str) -> RequestContext {
        RequestContext::new(caller, f.community, Duration::from_secs(5))
    }

    fn text(body: &str) -> SendMessageInput {
        SendMessageInput {
            body: Some(body.to_string()),
            ..Default::default()
        }
    }

    fn file(name: &str, content_type: &str, size: usize) -> IncomingAttachment {
        IncomingAttachment {
            file_name: name.to_string(),
            content_type: content_type.to_string(),
            data: vec![0u8; size],
        }
    }

    async fn send_text(f: &Fixture, caller: &str, body: &str) -> FormattedMessage {
        f.service
            .send(&ctx(f, caller), f.conversation, text(body))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_text_message() {
        let f = fixture();
        let sent = send_text(&f, "alice", "  hello  ").await;

        assert_eq!(sent.body.as_deref(), Some("hello"));
        assert_eq!(sent.message_type, MessageType::Text);
        assert_eq!(sent.sender_name, "User alice");
        assert!(!sent.is_read);

        let listed = f
            .service
            .list(&ctx(&f, "bob"), f.conversation, &ListMessagesQuery::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, sent.id);
        assert_eq!(f.audit.actions(1).await, vec!["message.send"]);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected_without_rows() {
        let f = fixture();
        let err = f
            .service
            .send(&ctx(&f, "alice"), f.conversation, text("   "))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(f.store.message_rows().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_attachment_rejects_whole_request() {
        let f = fixture();
        let input = SendMessageInput {
            body: Some("see attached".to_string()),
            attachments: vec![
                file("small.png", "image/png", 10),
                file("huge.pdf", "application/pdf", 2048),
            ],
            ..Default::default()
        };

        let err = f
            .service
            .send(&ctx(&f, "alice"), f.conversation, input)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(f.store.message_rows().is_empty());
        assert!(f.blobs.uploaded_keys().is_empty());
    }

    #[tokio::test]
    async fn test_attachment_message_type_and_paths() {
        let f = fixture();
        let input = SendMessageInput {
            attachments: vec![
                file("clip.mp4", "video/mp4", 10),
                file("notes.txt", "text/plain", 10),
            ],
            ..Default::default()
        };

        let sent = f
            .service
            .send(&ctx(&f, "alice"), f.conversation, input)
            .await
            .unwrap();

        assert_eq!(sent.message_type, MessageType::Video);
        assert!(sent.body.is_none());
        assert_eq!(sent.attachments.len(), 2);
        assert!(sent.attachments.iter().all(|a| a.url.is_some()));

        let keys = f.blobs.uploaded_keys();
        let prefix = format!("private/messages/{}/{}/", f.conversation, sent.id);
        assert!(keys[0].starts_with(&prefix) && keys[0].ends_with(".mp4"));
        assert!(keys[1].ends_with(".txt"));
    }

    #[tokio::test]
    async fn test_failed_upload_skips_only_that_file() {
        let f = fixture();
        f.blobs.fail_uploads_with_extension("pdf");
        let input = SendMessageInput {
            body: Some("two files".to_string()),
            attachments: vec![
                file("a.pdf", "application/pdf", 10),
                file("b.png", "image/png", 10),
            ],
            ..Default::default()
        };

        let sent = f
            .service
            .send(&ctx(&f, "alice"), f.conversation, input)
            .await
            .unwrap();

        assert_eq!(sent.attachments.len(), 1);
        assert_eq!(sent.attachments[0].file_name, "b.png");
        assert_eq!(f.store.attachment_rows().len(), 1);
        assert_eq!(f.store.message_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_timeout_keeps_message() {
        let f = fixture();
        f.blobs.stall_uploads(Duration::from_millis(200));
        let input = SendMessageInput {
            body: Some("slow".to_string()),
            attachments: vec![file("a.png", "image/png", 10)],
            ..Default::default()
        };
        let short = RequestContext::new("alice", f.community, Duration::from_millis(50));

        let sent = f.service.send(&short, f.conversation, input).await.unwrap();

        assert!(sent.attachments.is_empty());
        assert_eq!(f.store.message_rows().len(), 1);
        assert!(f.store.attachment_rows().is_empty());
    }

    #[tokio::test]
    async fn test_store_timeout_before_insert_persists_nothing() {
        let f = fixture();
        f.store.stall("insert_message", Duration::from_millis(200));
        let short = RequestContext::new("alice", f.community, Duration::from_millis(50));

        let err = f
            .service
            .send(&short, f.conversation, text("late"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Timeout(_)));
        assert!(err.is_retryable());
        assert!(f.store.message_rows().is_empty());
    }

    #[tokio::test]
    async fn test_type_must_match_content() {
        let f = fixture();
        let image_without_file = SendMessageInput {
            body: Some("no picture here".to_string()),
            message_type: Some(MessageType::Image),
            ..Default::default()
        };
        let err = f
            .service
            .send(&ctx(&f, "alice"), f.conversation, image_without_file)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let text_with_file = SendMessageInput {
            message_type: Some(MessageType::Text),
            attachments: vec![file("a.png", "image/png", 10)],
            ..Default::default()
        };
        let err = f
            .service
            .send(&ctx(&f, "alice"), f.conversation, text_with_file)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(f.store.message_rows().is_empty());

        let matching = SendMessageInput {
            message_type: Some(MessageType::Voice),
            attachments: vec![file("memo.ogg", "audio/ogg", 10)],
            ..Default::default()
        };
        let sent = f
            .service
            .send(&ctx(&f, "alice"), f.conversation, matching)
            .await
            .unwrap();
        assert_eq!(sent.message_type, MessageType::Voice);
    }

    #[tokio::test]
    async fn test_gif_message() {
        let f = fixture();
        let input = SendMessageInput {
            gif: Some(GifPayload {
                url: "https://media.example/cat.gif".to_string(),
                preview_url: None,
                title: Some("cat".to_string()),
                width: Some(200),
                height: None,
            }),
            ..Default::default()
        };
        let sent = f
            .service
            .send(&ctx(&f, "alice"), f.conversation, input)
            .await
            .unwrap();

        assert_eq!(sent.message_type, MessageType::Gif);
        assert_eq!(sent.metadata["gif"]["url"], "https://media.example/cat.gif");

        let blank = SendMessageInput {
            gif: Some(GifPayload {
                url: " ".to_string(),
                preview_url: None,
                title: None,
                width: None,
                height: None,
            }),
            ..Default::default()
        };
        let err = f
            .service
            .send(&ctx(&f, "alice"), f.conversation, blank)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_non_participant_is_forbidden() {
        let f = fixture();
        let err = f
            .service
            .send(&ctx(&f, "carol"), f.conversation, text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = f
            .service
            .list(&ctx(&f, "carol"), f.conversation, &ListMessagesQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = f
            .service
            .list(&ctx(&f, "alice"), Uuid::new_v4(), &ListMessagesQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(f.store.message_rows().is_empty());
    }

    #[tokio::test]
    async fn test_reply_into_other_conversation_is_not_found() {
        let f = fixture();
        let elsewhere = f
            .service
            .send(&ctx(&f, "alice"), f.other_conversation, text("elsewhere"))
            .await
            .unwrap();

        let input = SendMessageInput {
            body: Some("reply".to_string()),
            reply_to_message_id: Some(elsewhere.id),
            ..Default::default()
        };
        let err = f
            .service
            .send(&ctx(&f, "alice"), f.conversation, input)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(f.store.message_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_reply_carries_preview() {
        let f = fixture();
        let original = send_text(&f, "bob", "question?").await;
        let input = SendMessageInput {
            body: Some("answer".to_string()),
            reply_to_message_id: Some(original.id),
            ..Default::default()
        };
        let reply = f
            .service
            .send(&ctx(&f, "alice"), f.conversation, input)
            .await
            .unwrap();

        let preview = reply.reply_to.unwrap();
        assert_eq!(preview.id, original.id);
        assert_eq!(preview.sender_name, "User bob");
        assert_eq!(preview.body.as_deref(), Some("question?"));
    }

    #[tokio::test]
    async fn test_older_walk_has_no_gaps_or_duplicates_under_inserts() {
        let f = fixture();
        let mut sent = Vec::new();
        for i in 0..7 {
            sent.push(send_text(&f, "alice", &format!("m{}", i)).await.id);
        }

        let query = |cursor| ListMessagesQuery {
            limit: Some(3),
            cursor,
            direction: None,
        };
        let mut seen: Vec<FormattedMessage> = Vec::new();
        let mut page = f
            .service
            .list(&ctx(&f, "bob"), f.conversation, &query(None))
            .await
            .unwrap();

        while !page.is_empty() {
            // Concurrent sends land after the walk's boundary
            send_text(&f, "bob", "interleaved").await;
            let cursor = page[0].created_at;
            let mut batch = page;
            batch.extend(seen);
            seen = batch;
            page = f
                .service
                .list(&ctx(&f, "bob"), f.conversation, &query(Some(cursor)))
                .await
                .unwrap();
        }

        let ids: Vec<Uuid> = seen.iter().map(|m| m.id).collect();
        assert_eq!(ids, sent);
        assert!(seen.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }

    #[tokio::test]
    async fn test_newer_direction_reads_forward() {
        let f = fixture();
        let first = send_text(&f, "alice", "a").await;
        let second = send_text(&f, "alice", "b").await;
        let third = send_text(&f, "alice", "c").await;

        let page = f
            .service
            .list(
                &ctx(&f, "bob"),
                f.conversation,
                &ListMessagesQuery {
                    limit: Some(1),
                    cursor: Some(first.created_at),
                    direction: Some(crate::features::messaging::models::PageDirection::Newer),
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, second.id);
        assert_ne!(page[0].id, third.id);
    }

    #[tokio::test]
    async fn test_soft_deleted_message_disappears_but_row_remains() {
        let f = fixture();
        let keep = send_text(&f, "alice", "keep").await;
        let gone = send_text(&f, "alice", "gone").await;

        f.service
            .soft_delete(&ctx(&f, "alice"), gone.id)
            .await
            .unwrap();

        for _ in 0..2 {
            let listed = f
                .service
                .list(&ctx(&f, "bob"), f.conversation, &ListMessagesQuery::default())
                .await
                .unwrap();
            let ids: Vec<Uuid> = listed.iter().map(|m| m.id).collect();
            assert_eq!(ids, vec![keep.id]);
        }

        let rows = f.store.message_rows();
        let row = rows.iter().find(|m| m.id == gone.id).unwrap();
        assert!(row.deleted_at.is_some());

        let again = f.service.soft_delete(&ctx(&f, "alice"), gone.id).await;
        assert!(matches!(again, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_only_sender_may_edit_or_delete() {
        let f = fixture();
        let sent = send_text(&f, "alice", "mine").await;

        let err = f
            .service
            .soft_delete(&ctx(&f, "bob"), sent.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let edit = EditMessageDto {
            content: Some("hijack".to_string()),
            metadata: None,
        };
        let err = f
            .service
            .edit(&ctx(&f, "bob"), sent.id, edit)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_edit_marks_message_and_keeps_content_invariant() {
        let f = fixture();
        let sent = send_text(&f, "alice", "draft").await;

        let edited = f
            .service
            .edit(
                &ctx(&f, "alice"),
                sent.id,
                EditMessageDto {
                    content: Some("final".to_string()),
                    metadata: Some(json!({"mood": "calm"})),
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.body.as_deref(), Some("final"));
        assert!(edited.is_edited);
        assert_eq!(edited.metadata["mood"], "calm");
        assert!(edited.metadata.get("edited_at").is_some());

        let err = f
            .service
            .edit(
                &ctx(&f, "alice"),
                sent.id,
                EditMessageDto {
                    content: Some("".to_string()),
                    metadata: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reaction_toggle_and_grouping() {
        let f = fixture();
        let sent = send_text(&f, "alice", "react to me").await;

        f.service
            .toggle_reaction(&ctx(&f, "alice"), sent.id, "👍")
            .await
            .unwrap();
        f.service
            .toggle_reaction(&ctx(&f, "bob"), sent.id, "👍")
            .await
            .unwrap();
        let reactions = f
            .service
            .toggle_reaction(&ctx(&f, "alice"), sent.id, "❤️")
            .await
            .unwrap();

        assert_eq!(reactions.len(), 2);
        assert_eq!(reactions[0].emoji, "👍");
        assert_eq!(reactions[0].count, 2);
        assert_eq!(reactions[0].users, vec!["alice", "bob"]);
        assert_eq!(reactions[1].emoji, "❤️");
        assert_eq!(reactions[1].count, 1);

        let reactions = f
            .service
            .toggle_reaction(&ctx(&f, "alice"), sent.id, "❤️")
            .await
            .unwrap();
        assert_eq!(reactions.len(), 1);

        let err = f
            .service
            .toggle_reaction(&ctx(&f, "carol"), sent.id, "👍")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_is_read_reflects_receipts_from_others() {
        let f = fixture();
        let sent = send_text(&f, "alice", "did you read this?").await;

        let before = f
            .service
            .list(&ctx(&f, "alice"), f.conversation, &ListMessagesQuery::default())
            .await
            .unwrap();
        assert!(!before[0].is_read);

        let marked = f
            .service
            .mark_read(&ctx(&f, "bob"), f.conversation)
            .await
            .unwrap();
        assert_eq!(marked, 1);
        assert_eq!(
            f.service.mark_read(&ctx(&f, "bob"), f.conversation).await.unwrap(),
            0
        );

        let for_alice = f
            .service
            .list(&ctx(&f, "alice"), f.conversation, &ListMessagesQuery::default())
            .await
            .unwrap();
        assert_eq!(for_alice[0].id, sent.id);
        assert!(for_alice[0].is_read);
        assert_eq!(for_alice[0].read_by[0].user_id, "bob");

        let for_bob = f
            .service
            .list(&ctx(&f, "bob"), f.conversation, &ListMessagesQuery::default())
            .await
            .unwrap();
        assert!(!for_bob[0].is_read);
    }

    #[tokio::test]
    async fn test_first_page_is_cached_and_extended_on_send() {
        let cache = Arc::new(LruMessageCache::new(16, Duration::from_secs(60)));
        let f = fixture_with_cache(cache.clone());
        send_text(&f, "alice", "one").await;

        // Cache is empty until the first list
        assert!(cache.get(f.conversation).await.is_none());
        f.service
            .list(&ctx(&f, "bob"), f.conversation, &ListMessagesQuery::default())
            .await
            .unwrap();
        let cached = cache.get(f.conversation).await.unwrap();
        assert_eq!(cached.messages.len(), 1);
        assert!(cached.exhaustive);

        let two = send_text(&f, "bob", "two").await;
        let cached = cache.get(f.conversation).await.unwrap();
        assert_eq!(cached.messages.len(), 2);
        assert_eq!(cached.messages[1].id, two.id);

        // Served from cache even when the store is unavailable for listing
        f.store.fail("list_messages");
        let listed = f
            .service
            .list(&ctx(&f, "alice"), f.conversation, &ListMessagesQuery::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        f.store.recover("list_messages");

        // Membership is still checked on cache hits
        let err = f
            .service
            .list(&ctx(&f, "carol"), f.conversation, &ListMessagesQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_writes_invalidate_cached_page() {
        let cache = Arc::new(LruMessageCache::new(16, Duration::from_secs(60)));
        let f = fixture_with_cache(cache.clone());
        let sent = send_text(&f, "alice", "one").await;
        f.service
            .list(&ctx(&f, "bob"), f.conversation, &ListMessagesQuery::default())
            .await
            .unwrap();

        f.service
            .toggle_reaction(&ctx(&f, "bob"), sent.id, "👍")
            .await
            .unwrap();
        assert!(cache.get(f.conversation).await.is_none());

        let listed = f
            .service
            .list(&ctx(&f, "bob"), f.conversation, &ListMessagesQuery::default())
            .await
            .unwrap();
        assert_eq!(listed[0].reactions.len(), 1);
    }

    #[tokio::test]
    async fn test_writes_during_first_page_read_are_not_lost() {
        let cache = Arc::new(LruMessageCache::new(16, Duration::from_secs(60)));
        let f = fixture_with_cache(cache.clone());
        let keep = send_text(&f, "alice", "keep").await;
        let gone = send_text(&f, "alice", "gone").await;
        let first_page = ListMessagesQuery::default();

        // Formatting of the first page stalls while a delete commits
        f.store.stall("reactions_for", Duration::from_millis(150));
        let bob_ctx = ctx(&f, "bob");
        let (listed, deleted) = tokio::join!(
            f.service.list(&bob_ctx, f.conversation, &first_page),
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                f.service.soft_delete(&ctx(&f, "alice"), gone.id).await
            }
        );
        listed.unwrap();
        deleted.unwrap();
        f.store.stall("reactions_for", Duration::ZERO);

        let ids: Vec<Uuid> = f
            .service
            .list(&ctx(&f, "bob"), f.conversation, &first_page)
            .await
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![keep.id]);

        // Same for a send landing while the page is being built
        cache.invalidate(f.conversation).await;
        f.store.stall("reactions_for", Duration::from_millis(150));
        let bob_ctx = ctx(&f, "bob");
        let (listed, sent) = tokio::join!(
            f.service.list(&bob_ctx, f.conversation, &first_page),
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                f.service
                    .send(&ctx(&f, "alice"), f.conversation, text("two"))
                    .await
            }
        );
        listed.unwrap();
        let two = sent.unwrap();
        f.store.stall("reactions_for", Duration::ZERO);

        let ids: Vec<Uuid> = f
            .service
            .list(&ctx(&f, "bob"), f.conversation, &first_page)
            .await
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![keep.id, two.id]);
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("image/jpeg", "photo.jpeg"), "jpg");
        assert_eq!(file_extension("text/plain", "Notes.TXT"), "txt");
        assert_eq!(file_extension("application/x-unknown", "noext"), "bin");
    }
}

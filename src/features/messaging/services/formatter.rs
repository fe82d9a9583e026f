use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::warn;
use uuid::Uuid;

use crate::core::error::Result;
use crate::features::messaging::dtos::{
    AttachmentDto, FormattedMessage, ReactionSummary, ReadByDto, ReplyPreview,
};
use crate::features::messaging::models::{
    Attachment, CommunityMember, Message, Reaction, ReadReceipt,
};
use crate::features::messaging::store::MessagingStore;
use crate::modules::storage::BlobGateway;
use crate::shared::constants::{REPLY_PREVIEW_CHARS, SIGNING_CONCURRENCY};
use crate::shared::context::RequestContext;

type Profiles = HashMap<String, CommunityMember>;

/// Turns stored messages into the viewer-neutral shape clients receive
pub struct MessageFormatter {
    store: Arc<dyn MessagingStore>,
    blobs: Arc<dyn BlobGateway>,
    url_ttl_secs: u32,
}

impl MessageFormatter {
    pub fn new(
        store: Arc<dyn MessagingStore>,
        blobs: Arc<dyn BlobGateway>,
        url_ttl_secs: u32,
    ) -> Self {
        Self {
            store,
            blobs,
            url_ttl_secs,
        }
    }

    /// Format a page of messages of one conversation, keeping their order.
    ///
    /// `is_read` is left false; callers apply [`FormattedMessage::for_viewer`].
    pub async fn format_page(
        &self,
        ctx: &RequestContext,
        community_id: Uuid,
        messages: Vec<Message>,
    ) -> Result<Vec<FormattedMessage>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        let mut reply_ids: Vec<Uuid> = messages
            .iter()
            .filter_map(|m| m.reply_to_message_id)
            .collect();
        reply_ids.sort();
        reply_ids.dedup();

        let (attachments, reactions, receipts, reply_targets) = tokio::try_join!(
            ctx.bound("load attachments", self.store.attachments_for(&ids)),
            ctx.bound("load reactions", self.store.reactions_for(&ids)),
            ctx.bound("load read receipts", self.store.read_receipts_for(&ids)),
            ctx.bound("load reply targets", self.store.find_messages(&reply_ids)),
        )?;

        let mut user_ids: Vec<String> = messages
            .iter()
            .map(|m| m.sender_id.clone())
            .chain(receipts.iter().map(|r| r.user_id.clone()))
            .chain(reply_targets.iter().map(|m| m.sender_id.clone()))
            .collect();
        user_ids.sort();
        user_ids.dedup();

        let profiles: Profiles = ctx
            .bound(
                "load member profiles",
                self.store.find_members(community_id, &user_ids),
            )
            .await?
            .into_iter()
            .map(|m| (m.user_id.clone(), m))
            .collect();

        let mut attachments_by_message = self.sign_attachments(ctx, attachments).await;
        let mut reactions_by_message = group_by_message(reactions, |r| r.message_id);
        let mut receipts_by_message = group_by_message(receipts, |r| r.message_id);
        let reply_targets: HashMap<Uuid, Message> =
            reply_targets.into_iter().map(|m| (m.id, m)).collect();

        let formatted = messages
            .into_iter()
            .map(|message| {
                let reply_to = message
                    .reply_to_message_id
                    .and_then(|id| reply_targets.get(&id))
                    .filter(|target| target.conversation_id == message.conversation_id)
                    .map(|target| reply_preview(target, &profiles));
                let attachments = attachments_by_message
                    .remove(&message.id)
                    .unwrap_or_default();
                let reactions = group_reactions(
                    &reactions_by_message
                        .remove(&message.id)
                        .unwrap_or_default(),
                );
                let receipts = receipts_by_message
                    .remove(&message.id)
                    .unwrap_or_default();
                let read_by = summarize_receipts(&message, &receipts, &profiles);

                assemble(message, attachments, reactions, read_by, reply_to, &profiles)
            })
            .collect();

        Ok(formatted)
    }

    /// Format a message that was just sent: it has no reactions or receipts yet.
    pub async fn format_sent(
        &self,
        ctx: &RequestContext,
        message: Message,
        attachments: Vec<Attachment>,
        sender: &CommunityMember,
        reply_target: Option<&Message>,
    ) -> FormattedMessage {
        let mut profiles = Profiles::new();
        profiles.insert(sender.user_id.clone(), sender.clone());

        if let Some(target) = reply_target.filter(|t| t.sender_id != sender.user_id) {
            let lookup = ctx
                .bound(
                    "load reply sender",
                    self.store.find_member(sender.community_id, &target.sender_id),
                )
                .await;
            match lookup {
                Ok(Some(member)) => {
                    profiles.insert(member.user_id.clone(), member);
                }
                Ok(None) => {}
                Err(e) => warn!(
                    message_id = %target.id,
                    "Failed to load reply sender profile: {}", e
                ),
            }
        }

        let reply_to = reply_target.map(|target| reply_preview(target, &profiles));
        let attachments = self
            .sign_attachments(ctx, attachments)
            .await
            .remove(&message.id)
            .unwrap_or_default();

        assemble(message, attachments, Vec::new(), Vec::new(), reply_to, &profiles)
    }

    /// Resolve every attachment to signed URLs with bounded concurrency
    async fn sign_attachments(
        &self,
        ctx: &RequestContext,
        attachments: Vec<Attachment>,
    ) -> HashMap<Uuid, Vec<AttachmentDto>> {
        let signed: Vec<(Uuid, AttachmentDto)> = stream::iter(attachments)
            .map(|attachment| async move {
                let url = self.signed_url(ctx, &attachment.storage_path).await;
                let thumbnail_url = match attachment.thumbnail_path.as_deref() {
                    Some(path) => self.signed_url(ctx, path).await,
                    None => None,
                };
                (
                    attachment.message_id,
                    AttachmentDto {
                        id: attachment.id,
                        file_name: attachment.file_name,
                        mime_type: attachment.mime_type,
                        size_bytes: attachment.size_bytes,
                        url,
                        thumbnail_url,
                        created_at: attachment.created_at,
                    },
                )
            })
            .buffered(SIGNING_CONCURRENCY)
            .collect()
            .await;

        group_by_message(signed, |(message_id, _)| *message_id)
            .into_iter()
            .map(|(id, items)| (id, items.into_iter().map(|(_, dto)| dto).collect()))
            .collect()
    }

    /// Signing failures leave the URL empty instead of failing the page
    async fn signed_url(&self, ctx: &RequestContext, key: &str) -> Option<String> {
        match ctx
            .bound(
                "sign attachment url",
                self.blobs.signed_url(key, self.url_ttl_secs),
            )
            .await
        {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(key = %key, "Failed to sign attachment URL: {}", e);
                None
            }
        }
    }
}

/// Group reactions by emoji in order of first appearance, counting distinct users
pub fn group_reactions(reactions: &[Reaction]) -> Vec<ReactionSummary> {
    let mut ordered: Vec<&Reaction> = reactions.iter().collect();
    ordered.sort_by_key(|r| r.created_at);

    let mut groups: Vec<ReactionSummary> = Vec::new();
    for reaction in ordered {
        match groups.iter_mut().find(|g| g.emoji == reaction.emoji) {
            Some(group) => {
                if !group.users.contains(&reaction.user_id) {
                    group.users.push(reaction.user_id.clone());
                    group.count = group.users.len();
                }
            }
            None => groups.push(ReactionSummary {
                emoji: reaction.emoji.clone(),
                count: 1,
                users: vec![reaction.user_id.clone()],
            }),
        }
    }
    groups
}

/// Receipts from anyone but the sender, oldest read first
fn summarize_receipts(
    message: &Message,
    receipts: &[ReadReceipt],
    profiles: &Profiles,
) -> Vec<ReadByDto> {
    let mut ordered: Vec<&ReadReceipt> = receipts
        .iter()
        .filter(|r| r.user_id != message.sender_id)
        .collect();
    ordered.sort_by_key(|r| r.read_at);

    let mut seen: HashSet<&str> = HashSet::new();
    ordered
        .into_iter()
        .filter(|r| seen.insert(r.user_id.as_str()))
        .map(|r| ReadByDto {
            user_id: r.user_id.clone(),
            name: display_name(profiles, &r.user_id),
            read_at: r.read_at,
        })
        .collect()
}

fn reply_preview(target: &Message, profiles: &Profiles) -> ReplyPreview {
    ReplyPreview {
        id: target.id,
        body: target
            .body
            .as_deref()
            .map(|body| body.chars().take(REPLY_PREVIEW_CHARS).collect()),
        sender_name: display_name(profiles, &target.sender_id),
    }
}

fn display_name(profiles: &Profiles, user_id: &str) -> String {
    profiles
        .get(user_id)
        .map(|p| p.display_name.clone())
        .unwrap_or_else(|| user_id.to_string())
}

fn assemble(
    message: Message,
    attachments: Vec<AttachmentDto>,
    reactions: Vec<ReactionSummary>,
    read_by: Vec<ReadByDto>,
    reply_to: Option<ReplyPreview>,
    profiles: &Profiles,
) -> FormattedMessage {
    let sender = profiles.get(&message.sender_id);
    FormattedMessage {
        id: message.id,
        conversation_id: message.conversation_id,
        sender_name: display_name(profiles, &message.sender_id),
        sender_avatar: sender.and_then(|p| p.avatar_url.clone()),
        is_edited: message.is_edited(),
        sender_id: message.sender_id,
        body: message.body,
        message_type: message.message_type,
        metadata: message.metadata,
        reply_to_message_id: message.reply_to_message_id,
        reply_to,
        attachments,
        reactions,
        read_by,
        is_read: false,
        created_at: message.created_at,
    }
}

fn group_by_message<T>(items: Vec<T>, key: impl Fn(&T) -> Uuid) -> HashMap<Uuid, Vec<T>> {
    let mut grouped: HashMap<Uuid, Vec<T>> = HashMap::new();
    for item in items {
        grouped.entry(key(&item)).or_default().push(item);
    }
    grouped
}

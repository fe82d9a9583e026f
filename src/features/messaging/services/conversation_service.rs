use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::error::{AppError, Result};
use crate::features::messaging::dtos::{
    ConversationSummaryDto, CreateConversationDto, LastMessagePreviewDto, ParticipantDto,
};
use crate::features::messaging::models::{CommunityMember, Conversation, NewConversation};
use crate::features::messaging::store::MessagingStore;
use crate::modules::audit::{AuditDispatcher, AuditRecord};
use crate::shared::constants::{MAX_PARTICIPANTS, MAX_TITLE_CHARS, SUMMARY_CONCURRENCY};
use crate::shared::context::RequestContext;

/// Creates, deduplicates and lists conversations
pub struct ConversationService {
    store: Arc<dyn MessagingStore>,
    audit: AuditDispatcher,
}

impl ConversationService {
    pub fn new(store: Arc<dyn MessagingStore>, audit: AuditDispatcher) -> Self {
        Self { store, audit }
    }

    /// Every conversation the caller participates in, most recent activity first
    pub async fn list_for_user(&self, ctx: &RequestContext) -> Result<Vec<ConversationSummaryDto>> {
        let conversations = ctx
            .bound(
                "list conversations",
                self.store
                    .list_conversations_for_user(ctx.community_id, &ctx.caller_id),
            )
            .await?;

        stream::iter(conversations)
            .map(|conversation| self.summarize(ctx, conversation))
            .buffered(SUMMARY_CONCURRENCY)
            .try_collect()
            .await
    }

    /// Guarantee a standing 1:1 conversation between the caller and `peer_id`.
    ///
    /// Contact restrictions do not apply: the conversation is system-initiated.
    pub async fn ensure_default_conversation(
        &self,
        ctx: &RequestContext,
        peer_id: &str,
    ) -> Result<Conversation> {
        if peer_id == ctx.caller_id {
            return Err(AppError::Validation(
                "A default conversation needs two different users".to_string(),
            ));
        }

        if let Some(existing) = self.find_direct(ctx, &ctx.caller_id, peer_id).await? {
            return Ok(existing);
        }

        let conversation = self.insert_direct(ctx, peer_id).await?;

        info!(
            conversation_id = %conversation.id,
            user_id = %ctx.caller_id,
            peer_id = %peer_id,
            "Default conversation ensured"
        );
        Ok(conversation)
    }

    /// Start a 1:1 or group conversation on behalf of the caller
    pub async fn create(
        &self,
        ctx: &RequestContext,
        dto: CreateConversationDto,
    ) -> Result<ConversationSummaryDto> {
        let targets = normalize_targets(&ctx.caller_id, &dto.participant_ids)?;
        let is_group = dto.is_group.unwrap_or(targets.len() > 1);
        if !is_group && targets.len() > 1 {
            return Err(AppError::Validation(
                "A direct conversation takes exactly one other participant".to_string(),
            ));
        }
        let title = if is_group {
            normalize_title(dto.title)?
        } else {
            None
        };

        self.authorize_contact(ctx, &targets).await?;

        if !is_group {
            if let Some(existing) = self.find_direct(ctx, &ctx.caller_id, &targets[0]).await? {
                debug!(
                    conversation_id = %existing.id,
                    "Returning existing direct conversation"
                );
                return self.summarize(ctx, existing).await;
            }
        }

        let mut members = Vec::with_capacity(targets.len() + 1);
        members.push(ctx.caller_id.clone());
        members.extend(targets.iter().cloned());

        let conversation = if is_group {
            self.insert_with_participants(ctx, title, &members).await?
        } else {
            self.insert_direct(ctx, &targets[0]).await?
        };

        info!(
            conversation_id = %conversation.id,
            created_by = %ctx.caller_id,
            is_group = conversation.is_group,
            participants = members.len(),
            "Conversation created"
        );

        self.summarize(ctx, conversation).await
    }

    /// Caller and targets must belong to the caller's community and the
    /// community's contact policy must allow the caller to reach every target.
    async fn authorize_contact(&self, ctx: &RequestContext, targets: &[String]) -> Result<()> {
        let caller = ctx
            .bound(
                "load caller membership",
                self.store.find_member(ctx.community_id, &ctx.caller_id),
            )
            .await?
            .ok_or_else(|| {
                warn!(user_id = %ctx.caller_id, community_id = %ctx.community_id, "Caller is not a community member");
                AppError::Forbidden("You are not a member of this community".to_string())
            })?;

        let members: HashMap<String, CommunityMember> = ctx
            .bound(
                "load target memberships",
                self.store.find_members(ctx.community_id, targets),
            )
            .await?
            .into_iter()
            .map(|m| (m.user_id.clone(), m))
            .collect();

        if let Some(outsider) = targets.iter().find(|t| !members.contains_key(*t)) {
            warn!(
                user_id = %ctx.caller_id,
                target_id = %outsider,
                "Conversation target is outside the caller's community"
            );
            return Err(AppError::Forbidden(format!(
                "User {} is not a member of this community",
                outsider
            )));
        }

        let policy = ctx
            .bound(
                "load contact policy",
                self.store.contact_policy(ctx.community_id),
            )
            .await?;

        for target in members.values() {
            if !policy.allows(caller.role, target.role) {
                warn!(
                    user_id = %ctx.caller_id,
                    target_id = %target.user_id,
                    target_role = %target.role,
                    "Contact restriction rejected conversation"
                );
                return Err(AppError::Forbidden(
                    "Members of this community cannot start conversations with moderators or admins"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }

    async fn find_direct(
        &self,
        ctx: &RequestContext,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<Conversation>> {
        let existing = ctx
            .bound(
                "find direct conversation",
                self.store
                    .find_direct_conversations(ctx.community_id, user_a, user_b),
            )
            .await?;
        Ok(existing.into_iter().next())
    }

    /// Group row first, then participants; a failed participant insert
    /// deletes the row again before the original error is returned.
    async fn insert_with_participants(
        &self,
        ctx: &RequestContext,
        title: Option<String>,
        members: &[String],
    ) -> Result<Conversation> {
        let conversation = ctx
            .bound(
                "insert conversation",
                self.store.insert_conversation(NewConversation {
                    community_id: ctx.community_id,
                    is_group: true,
                    title,
                    created_by: ctx.caller_id.clone(),
                }),
            )
            .await?;

        let inserted = ctx
            .bound(
                "insert participants",
                self.store.insert_participants(conversation.id, members),
            )
            .await;

        if let Err(e) = inserted {
            warn!(
                conversation_id = %conversation.id,
                "Participant insert failed, removing conversation: {}", e
            );
            if let Err(cleanup) = self.store.delete_conversation(conversation.id).await {
                error!(
                    conversation_id = %conversation.id,
                    "Orphaned conversation needs manual cleanup: {}", cleanup
                );
            }
            return Err(e);
        }

        self.record_created(ctx, &conversation, members);
        Ok(conversation)
    }

    /// The pair's 1:1 conversation, created with both participants in one
    /// step unless a concurrent request got there first.
    async fn insert_direct(&self, ctx: &RequestContext, peer_id: &str) -> Result<Conversation> {
        let (conversation, created) = ctx
            .bound(
                "insert direct conversation",
                self.store.insert_direct_conversation(
                    NewConversation {
                        community_id: ctx.community_id,
                        is_group: false,
                        title: None,
                        created_by: ctx.caller_id.clone(),
                    },
                    peer_id,
                ),
            )
            .await?;

        if created {
            let members = [ctx.caller_id.clone(), peer_id.to_string()];
            self.record_created(ctx, &conversation, &members);
        } else {
            info!(
                conversation_id = %conversation.id,
                "Direct conversation was created by a concurrent request"
            );
        }
        Ok(conversation)
    }

    fn record_created(
        &self,
        ctx: &RequestContext,
        conversation: &Conversation,
        members: &[String],
    ) {
        self.audit.record(
            AuditRecord::new(
                ctx.caller_id.clone(),
                "conversation.create",
                "conversations",
                conversation.id,
            )
            .with_payload(json!({
                "is_group": conversation.is_group,
                "participants": members,
            })),
        );
    }

    async fn summarize(
        &self,
        ctx: &RequestContext,
        conversation: Conversation,
    ) -> Result<ConversationSummaryDto> {
        let (participants, last_message, unread_count) = tokio::try_join!(
            ctx.bound(
                "list participants",
                self.store.list_participants(conversation.id)
            ),
            ctx.bound("load last message", self.store.last_message(conversation.id)),
            ctx.bound(
                "count unread",
                self.store.count_unread(conversation.id, &ctx.caller_id)
            ),
        )?;

        let user_ids: Vec<String> = participants.iter().map(|p| p.user_id.clone()).collect();
        let profiles: HashMap<String, CommunityMember> = ctx
            .bound(
                "load participant profiles",
                self.store.find_members(conversation.community_id, &user_ids),
            )
            .await?
            .into_iter()
            .map(|m| (m.user_id.clone(), m))
            .collect();

        let participants = participants
            .into_iter()
            .map(|p| {
                let profile = profiles.get(&p.user_id);
                ParticipantDto {
                    display_name: profile.map(|m| m.display_name.clone()),
                    avatar_url: profile.and_then(|m| m.avatar_url.clone()),
                    role: profile.map(|m| m.role),
                    user_id: p.user_id,
                    joined_at: p.joined_at,
                }
            })
            .collect();

        Ok(ConversationSummaryDto {
            id: conversation.id,
            is_group: conversation.is_group,
            title: conversation.title,
            created_by: conversation.created_by,
            created_at: conversation.created_at,
            last_message_at: conversation.last_message_at,
            participants,
            last_message: last_message.map(|m| LastMessagePreviewDto {
                id: m.id,
                sender_id: m.sender_id,
                body: m.body,
                message_type: m.message_type,
                created_at: m.created_at,
            }),
            unread_count,
        })
    }
}

/// Distinct targets other than the caller, in request order
fn normalize_targets(caller_id: &str, participant_ids: &[String]) -> Result<Vec<String>> {
    if participant_ids.is_empty() || participant_ids.len() > MAX_PARTICIPANTS {
        return Err(AppError::Validation(format!(
            "participant_ids must contain 1 to {} entries",
            MAX_PARTICIPANTS
        )));
    }

    let mut targets: Vec<String> = Vec::new();
    for id in participant_ids {
        let id = id.trim();
        if id.is_empty() || id == caller_id || targets.iter().any(|t| t == id) {
            continue;
        }
        targets.push(id.to_string());
    }

    if targets.is_empty() {
        return Err(AppError::Validation(
            "At least one participant other than yourself is required".to_string(),
        ));
    }
    if targets.len() + 1 > MAX_PARTICIPANTS {
        return Err(AppError::Validation(format!(
            "A conversation holds at most {} participants",
            MAX_PARTICIPANTS
        )));
    }
    Ok(targets)
}

fn normalize_title(title: Option<String>) -> Result<Option<String>> {
    let Some(title) = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(AppError::Validation(format!(
            "title must be at most {} characters",
            MAX_TITLE_CHARS
        )));
    }
    Ok(Some(title))
}

//! In-memory [`MessagingStore`] for service and handler tests.
//!
//! Timestamps are strictly increasing so ordering is deterministic. Individual
//! operations can be made to fail or stall, and a concurrent 1:1 creation can
//! be simulated.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::{MessagePage, MessagingStore};
use crate::core::error::{AppError, Result};
use crate::features::messaging::models::{
    direct_pair_key, Attachment, CommunityMember, ContactPolicy, Conversation, MemberRole, Message, NewAttachment,
    NewConversation, NewMessage, PageDirection, Participant, Reaction, ReadReceipt,
};

#[derive(Default)]
struct State {
    clock: Option<DateTime<Utc>>,
    members: Vec<CommunityMember>,
    policies: HashMap<Uuid, ContactPolicy>,
    conversations: Vec<Conversation>,
    direct_keys: HashMap<String, Uuid>,
    participants: Vec<Participant>,
    messages: Vec<Message>,
    attachments: Vec<Attachment>,
    reactions: Vec<Reaction>,
    receipts: Vec<ReadReceipt>,
    failing: HashSet<&'static str>,
    stalls: HashMap<&'static str, Duration>,
    pending_race: Option<(Uuid, String, String)>,
}

impl State {
    fn tick(&mut self) -> DateTime<Utc> {
        let next = match self.clock {
            Some(last) => last + TimeDelta::milliseconds(1),
            None => Utc::now(),
        };
        self.clock = Some(next);
        next
    }

    fn is_participant(&self, conversation_id: Uuid, user_id: &str) -> bool {
        self.participants
            .iter()
            .any(|p| p.conversation_id == conversation_id && p.user_id == user_id)
    }

    fn add_participants(&mut self, conversation_id: Uuid, user_ids: &[String]) {
        for user_id in user_ids {
            let joined_at = self.tick();
            self.participants.push(Participant {
                conversation_id,
                user_id: user_id.clone(),
                joined_at,
            });
        }
    }

    fn create_conversation(&mut self, new: NewConversation) -> Conversation {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            community_id: new.community_id,
            is_group: new.is_group,
            title: new.title,
            created_by: new.created_by,
            created_at: self.tick(),
            last_message_at: None,
        };
        self.conversations.push(conversation.clone());
        conversation
    }

    fn create_direct(&mut self, new: NewConversation, peer_id: &str) -> Conversation {
        let key = direct_pair_key(new.community_id, &new.created_by, peer_id);
        let members = [new.created_by.clone(), peer_id.to_string()];
        let conversation = self.create_conversation(new);
        self.add_participants(conversation.id, &members);
        self.direct_keys.insert(key, conversation.id);
        conversation
    }

    fn live_message(&self, id: Uuid) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.id == id && m.deleted_at.is_none())
    }
}

#[derive(Default)]
pub struct InMemoryMessagingStore {
    state: Mutex<State>,
}

impl InMemoryMessagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_member(&self, community_id: Uuid, user_id: &str, role: MemberRole) {
        self.lock().members.push(CommunityMember {
            community_id,
            user_id: user_id.to_string(),
            role,
            display_name: format!("User {}", user_id),
            avatar_url: None,
        });
    }

    pub fn restrict_member_contact(&self, community_id: Uuid) {
        self.lock().policies.insert(
            community_id,
            ContactPolicy {
                restrict_member_to_elevated: true,
            },
        );
    }

    /// Make every later call of `operation` fail with a database error
    pub fn fail(&self, operation: &'static str) {
        self.lock().failing.insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.lock().failing.remove(operation);
    }

    /// Delay every later call of `operation`
    pub fn stall(&self, operation: &'static str, delay: Duration) {
        self.lock().stalls.insert(operation, delay);
    }

    /// The next 1:1 creation is preceded by another request creating one
    /// for the same pair.
    pub fn race_direct_creation(&self, community_id: Uuid, user_a: &str, user_b: &str) {
        self.lock().pending_race = Some((community_id, user_a.to_string(), user_b.to_string()));
    }

    /// Seed a conversation without going through the service
    pub fn seed_conversation(
        &self,
        community_id: Uuid,
        is_group: bool,
        user_ids: &[&str],
    ) -> Conversation {
        let mut state = self.lock();
        let conversation = state.create_conversation(NewConversation {
            community_id,
            is_group,
            title: None,
            created_by: user_ids.first().map(|u| u.to_string()).unwrap_or_default(),
        });
        let users: Vec<String> = user_ids.iter().map(|u| u.to_string()).collect();
        state.add_participants(conversation.id, &users);
        if let [user_a, user_b] = user_ids {
            if !is_group {
                state
                    .direct_keys
                    .insert(direct_pair_key(community_id, user_a, user_b), conversation.id);
            }
        }
        conversation
    }

    pub fn seed_receipt(&self, message_id: Uuid, user_id: &str) {
        let mut state = self.lock();
        let read_at = state.tick();
        state.receipts.push(ReadReceipt {
            message_id,
            user_id: user_id.to_string(),
            read_at,
        });
    }

    pub fn conversation_count(&self) -> usize {
        self.lock().conversations.len()
    }

    pub fn participant_count(&self) -> usize {
        self.lock().participants.len()
    }

    /// Rows in the messages table, soft-deleted ones included
    pub fn message_rows(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn attachment_rows(&self) -> Vec<Attachment> {
        self.lock().attachments.clone()
    }

    async fn enter(&self, operation: &'static str) -> Result<()> {
        let (failing, stall) = {
            let state = self.lock();
            (
                state.failing.contains(operation),
                state.stalls.get(operation).copied(),
            )
        };
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(AppError::Database(sqlx::Error::Protocol(format!(
                "injected failure in {}",
                operation
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingStore for InMemoryMessagingStore {
    async fn find_member(
        &self,
        community_id: Uuid,
        user_id: &str,
    ) -> Result<Option<CommunityMember>> {
        self.enter("find_member").await?;
        Ok(self
            .lock()
            .members
            .iter()
            .find(|m| m.community_id == community_id && m.user_id == user_id)
            .cloned())
    }

    async fn find_members(
        &self,
        community_id: Uuid,
        user_ids: &[String],
    ) -> Result<Vec<CommunityMember>> {
        self.enter("find_members").await?;
        Ok(self
            .lock()
            .members
            .iter()
            .filter(|m| m.community_id == community_id && user_ids.contains(&m.user_id))
            .cloned()
            .collect())
    }

    async fn contact_policy(&self, community_id: Uuid) -> Result<ContactPolicy> {
        self.enter("contact_policy").await?;
        Ok(self
            .lock()
            .policies
            .get(&community_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.enter("find_conversation").await?;
        Ok(self
            .lock()
            .conversations
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn list_conversations_for_user(
        &self,
        community_id: Uuid,
        user_id: &str,
    ) -> Result<Vec<Conversation>> {
        self.enter("list_conversations_for_user").await?;
        let state = self.lock();
        let mut conversations: Vec<Conversation> = state
            .conversations
            .iter()
            .filter(|c| c.community_id == community_id && state.is_participant(c.id, user_id))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
        Ok(conversations)
    }

    async fn find_direct_conversations(
        &self,
        community_id: Uuid,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<Conversation>> {
        self.enter("find_direct_conversations").await?;
        let state = self.lock();
        let mut conversations: Vec<Conversation> = state
            .conversations
            .iter()
            .filter(|c| {
                c.community_id == community_id
                    && !c.is_group
                    && state.is_participant(c.id, user_a)
                    && state.is_participant(c.id, user_b)
            })
            .cloned()
            .collect();
        conversations.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(conversations)
    }

    async fn insert_conversation(&self, new: NewConversation) -> Result<Conversation> {
        self.enter("insert_conversation").await?;
        Ok(self.lock().create_conversation(new))
    }

    async fn insert_participants(&self, conversation_id: Uuid, user_ids: &[String]) -> Result<()> {
        self.enter("insert_participants").await?;
        self.lock().add_participants(conversation_id, user_ids);
        Ok(())
    }

    /// Both writes are checked for injected faults before anything is stored,
    /// mirroring the all-or-nothing transaction.
    async fn insert_direct_conversation(
        &self,
        new: NewConversation,
        peer_id: &str,
    ) -> Result<(Conversation, bool)> {
        self.enter("insert_conversation").await?;
        self.enter("insert_participants").await?;
        let mut state = self.lock();

        if let Some((community_id, user_a, user_b)) = state.pending_race.take() {
            state.create_direct(
                NewConversation {
                    community_id,
                    is_group: false,
                    title: None,
                    created_by: user_b,
                },
                &user_a,
            );
        }

        let key = direct_pair_key(new.community_id, &new.created_by, peer_id);
        let existing = state
            .direct_keys
            .get(&key)
            .and_then(|id| state.conversations.iter().find(|c| c.id == *id))
            .cloned();
        if let Some(existing) = existing {
            return Ok((existing, false));
        }

        Ok((state.create_direct(new, peer_id), true))
    }

    async fn delete_conversation(&self, id: Uuid) -> Result<()> {
        self.enter("delete_conversation").await?;
        let mut state = self.lock();
        state.direct_keys.retain(|_, conversation_id| *conversation_id != id);
        state.conversations.retain(|c| c.id != id);
        state.participants.retain(|p| p.conversation_id != id);
        Ok(())
    }

    async fn list_participants(&self, conversation_id: Uuid) -> Result<Vec<Participant>> {
        self.enter("list_participants").await?;
        Ok(self
            .lock()
            .participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn is_participant(&self, conversation_id: Uuid, user_id: &str) -> Result<bool> {
        self.enter("is_participant").await?;
        Ok(self.lock().is_participant(conversation_id, user_id))
    }

    async fn touch_conversation(&self, conversation_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.enter("touch_conversation").await?;
        let mut state = self.lock();
        if let Some(c) = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            c.last_message_at = Some(c.last_message_at.map_or(at, |prev| prev.max(at)));
        }
        Ok(())
    }

    async fn last_message(&self, conversation_id: Uuid) -> Result<Option<Message>> {
        self.enter("last_message").await?;
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.deleted_at.is_none())
            .max_by_key(|m| m.created_at)
            .cloned())
    }

    async fn count_unread(&self, conversation_id: Uuid, user_id: &str) -> Result<i64> {
        self.enter("count_unread").await?;
        let state = self.lock();
        let count = state
            .messages
            .iter()
            .filter(|m| {
                m.conversation_id == conversation_id
                    && m.deleted_at.is_none()
                    && m.sender_id != user_id
                    && !state
                        .receipts
                        .iter()
                        .any(|r| r.message_id == m.id && r.user_id == user_id)
            })
            .count();
        Ok(count as i64)
    }

    async fn list_messages(&self, conversation_id: Uuid, page: MessagePage) -> Result<Vec<Message>> {
        self.enter("list_messages").await?;
        let state = self.lock();
        let mut live: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.deleted_at.is_none())
            .cloned()
            .collect();
        live.sort_by_key(|m| m.created_at);

        let limit = page.limit.max(0) as usize;
        let messages = match (page.cursor, page.direction) {
            (None, _) => {
                let skip = live.len().saturating_sub(limit);
                live.split_off(skip)
            }
            (Some(cursor), PageDirection::Older) => {
                let before: Vec<Message> =
                    live.into_iter().filter(|m| m.created_at < cursor).collect();
                let skip = before.len().saturating_sub(limit);
                before.into_iter().skip(skip).collect()
            }
            (Some(cursor), PageDirection::Newer) => live
                .into_iter()
                .filter(|m| m.created_at > cursor)
                .take(limit)
                .collect(),
        };
        Ok(messages)
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.enter("find_message").await?;
        Ok(self.lock().live_message(id).cloned())
    }

    async fn find_messages(&self, ids: &[Uuid]) -> Result<Vec<Message>> {
        self.enter("find_messages").await?;
        let state = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.live_message(*id).cloned())
            .collect())
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        self.enter("insert_message").await?;
        let mut state = self.lock();
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            body: new.body,
            message_type: new.message_type,
            reply_to_message_id: new.reply_to_message_id,
            metadata: new.metadata,
            created_at: state.tick(),
            deleted_at: None,
        };
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn update_message(
        &self,
        id: Uuid,
        body: Option<String>,
        metadata: Value,
    ) -> Result<Option<Message>> {
        self.enter("update_message").await?;
        let mut state = self.lock();
        let Some(message) = state
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.deleted_at.is_none())
        else {
            return Ok(None);
        };
        message.body = body;
        message.metadata = metadata;
        Ok(Some(message.clone()))
    }

    async fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.enter("soft_delete_message").await?;
        let mut state = self.lock();
        match state
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.deleted_at.is_none())
        {
            Some(message) => {
                message.deleted_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_attachment(&self, new: NewAttachment) -> Result<Attachment> {
        self.enter("insert_attachment").await?;
        let mut state = self.lock();
        let attachment = Attachment {
            id: Uuid::new_v4(),
            message_id: new.message_id,
            storage_path: new.storage_path,
            file_name: new.file_name,
            mime_type: new.mime_type,
            size_bytes: new.size_bytes,
            thumbnail_path: None,
            created_at: state.tick(),
        };
        state.attachments.push(attachment.clone());
        Ok(attachment)
    }

    async fn attachments_for(&self, message_ids: &[Uuid]) -> Result<Vec<Attachment>> {
        self.enter("attachments_for").await?;
        Ok(self
            .lock()
            .attachments
            .iter()
            .filter(|a| message_ids.contains(&a.message_id))
            .cloned()
            .collect())
    }

    async fn reactions_for(&self, message_ids: &[Uuid]) -> Result<Vec<Reaction>> {
        self.enter("reactions_for").await?;
        let mut reactions: Vec<Reaction> = self
            .lock()
            .reactions
            .iter()
            .filter(|r| message_ids.contains(&r.message_id))
            .cloned()
            .collect();
        reactions.sort_by_key(|r| r.created_at);
        Ok(reactions)
    }

    async fn add_reaction(&self, message_id: Uuid, user_id: &str, emoji: &str) -> Result<bool> {
        self.enter("add_reaction").await?;
        let mut state = self.lock();
        let exists = state
            .reactions
            .iter()
            .any(|r| r.message_id == message_id && r.user_id == user_id && r.emoji == emoji);
        if exists {
            return Ok(false);
        }
        let created_at = state.tick();
        state.reactions.push(Reaction {
            message_id,
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
            created_at,
        });
        Ok(true)
    }

    async fn remove_reaction(
        &self,
        message_id: Uuid,
        user_id: &str,
        emoji: &str,
    ) -> Result<bool> {
        self.enter("remove_reaction").await?;
        let mut state = self.lock();
        let before = state.reactions.len();
        state
            .reactions
            .retain(|r| !(r.message_id == message_id && r.user_id == user_id && r.emoji == emoji));
        Ok(state.reactions.len() < before)
    }

    async fn read_receipts_for(&self, message_ids: &[Uuid]) -> Result<Vec<ReadReceipt>> {
        self.enter("read_receipts_for").await?;
        let mut receipts: Vec<ReadReceipt> = self
            .lock()
            .receipts
            .iter()
            .filter(|r| message_ids.contains(&r.message_id))
            .cloned()
            .collect();
        receipts.sort_by_key(|r| r.read_at);
        Ok(receipts)
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        self.enter("mark_read").await?;
        let mut state = self.lock();
        let unread: Vec<Uuid> = state
            .messages
            .iter()
            .filter(|m| {
                m.conversation_id == conversation_id
                    && m.deleted_at.is_none()
                    && m.sender_id != user_id
                    && !state
                        .receipts
                        .iter()
                        .any(|r| r.message_id == m.id && r.user_id == user_id)
            })
            .map(|m| m.id)
            .collect();
        for message_id in &unread {
            state.receipts.push(ReadReceipt {
                message_id: *message_id,
                user_id: user_id.to_string(),
                read_at: at,
            });
        }
        Ok(unread.len() as u64)
    }
}

pub mod conversation_handler;
pub mod message_handler;

use std::sync::Arc;
use std::time::Duration;

use crate::features::auth::model::AuthenticatedUser;
use crate::features::messaging::services::{ConversationService, MessageService};
use crate::shared::context::RequestContext;

/// Shared state for every messaging route
#[derive(Clone)]
pub struct MessagingState {
    pub conversations: Arc<ConversationService>,
    pub messages: Arc<MessageService>,
    pub request_timeout: Duration,
    /// Peer every caller gets a 1:1 conversation with before listing
    pub support_contact_id: Option<String>,
}

impl MessagingState {
    pub fn context(&self, user: &AuthenticatedUser) -> RequestContext {
        RequestContext::for_user(user, self.request_timeout)
    }
}

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};

use super::handlers::{
    conversation_handler::{create_conversation, list_conversations},
    message_handler::{
        delete_message, edit_message, list_messages, mark_read, send_message, toggle_reaction,
    },
    MessagingState,
};
use crate::shared::constants::MAX_ATTACHMENTS_PER_MESSAGE;

/// Headroom for multipart boundaries and text fields
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Create routes for the messaging feature
pub fn routes(state: MessagingState, max_attachment_bytes: usize) -> Router {
    let send_limit = max_attachment_bytes
        .saturating_mul(MAX_ATTACHMENTS_PER_MESSAGE)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/conversations/{id}/messages", get(list_messages))
        .route(
            "/api/conversations/{id}/messages",
            post(send_message).layer(DefaultBodyLimit::max(send_limit)),
        )
        .route("/api/conversations/{id}/read", post(mark_read))
        .route(
            "/api/messages/{id}",
            patch(edit_message).delete(delete_message),
        )
        .route("/api/messages/{id}/reactions", post(toggle_reaction))
        .with_state(state)
}

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::features::messaging::handlers::{conversation_handler, message_handler};
use crate::features::messaging::{dtos as messaging_dtos, models as messaging_models};
use crate::shared::types::{ApiResponse, Meta};

#[derive(OpenApi)]
#[openapi(
    paths(
        // Conversations
        conversation_handler::list_conversations,
        conversation_handler::create_conversation,
        // Messages
        message_handler::list_messages,
        message_handler::send_message,
        message_handler::mark_read,
        message_handler::edit_message,
        message_handler::delete_message,
        message_handler::toggle_reaction,
    ),
    components(
        schemas(
            Meta,
            // Messaging models
            messaging_models::MemberRole,
            messaging_models::MessageType,
            messaging_models::PageDirection,
            // Conversation DTOs
            messaging_dtos::ConversationSummaryDto,
            messaging_dtos::ParticipantDto,
            messaging_dtos::LastMessagePreviewDto,
            messaging_dtos::CreateConversationDto,
            // Message DTOs
            messaging_dtos::FormattedMessage,
            messaging_dtos::AttachmentDto,
            messaging_dtos::ReactionSummary,
            messaging_dtos::ReadByDto,
            messaging_dtos::ReplyPreview,
            messaging_dtos::GifPayload,
            messaging_dtos::SendMessageFormDto,
            messaging_dtos::EditMessageDto,
            messaging_dtos::ReactionRequestDto,
            messaging_dtos::MessageListDto,
            messaging_dtos::MessageEnvelopeDto,
            messaging_dtos::ReactionListDto,
            messaging_dtos::MarkReadResponseDto,
            messaging_dtos::DeleteMessageResponseDto,
            // Response wrappers
            ApiResponse<Vec<messaging_dtos::ConversationSummaryDto>>,
            ApiResponse<messaging_dtos::ConversationSummaryDto>,
            ApiResponse<messaging_dtos::MessageListDto>,
            ApiResponse<messaging_dtos::MessageEnvelopeDto>,
            ApiResponse<messaging_dtos::ReactionListDto>,
            ApiResponse<messaging_dtos::MarkReadResponseDto>,
            ApiResponse<messaging_dtos::DeleteMessageResponseDto>,
        )
    ),
    tags(
        (name = "conversations", description = "Direct and group conversations within a community"),
        (name = "messages", description = "Message history, sending, edits, reactions and read receipts"),
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Community Messaging API",
        version = "0.1.0",
        description = "API documentation for community messaging",
    )
)]
pub struct ApiDoc;

/// Adds Bearer JWT security scheme to OpenAPI spec
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Modifier to override OpenAPI info from config
pub struct SwaggerInfoModifier {
    pub title: String,
    pub version: String,
    pub description: String,
}

impl Modify for SwaggerInfoModifier {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.info.title = self.title.clone();
        openapi.info.version = self.version.clone();
        openapi.info.description = Some(self.description.clone());
    }
}

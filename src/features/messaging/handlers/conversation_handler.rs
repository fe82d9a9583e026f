use axum::{extract::State, http::StatusCode, Json};
use tracing::error;
use validator::Validate;

use crate::core::error::{AppError, Result};
use crate::core::extractor::AppJson;
use crate::features::auth::model::AuthenticatedUser;
use crate::features::messaging::dtos::{ConversationSummaryDto, CreateConversationDto};
use crate::shared::types::{ApiResponse, Meta};

use super::MessagingState;

/// GET /api/conversations
/// List the caller's conversations, most recently active first
#[utoipa::path(
    get,
    path = "/api/conversations",
    responses(
        (status = 200, description = "Conversations of the caller", body = ApiResponse<Vec<ConversationSummaryDto>>),
        (status = 401, description = "Unauthorized")
    ),
    tag = "conversations",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_conversations(
    user: AuthenticatedUser,
    State(state): State<MessagingState>,
) -> Result<Json<ApiResponse<Vec<ConversationSummaryDto>>>> {
    let ctx = state.context(&user);

    if let Some(support_id) = state
        .support_contact_id
        .as_deref()
        .filter(|id| *id != ctx.caller_id)
    {
        // The inbox stays usable when the support thread cannot be ensured
        if let Err(e) = state
            .conversations
            .ensure_default_conversation(&ctx, support_id)
            .await
        {
            error!(user_id = %ctx.caller_id, "Failed to ensure support conversation: {}", e);
        }
    }

    let conversations = state.conversations.list_for_user(&ctx).await?;
    let total = conversations.len() as i64;

    Ok(Json(ApiResponse::success(
        Some(conversations),
        None,
        Some(Meta { total }),
    )))
}

/// POST /api/conversations
/// Start a conversation, or return the existing 1:1 with the same peer
#[utoipa::path(
    post,
    path = "/api/conversations",
    request_body = CreateConversationDto,
    responses(
        (status = 201, description = "Conversation created or found", body = ApiResponse<ConversationSummaryDto>),
        (status = 400, description = "Invalid participants or title"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a community member or contact not allowed")
    ),
    tag = "conversations",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_conversation(
    user: AuthenticatedUser,
    State(state): State<MessagingState>,
    AppJson(dto): AppJson<CreateConversationDto>,
) -> Result<(StatusCode, Json<ApiResponse<ConversationSummaryDto>>)> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let ctx = state.context(&user);
    let conversation = state.conversations.create(&ctx, dto).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(Some(conversation), None, None)),
    ))
}

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

use crate::core::error::{AppError, Result};
use crate::core::extractor::AppJson;
use crate::features::auth::model::AuthenticatedUser;
use crate::features::messaging::dtos::{
    DeleteMessageResponseDto, EditMessageDto, GifPayload, IncomingAttachment, ListMessagesQuery,
    MarkReadResponseDto, MessageEnvelopeDto, MessageListDto, ReactionListDto, ReactionRequestDto,
    SendMessageFormDto, SendMessageInput,
};
use crate::shared::types::ApiResponse;

use super::MessagingState;

/// GET /api/conversations/{id}/messages
/// Page through a conversation's history
#[utoipa::path(
    get,
    path = "/api/conversations/{id}/messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID"),
        ListMessagesQuery
    ),
    responses(
        (status = 200, description = "Messages in ascending order", body = ApiResponse<MessageListDto>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    tag = "messages",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_messages(
    user: AuthenticatedUser,
    State(state): State<MessagingState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<ApiResponse<MessageListDto>>> {
    let ctx = state.context(&user);
    let messages = state.messages.list(&ctx, id, &query).await?;

    Ok(Json(ApiResponse::success(
        Some(MessageListDto { messages }),
        None,
        None,
    )))
}

/// POST /api/conversations/{id}/messages
/// Send a message with optional attachments, GIF and reply
///
/// Accepts multipart/form-data with:
/// - `content`: message text
/// - `type`: message type hint
/// - `replyToMessageId`: message being replied to
/// - `metadata`, `gif`: JSON objects as text
/// - `attachments`: zero or more files
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    request_body(
        content = SendMessageFormDto,
        content_type = "multipart/form-data",
        description = "Message text, attachments and optional GIF or reply reference",
    ),
    responses(
        (status = 201, description = "Message sent", body = ApiResponse<MessageEnvelopeDto>),
        (status = 400, description = "Empty message or invalid fields"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation or reply target not found"),
        (status = 413, description = "Request body too large")
    ),
    tag = "messages",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn send_message(
    user: AuthenticatedUser,
    State(state): State<MessagingState>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<MessageEnvelopeDto>>)> {
    let input = read_send_form(multipart).await?;
    let ctx = state.context(&user);
    let message = state.messages.send(&ctx, id, input).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            Some(MessageEnvelopeDto { message }),
            None,
            None,
        )),
    ))
}

/// POST /api/conversations/{id}/read
/// Mark every message from other participants as read
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/read",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Number of newly read messages", body = ApiResponse<MarkReadResponseDto>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Conversation not found")
    ),
    tag = "messages",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn mark_read(
    user: AuthenticatedUser,
    State(state): State<MessagingState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<MarkReadResponseDto>>> {
    let ctx = state.context(&user);
    let marked = state.messages.mark_read(&ctx, id).await?;

    Ok(Json(ApiResponse::success(
        Some(MarkReadResponseDto { marked }),
        None,
        None,
    )))
}

/// PATCH /api/messages/{id}
/// Edit one of the caller's messages
#[utoipa::path(
    patch,
    path = "/api/messages/{id}",
    params(
        ("id" = Uuid, Path, description = "Message ID")
    ),
    request_body = EditMessageDto,
    responses(
        (status = 200, description = "Edited message", body = ApiResponse<MessageEnvelopeDto>),
        (status = 400, description = "Invalid content"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not the sender"),
        (status = 404, description = "Message not found")
    ),
    tag = "messages",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn edit_message(
    user: AuthenticatedUser,
    State(state): State<MessagingState>,
    Path(id): Path<Uuid>,
    AppJson(dto): AppJson<EditMessageDto>,
) -> Result<Json<ApiResponse<MessageEnvelopeDto>>> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let ctx = state.context(&user);
    let message = state.messages.edit(&ctx, id, dto).await?;

    Ok(Json(ApiResponse::success(
        Some(MessageEnvelopeDto { message }),
        Some("Message updated".to_string()),
        None,
    )))
}

/// DELETE /api/messages/{id}
/// Soft-delete one of the caller's messages
#[utoipa::path(
    delete,
    path = "/api/messages/{id}",
    params(
        ("id" = Uuid, Path, description = "Message ID")
    ),
    responses(
        (status = 200, description = "Message deleted", body = ApiResponse<DeleteMessageResponseDto>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not the sender"),
        (status = 404, description = "Message not found")
    ),
    tag = "messages",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_message(
    user: AuthenticatedUser,
    State(state): State<MessagingState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeleteMessageResponseDto>>> {
    let ctx = state.context(&user);
    state.messages.soft_delete(&ctx, id).await?;

    Ok(Json(ApiResponse::success(
        Some(DeleteMessageResponseDto { deleted: true }),
        Some("Message deleted".to_string()),
        None,
    )))
}

/// POST /api/messages/{id}/reactions
/// Toggle the caller's reaction on a message
#[utoipa::path(
    post,
    path = "/api/messages/{id}/reactions",
    params(
        ("id" = Uuid, Path, description = "Message ID")
    ),
    request_body = ReactionRequestDto,
    responses(
        (status = 200, description = "Reactions after the toggle", body = ApiResponse<ReactionListDto>),
        (status = 400, description = "Invalid emoji"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not a participant"),
        (status = 404, description = "Message not found")
    ),
    tag = "messages",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn toggle_reaction(
    user: AuthenticatedUser,
    State(state): State<MessagingState>,
    Path(id): Path<Uuid>,
    AppJson(dto): AppJson<ReactionRequestDto>,
) -> Result<Json<ApiResponse<ReactionListDto>>> {
    dto.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let ctx = state.context(&user);
    let reactions = state
        .messages
        .toggle_reaction(&ctx, id, &dto.emoji)
        .await?;

    Ok(Json(ApiResponse::success(
        Some(ReactionListDto { reactions }),
        None,
        None,
    )))
}

fn multipart_error(e: MultipartError) -> AppError {
    debug!("Failed to read multipart data: {}", e);
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::BadRequest(format!("Failed to read multipart data: {}", e))
    }
}

fn non_empty(text: String) -> Option<String> {
    (!text.trim().is_empty()).then_some(text)
}

async fn read_send_form(mut multipart: Multipart) -> Result<SendMessageInput> {
    let mut input = SendMessageInput::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "attachments" | "attachments[]" => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unnamed".to_string());
                let data = field.bytes().await.map_err(multipart_error)?;

                input.attachments.push(IncomingAttachment {
                    file_name,
                    content_type,
                    data: data.to_vec(),
                });
            }
            "content" => {
                input.body = non_empty(field.text().await.map_err(multipart_error)?);
            }
            "type" => {
                if let Some(text) = non_empty(field.text().await.map_err(multipart_error)?) {
                    input.message_type = Some(text.parse().map_err(AppError::BadRequest)?);
                }
            }
            "replyToMessageId" => {
                if let Some(text) = non_empty(field.text().await.map_err(multipart_error)?) {
                    let id = Uuid::parse_str(text.trim()).map_err(|_| {
                        AppError::BadRequest("replyToMessageId must be a UUID".to_string())
                    })?;
                    input.reply_to_message_id = Some(id);
                }
            }
            "metadata" => {
                if let Some(text) = non_empty(field.text().await.map_err(multipart_error)?) {
                    let metadata = serde_json::from_str(&text).map_err(|e| {
                        AppError::BadRequest(format!("metadata is not valid JSON: {}", e))
                    })?;
                    input.metadata = Some(metadata);
                }
            }
            "gif" => {
                if let Some(text) = non_empty(field.text().await.map_err(multipart_error)?) {
                    let gif: GifPayload = serde_json::from_str(&text).map_err(|e| {
                        AppError::BadRequest(format!("gif is not a valid GIF object: {}", e))
                    })?;
                    input.gif = Some(gif);
                }
            }
            _ => {
                debug!("Ignoring unknown field: {}", field_name);
            }
        }
    }

    Ok(input)
}

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AppState, CountResponse, IdResponse, TargetRequest};
use crate::auth::Auth;
use crate::chat;
use crate::conversations::{self, ensure_participant};
use crate::error::ApiError;
use crate::models::{Id, NewGroupConversation, NewMessage};
use crate::profiles;

#[utoipa::path(
    get,
    path = "/api/v1/conversations",
    responses((status = 200, description = "Visible conversations, most recent first", body = [crate::models::ConversationRow])),
    tag = "conversations"
)]
pub async fn list_conversations(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let rows = conversations::list(&data, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(rows))
}

#[utoipa::path(
    post,
    path = "/api/v1/conversations/direct",
    request_body = TargetRequest,
    responses(
        (status = 200, description = "Existing or new direct conversation", body = IdResponse),
        (status = 404, description = "Target does not exist")
    ),
    tag = "conversations"
)]
pub async fn open_direct(auth: Auth, data: web::Data<AppState>, payload: web::Json<TargetRequest>) -> Result<HttpResponse, ApiError> {
    profiles::ensure_profile(&data, &auth.0).await?;
    let id = conversations::get_or_create(&data, auth.user_id(), payload.target_id).await?;
    Ok(HttpResponse::Ok().json(IdResponse { id }))
}

#[utoipa::path(
    post,
    path = "/api/v1/conversations/group",
    request_body = NewGroupConversation,
    responses(
        (status = 201, description = "Group created", body = IdResponse),
        (status = 400, description = "Empty name or no members")
    ),
    tag = "conversations"
)]
pub async fn create_group(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewGroupConversation>,
) -> Result<HttpResponse, ApiError> {
    profiles::ensure_profile(&data, &auth.0).await?;
    let id = conversations::create_group(&data, auth.user_id(), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(IdResponse { id }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PinRequest {
    pub pinned: bool,
}

#[utoipa::path(
    put,
    path = "/api/v1/conversations/{id}/pin",
    params(("id" = uuid::Uuid, Path, description = "Conversation id")),
    request_body = PinRequest,
    responses((status = 204, description = "Pin state stored for the caller only")),
    tag = "conversations"
)]
pub async fn set_pinned(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<PinRequest>,
) -> Result<HttpResponse, ApiError> {
    conversations::set_pinned(&data, auth.user_id(), path.into_inner(), payload.pinned).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    delete,
    path = "/api/v1/conversations/{id}",
    params(("id" = uuid::Uuid, Path, description = "Conversation id")),
    responses((status = 204, description = "Hidden for the caller until the next message")),
    tag = "conversations"
)]
pub async fn delete_for_me(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    conversations::delete_for_me(&data, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/clear",
    params(("id" = uuid::Uuid, Path, description = "Conversation id")),
    responses((status = 204, description = "History hidden for the caller")),
    tag = "conversations"
)]
pub async fn clear_for_me(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    conversations::clear_for_me(&data, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/conversations/{id}/messages",
    params(("id" = uuid::Uuid, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Messages, oldest first", body = [crate::models::Message]),
        (status = 403, description = "Not a participant")
    ),
    tag = "messages"
)]
pub async fn list_messages(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let messages = chat::list_messages(&data, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(messages))
}

#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/messages",
    params(("id" = uuid::Uuid, Path, description = "Conversation id")),
    request_body = NewMessage,
    responses(
        (status = 201, description = "Message stored (or the earlier copy for a repeated client_id)", body = crate::models::Message),
        (status = 400, description = "Empty message"),
        (status = 403, description = "Not a participant"),
        (status = 429, description = "Rate limited")
    ),
    tag = "messages"
)]
pub async fn send_message(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewMessage>,
) -> Result<HttpResponse, ApiError> {
    data.throttle(|rl| rl.allow_message(auth.user_id()))?;
    let msg = chat::send_message(&data, auth.user_id(), path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(msg))
}

#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/read",
    params(("id" = uuid::Uuid, Path, description = "Conversation id")),
    responses((status = 200, description = "Number of messages flipped to read", body = CountResponse)),
    tag = "messages"
)]
pub async fn mark_read(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let count = chat::mark_read(&data, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UnreadResponse {
    pub conversation_id: Id,
    pub unread: i64,
}

#[utoipa::path(
    get,
    path = "/api/v1/conversations/{id}/unread",
    params(("id" = uuid::Uuid, Path, description = "Conversation id")),
    responses((status = 200, description = "Unread messages for the caller", body = UnreadResponse)),
    tag = "messages"
)]
pub async fn unread_count(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let conversation = path.into_inner();
    ensure_participant(&data, conversation, auth.user_id()).await?;
    let unread = data.repo.unread_count(conversation, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(UnreadResponse { conversation_id: conversation, unread }))
}

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use utoipa::IntoParams;

use super::{read_file_field, AppState, UrlResponse};
use crate::auth::Auth;
use crate::chat::{self, MAX_ATTACHMENT_BYTES};
use crate::conversations::ensure_participant;
use crate::error::ApiError;
use crate::models::Id;
use crate::notes;
use crate::profiles;
use crate::storage::Bucket;

fn no_file() -> ApiError {
    ApiError::BadRequest("no file uploaded".into())
}

#[utoipa::path(
    post,
    path = "/api/v1/uploads",
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "Form with a `file` field"),
    responses(
        (status = 201, description = "Stored", body = UrlResponse),
        (status = 400, description = "No file"),
        (status = 413, description = "Payload too large"),
        (status = 500, description = "Write failed")
    ),
    tag = "files"
)]
pub async fn upload(auth: Auth, data: web::Data<AppState>, mut payload: Multipart) -> Result<HttpResponse, ApiError> {
    data.throttle(|rl| rl.allow_upload(auth.user_id()))?;
    let part = read_file_field(&mut payload, data.uploads.max_bytes()).await?.ok_or_else(no_file)?;
    let url = data.uploads.save(&part.file_name, &part.bytes).await?;
    Ok(HttpResponse::Created().json(UrlResponse { url }))
}

pub async fn serve_upload(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let (bytes, mime) = data.uploads.open(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().insert_header(("Content-Type", mime)).body(bytes))
}

/// Public bucket reads for the filesystem backend; S3 URLs point at the bucket directly.
pub async fn serve_object(data: web::Data<AppState>, path: web::Path<(String, String)>) -> Result<HttpResponse, ApiError> {
    let (bucket, key) = path.into_inner();
    let bucket = Bucket::from_name(&bucket).ok_or(ApiError::NotFound)?;
    let (bytes, mime) = data.objects.get(bucket, &key).await?;
    Ok(HttpResponse::Ok().insert_header(("Content-Type", mime)).body(bytes))
}

#[utoipa::path(
    post,
    path = "/api/v1/profiles/me/avatar",
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "Form with an image `file` field"),
    responses(
        (status = 200, description = "Avatar replaced", body = crate::models::Profile),
        (status = 400, description = "No file or not an image"),
        (status = 413, description = "Payload too large")
    ),
    tag = "profiles"
)]
pub async fn upload_avatar(auth: Auth, data: web::Data<AppState>, mut payload: Multipart) -> Result<HttpResponse, ApiError> {
    data.throttle(|rl| rl.allow_upload(auth.user_id()))?;
    let part = read_file_field(&mut payload, MAX_ATTACHMENT_BYTES).await?.ok_or_else(no_file)?;
    profiles::ensure_profile(&data, &auth.0).await?;
    let profile = profiles::upload_avatar(&data, auth.user_id(), &part.file_name, part.bytes).await?;
    Ok(HttpResponse::Ok().json(profile))
}

#[utoipa::path(
    post,
    path = "/api/v1/notes/files",
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "Form with a `file` field"),
    responses(
        (status = 201, description = "Stored in the notes bucket", body = UrlResponse),
        (status = 413, description = "Payload too large")
    ),
    tag = "notes"
)]
pub async fn upload_note_file(auth: Auth, data: web::Data<AppState>, mut payload: Multipart) -> Result<HttpResponse, ApiError> {
    data.throttle(|rl| rl.allow_upload(auth.user_id()))?;
    let part = read_file_field(&mut payload, MAX_ATTACHMENT_BYTES).await?.ok_or_else(no_file)?;
    let url = notes::upload_note_file(&data, auth.user_id(), &part.file_name, part.bytes).await?;
    Ok(HttpResponse::Created().json(UrlResponse { url }))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AttachmentQuery {
    /// Idempotency key echoed back on the realtime insert.
    pub client_id: Option<uuid::Uuid>,
}

#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/attachments",
    params(("id" = uuid::Uuid, Path, description = "Conversation id"), AttachmentQuery),
    request_body(content = Vec<u8>, content_type = "multipart/form-data", description = "Form with a `file` field"),
    responses(
        (status = 201, description = "Uploaded and sent as an image or file message", body = crate::models::Message),
        (status = 403, description = "Not a participant"),
        (status = 413, description = "Above the 10 MB cap")
    ),
    tag = "messages"
)]
pub async fn send_attachment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<AttachmentQuery>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let conversation = path.into_inner();
    data.throttle(|rl| rl.allow_message(auth.user_id()))?;
    // no object is stored for a conversation the caller cannot post to
    ensure_participant(&data, conversation, auth.user_id()).await?;
    let part = read_file_field(&mut payload, MAX_ATTACHMENT_BYTES).await?.ok_or_else(no_file)?;
    let attachment = chat::upload_attachment(&data, auth.user_id(), &part.file_name, part.bytes).await?;
    let msg = chat::send_message(&data, auth.user_id(), conversation, attachment.into_message(query.client_id)).await?;
    Ok(HttpResponse::Created().json(msg))
}

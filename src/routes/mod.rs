use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::web;
use futures_util::TryStreamExt as _;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::models::Id;
use crate::presence::PresenceChannel;
use crate::rate_limit::RateLimiterFacade;
use crate::realtime::EventBus;
use crate::repo::Repo;
use crate::storage::ObjectStore;
use crate::uploads::LocalUploads;

pub mod chat;
pub mod feeds;
pub mod files;
pub mod live;
pub mod notes;
pub mod social;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            // profiles
            .service(
                web::resource("/profiles/me")
                    .route(web::get().to(social::get_me))
                    .route(web::patch().to(social::update_me)),
            )
            .service(web::resource("/profiles/me/avatar").route(web::post().to(files::upload_avatar)))
            .service(web::resource("/profiles").route(web::get().to(social::search_profiles)))
            .service(web::resource("/profiles/{id}").route(web::get().to(social::get_profile)))
            .service(web::resource("/profiles/{id}/status").route(web::patch().to(social::set_status)))
            // connections
            .service(
                web::resource("/connections")
                    .route(web::get().to(social::list_connections))
                    .route(web::post().to(social::send_request)),
            )
            .service(web::resource("/connections/{id}/accept").route(web::post().to(social::accept_request)))
            .service(web::resource("/connections/{id}/reject").route(web::post().to(social::reject_request)))
            .service(
                web::resource("/connections/peers/{user_id}")
                    .route(web::get().to(social::connection_state))
                    .route(web::delete().to(social::disconnect)),
            )
            // conversations + messages
            .service(web::resource("/conversations").route(web::get().to(chat::list_conversations)))
            .service(web::resource("/conversations/direct").route(web::post().to(chat::open_direct)))
            .service(web::resource("/conversations/group").route(web::post().to(chat::create_group)))
            .service(web::resource("/conversations/{id}").route(web::delete().to(chat::delete_for_me)))
            .service(web::resource("/conversations/{id}/pin").route(web::put().to(chat::set_pinned)))
            .service(web::resource("/conversations/{id}/clear").route(web::post().to(chat::clear_for_me)))
            .service(web::resource("/conversations/{id}/read").route(web::post().to(chat::mark_read)))
            .service(web::resource("/conversations/{id}/unread").route(web::get().to(chat::unread_count)))
            .service(
                web::resource("/conversations/{id}/messages")
                    .route(web::get().to(chat::list_messages))
                    .route(web::post().to(chat::send_message)),
            )
            .service(web::resource("/conversations/{id}/attachments").route(web::post().to(files::send_attachment)))
            // notices + notifications
            .service(
                web::resource("/notices")
                    .route(web::get().to(feeds::list_notices))
                    .route(web::post().to(feeds::create_notice)),
            )
            .service(web::resource("/notices/clear").route(web::post().to(feeds::clear_notices)))
            .service(web::resource("/notices/{id}/read").route(web::post().to(feeds::mark_notice_read)))
            .service(web::resource("/notifications").route(web::get().to(feeds::list_notifications)))
            .service(web::resource("/notifications/read-all").route(web::post().to(feeds::mark_all_read)))
            .service(web::resource("/notifications/read").route(web::delete().to(feeds::clear_notifications)))
            .service(web::resource("/notifications/{id}/read").route(web::post().to(feeds::mark_notification_read)))
            // notes (static segments before {id})
            .service(
                web::resource("/notes")
                    .route(web::get().to(notes::list_notes))
                    .route(web::post().to(notes::create_note)),
            )
            .service(web::resource("/notes/flags").route(web::get().to(notes::my_flags)))
            .service(web::resource("/notes/files").route(web::post().to(files::upload_note_file)))
            .service(web::resource("/notes/{id}").route(web::get().to(notes::get_note)))
            .service(
                web::resource("/notes/{id}/{flag}")
                    .route(web::put().to(notes::set_flag))
                    .route(web::delete().to(notes::unset_flag)),
            )
            // local uploads, realtime, presence
            .service(web::resource("/uploads").route(web::post().to(files::upload)))
            .service(web::resource("/realtime").route(web::get().to(live::stream)))
            .service(
                web::resource("/presence")
                    .route(web::get().to(live::online))
                    .route(web::post().to(live::track)),
            )
            .service(web::resource("/presence/{key}").route(web::delete().to(live::untrack))),
    );
    // served outside /api/v1 so the returned URLs work as plain links
    cfg.route("/uploads/{name}", web::get().to(files::serve_upload));
    cfg.route("/storage/{bucket}/{path:.*}", web::get().to(files::serve_object));
}

/// Shared backend handle. Cloning is cheap; every field is reference counted.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub objects: Arc<dyn ObjectStore>,
    pub events: EventBus,
    pub presence: Arc<PresenceChannel>,
    pub uploads: LocalUploads,
    pub rate_limiter: Option<RateLimiterFacade>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, objects: Arc<dyn ObjectStore>, uploads: LocalUploads) -> Self {
        Self {
            repo,
            objects,
            events: EventBus::default(),
            presence: Arc::new(PresenceChannel::new()),
            uploads,
            rate_limiter: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiterFacade) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// 429 when the limiter is configured and refuses.
    pub(crate) fn throttle(&self, allow: impl FnOnce(&RateLimiterFacade) -> bool) -> Result<(), ApiError> {
        match &self.rate_limiter {
            Some(rl) if !allow(rl) => Err(ApiError::TooManyRequests),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IdResponse {
    pub id: Id,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UrlResponse {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TargetRequest {
    pub target_id: Id,
}

/// The `file` field of a multipart body.
pub(crate) struct FilePart {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Reads the first `file` field, failing with 413 once `limit` is exceeded.
pub(crate) async fn read_file_field(payload: &mut Multipart, limit: usize) -> Result<Option<FilePart>, ApiError> {
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::BadRequest("malformed multipart body".into())
    })? {
        let disposition = field.content_disposition();
        if disposition.get_name() != Some("file") {
            continue;
        }
        let file_name = disposition.get_filename().unwrap_or("file").to_string();
        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::BadRequest("failed to read upload".into())
        })? {
            if bytes.len() + chunk.len() > limit {
                return Err(ApiError::PayloadTooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok(Some(FilePart { file_name, bytes }));
    }
    Ok(None)
}

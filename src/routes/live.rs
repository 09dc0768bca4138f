use actix_web::http::header::ContentEncoding;
use actix_web::{web, HttpResponse};
use futures_util::stream;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error};
use utoipa::ToSchema;

use super::AppState;
use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::{Id, NoticeAudience};
use crate::presence::{PresenceGuard, PresenceKey, PresenceState, PresenceTracker};
use crate::realtime::{ChangeEvent, Filter, Record, Subscription};

struct LiveSession {
    events: Subscription,
    presence: broadcast::Receiver<PresenceState>,
    audience: Option<NoticeAudience>,
    // untracked when the client goes away and the stream is dropped
    _tracked: PresenceGuard,
}

impl LiveSession {
    /// Row-level visibility for broadcast tables.
    fn visible(&self, ev: &ChangeEvent) -> bool {
        match &ev.record {
            Record::Notice(notice) => self.audience.as_ref().is_some_and(|a| a.matches(notice)),
            _ => true,
        }
    }

    /// Next SSE frame: a visible row change, or a full presence sync.
    /// `None` ends the stream.
    async fn next_frame(&mut self) -> Option<String> {
        loop {
            let (name, encoded) = tokio::select! {
                ev = self.events.next() => {
                    let ev = ev?;
                    if !self.visible(&ev) {
                        continue;
                    }
                    (ev.table.name(), serde_json::to_string(&ev))
                }
                sync = self.presence.recv() => match sync {
                    Ok(state) => ("presence", serde_json::to_string(&state)),
                    // each sync carries the whole state; the next one catches up
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "presence sync lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                },
            };
            match encoded {
                Ok(json) => return Some(format!("event: {name}\ndata: {json}\n\n")),
                Err(e) => error!("event encode failed: {e}"),
            }
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/realtime",
    responses((status = 200, description = "Server-sent change events visible to the caller, plus `presence` frames with the full online state", content_type = "text/event-stream")),
    tag = "realtime"
)]
pub async fn stream(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let me = auth.user_id();
    // subscribed before joining so the first frame is the sync carrying the caller
    let presence = data.presence.subscribe();
    let session = LiveSession {
        events: data.events.subscribe(Filter::all().for_user(me)),
        presence,
        audience: auth.0.audience(),
        _tracked: PresenceGuard::join(data.presence.clone(), me),
    };
    debug!(%me, "realtime stream opened");

    let body = stream::unfold(session, |mut session| async move {
        let frame = session.next_frame().await?;
        Some((Ok::<_, actix_web::Error>(web::Bytes::from(frame)), session))
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        // keeps Compress from buffering frames
        .insert_header(ContentEncoding::Identity)
        .streaming(body))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrackResponse {
    pub key: PresenceKey,
}

#[utoipa::path(
    post,
    path = "/api/v1/presence",
    responses((status = 201, description = "Caller tracked as online", body = TrackResponse)),
    tag = "presence"
)]
pub async fn track(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let key = data.presence.track(auth.user_id());
    Ok(HttpResponse::Created().json(TrackResponse { key }))
}

#[utoipa::path(
    delete,
    path = "/api/v1/presence/{key}",
    params(("key" = uuid::Uuid, Path, description = "Key returned by track")),
    responses(
        (status = 204, description = "Untracked"),
        (status = 403, description = "Key belongs to another user"),
        (status = 404, description = "Unknown key")
    ),
    tag = "presence"
)]
pub async fn untrack(auth: Auth, data: web::Data<AppState>, path: web::Path<PresenceKey>) -> Result<HttpResponse, ApiError> {
    let key = path.into_inner();
    let meta = data.presence.meta(key).ok_or(ApiError::NotFound)?;
    if meta.user_id != auth.user_id() {
        return Err(ApiError::Forbidden);
    }
    data.presence.untrack(key);
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/presence",
    responses((status = 200, description = "Ids of users currently online", body = [uuid::Uuid])),
    tag = "presence"
)]
pub async fn online(_auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let mut tracker = PresenceTracker::new();
    tracker.apply_sync(&data.presence.state());
    let mut ids: Vec<Id> = tracker.online().iter().copied().collect();
    ids.sort();
    Ok(HttpResponse::Ok().json(ids))
}

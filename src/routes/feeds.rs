use actix_web::{web, HttpResponse};

use super::{AppState, CountResponse};
use crate::auth::Auth;
use crate::error::ApiError;
use crate::feeds::{self, NoticeItem};
use crate::models::{Id, NewNotice, Role};
use crate::profiles;
use crate::require_role;

#[utoipa::path(
    get,
    path = "/api/v1/notices",
    responses((status = 200, description = "Notices in the caller's scope, cleared ones omitted", body = [NoticeItem])),
    tag = "notices"
)]
pub async fn list_notices(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    // no institute, no notices
    let Some(audience) = auth.0.audience() else {
        return Ok(HttpResponse::Ok().json(Vec::<NoticeItem>::new()));
    };
    let items = feeds::list_notices(&data, &audience).await?;
    Ok(HttpResponse::Ok().json(items))
}

#[utoipa::path(
    post,
    path = "/api/v1/notices",
    request_body = NewNotice,
    responses(
        (status = 201, description = "Notice published", body = crate::models::Notice),
        (status = 403, description = "Teachers and institute admins only")
    ),
    tag = "notices"
)]
pub async fn create_notice(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewNotice>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Teacher | Role::InstituteAdmin);
    profiles::ensure_profile(&data, &auth.0).await?;
    let notice = feeds::create_notice(&data, &auth.0, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(notice))
}

#[utoipa::path(
    post,
    path = "/api/v1/notices/{id}/read",
    params(("id" = uuid::Uuid, Path, description = "Notice id")),
    responses((status = 200, description = "Read receipt", body = crate::models::NoticeView)),
    tag = "notices"
)]
pub async fn mark_notice_read(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let view = feeds::mark_notice_read(&data, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(view))
}

#[utoipa::path(
    post,
    path = "/api/v1/notices/clear",
    responses((status = 200, description = "Read notices hidden", body = CountResponse)),
    tag = "notices"
)]
pub async fn clear_notices(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let count = feeds::clear_read_notices(&data, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    responses((status = 200, description = "Caller's notifications, newest first", body = [crate::models::Notification])),
    tag = "notifications"
)]
pub async fn list_notifications(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let items = feeds::list_notifications(&data, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(items))
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications/{id}/read",
    params(("id" = uuid::Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Marked read", body = crate::models::Notification),
        (status = 404, description = "Not the caller's notification")
    ),
    tag = "notifications"
)]
pub async fn mark_notification_read(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let n = feeds::mark_notification_read(&data, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(n))
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications/read-all",
    responses((status = 200, description = "Notifications flipped to read", body = CountResponse)),
    tag = "notifications"
)]
pub async fn mark_all_read(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let count = feeds::mark_all_notifications_read(&data, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

#[utoipa::path(
    delete,
    path = "/api/v1/notifications/read",
    responses((status = 200, description = "Read notifications deleted; unread ones kept", body = CountResponse)),
    tag = "notifications"
)]
pub async fn clear_notifications(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let count = feeds::clear_read_notifications(&data, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

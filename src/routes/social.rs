use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AppState, TargetRequest};
use crate::auth::Auth;
use crate::connections::{self, ConnectionIndex, ConnectionState};
use crate::error::ApiError;
use crate::models::{AccountStatus, Id, ProfileQuery, UpdateProfile};
use crate::profiles;

#[utoipa::path(
    get,
    path = "/api/v1/profiles/me",
    responses(
        (status = 200, description = "Caller's profile, created on first call", body = crate::models::Profile),
        (status = 401, description = "Unauthorized")
    ),
    tag = "profiles"
)]
pub async fn get_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let profile = profiles::ensure_profile(&data, &auth.0).await?;
    Ok(HttpResponse::Ok().json(profile))
}

#[utoipa::path(
    patch,
    path = "/api/v1/profiles/me",
    request_body = UpdateProfile,
    responses(
        (status = 200, description = "Profile updated", body = crate::models::Profile),
        (status = 400, description = "Invalid field")
    ),
    tag = "profiles"
)]
pub async fn update_me(auth: Auth, data: web::Data<AppState>, payload: web::Json<UpdateProfile>) -> Result<HttpResponse, ApiError> {
    profiles::ensure_profile(&data, &auth.0).await?;
    let profile = profiles::update_me(&data, auth.user_id(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(profile))
}

#[utoipa::path(
    get,
    path = "/api/v1/profiles",
    params(ProfileQuery),
    responses((status = 200, description = "Profiles matching the filters", body = [crate::models::Profile])),
    tag = "profiles"
)]
pub async fn search_profiles(_auth: Auth, data: web::Data<AppState>, query: web::Query<ProfileQuery>) -> Result<HttpResponse, ApiError> {
    let profiles = profiles::search(&data, &query).await?;
    Ok(HttpResponse::Ok().json(profiles))
}

#[utoipa::path(
    get,
    path = "/api/v1/profiles/{id}",
    params(("id" = uuid::Uuid, Path, description = "Profile id")),
    responses(
        (status = 200, description = "Profile", body = crate::models::Profile),
        (status = 404, description = "Not found")
    ),
    tag = "profiles"
)]
pub async fn get_profile(_auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let profile = data.repo.get_profile(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(profile))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusRequest {
    pub status: AccountStatus,
}

#[utoipa::path(
    patch,
    path = "/api/v1/profiles/{id}/status",
    params(("id" = uuid::Uuid, Path, description = "Profile id")),
    request_body = StatusRequest,
    responses(
        (status = 200, description = "Status changed", body = crate::models::Profile),
        (status = 403, description = "Institute admins of the same institute only")
    ),
    tag = "profiles"
)]
pub async fn set_status(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<StatusRequest>,
) -> Result<HttpResponse, ApiError> {
    let profile = profiles::set_status(&data, &auth.0, path.into_inner(), payload.status).await?;
    Ok(HttpResponse::Ok().json(profile))
}

#[utoipa::path(
    get,
    path = "/api/v1/connections",
    responses((status = 200, description = "Every connection row touching the caller", body = [crate::models::Connection])),
    tag = "connections"
)]
pub async fn list_connections(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let rows = connections::list(&data, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(rows))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionStateResponse {
    pub user_id: Id,
    pub state: ConnectionState,
    /// Row id to accept or reject when `state` is `request_received`.
    pub request_id: Option<Id>,
}

#[utoipa::path(
    get,
    path = "/api/v1/connections/peers/{user_id}",
    params(("user_id" = uuid::Uuid, Path, description = "Other user")),
    responses((status = 200, description = "How the caller relates to the user", body = ConnectionStateResponse)),
    tag = "connections"
)]
pub async fn connection_state(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let other = path.into_inner();
    let rows = connections::list(&data, auth.user_id()).await?;
    let index = ConnectionIndex::build(auth.user_id(), &rows);
    Ok(HttpResponse::Ok().json(ConnectionStateResponse {
        user_id: other,
        state: index.state_of(other),
        request_id: index.request_from(other),
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/connections",
    request_body = TargetRequest,
    responses(
        (status = 201, description = "Request pending", body = crate::models::Connection),
        (status = 400, description = "Cannot connect to yourself"),
        (status = 409, description = "Already connected or request already received"),
        (status = 429, description = "Rate limited")
    ),
    tag = "connections"
)]
pub async fn send_request(auth: Auth, data: web::Data<AppState>, payload: web::Json<TargetRequest>) -> Result<HttpResponse, ApiError> {
    data.throttle(|rl| rl.allow_connect(auth.user_id()))?;
    profiles::ensure_profile(&data, &auth.0).await?;
    let conn = connections::send_request(&data, auth.user_id(), payload.target_id).await?;
    Ok(HttpResponse::Created().json(conn))
}

#[utoipa::path(
    post,
    path = "/api/v1/connections/{id}/accept",
    params(("id" = uuid::Uuid, Path, description = "Connection row id")),
    responses(
        (status = 200, description = "Accepted", body = crate::models::Connection),
        (status = 403, description = "Only the recipient may accept"),
        (status = 409, description = "Not pending")
    ),
    tag = "connections"
)]
pub async fn accept_request(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let conn = connections::accept_request(&data, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(conn))
}

#[utoipa::path(
    post,
    path = "/api/v1/connections/{id}/reject",
    params(("id" = uuid::Uuid, Path, description = "Connection row id")),
    responses((status = 200, description = "Rejected", body = crate::models::Connection)),
    tag = "connections"
)]
pub async fn reject_request(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let conn = connections::reject_request(&data, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(conn))
}

#[utoipa::path(
    delete,
    path = "/api/v1/connections/peers/{user_id}",
    params(("user_id" = uuid::Uuid, Path, description = "Connected user")),
    responses(
        (status = 204, description = "Connection and direct history removed"),
        (status = 404, description = "Not connected")
    ),
    tag = "connections"
)]
pub async fn disconnect(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    connections::disconnect(&data, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

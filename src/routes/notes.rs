use actix_web::{web, HttpResponse};

use super::AppState;
use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::{Id, NewNote, NoteFlag, NoteQuery};
use crate::notes;
use crate::profiles;

#[utoipa::path(
    get,
    path = "/api/v1/notes",
    params(NoteQuery),
    responses((status = 200, description = "Notes, newest first", body = [crate::models::Note])),
    tag = "notes"
)]
pub async fn list_notes(_auth: Auth, data: web::Data<AppState>, query: web::Query<NoteQuery>) -> Result<HttpResponse, ApiError> {
    let notes = notes::list_notes(&data, &query).await?;
    Ok(HttpResponse::Ok().json(notes))
}

#[utoipa::path(
    post,
    path = "/api/v1/notes",
    request_body = NewNote,
    responses(
        (status = 201, description = "Note created", body = crate::models::Note),
        (status = 400, description = "Missing title")
    ),
    tag = "notes"
)]
pub async fn create_note(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewNote>) -> Result<HttpResponse, ApiError> {
    profiles::ensure_profile(&data, &auth.0).await?;
    let note = notes::create_note(&data, auth.user_id(), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(note))
}

#[utoipa::path(
    get,
    path = "/api/v1/notes/{id}",
    params(("id" = uuid::Uuid, Path, description = "Note id")),
    responses(
        (status = 200, description = "Note; the view is counted", body = crate::models::Note),
        (status = 404, description = "Not found")
    ),
    tag = "notes"
)]
pub async fn get_note(_auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let note = notes::view_note(&data, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(note))
}

#[utoipa::path(
    get,
    path = "/api/v1/notes/flags",
    responses((status = 200, description = "Notes the caller liked, saved or completed", body = crate::models::NoteFlags)),
    tag = "notes"
)]
pub async fn my_flags(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let flags = notes::flags(&data, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(flags))
}

#[utoipa::path(
    put,
    path = "/api/v1/notes/{id}/{flag}",
    params(
        ("id" = uuid::Uuid, Path, description = "Note id"),
        ("flag" = NoteFlag, Path, description = "like | save | completion")
    ),
    responses((status = 200, description = "Counters after the write", body = crate::models::NoteCounters)),
    tag = "notes"
)]
pub async fn set_flag(auth: Auth, data: web::Data<AppState>, path: web::Path<(Id, NoteFlag)>) -> Result<HttpResponse, ApiError> {
    let (note, flag) = path.into_inner();
    let counters = notes::set_flag(&data, auth.user_id(), note, flag, true).await?;
    Ok(HttpResponse::Ok().json(counters))
}

#[utoipa::path(
    delete,
    path = "/api/v1/notes/{id}/{flag}",
    params(
        ("id" = uuid::Uuid, Path, description = "Note id"),
        ("flag" = NoteFlag, Path, description = "like | save | completion")
    ),
    responses((status = 200, description = "Counters after the write", body = crate::models::NoteCounters)),
    tag = "notes"
)]
pub async fn unset_flag(auth: Auth, data: web::Data<AppState>, path: web::Path<(Id, NoteFlag)>) -> Result<HttpResponse, ApiError> {
    let (note, flag) = path.into_inner();
    let counters = notes::set_flag(&data, auth.user_id(), note, flag, false).await?;
    Ok(HttpResponse::Ok().json(counters))
}

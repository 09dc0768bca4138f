use tracing::{info, warn};

use crate::auth::Claims;
use crate::error::{ApiError, ValidationError};
use crate::models::{AccountStatus, Id, NewProfile, Profile, ProfileQuery, Role, UpdateProfile};
use crate::repo::RepoError;
use crate::routes::AppState;
use crate::storage::{object_key, Bucket};

/// Name shown in notifications; falls back when the profile is gone.
pub async fn display_name(state: &AppState, user: Id) -> String {
    match state.repo.get_profile(user).await {
        Ok(p) => p.full_name,
        Err(_) => "Someone".into(),
    }
}

/// Returns the caller's profile, creating it from the session metadata on first use.
pub async fn ensure_profile(state: &AppState, claims: &Claims) -> Result<Profile, ApiError> {
    match state.repo.get_profile(claims.sub).await {
        Ok(p) => Ok(p),
        Err(RepoError::NotFound) => {
            let meta = &claims.metadata;
            let new = NewProfile {
                id: claims.sub,
                full_name: meta.full_name.clone().unwrap_or_else(|| claims.email.clone()),
                avatar_url: None,
                role: meta.role,
                branch: meta.branch.clone(),
                semester: meta.semester,
                institute_code: meta.institute_code.clone(),
            };
            let profile = match state.repo.create_profile(new).await {
                Ok(p) => p,
                // lost a creation race; the row is there now
                Err(RepoError::Conflict) => state.repo.get_profile(claims.sub).await?,
                Err(e) => return Err(e.into()),
            };
            info!(user = %claims.sub, "profile created");
            Ok(profile)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn update_me(state: &AppState, me: Id, upd: UpdateProfile) -> Result<Profile, ApiError> {
    if upd.full_name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ValidationError::Invalid("full name cannot be empty".into()).into());
    }
    if upd.semester.is_some_and(|s| !(1..=12).contains(&s)) {
        return Err(ValidationError::Invalid("semester must be between 1 and 12".into()).into());
    }
    Ok(state.repo.update_profile(me, upd).await?)
}

pub async fn search(state: &AppState, query: &ProfileQuery) -> Result<Vec<Profile>, ApiError> {
    Ok(state.repo.list_profiles(query).await?)
}

/// Institute admins may pause or activate accounts of their own institute.
pub async fn set_status(state: &AppState, admin: &Claims, target: Id, status: AccountStatus) -> Result<Profile, ApiError> {
    if admin.metadata.role != Role::InstituteAdmin {
        return Err(ApiError::Forbidden);
    }
    let profile = state.repo.get_profile(target).await?;
    if profile.institute_code.is_none() || profile.institute_code != admin.metadata.institute_code {
        return Err(ApiError::Forbidden);
    }
    let updated = state.repo.set_account_status(target, status).await?;
    info!(admin = %admin.sub, user = %target, ?status, "account status changed");
    Ok(updated)
}

/// Stores a compressed avatar and points the profile at it.
pub async fn upload_avatar(state: &AppState, me: Id, file_name: &str, bytes: Vec<u8>) -> Result<Profile, ApiError> {
    if !infer::is_image(&bytes) {
        return Err(ValidationError::Invalid("avatar must be an image".into()).into());
    }
    let previous = state.repo.get_profile(me).await?.avatar_url;
    let (bytes, content_type, file_name) = crate::chat::prepare_image(bytes, file_name).await?;
    let key = object_key(me, &file_name, chrono::Utc::now().timestamp_millis());
    let url = state.objects.put(Bucket::Avatars, &key, &content_type, bytes).await?;
    let upd = UpdateProfile { avatar_url: Some(url), ..UpdateProfile::default() };
    let profile = state.repo.update_profile(me, upd).await?;

    // the replaced object is only ours when it sits under the caller's prefix
    let own_prefix = state.objects.public_url(Bucket::Avatars, &format!("{me}/"));
    let replaced = previous.filter(|old| profile.avatar_url.as_ref() != Some(old));
    if let Some(old_key) = replaced.as_deref().and_then(|u| u.strip_prefix(&own_prefix)) {
        let old_key = format!("{me}/{old_key}");
        if let Err(e) = state.objects.remove(Bucket::Avatars, &old_key).await {
            warn!(user = %me, key = %old_key, "failed to remove replaced avatar: {e}");
        }
    }
    Ok(profile)
}

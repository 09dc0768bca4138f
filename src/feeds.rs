//! Broadcast notices and personal notifications: two read-tracking feeds that
//! share a shape but not their semantics.

use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use crate::auth::Claims;
use crate::error::{ApiError, ValidationError};
use crate::models::{Id, NewNotice, NewNotification, Notice, NoticeAudience, NoticeEntry, NoticeView, Notification, Role};
use crate::realtime::{Audience, ChangeEvent, ChangeKind, Record, Table};
use crate::routes::AppState;

/// Read state of a notice for one user, derived from its view row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NoticeState {
    Unread,
    Read,
    Hidden,
}

pub fn classify(view: Option<&NoticeView>) -> NoticeState {
    match view {
        None => NoticeState::Unread,
        Some(v) if v.is_cleared => NoticeState::Hidden,
        Some(_) => NoticeState::Read,
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NoticeItem {
    #[serde(flatten)]
    pub notice: Notice,
    pub state: NoticeState,
}

pub async fn create_notice(state: &AppState, author: &Claims, new: NewNotice) -> Result<Notice, ApiError> {
    if !matches!(author.metadata.role, Role::Teacher | Role::InstituteAdmin) {
        return Err(ApiError::Forbidden);
    }
    let institute = author
        .metadata
        .institute_code
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("no institute on this account".into()))?;
    if new.title.trim().is_empty() || new.content.trim().is_empty() {
        return Err(ValidationError::Invalid("title and content are required".into()).into());
    }
    let notice = state.repo.create_notice(author.sub, institute, new).await?;
    state.events.publish(ChangeKind::Insert, Record::Notice(notice.clone()), Audience::Everyone);
    info!(notice = %notice.id, author = %author.sub, "notice published");
    Ok(notice)
}

/// Visible notices (hidden ones dropped), newest first.
pub async fn list_notices(state: &AppState, audience: &NoticeAudience) -> Result<Vec<NoticeItem>, ApiError> {
    let entries: Vec<NoticeEntry> = state.repo.list_notices(audience).await?;
    Ok(entries
        .into_iter()
        .filter_map(|e| match classify(e.view.as_ref()) {
            NoticeState::Hidden => None,
            s => Some(NoticeItem { notice: e.notice, state: s }),
        })
        .collect())
}

pub async fn mark_notice_read(state: &AppState, me: Id, notice: Id) -> Result<NoticeView, ApiError> {
    let view = state.repo.mark_notice_read(notice, me).await?;
    state.events.publish(ChangeKind::Insert, Record::NoticeView(view.clone()), Audience::Users(vec![me]));
    Ok(view)
}

/// Hides every notice the user has read. Receipts and notices stay.
pub async fn clear_read_notices(state: &AppState, me: Id) -> Result<u64, ApiError> {
    Ok(state.repo.clear_read_notices(me).await?)
}

/// Creates a personal notification and pushes it to its owner.
pub async fn notify(state: &AppState, new: NewNotification) -> Result<Notification, ApiError> {
    let n = state.repo.create_notification(new).await?;
    state.events.publish(ChangeKind::Insert, Record::Notification(n.clone()), Audience::Users(vec![n.user_id]));
    Ok(n)
}

pub async fn list_notifications(state: &AppState, me: Id) -> Result<Vec<Notification>, ApiError> {
    Ok(state.repo.list_notifications(me).await?)
}

pub async fn mark_notification_read(state: &AppState, me: Id, id: Id) -> Result<Notification, ApiError> {
    let n = state.repo.mark_notification_read(id, me).await?;
    state.events.publish(ChangeKind::Update, Record::Notification(n.clone()), Audience::Users(vec![me]));
    Ok(n)
}

pub async fn mark_all_notifications_read(state: &AppState, me: Id) -> Result<u64, ApiError> {
    Ok(state.repo.mark_all_notifications_read(me).await?)
}

/// Deletes read notifications only; unread ones are never cleared.
pub async fn clear_read_notifications(state: &AppState, me: Id) -> Result<u64, ApiError> {
    Ok(state.repo.delete_read_notifications(me).await?)
}

/// Session-side notice feed. Any notice change triggers a full re-fetch.
pub struct NoticeFeed {
    state: AppState,
    audience: NoticeAudience,
    items: Vec<NoticeItem>,
}

impl NoticeFeed {
    pub fn new(state: AppState, audience: NoticeAudience) -> Self {
        Self { state, audience, items: Vec::new() }
    }

    pub fn items(&self) -> &[NoticeItem] {
        &self.items
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|i| i.state == NoticeState::Unread).count()
    }

    pub async fn refresh(&mut self) -> Result<(), ApiError> {
        self.items = list_notices(&self.state, &self.audience).await?;
        Ok(())
    }

    pub async fn on_change(&mut self, ev: &ChangeEvent) -> Result<bool, ApiError> {
        if matches!(ev.table, Table::Notices | Table::NoticeViews) {
            self.refresh().await?;
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn mark_read(&mut self, notice: Id) -> Result<(), ApiError> {
        mark_notice_read(&self.state, self.audience.user_id, notice).await?;
        self.refresh().await
    }

    pub async fn clear_read(&mut self) -> Result<u64, ApiError> {
        let n = clear_read_notices(&self.state, self.audience.user_id).await?;
        self.refresh().await?;
        Ok(n)
    }
}

/// Session-side notification feed; re-fetches on any notification change.
pub struct NotificationFeed {
    state: AppState,
    me: Id,
    items: Vec<Notification>,
}

impl NotificationFeed {
    pub fn new(state: AppState, me: Id) -> Self {
        Self { state, me, items: Vec::new() }
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.is_read).count()
    }

    pub async fn refresh(&mut self) -> Result<(), ApiError> {
        self.items = list_notifications(&self.state, self.me).await?;
        Ok(())
    }

    pub async fn on_change(&mut self, ev: &ChangeEvent) -> Result<bool, ApiError> {
        if ev.table == Table::Notifications && ev.audience.includes(self.me) {
            self.refresh().await?;
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn mark_read(&mut self, id: Id) -> Result<(), ApiError> {
        mark_notification_read(&self.state, self.me, id).await?;
        self.refresh().await
    }

    pub async fn mark_all_read(&mut self) -> Result<u64, ApiError> {
        let n = mark_all_notifications_read(&self.state, self.me).await?;
        self.refresh().await?;
        Ok(n)
    }

    pub async fn clear_read(&mut self) -> Result<u64, ApiError> {
        let n = clear_read_notifications(&self.state, self.me).await?;
        self.refresh().await?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn notice_state_from_view_row() {
        assert_eq!(classify(None), NoticeState::Unread);
        let mut view = NoticeView { notice_id: Uuid::new_v4(), user_id: Uuid::new_v4(), is_cleared: false, viewed_at: Utc::now() };
        assert_eq!(classify(Some(&view)), NoticeState::Read);
        view.is_cleared = true;
        assert_eq!(classify(Some(&view)), NoticeState::Hidden);
    }
}

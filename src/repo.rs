use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait ProfileRepo: Send + Sync {
    async fn create_profile(&self, new: NewProfile) -> RepoResult<Profile>;
    async fn get_profile(&self, id: Id) -> RepoResult<Profile>;
    async fn list_profiles(&self, query: &ProfileQuery) -> RepoResult<Vec<Profile>>;
    async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<Profile>;
    async fn set_account_status(&self, id: Id, status: AccountStatus) -> RepoResult<Profile>;
}

#[async_trait]
pub trait ConnectionRepo: Send + Sync {
    /// Every connection row where `user` is requester or recipient.
    async fn list_connections(&self, user: Id) -> RepoResult<Vec<Connection>>;
    async fn get_connection(&self, id: Id) -> RepoResult<Connection>;
    /// Upsert keyed by the unordered pair. An existing pending or rejected
    /// row is reset to pending with `requester` as the requesting side; an
    /// accepted row is a conflict.
    async fn upsert_connection_request(&self, requester: Id, recipient: Id) -> RepoResult<Connection>;
    async fn set_connection_status(&self, id: Id, status: ConnectionStatus) -> RepoResult<Connection>;
}

/// Conversation stored procedures and the conversation table itself.
#[async_trait]
pub trait ConversationRepo: Send + Sync {
    /// Same unordered pair always yields the same id; un-hides it for `caller`.
    async fn get_or_create_conversation(&self, caller: Id, target: Id) -> RepoResult<Id>;
    async fn create_group_conversation(&self, creator: Id, group: NewGroupConversation) -> RepoResult<Id>;
    /// Conversations visible to `user`, most recently updated first.
    async fn get_user_conversations(&self, user: Id) -> RepoResult<Vec<ConversationRow>>;
    async fn get_conversation(&self, id: Id) -> RepoResult<Conversation>;
    async fn list_participants(&self, conversation: Id) -> RepoResult<Vec<ConversationParticipant>>;
    /// Clears the per-user soft delete for every participant.
    async fn undelete_conversation(&self, conversation: Id) -> RepoResult<()>;
    async fn delete_conversation_for_user(&self, conversation: Id, user: Id) -> RepoResult<()>;
    async fn clear_chat_for_user(&self, conversation: Id, user: Id) -> RepoResult<()>;
    /// Drops the connection between the pair and all direct history between them.
    async fn disconnect_user(&self, caller: Id, target: Id) -> RepoResult<()>;
    async fn set_pinned(&self, conversation: Id, user: Id, pinned: bool) -> RepoResult<()>;
    async fn update_last_message(&self, conversation: Id, message: Id, at: DateTime<Utc>) -> RepoResult<()>;
}

#[async_trait]
pub trait MessageRepo: Send + Sync {
    /// Ascending by creation time, hiding what `viewer` cleared.
    async fn list_messages(&self, conversation: Id, viewer: Id) -> RepoResult<Vec<Message>>;
    /// Idempotent on `(sender, client_id)` when a client id is supplied.
    async fn insert_message(&self, conversation: Id, sender: Id, new: NewMessage) -> RepoResult<Message>;
    /// Flips `is_read` on messages not sent by `reader`; returns how many flipped.
    async fn mark_conversation_read(&self, conversation: Id, reader: Id) -> RepoResult<u64>;
    async fn unread_count(&self, conversation: Id, reader: Id) -> RepoResult<i64>;
}

#[async_trait]
pub trait NoticeRepo: Send + Sync {
    async fn create_notice(&self, author: Id, institute_code: &str, new: NewNotice) -> RepoResult<Notice>;
    /// Notices in scope for the audience, newest first, joined with the caller's view row.
    async fn list_notices(&self, audience: &NoticeAudience) -> RepoResult<Vec<NoticeEntry>>;
    /// Creates the view row if missing; an existing row is returned unchanged.
    async fn mark_notice_read(&self, notice: Id, user: Id) -> RepoResult<NoticeView>;
    /// Sets `is_cleared` on every view row of `user`; returns rows changed.
    async fn clear_read_notices(&self, user: Id) -> RepoResult<u64>;
}

#[async_trait]
pub trait NotificationRepo: Send + Sync {
    async fn create_notification(&self, new: NewNotification) -> RepoResult<Notification>;
    async fn list_notifications(&self, user: Id) -> RepoResult<Vec<Notification>>;
    async fn mark_notification_read(&self, id: Id, user: Id) -> RepoResult<Notification>;
    async fn mark_all_notifications_read(&self, user: Id) -> RepoResult<u64>;
    /// Deletes only rows already read.
    async fn delete_read_notifications(&self, user: Id) -> RepoResult<u64>;
}

#[async_trait]
pub trait NoteRepo: Send + Sync {
    async fn create_note(&self, author: Id, new: NewNote) -> RepoResult<Note>;
    async fn list_notes(&self, query: &NoteQuery) -> RepoResult<Vec<Note>>;
    async fn get_note(&self, id: Id) -> RepoResult<Note>;
    async fn increment_view_count(&self, id: Id) -> RepoResult<i64>;
    /// Inserts (`on`) or deletes the `(user, note)` join row for `flag`.
    async fn set_note_flag(&self, note: Id, user: Id, flag: NoteFlag, on: bool) -> RepoResult<NoteCounters>;
    async fn note_flags(&self, user: Id) -> RepoResult<NoteFlags>;
}

pub trait Repo:
    ProfileRepo + ConnectionRepo + ConversationRepo + MessageRepo + NoticeRepo + NotificationRepo + NoteRepo
{
}

impl<T> Repo for T where
    T: ProfileRepo + ConnectionRepo + ConversationRepo + MessageRepo + NoticeRepo + NotificationRepo + NoteRepo
{
}

#[cfg(feature = "inmem-store")]
pub mod inmem;

#[cfg(feature = "postgres-store")]
pub mod pg;

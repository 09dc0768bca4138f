use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

// Auth-issued user ids and every row id are UUIDs
pub type Id = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    InstituteAdmin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Pending,
    Active,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Profile {
    pub id: Id,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub branch: Option<String>,
    pub semester: Option<i32>,
    pub institute_code: Option<String>,
    pub account_status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewProfile {
    pub id: Id,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub branch: Option<String>,
    pub semester: Option<i32>,
    pub institute_code: Option<String>,
}

/// Self-edit payload; role, institute and status are not user editable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateProfile {
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub branch: Option<String>,
    pub semester: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProfileQuery {
    /// Case-insensitive substring of `full_name`
    pub search: Option<String>,
    pub role: Option<Role>,
    pub institute_code: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ProfileQuery {
    pub fn page(&self) -> Page {
        Page::new(self.limit, self.offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Connection {
    pub id: Id,
    pub requester_id: Id,
    pub recipient_id: Id,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// True when `user` sits on either side of the pair.
    pub fn involves(&self, user: Id) -> bool {
        self.requester_id == user || self.recipient_id == user
    }

    /// The party that is not `user`.
    pub fn other_party(&self, user: Id) -> Id {
        if self.requester_id == user { self.recipient_id } else { self.requester_id }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Conversation {
    pub id: Id,
    pub is_group: bool,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub created_by: Option<Id>,
    pub last_message_id: Option<Id>,
    pub pinned_by: Vec<Id>, // per-user pin, never global
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct ConversationParticipant {
    pub conversation_id: Id,
    pub user_id: Id,
    pub joined_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>, // hidden for this user only
    pub cleared_at: Option<DateTime<Utc>>, // messages before this are hidden for this user
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewGroupConversation {
    pub name: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub member_ids: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ParticipantProfile {
    pub id: Id,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LastMessagePreview {
    pub id: Id,
    pub sender_id: Id,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

/// Aggregate row produced by `get_user_conversations`.
///
/// For direct conversations `participants` never contains the caller, so its
/// first element is the other party. Group rows list the other members.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationRow {
    pub id: Id,
    pub is_group: bool,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub participants: Vec<ParticipantProfile>,
    pub last_message: Option<LastMessagePreview>,
    pub unread_count: i64,
    pub updated_at: DateTime<Utc>,
    pub pinned_by: Vec<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Message {
    pub id: Id,
    pub conversation_id: Id,
    pub sender_id: Id,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub is_read: bool,
    pub client_id: Option<Uuid>, // sender-generated idempotency key
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NewMessage {
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub client_id: Option<Uuid>,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), client_id: Some(Uuid::new_v4()), ..Default::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Notice {
    pub id: Id,
    pub author_id: Id,
    pub title: String,
    pub content: String,
    pub institute_code: String,
    pub branch: Option<String>,   // None = every branch
    pub semester: Option<i32>,    // None = every semester
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewNotice {
    pub title: String,
    pub content: String,
    pub branch: Option<String>,
    pub semester: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct NoticeView {
    pub notice_id: Id,
    pub user_id: Id,
    pub is_cleared: bool,
    pub viewed_at: DateTime<Utc>,
}

/// Which broadcast notices a user is allowed to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeAudience {
    pub user_id: Id,
    pub institute_code: String,
    pub branch: Option<String>,
    pub semester: Option<i32>,
}

impl NoticeAudience {
    pub fn matches(&self, notice: &Notice) -> bool {
        notice.institute_code == self.institute_code
            && notice.branch.as_ref().map_or(true, |b| self.branch.as_ref() == Some(b))
            && notice.semester.map_or(true, |s| self.semester == Some(s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NoticeEntry {
    pub notice: Notice,
    pub view: Option<NoticeView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum NotificationCategory {
    Social,
    Academic,
    #[default]
    System,
    Study,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Notification {
    pub id: Id,
    pub user_id: Id,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub category: NotificationCategory,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewNotification {
    pub user_id: Id,
    pub title: String,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub category: NotificationCategory,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum NoteType {
    Text,
    Pdf,
    Video,
    Audio,
    Link,
    Voice,
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Note {
    pub id: Id,
    pub author_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub note_type: NoteType,
    pub file_url: Option<String>,
    pub subject: Option<String>,
    pub branch: Option<String>,
    pub semester: Option<i32>,
    pub views: i64,
    pub likes: i64, // derived from note_likes
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewNote {
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub note_type: NoteType,
    pub file_url: Option<String>,
    pub subject: Option<String>,
    pub branch: Option<String>,
    pub semester: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NoteQuery {
    pub search: Option<String>,
    pub note_type: Option<NoteType>,
    pub author_id: Option<Id>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl NoteQuery {
    pub fn page(&self) -> Page {
        Page::new(self.limit, self.offset)
    }
}

/// Per-user flag join tables on notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NoteFlag {
    Like,
    Save,
    Completion,
}

impl NoteFlag {
    pub fn table(self) -> &'static str {
        match self {
            NoteFlag::Like => "note_likes",
            NoteFlag::Save => "note_saves",
            NoteFlag::Completion => "note_completions",
        }
    }
}

/// Note ids the user has flagged, one set per join table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NoteFlags {
    pub liked: Vec<Id>,
    pub saved: Vec<Id>,
    pub completed: Vec<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NoteCounters {
    pub views: i64,
    pub likes: i64,
}

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0).max(0),
        }
    }

    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset as usize).take(self.limit as usize).collect()
    }
}

impl Default for Page {
    fn default() -> Self { Self::new(None, None) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(branch: Option<&str>, semester: Option<i32>) -> Notice {
        Notice {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            title: "t".into(),
            content: "c".into(),
            institute_code: "INST".into(),
            branch: branch.map(Into::into),
            semester,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn notice_scope_nulls_match_everyone() {
        let aud = NoticeAudience { user_id: Uuid::new_v4(), institute_code: "INST".into(), branch: Some("CSE".into()), semester: Some(3) };
        assert!(aud.matches(&notice(None, None)));
        assert!(aud.matches(&notice(Some("CSE"), Some(3))));
        assert!(!aud.matches(&notice(Some("ECE"), None)));
        assert!(!aud.matches(&notice(None, Some(5))));
    }

    #[test]
    fn page_clamps() {
        assert_eq!(Page::new(Some(1000), Some(-4)), Page { limit: MAX_PAGE_SIZE, offset: 0 });
        assert_eq!(Page::new(None, None).limit, DEFAULT_PAGE_SIZE);
        assert_eq!(Page::new(Some(2), Some(1)).slice(vec![1, 2, 3, 4]), vec![2, 3]);
    }
}

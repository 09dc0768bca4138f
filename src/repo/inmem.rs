use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::*;

#[derive(Default, Serialize, Deserialize)]
struct State {
    profiles: Vec<Profile>,
    connections: Vec<Connection>,
    conversations: Vec<Conversation>,
    participants: Vec<ConversationParticipant>,
    messages: Vec<Message>, // insertion order is chronological
    notices: Vec<Notice>,
    notice_views: Vec<NoticeView>,
    notifications: Vec<Notification>,
    notes: Vec<Note>,
    note_flags: Vec<FlagRow>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FlagRow {
    flag: NoteFlag,
    user_id: Id,
    note_id: Id,
}

impl State {
    fn participant(&self, conversation: Id, user: Id) -> Option<&ConversationParticipant> {
        self.participants.iter().find(|p| p.conversation_id == conversation && p.user_id == user)
    }

    fn participant_mut(&mut self, conversation: Id, user: Id) -> Option<&mut ConversationParticipant> {
        self.participants.iter_mut().find(|p| p.conversation_id == conversation && p.user_id == user)
    }

    fn conversation_mut(&mut self, id: Id) -> RepoResult<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id).ok_or(RepoError::NotFound)
    }

    fn visible_to(&self, m: &Message, viewer: Id) -> bool {
        match self.participant(m.conversation_id, viewer).and_then(|p| p.cleared_at) {
            Some(cleared) => m.created_at > cleared,
            None => true,
        }
    }

    fn direct_between(&self, a: Id, b: Id) -> Option<Id> {
        self.conversations
            .iter()
            .filter(|c| !c.is_group)
            .find(|c| self.participant(c.id, a).is_some() && self.participant(c.id, b).is_some())
            .map(|c| c.id)
    }

    fn counters(&self, note: Id) -> RepoResult<NoteCounters> {
        let n = self.notes.iter().find(|n| n.id == note).ok_or(RepoError::NotFound)?;
        Ok(NoteCounters { views: n.views, likes: n.likes })
    }

    fn likes_of(&self, note: Id) -> i64 {
        self.note_flags.iter().filter(|f| f.flag == NoteFlag::Like && f.note_id == note).count() as i64
    }
}

/// Process-local backend. Optionally snapshots itself to a JSON file after
/// every write so local development survives restarts.
#[derive(Clone, Default)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
}

impl InMemRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `<dir>/state.json` when present and persists back to it.
    pub fn with_snapshot_dir(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join("state.json");
        let state = Self::load_state_from(&path);
        Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    info!("loaded snapshot '{}'", path.display());
                    s
                }
                Err(e) => {
                    warn!("failed to parse snapshot '{}': {e}. starting empty", path.display());
                    State::default()
                }
            },
            Err(e) => {
                info!("no snapshot at '{}' ({e}); starting empty", path.display());
                State::default()
            }
        }
    }

    fn persist(&self) {
        let Some(path) = self.snapshot_path.as_deref() else { return };
        let bytes = match self.state.read() {
            Ok(s) => serde_json::to_vec_pretty(&*s),
            Err(_) => return,
        };
        match bytes {
            Ok(bytes) => {
                if let Some(dir) = path.parent() {
                    if let Err(e) = std::fs::create_dir_all(dir) {
                        warn!("failed to create snapshot dir '{}': {e}", dir.display());
                        return;
                    }
                }
                if let Err(e) = std::fs::write(path, bytes) {
                    warn!("failed to write snapshot '{}': {e}", path.display());
                }
            }
            Err(e) => warn!("failed to serialise snapshot: {e}"),
        }
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }
}

#[async_trait]
impl ProfileRepo for InMemRepo {
    async fn create_profile(&self, new: NewProfile) -> RepoResult<Profile> {
        let mut s = self.write()?;
        if s.profiles.iter().any(|p| p.id == new.id) {
            return Err(RepoError::Conflict);
        }
        let profile = Profile {
            id: new.id,
            full_name: new.full_name,
            avatar_url: new.avatar_url,
            role: new.role,
            branch: new.branch,
            semester: new.semester,
            institute_code: new.institute_code,
            account_status: AccountStatus::Pending,
            created_at: Utc::now(),
        };
        s.profiles.push(profile.clone());
        drop(s); // release lock before persisting
        self.persist();
        Ok(profile)
    }

    async fn get_profile(&self, id: Id) -> RepoResult<Profile> {
        let s = self.read()?;
        s.profiles.iter().find(|p| p.id == id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_profiles(&self, query: &ProfileQuery) -> RepoResult<Vec<Profile>> {
        let s = self.read()?;
        let needle = query.search.as_deref().map(str::to_lowercase);
        let mut v: Vec<_> = s
            .profiles
            .iter()
            .filter(|p| needle.as_ref().map_or(true, |n| p.full_name.to_lowercase().contains(n)))
            .filter(|p| query.role.map_or(true, |r| p.role == r))
            .filter(|p| query.institute_code.as_ref().map_or(true, |c| p.institute_code.as_ref() == Some(c)))
            .cloned()
            .collect();
        v.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(query.page().slice(v))
    }

    async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<Profile> {
        let mut s = self.write()?;
        let p = s.profiles.iter_mut().find(|p| p.id == id).ok_or(RepoError::NotFound)?;
        if let Some(v) = upd.full_name { p.full_name = v; }
        if let Some(v) = upd.avatar_url { p.avatar_url = Some(v); }
        if let Some(v) = upd.branch { p.branch = Some(v); }
        if let Some(v) = upd.semester { p.semester = Some(v); }
        let updated = p.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn set_account_status(&self, id: Id, status: AccountStatus) -> RepoResult<Profile> {
        let mut s = self.write()?;
        let p = s.profiles.iter_mut().find(|p| p.id == id).ok_or(RepoError::NotFound)?;
        p.account_status = status;
        let updated = p.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }
}

#[async_trait]
impl ConnectionRepo for InMemRepo {
    async fn list_connections(&self, user: Id) -> RepoResult<Vec<Connection>> {
        let s = self.read()?;
        Ok(s.connections.iter().filter(|c| c.involves(user)).cloned().collect())
    }

    async fn get_connection(&self, id: Id) -> RepoResult<Connection> {
        let s = self.read()?;
        s.connections.iter().find(|c| c.id == id).cloned().ok_or(RepoError::NotFound)
    }

    async fn upsert_connection_request(&self, requester: Id, recipient: Id) -> RepoResult<Connection> {
        let mut s = self.write()?;
        if !s.profiles.iter().any(|p| p.id == recipient) {
            return Err(RepoError::NotFound);
        }
        let now = Utc::now();
        let conn = match s.connections.iter_mut().find(|c| c.involves(requester) && c.involves(recipient)) {
            Some(existing) => {
                if existing.status == ConnectionStatus::Accepted {
                    return Err(RepoError::Conflict);
                }
                existing.requester_id = requester;
                existing.recipient_id = recipient;
                existing.status = ConnectionStatus::Pending;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let conn = Connection {
                    id: Uuid::new_v4(),
                    requester_id: requester,
                    recipient_id: recipient,
                    status: ConnectionStatus::Pending,
                    created_at: now,
                    updated_at: now,
                };
                s.connections.push(conn.clone());
                conn
            }
        };
        drop(s);
        self.persist();
        Ok(conn)
    }

    async fn set_connection_status(&self, id: Id, status: ConnectionStatus) -> RepoResult<Connection> {
        let mut s = self.write()?;
        let c = s.connections.iter_mut().find(|c| c.id == id).ok_or(RepoError::NotFound)?;
        c.status = status;
        c.updated_at = Utc::now();
        let updated = c.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }
}

#[async_trait]
impl ConversationRepo for InMemRepo {
    async fn get_or_create_conversation(&self, caller: Id, target: Id) -> RepoResult<Id> {
        let mut s = self.write()?;
        if caller == target {
            return Err(RepoError::Conflict);
        }
        if !s.profiles.iter().any(|p| p.id == target) {
            return Err(RepoError::NotFound);
        }
        let id = match s.direct_between(caller, target) {
            Some(id) => {
                if let Some(p) = s.participant_mut(id, caller) {
                    p.deleted_at = None;
                }
                id
            }
            None => {
                let now = Utc::now();
                let id = Uuid::new_v4();
                s.conversations.push(Conversation {
                    id,
                    is_group: false,
                    name: None,
                    description: None,
                    avatar_url: None,
                    created_by: Some(caller),
                    last_message_id: None,
                    pinned_by: Vec::new(),
                    created_at: now,
                    updated_at: now,
                });
                for user_id in [caller, target] {
                    s.participants.push(ConversationParticipant {
                        conversation_id: id,
                        user_id,
                        joined_at: now,
                        deleted_at: None,
                        cleared_at: None,
                    });
                }
                id
            }
        };
        drop(s);
        self.persist();
        Ok(id)
    }

    async fn create_group_conversation(&self, creator: Id, group: NewGroupConversation) -> RepoResult<Id> {
        let mut s = self.write()?;
        let now = Utc::now();
        let id = Uuid::new_v4();
        s.conversations.push(Conversation {
            id,
            is_group: true,
            name: Some(group.name),
            description: group.description,
            avatar_url: group.avatar_url,
            created_by: Some(creator),
            last_message_id: None,
            pinned_by: Vec::new(),
            created_at: now,
            updated_at: now,
        });
        let mut seen = HashSet::new();
        for user_id in std::iter::once(creator).chain(group.member_ids) {
            if seen.insert(user_id) {
                s.participants.push(ConversationParticipant {
                    conversation_id: id,
                    user_id,
                    joined_at: now,
                    deleted_at: None,
                    cleared_at: None,
                });
            }
        }
        drop(s);
        self.persist();
        Ok(id)
    }

    async fn get_user_conversations(&self, user: Id) -> RepoResult<Vec<ConversationRow>> {
        let s = self.read()?;
        let mut rows = Vec::new();
        for mine in s.participants.iter().filter(|p| p.user_id == user && p.deleted_at.is_none()) {
            let Some(conv) = s.conversations.iter().find(|c| c.id == mine.conversation_id) else { continue };
            let participants = s
                .participants
                .iter()
                .filter(|p| p.conversation_id == conv.id && p.user_id != user)
                .map(|p| match s.profiles.iter().find(|pr| pr.id == p.user_id) {
                    Some(pr) => ParticipantProfile {
                        id: pr.id,
                        full_name: Some(pr.full_name.clone()),
                        avatar_url: pr.avatar_url.clone(),
                    },
                    None => ParticipantProfile { id: p.user_id, full_name: None, avatar_url: None },
                })
                .collect();
            let visible: Vec<&Message> = s
                .messages
                .iter()
                .filter(|m| m.conversation_id == conv.id && s.visible_to(m, user))
                .collect();
            let last_message = visible.last().map(|m| LastMessagePreview {
                id: m.id,
                sender_id: m.sender_id,
                content: m.content.clone(),
                message_type: m.message_type,
                created_at: m.created_at,
            });
            let unread_count = visible.iter().filter(|m| m.sender_id != user && !m.is_read).count() as i64;
            rows.push(ConversationRow {
                id: conv.id,
                is_group: conv.is_group,
                name: conv.name.clone(),
                description: conv.description.clone(),
                avatar_url: conv.avatar_url.clone(),
                participants,
                last_message,
                unread_count,
                updated_at: conv.updated_at,
                pinned_by: conv.pinned_by.clone(),
            });
        }
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    async fn get_conversation(&self, id: Id) -> RepoResult<Conversation> {
        let s = self.read()?;
        s.conversations.iter().find(|c| c.id == id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_participants(&self, conversation: Id) -> RepoResult<Vec<ConversationParticipant>> {
        let s = self.read()?;
        if !s.conversations.iter().any(|c| c.id == conversation) {
            return Err(RepoError::NotFound);
        }
        Ok(s.participants.iter().filter(|p| p.conversation_id == conversation).cloned().collect())
    }

    async fn undelete_conversation(&self, conversation: Id) -> RepoResult<()> {
        let mut s = self.write()?;
        for p in s.participants.iter_mut().filter(|p| p.conversation_id == conversation) {
            p.deleted_at = None;
        }
        drop(s);
        self.persist();
        Ok(())
    }

    async fn delete_conversation_for_user(&self, conversation: Id, user: Id) -> RepoResult<()> {
        let mut s = self.write()?;
        let p = s.participant_mut(conversation, user).ok_or(RepoError::NotFound)?;
        let now = Utc::now();
        p.deleted_at = Some(now);
        p.cleared_at = Some(now); // a deleted chat comes back empty
        drop(s);
        self.persist();
        Ok(())
    }

    async fn clear_chat_for_user(&self, conversation: Id, user: Id) -> RepoResult<()> {
        let mut s = self.write()?;
        let p = s.participant_mut(conversation, user).ok_or(RepoError::NotFound)?;
        p.cleared_at = Some(Utc::now());
        drop(s);
        self.persist();
        Ok(())
    }

    async fn disconnect_user(&self, caller: Id, target: Id) -> RepoResult<()> {
        let mut s = self.write()?;
        let before = s.connections.len();
        s.connections.retain(|c| !(c.involves(caller) && c.involves(target) && c.status == ConnectionStatus::Accepted));
        if s.connections.len() == before {
            return Err(RepoError::NotFound);
        }
        let doomed: HashSet<Id> = s
            .conversations
            .iter()
            .filter(|c| !c.is_group && s.participant(c.id, caller).is_some() && s.participant(c.id, target).is_some())
            .map(|c| c.id)
            .collect();
        s.conversations.retain(|c| !doomed.contains(&c.id));
        s.participants.retain(|p| !doomed.contains(&p.conversation_id));
        s.messages.retain(|m| !doomed.contains(&m.conversation_id));
        drop(s);
        self.persist();
        Ok(())
    }

    async fn set_pinned(&self, conversation: Id, user: Id, pinned: bool) -> RepoResult<()> {
        let mut s = self.write()?;
        if s.participant(conversation, user).is_none() {
            return Err(RepoError::NotFound);
        }
        let conv = s.conversation_mut(conversation)?;
        conv.pinned_by.retain(|u| *u != user);
        if pinned {
            conv.pinned_by.push(user);
        }
        drop(s);
        self.persist();
        Ok(())
    }

    async fn update_last_message(&self, conversation: Id, message: Id, at: DateTime<Utc>) -> RepoResult<()> {
        let mut s = self.write()?;
        let conv = s.conversation_mut(conversation)?;
        conv.last_message_id = Some(message);
        conv.updated_at = at;
        drop(s);
        self.persist();
        Ok(())
    }
}

#[async_trait]
impl MessageRepo for InMemRepo {
    async fn list_messages(&self, conversation: Id, viewer: Id) -> RepoResult<Vec<Message>> {
        let s = self.read()?;
        if s.participant(conversation, viewer).is_none() {
            return Err(RepoError::NotFound);
        }
        let mut v: Vec<_> = s
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation && s.visible_to(m, viewer))
            .cloned()
            .collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at)); // stable: ties keep insertion order
        Ok(v)
    }

    async fn insert_message(&self, conversation: Id, sender: Id, new: NewMessage) -> RepoResult<Message> {
        let mut s = self.write()?;
        if !s.conversations.iter().any(|c| c.id == conversation) {
            return Err(RepoError::NotFound);
        }
        if let Some(client_id) = new.client_id {
            if let Some(existing) = s.messages.iter().find(|m| m.sender_id == sender && m.client_id == Some(client_id)) {
                return Ok(existing.clone());
            }
        }
        let msg = Message {
            id: Uuid::new_v4(),
            conversation_id: conversation,
            sender_id: sender,
            content: new.content,
            message_type: new.message_type,
            file_url: new.file_url,
            file_name: new.file_name,
            file_size: new.file_size,
            is_read: false,
            client_id: new.client_id,
            created_at: Utc::now(),
        };
        s.messages.push(msg.clone());
        drop(s);
        self.persist();
        Ok(msg)
    }

    async fn mark_conversation_read(&self, conversation: Id, reader: Id) -> RepoResult<u64> {
        let mut s = self.write()?;
        let mut flipped = 0;
        for m in s.messages.iter_mut().filter(|m| m.conversation_id == conversation && m.sender_id != reader && !m.is_read) {
            m.is_read = true;
            flipped += 1;
        }
        drop(s);
        if flipped > 0 {
            self.persist();
        }
        Ok(flipped)
    }

    async fn unread_count(&self, conversation: Id, reader: Id) -> RepoResult<i64> {
        let s = self.read()?;
        Ok(s.messages
            .iter()
            .filter(|m| m.conversation_id == conversation && m.sender_id != reader && !m.is_read && s.visible_to(m, reader))
            .count() as i64)
    }
}

#[async_trait]
impl NoticeRepo for InMemRepo {
    async fn create_notice(&self, author: Id, institute_code: &str, new: NewNotice) -> RepoResult<Notice> {
        let mut s = self.write()?;
        let notice = Notice {
            id: Uuid::new_v4(),
            author_id: author,
            title: new.title,
            content: new.content,
            institute_code: institute_code.to_string(),
            branch: new.branch,
            semester: new.semester,
            created_at: Utc::now(),
        };
        s.notices.push(notice.clone());
        drop(s);
        self.persist();
        Ok(notice)
    }

    async fn list_notices(&self, audience: &NoticeAudience) -> RepoResult<Vec<NoticeEntry>> {
        let s = self.read()?;
        let mut v: Vec<_> = s
            .notices
            .iter()
            .filter(|n| audience.matches(n))
            .map(|n| NoticeEntry {
                notice: n.clone(),
                view: s.notice_views.iter().find(|v| v.notice_id == n.id && v.user_id == audience.user_id).cloned(),
            })
            .collect();
        v.sort_by(|a, b| b.notice.created_at.cmp(&a.notice.created_at));
        Ok(v)
    }

    async fn mark_notice_read(&self, notice: Id, user: Id) -> RepoResult<NoticeView> {
        let mut s = self.write()?;
        if !s.notices.iter().any(|n| n.id == notice) {
            return Err(RepoError::NotFound);
        }
        if let Some(v) = s.notice_views.iter().find(|v| v.notice_id == notice && v.user_id == user) {
            return Ok(v.clone());
        }
        let view = NoticeView { notice_id: notice, user_id: user, is_cleared: false, viewed_at: Utc::now() };
        s.notice_views.push(view.clone());
        drop(s);
        self.persist();
        Ok(view)
    }

    async fn clear_read_notices(&self, user: Id) -> RepoResult<u64> {
        let mut s = self.write()?;
        let mut changed = 0;
        for v in s.notice_views.iter_mut().filter(|v| v.user_id == user && !v.is_cleared) {
            v.is_cleared = true;
            changed += 1;
        }
        drop(s);
        self.persist();
        Ok(changed)
    }
}

#[async_trait]
impl NotificationRepo for InMemRepo {
    async fn create_notification(&self, new: NewNotification) -> RepoResult<Notification> {
        let mut s = self.write()?;
        let n = Notification {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            title: new.title,
            message: new.message,
            kind: new.kind,
            category: new.category,
            link: new.link,
            is_read: false,
            created_at: Utc::now(),
        };
        s.notifications.push(n.clone());
        drop(s);
        self.persist();
        Ok(n)
    }

    async fn list_notifications(&self, user: Id) -> RepoResult<Vec<Notification>> {
        let s = self.read()?;
        // newest first; reverse before the stable sort so equal timestamps keep newest first too
        let mut v: Vec<_> = s.notifications.iter().rev().filter(|n| n.user_id == user).cloned().collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(v)
    }

    async fn mark_notification_read(&self, id: Id, user: Id) -> RepoResult<Notification> {
        let mut s = self.write()?;
        let n = s.notifications.iter_mut().find(|n| n.id == id && n.user_id == user).ok_or(RepoError::NotFound)?;
        n.is_read = true;
        let updated = n.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn mark_all_notifications_read(&self, user: Id) -> RepoResult<u64> {
        let mut s = self.write()?;
        let mut changed = 0;
        for n in s.notifications.iter_mut().filter(|n| n.user_id == user && !n.is_read) {
            n.is_read = true;
            changed += 1;
        }
        drop(s);
        self.persist();
        Ok(changed)
    }

    async fn delete_read_notifications(&self, user: Id) -> RepoResult<u64> {
        let mut s = self.write()?;
        let before = s.notifications.len();
        s.notifications.retain(|n| !(n.user_id == user && n.is_read));
        let removed = (before - s.notifications.len()) as u64;
        drop(s);
        self.persist();
        Ok(removed)
    }
}

#[async_trait]
impl NoteRepo for InMemRepo {
    async fn create_note(&self, author: Id, new: NewNote) -> RepoResult<Note> {
        let mut s = self.write()?;
        let note = Note {
            id: Uuid::new_v4(),
            author_id: author,
            title: new.title,
            description: new.description,
            content: new.content,
            note_type: new.note_type,
            file_url: new.file_url,
            subject: new.subject,
            branch: new.branch,
            semester: new.semester,
            views: 0,
            likes: 0,
            created_at: Utc::now(),
        };
        s.notes.push(note.clone());
        drop(s);
        self.persist();
        Ok(note)
    }

    async fn list_notes(&self, query: &NoteQuery) -> RepoResult<Vec<Note>> {
        let s = self.read()?;
        let needle = query.search.as_deref().map(str::to_lowercase);
        let mut v: Vec<_> = s
            .notes
            .iter()
            .rev()
            .filter(|n| needle.as_ref().map_or(true, |q| n.title.to_lowercase().contains(q)))
            .filter(|n| query.note_type.map_or(true, |t| n.note_type == t))
            .filter(|n| query.author_id.map_or(true, |a| n.author_id == a))
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(query.page().slice(v))
    }

    async fn get_note(&self, id: Id) -> RepoResult<Note> {
        let s = self.read()?;
        s.notes.iter().find(|n| n.id == id).cloned().ok_or(RepoError::NotFound)
    }

    async fn increment_view_count(&self, id: Id) -> RepoResult<i64> {
        let mut s = self.write()?;
        let n = s.notes.iter_mut().find(|n| n.id == id).ok_or(RepoError::NotFound)?;
        n.views += 1;
        let views = n.views;
        drop(s);
        self.persist();
        Ok(views)
    }

    async fn set_note_flag(&self, note: Id, user: Id, flag: NoteFlag, on: bool) -> RepoResult<NoteCounters> {
        let mut s = self.write()?;
        if !s.notes.iter().any(|n| n.id == note) {
            return Err(RepoError::NotFound);
        }
        let row = FlagRow { flag, user_id: user, note_id: note };
        s.note_flags.retain(|r| *r != row);
        if on {
            s.note_flags.push(row);
        }
        let likes = s.likes_of(note);
        if let Some(n) = s.notes.iter_mut().find(|n| n.id == note) {
            n.likes = likes;
        }
        let counters = s.counters(note)?;
        drop(s);
        self.persist();
        Ok(counters)
    }

    async fn note_flags(&self, user: Id) -> RepoResult<NoteFlags> {
        let s = self.read()?;
        let ids = |flag: NoteFlag| -> Vec<Id> {
            s.note_flags.iter().filter(|r| r.flag == flag && r.user_id == user).map(|r| r.note_id).collect()
        };
        Ok(NoteFlags { liked: ids(NoteFlag::Like), saved: ids(NoteFlag::Save), completed: ids(NoteFlag::Completion) })
    }
}

//! Conversation list: one display model for group and direct threads, built
//! from the heterogeneous rows of `get_user_conversations`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ApiError, ValidationError};
use crate::models::{
    Conversation, ConversationParticipant, ConversationRow, Id, LastMessagePreview, MessageType, NewGroupConversation,
};
use crate::optimistic::Transition;
use crate::realtime::{Audience, ChangeEvent, ChangeKind, Record, Table};
use crate::repo::RepoError;
use crate::routes::AppState;

pub const PREVIEW_CHARS: usize = 30;
pub const DELETED_USER: &str = "Deleted User";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationKind {
    Group { description: Option<String>, member_count: usize },
    /// `other_user_id` is `None` when the peer row is missing entirely.
    Direct { other_user_id: Option<Id> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub id: Id,
    #[serde(flatten)]
    pub kind: ConversationKind,
    pub display_name: String,
    pub avatar_url: String,
    pub preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
    pub pinned: bool,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSummary {
    pub fn is_direct_with(&self, user: Id) -> bool {
        matches!(self.kind, ConversationKind::Direct { other_user_id: Some(u) } if u == user)
    }
}

pub fn initials_avatar(name: &str) -> String {
    format!("https://ui-avatars.com/api/?name={}", urlencoding::encode(name))
}

fn truncate_preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

pub fn preview(msg: &LastMessagePreview) -> String {
    match msg.message_type {
        MessageType::Text => truncate_preview(&msg.content),
        MessageType::Image => "Sent an image".into(),
        MessageType::File => "Sent a file".into(),
    }
}

/// Maps one aggregate row into the display model for viewer `me`.
pub fn summarize(row: &ConversationRow, me: Id) -> ConversationSummary {
    let (kind, display_name, avatar) = if row.is_group {
        let name = row.name.clone().filter(|n| !n.trim().is_empty()).unwrap_or_else(|| "Unnamed group".into());
        let avatar = row.avatar_url.clone().unwrap_or_else(|| initials_avatar(&name));
        let kind = ConversationKind::Group { description: row.description.clone(), member_count: row.participants.len() + 1 };
        (kind, name, avatar)
    } else {
        // upstream guarantees the first participant is the other party
        let other = row.participants.first();
        let name = other.and_then(|p| p.full_name.clone()).unwrap_or_else(|| DELETED_USER.into());
        let avatar = other.and_then(|p| p.avatar_url.clone()).unwrap_or_else(|| initials_avatar(&name));
        (ConversationKind::Direct { other_user_id: other.map(|p| p.id) }, name, avatar)
    };
    ConversationSummary {
        id: row.id,
        kind,
        display_name,
        avatar_url: avatar,
        preview: row.last_message.as_ref().map(preview),
        last_message_at: row.last_message.as_ref().map(|m| m.created_at),
        unread_count: row.unread_count,
        pinned: row.pinned_by.contains(&me),
        updated_at: row.updated_at,
    }
}

/// Pinned first, otherwise arrival order.
fn pinned_first(items: &mut [ConversationSummary]) {
    items.sort_by_key(|s| !s.pinned);
}

/// Map, dedup by id (first occurrence wins) and stable pinned-first sort.
pub fn synchronize(rows: &[ConversationRow], me: Id) -> Vec<ConversationSummary> {
    let mut seen = HashSet::new();
    let mut items: Vec<_> = rows.iter().filter(|r| seen.insert(r.id)).map(|r| summarize(r, me)).collect();
    pinned_first(&mut items);
    items
}

pub(crate) fn publish_removed(state: &AppState, conversation: Id, audience: Vec<Id>) {
    let now = Utc::now();
    let tombstone = Conversation {
        id: conversation,
        is_group: false,
        name: None,
        description: None,
        avatar_url: None,
        created_by: None,
        last_message_id: None,
        pinned_by: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    state.events.publish(ChangeKind::Delete, Record::Conversation(tombstone), Audience::Users(audience));
}

async fn publish_update(state: &AppState, conversation: Id, audience: Vec<Id>) -> Result<(), ApiError> {
    let conv = state.repo.get_conversation(conversation).await?;
    state.events.publish(ChangeKind::Update, Record::Conversation(conv), Audience::Users(audience));
    Ok(())
}

pub async fn list(state: &AppState, me: Id) -> Result<Vec<ConversationRow>, ApiError> {
    Ok(state.repo.get_user_conversations(me).await?)
}

/// Participants of a conversation the caller belongs to; 403 otherwise.
pub async fn ensure_participant(state: &AppState, conversation: Id, user: Id) -> Result<Vec<ConversationParticipant>, ApiError> {
    let participants = state.repo.list_participants(conversation).await?;
    if !participants.iter().any(|p| p.user_id == user) {
        return Err(ApiError::Forbidden);
    }
    Ok(participants)
}

pub async fn get_or_create(state: &AppState, me: Id, target: Id) -> Result<Id, ApiError> {
    if me == target {
        return Err(ValidationError::Invalid("cannot start a conversation with yourself".into()).into());
    }
    match state.repo.get_or_create_conversation(me, target).await {
        Ok(id) => {
            debug!(conversation = %id, "direct conversation resolved");
            Ok(id)
        }
        Err(RepoError::NotFound) => Err(ApiError::NotFound),
        Err(e) => Err(e.into()),
    }
}

pub fn validate_group(group: &NewGroupConversation, me: Id) -> Result<(), ValidationError> {
    if group.name.trim().is_empty() {
        return Err(ValidationError::EmptyGroupName);
    }
    if !group.member_ids.iter().any(|m| *m != me) {
        return Err(ValidationError::NoMembers);
    }
    Ok(())
}

pub async fn create_group(state: &AppState, me: Id, mut group: NewGroupConversation) -> Result<Id, ApiError> {
    validate_group(&group, me)?;
    group.name = group.name.trim().to_string();
    let mut audience = vec![me];
    audience.extend(group.member_ids.iter().copied().filter(|m| *m != me));
    let id = state.repo.create_group_conversation(me, group).await?;
    let conv = state.repo.get_conversation(id).await?;
    state.events.publish(ChangeKind::Insert, Record::Conversation(conv), Audience::Users(audience));
    info!(conversation = %id, creator = %me, "group created");
    Ok(id)
}

pub async fn set_pinned(state: &AppState, me: Id, conversation: Id, pinned: bool) -> Result<(), ApiError> {
    state.repo.set_pinned(conversation, me, pinned).await?;
    publish_update(state, conversation, vec![me]).await
}

pub async fn delete_for_me(state: &AppState, me: Id, conversation: Id) -> Result<(), ApiError> {
    state.repo.delete_conversation_for_user(conversation, me).await?;
    publish_update(state, conversation, vec![me]).await
}

pub async fn clear_for_me(state: &AppState, me: Id, conversation: Id) -> Result<(), ApiError> {
    state.repo.clear_chat_for_user(conversation, me).await?;
    publish_update(state, conversation, vec![me]).await
}

/// Session-side conversation list.
pub struct ConversationList {
    state: AppState,
    me: Id,
    items: Vec<ConversationSummary>,
    selected: Option<Id>,
    // created by a deep link and not yet seen in a refresh
    pending: Option<ConversationSummary>,
}

impl ConversationList {
    pub fn new(state: AppState, me: Id) -> Self {
        Self { state, me, items: Vec::new(), selected: None, pending: None }
    }

    pub fn items(&self) -> &[ConversationSummary] {
        &self.items
    }

    pub fn get(&self, id: Id) -> Option<&ConversationSummary> {
        self.items.iter().find(|s| s.id == id)
    }

    pub fn selected(&self) -> Option<Id> {
        self.selected
    }

    /// Focuses a conversation and marks it read; the badge drops only
    /// after the server accepted the read.
    pub async fn select(&mut self, id: Id) -> Result<(), ApiError> {
        self.selected = Some(id);
        self.mark_read(id).await?;
        Ok(())
    }

    pub async fn refresh(&mut self) -> Result<(), ApiError> {
        let rows = list(&self.state, self.me).await?;
        let mut items = synchronize(&rows, self.me);
        match self.pending.take() {
            Some(p) if !items.iter().any(|s| s.id == p.id) => {
                items.insert(0, p.clone());
                pinned_first(&mut items);
                self.pending = Some(p);
            }
            _ => {}
        }
        self.items = items;
        Ok(())
    }

    /// Refreshes when a change touches conversations or messages.
    pub async fn on_change(&mut self, ev: &ChangeEvent) -> Result<bool, ApiError> {
        if matches!(ev.table, Table::Conversations | Table::Messages) {
            self.refresh().await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Deep link `?id=<user>`: select the direct thread, creating it if needed.
    pub async fn open_direct(&mut self, target: Id) -> Result<Id, ApiError> {
        if let Some(existing) = self.items.iter().find(|s| s.is_direct_with(target)) {
            let id = existing.id;
            self.select(id).await?;
            return Ok(id);
        }
        let id = get_or_create(&self.state, self.me, target).await?;
        if !self.items.iter().any(|s| s.id == id) {
            let profile = self.state.repo.get_profile(target).await.ok();
            let name = profile.as_ref().map(|p| p.full_name.clone()).unwrap_or_else(|| DELETED_USER.into());
            let avatar = profile.and_then(|p| p.avatar_url).unwrap_or_else(|| initials_avatar(&name));
            let placeholder = ConversationSummary {
                id,
                kind: ConversationKind::Direct { other_user_id: Some(target) },
                display_name: name,
                avatar_url: avatar,
                preview: None,
                last_message_at: None,
                unread_count: 0,
                pinned: false,
                updated_at: Utc::now(),
            };
            self.items.insert(0, placeholder.clone());
            pinned_first(&mut self.items);
            self.pending = Some(placeholder);
        }
        self.selected = Some(id);
        Ok(id)
    }

    /// Optimistic pin toggle; the previous list is restored on failure.
    pub async fn toggle_pin(&mut self, conversation: Id) -> Result<bool, ApiError> {
        let before = self.items.clone();
        let mut after = before.clone();
        let Some(item) = after.iter_mut().find(|s| s.id == conversation) else {
            return Err(ApiError::NotFound);
        };
        item.pinned = !item.pinned;
        let pinned = item.pinned;
        pinned_first(&mut after);

        let Self { state, me, items, .. } = self;
        Transition::new(before, after)
            .run(|v| *items = v.clone(), set_pinned(state, *me, conversation, pinned))
            .await?;
        Ok(pinned)
    }

    /// Zeroes the badge only after the server confirmed.
    pub async fn mark_read(&mut self, conversation: Id) -> Result<u64, ApiError> {
        let flipped = crate::chat::mark_read(&self.state, self.me, conversation).await?;
        if let Some(item) = self.items.iter_mut().find(|s| s.id == conversation) {
            item.unread_count = 0;
        }
        Ok(flipped)
    }

    pub async fn delete_for_me(&mut self, conversation: Id) -> Result<(), ApiError> {
        delete_for_me(&self.state, self.me, conversation).await?;
        self.items.retain(|s| s.id != conversation);
        if self.selected == Some(conversation) {
            self.selected = None;
        }
        if self.pending.as_ref().is_some_and(|p| p.id == conversation) {
            self.pending = None;
        }
        Ok(())
    }

    pub async fn clear_for_me(&mut self, conversation: Id) -> Result<(), ApiError> {
        clear_for_me(&self.state, self.me, conversation).await?;
        if let Some(item) = self.items.iter_mut().find(|s| s.id == conversation) {
            item.preview = None;
            item.last_message_at = None;
            item.unread_count = 0;
        }
        Ok(())
    }

    /// Validated before any remote call; selects the new group.
    pub async fn create_group(&mut self, group: NewGroupConversation) -> Result<Id, ApiError> {
        let id = create_group(&self.state, self.me, group).await?;
        self.refresh().await?;
        self.selected = Some(id);
        Ok(id)
    }
}

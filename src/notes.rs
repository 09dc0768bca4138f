use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::info;

use crate::error::{ApiError, ValidationError};
use crate::models::{Id, NewNote, Note, NoteCounters, NoteFlag, NoteFlags, NoteQuery};
use crate::optimistic::Transition;
use crate::realtime::{Audience, ChangeKind, Record};
use crate::routes::AppState;
use crate::storage::{object_key, Bucket};

pub async fn create_note(state: &AppState, me: Id, new: NewNote) -> Result<Note, ApiError> {
    if new.title.trim().is_empty() {
        return Err(ValidationError::Invalid("title is required".into()).into());
    }
    let note = state.repo.create_note(me, new).await?;
    state.events.publish(ChangeKind::Insert, Record::Note(note.clone()), Audience::Everyone);
    info!(note = %note.id, author = %me, "note created");
    Ok(note)
}

pub async fn list_notes(state: &AppState, query: &NoteQuery) -> Result<Vec<Note>, ApiError> {
    Ok(state.repo.list_notes(query).await?)
}

/// Fetches a note and counts the view.
pub async fn view_note(state: &AppState, id: Id) -> Result<Note, ApiError> {
    let mut note = state.repo.get_note(id).await?;
    note.views = state.repo.increment_view_count(id).await?;
    Ok(note)
}

pub async fn set_flag(state: &AppState, me: Id, note: Id, flag: NoteFlag, on: bool) -> Result<NoteCounters, ApiError> {
    Ok(state.repo.set_note_flag(note, me, flag, on).await?)
}

pub async fn flags(state: &AppState, me: Id) -> Result<NoteFlags, ApiError> {
    Ok(state.repo.note_flags(me).await?)
}

/// Stores a note attachment in the `notes` bucket and returns its public URL.
pub async fn upload_note_file(state: &AppState, me: Id, file_name: &str, bytes: Vec<u8>) -> Result<String, ApiError> {
    crate::chat::check_attachment_size(bytes.len())?;
    let content_type = infer::get(&bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let key = object_key(me, file_name, Utc::now().timestamp_millis());
    Ok(state.objects.put(Bucket::Notes, &key, &content_type, bytes).await?)
}

/// Per-user like/save/completion state with optimistic toggles.
pub struct NoteToggles {
    state: AppState,
    me: Id,
    liked: HashSet<Id>,
    saved: HashSet<Id>,
    completed: HashSet<Id>,
    likes: HashMap<Id, i64>,
}

impl NoteToggles {
    pub fn new(state: AppState, me: Id) -> Self {
        Self { state, me, liked: HashSet::new(), saved: HashSet::new(), completed: HashSet::new(), likes: HashMap::new() }
    }

    pub async fn load(&mut self) -> Result<(), ApiError> {
        let f = flags(&self.state, self.me).await?;
        self.liked = f.liked.into_iter().collect();
        self.saved = f.saved.into_iter().collect();
        self.completed = f.completed.into_iter().collect();
        Ok(())
    }

    /// Remembers the like count shown for a note.
    pub fn observe(&mut self, note: &Note) {
        self.likes.insert(note.id, note.likes);
    }

    pub fn is_set(&self, note: Id, flag: NoteFlag) -> bool {
        match flag {
            NoteFlag::Like => self.liked.contains(&note),
            NoteFlag::Save => self.saved.contains(&note),
            NoteFlag::Completion => self.completed.contains(&note),
        }
    }

    pub fn likes(&self, note: Id) -> i64 {
        self.likes.get(&note).copied().unwrap_or(0)
    }

    /// Flips the flag locally, writes it, and reverts the flag and the like
    /// counter if the write fails. Returns the new flag value.
    pub async fn toggle(&mut self, note: Id, flag: NoteFlag) -> Result<bool, ApiError> {
        let Self { state, me, liked, saved, completed, likes } = self;
        let set = match flag {
            NoteFlag::Like => liked,
            NoteFlag::Save => saved,
            NoteFlag::Completion => completed,
        };
        let was = set.contains(&note);
        let count = likes.get(&note).copied().unwrap_or(0);
        let delta = match (flag, was) {
            (NoteFlag::Like, false) => 1,
            (NoteFlag::Like, true) => -1,
            _ => 0,
        };

        let counters = Transition::new((was, count), (!was, (count + delta).max(0)))
            .run(
                |&(on, n)| {
                    if on { set.insert(note); } else { set.remove(&note); }
                    likes.insert(note, n);
                },
                set_flag(state, *me, note, flag, !was),
            )
            .await?;
        likes.insert(note, counters.likes);
        Ok(!was)
    }
}

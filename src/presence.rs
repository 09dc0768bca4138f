use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::Id;

/// One tracked connection. A user with two tabs open holds two keys.
pub type PresenceKey = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct PresenceMeta {
    pub user_id: Id,
    pub online_at: DateTime<Utc>,
}

pub type PresenceState = HashMap<PresenceKey, Vec<PresenceMeta>>;

/// Server side of the presence channel. Every track/untrack broadcasts a full
/// sync of the current state.
pub struct PresenceChannel {
    entries: DashMap<PresenceKey, PresenceMeta>,
    sync: broadcast::Sender<PresenceState>,
}

impl Default for PresenceChannel {
    fn default() -> Self {
        let (sync, _rx) = broadcast::channel(64);
        Self { entries: DashMap::new(), sync }
    }
}

impl PresenceChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, user_id: Id) -> PresenceKey {
        let key = Uuid::new_v4();
        self.entries.insert(key, PresenceMeta { user_id, online_at: Utc::now() });
        debug!(%user_id, %key, "presence track");
        self.broadcast();
        key
    }

    pub fn untrack(&self, key: PresenceKey) -> Option<PresenceMeta> {
        let removed = self.entries.remove(&key).map(|(_, meta)| meta);
        if removed.is_some() {
            self.broadcast();
        }
        removed
    }

    pub fn meta(&self, key: PresenceKey) -> Option<PresenceMeta> {
        self.entries.get(&key).map(|e| e.value().clone())
    }

    pub fn state(&self) -> PresenceState {
        self.entries.iter().map(|e| (*e.key(), vec![e.value().clone()])).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceState> {
        self.sync.subscribe()
    }

    fn broadcast(&self) {
        let _ = self.sync.send(self.state());
    }
}

/// Untracks on drop, tying presence to the lifetime of a session.
pub struct PresenceGuard {
    channel: Arc<PresenceChannel>,
    key: PresenceKey,
}

impl PresenceGuard {
    pub fn join(channel: Arc<PresenceChannel>, user_id: Id) -> Self {
        let key = channel.track(user_id);
        Self { channel, key }
    }

    pub fn key(&self) -> PresenceKey {
        self.key
    }
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.channel.untrack(self.key);
    }
}

/// Session-side set of online users.
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    online: HashSet<Id>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the set with the users present in `state`.
    pub fn apply_sync(&mut self, state: &PresenceState) {
        self.online = state.values().flatten().map(|m| m.user_id).collect();
    }

    pub fn is_online(&self, user: Id) -> bool {
        self.online.contains(&user)
    }

    pub fn online(&self) -> &HashSet<Id> {
        &self.online
    }

    /// Applies every pending sync; returns false once the channel is gone.
    pub fn drain(&mut self, rx: &mut broadcast::Receiver<PresenceState>) -> bool {
        use broadcast::error::TryRecvError;
        loop {
            match rx.try_recv() {
                Ok(state) => self.apply_sync(&state),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Lagged(skipped)) => warn!(skipped, "presence sync lagged"),
                Err(TryRecvError::Closed) => return false,
            }
        }
    }
}

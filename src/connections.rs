//! Social connections: the pending → accepted/rejected state machine and the
//! per-viewer classification of every other user.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use crate::error::{ApiError, ValidationError};
use crate::feeds::notify;
use crate::models::{Connection, ConnectionStatus, Id, NewNotification, NotificationCategory, NotificationKind};
use crate::profiles::display_name;
use crate::realtime::{Audience, ChangeKind, Record};
use crate::routes::AppState;

/// How another user relates to the viewer. Exactly one holds per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    NotConnected,
    RequestSent,
    RequestReceived,
    Connected,
}

/// Three disjoint sets derived from one fetch of the viewer's connection rows.
#[derive(Debug, Clone, Default)]
pub struct ConnectionIndex {
    me: Id,
    connected: HashSet<Id>,
    sent: HashSet<Id>,
    received: HashSet<Id>,
    // other party -> connection row id, for accept/reject
    rows: HashMap<Id, Id>,
}

impl ConnectionIndex {
    pub fn build(me: Id, rows: &[Connection]) -> Self {
        let mut index = Self { me, ..Self::default() };
        for row in rows.iter().filter(|r| r.involves(me)) {
            let other = row.other_party(me);
            if other == me {
                continue;
            }
            match row.status {
                ConnectionStatus::Accepted => {
                    index.connected.insert(other);
                }
                ConnectionStatus::Pending if row.requester_id == me => {
                    index.sent.insert(other);
                }
                ConnectionStatus::Pending => {
                    index.received.insert(other);
                }
                ConnectionStatus::Rejected => continue,
            }
            index.rows.insert(other, row.id);
        }
        index
    }

    pub fn me(&self) -> Id {
        self.me
    }

    pub fn state_of(&self, user: Id) -> ConnectionState {
        if self.connected.contains(&user) {
            ConnectionState::Connected
        } else if self.sent.contains(&user) {
            ConnectionState::RequestSent
        } else if self.received.contains(&user) {
            ConnectionState::RequestReceived
        } else {
            ConnectionState::NotConnected
        }
    }

    pub fn is_connected(&self, user: Id) -> bool {
        self.connected.contains(&user)
    }

    pub fn connected(&self) -> &HashSet<Id> {
        &self.connected
    }

    pub fn sent(&self) -> &HashSet<Id> {
        &self.sent
    }

    pub fn received(&self) -> &HashSet<Id> {
        &self.received
    }

    /// Connection row id of a pending request received from `user`.
    pub fn request_from(&self, user: Id) -> Option<Id> {
        self.received.contains(&user).then(|| self.rows.get(&user).copied()).flatten()
    }
}

fn publish(state: &AppState, kind: ChangeKind, conn: &Connection) {
    state.events.publish(
        kind,
        Record::Connection(conn.clone()),
        Audience::Users(vec![conn.requester_id, conn.recipient_id]),
    );
}

pub async fn list(state: &AppState, me: Id) -> Result<Vec<Connection>, ApiError> {
    Ok(state.repo.list_connections(me).await?)
}

/// Upserts a pending request keyed by the unordered pair and notifies the
/// recipient. Re-sending a request that is still pending is a no-op.
pub async fn send_request(state: &AppState, me: Id, target: Id) -> Result<Connection, ApiError> {
    if me == target {
        return Err(ValidationError::SelfConnection.into());
    }
    let existing = state.repo.list_connections(me).await?;
    if let Some(row) = existing.iter().find(|c| c.involves(target)) {
        match row.status {
            ConnectionStatus::Accepted => return Err(ApiError::Conflict("already connected".into())),
            ConnectionStatus::Pending if row.requester_id == target => {
                return Err(ApiError::Conflict("this user already sent you a request".into()))
            }
            // repeated request: nothing changes, nobody is notified again
            ConnectionStatus::Pending => return Ok(row.clone()),
            _ => {}
        }
    }

    let conn = state.repo.upsert_connection_request(me, target).await?;
    let name = display_name(state, me).await;
    notify(
        state,
        NewNotification {
            user_id: target,
            title: "New connection request".into(),
            message: format!("{name} wants to connect with you"),
            kind: NotificationKind::Info,
            category: NotificationCategory::Social,
            link: Some("/connections".into()),
        },
    )
    .await?;
    publish(state, ChangeKind::Insert, &conn);
    info!(requester = %me, recipient = %target, "connection requested");
    Ok(conn)
}

async fn pending_for_recipient(state: &AppState, me: Id, request: Id) -> Result<Connection, ApiError> {
    let conn = state.repo.get_connection(request).await?;
    if conn.recipient_id != me {
        return Err(ApiError::Forbidden);
    }
    if conn.status != ConnectionStatus::Pending {
        return Err(ApiError::Conflict("request is no longer pending".into()));
    }
    Ok(conn)
}

/// Accepts and queues one notification per party linking to the other's chat.
pub async fn accept_request(state: &AppState, me: Id, request: Id) -> Result<Connection, ApiError> {
    let pending = pending_for_recipient(state, me, request).await?;
    let conn = state.repo.set_connection_status(pending.id, ConnectionStatus::Accepted).await?;

    let requester_name = display_name(state, conn.requester_id).await;
    let recipient_name = display_name(state, conn.recipient_id).await;
    notify(
        state,
        NewNotification {
            user_id: conn.requester_id,
            title: "Connection accepted".into(),
            message: format!("{recipient_name} accepted your connection request"),
            kind: NotificationKind::Success,
            category: NotificationCategory::Social,
            link: Some(format!("/chat?id={}", conn.recipient_id)),
        },
    )
    .await?;
    notify(
        state,
        NewNotification {
            user_id: conn.recipient_id,
            title: "New connection".into(),
            message: format!("You are now connected with {requester_name}"),
            kind: NotificationKind::Success,
            category: NotificationCategory::Social,
            link: Some(format!("/chat?id={}", conn.requester_id)),
        },
    )
    .await?;
    publish(state, ChangeKind::Update, &conn);
    Ok(conn)
}

pub async fn reject_request(state: &AppState, me: Id, request: Id) -> Result<Connection, ApiError> {
    let pending = pending_for_recipient(state, me, request).await?;
    let conn = state.repo.set_connection_status(pending.id, ConnectionStatus::Rejected).await?;
    publish(state, ChangeKind::Update, &conn);
    Ok(conn)
}

/// Removes the accepted connection and all direct history between the pair.
pub async fn disconnect(state: &AppState, me: Id, target: Id) -> Result<(), ApiError> {
    let row = state
        .repo
        .list_connections(me)
        .await?
        .into_iter()
        .find(|c| c.involves(target) && c.status == ConnectionStatus::Accepted)
        .ok_or(ApiError::NotFound)?;
    let direct: Vec<Id> = state
        .repo
        .get_user_conversations(me)
        .await?
        .into_iter()
        .filter(|r| !r.is_group && r.participants.first().map(|p| p.id) == Some(target))
        .map(|r| r.id)
        .collect();

    state.repo.disconnect_user(me, target).await?;
    publish(state, ChangeKind::Delete, &row);
    for id in direct {
        crate::conversations::publish_removed(state, id, vec![me, target]);
    }
    info!(user = %me, other = %target, "disconnected");
    Ok(())
}

/// Session-side resolver. Mutations are not applied optimistically: on error
/// the index is left as it was and the error is returned for display.
pub struct ConnectionBook {
    state: AppState,
    index: ConnectionIndex,
}

impl ConnectionBook {
    pub fn new(state: AppState, me: Id) -> Self {
        Self { state, index: ConnectionIndex { me, ..ConnectionIndex::default() } }
    }

    pub fn index(&self) -> &ConnectionIndex {
        &self.index
    }

    pub fn state_of(&self, user: Id) -> ConnectionState {
        self.index.state_of(user)
    }

    pub async fn refresh(&mut self) -> Result<(), ApiError> {
        let me = self.index.me;
        let rows = list(&self.state, me).await?;
        self.index = ConnectionIndex::build(me, &rows);
        Ok(())
    }

    pub async fn send_request(&mut self, target: Id) -> Result<(), ApiError> {
        send_request(&self.state, self.index.me, target).await?;
        self.refresh().await
    }

    pub async fn accept(&mut self, request: Id) -> Result<(), ApiError> {
        accept_request(&self.state, self.index.me, request).await?;
        self.refresh().await
    }

    pub async fn reject(&mut self, request: Id) -> Result<(), ApiError> {
        reject_request(&self.state, self.index.me, request).await?;
        self.refresh().await
    }

    pub async fn disconnect(&mut self, target: Id) -> Result<(), ApiError> {
        disconnect(&self.state, self.index.me, target).await?;
        self.refresh().await
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::models::{Connection, Conversation, Id, Message, Note, Notice, NoticeView, Notification};

pub const DEFAULT_BUS_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Messages,
    Conversations,
    Connections,
    Notices,
    NoticeViews,
    Notifications,
    Notes,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Messages => "messages",
            Table::Conversations => "conversations",
            Table::Connections => "connections",
            Table::Notices => "notices",
            Table::NoticeViews => "notice_views",
            Table::Notifications => "notifications",
            Table::Notes => "notes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row payload of a change, one variant per table.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Record {
    Message(Message),
    Conversation(Conversation),
    Connection(Connection),
    Notice(Notice),
    NoticeView(NoticeView),
    Notification(Notification),
    Note(Note),
}

impl Record {
    pub fn table(&self) -> Table {
        match self {
            Record::Message(_) => Table::Messages,
            Record::Conversation(_) => Table::Conversations,
            Record::Connection(_) => Table::Connections,
            Record::Notice(_) => Table::Notices,
            Record::NoticeView(_) => Table::NoticeViews,
            Record::Notification(_) => Table::Notifications,
            Record::Note(_) => Table::Notes,
        }
    }
}

/// Who may observe a change. Row-level visibility is decided by the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    Users(Vec<Id>),
}

impl Audience {
    pub fn includes(&self, user: Id) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::Users(ids) => ids.contains(&user),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub sequence: u64,
    pub table: Table,
    pub kind: ChangeKind,
    pub record: Record,
    #[serde(skip)]
    pub audience: Audience,
}

/// Subscription predicate; `None` fields match anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Filter {
    pub table: Option<Table>,
    pub kind: Option<ChangeKind>,
    pub user: Option<Id>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn table(table: Table) -> Self {
        Self { table: Some(table), ..Self::default() }
    }

    pub fn kind(mut self, kind: ChangeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn for_user(mut self, user: Id) -> Self {
        self.user = Some(user);
        self
    }

    pub fn matches(&self, ev: &ChangeEvent) -> bool {
        self.table.map_or(true, |t| t == ev.table)
            && self.kind.map_or(true, |k| k == ev.kind)
            && self.user.map_or(true, |u| ev.audience.includes(u))
    }
}

/// Process-wide change feed. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
    next_sequence: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender, next_sequence: Arc::new(AtomicU64::new(0)) }
    }

    pub fn publish(&self, kind: ChangeKind, record: Record, audience: Audience) -> ChangeEvent {
        let event = ChangeEvent {
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1,
            table: record.table(),
            kind,
            record,
            audience,
        };
        // no receivers is not an error
        let _ = self.sender.send(event.clone());
        event
    }

    pub fn subscribe(&self, filter: Filter) -> Subscription {
        Subscription { receiver: self.sender.subscribe(), filter }
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<ChangeEvent>,
    filter: Filter,
}

impl Subscription {
    /// Next matching event; `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(ev) if self.filter.matches(&ev) => return Some(ev),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "realtime subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn notification(user: Id) -> Record {
        Record::Notification(Notification {
            id: Uuid::new_v4(),
            user_id: user,
            title: "t".into(),
            message: "m".into(),
            kind: Default::default(),
            category: Default::default(),
            link: None,
            is_read: false,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn sequences_increase() {
        let bus = EventBus::default();
        let user = Uuid::new_v4();
        let a = bus.publish(ChangeKind::Insert, notification(user), Audience::Everyone);
        let b = bus.publish(ChangeKind::Insert, notification(user), Audience::Everyone);
        assert!(b.sequence > a.sequence);
        assert_eq!(a.table, Table::Notifications);
    }

    #[tokio::test]
    async fn filter_by_table_kind_and_user() {
        let bus = EventBus::default();
        let (me, other) = (Uuid::new_v4(), Uuid::new_v4());
        let mut sub = bus.subscribe(Filter::table(Table::Notifications).kind(ChangeKind::Insert).for_user(me));

        bus.publish(ChangeKind::Insert, notification(other), Audience::Users(vec![other]));
        bus.publish(ChangeKind::Update, notification(me), Audience::Users(vec![me]));
        let wanted = bus.publish(ChangeKind::Insert, notification(me), Audience::Users(vec![me]));

        let got = sub.next().await.unwrap();
        assert_eq!(got.sequence, wanted.sequence);
        let nothing_else = tokio::time::timeout(std::time::Duration::from_millis(20), sub.next()).await;
        assert!(nothing_else.is_err());
    }

    #[tokio::test]
    async fn lagged_subscriber_keeps_going() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe(Filter::all());
        let user = Uuid::new_v4();
        for _ in 0..5 {
            bus.publish(ChangeKind::Insert, notification(user), Audience::Everyone);
        }
        let first = sub.next().await.unwrap();
        assert_eq!(first.sequence, 4);
    }
}

#![cfg(feature = "inmem-store")]

mod common;

use campus::error::ApiError;
use campus::feeds::{self, NoticeFeed, NoticeState, NotificationFeed};
use campus::models::{NewNotice, NewNotification, NotificationCategory, NotificationKind, Role};
use campus::realtime::Filter;
use common::{claims, fixture, user};

fn notice(title: &str, branch: Option<&str>, semester: Option<i32>) -> NewNotice {
    NewNotice { title: title.into(), content: "Details inside".into(), branch: branch.map(Into::into), semester }
}

fn ping(user_id: uuid::Uuid, title: &str) -> NewNotification {
    NewNotification {
        user_id,
        title: title.into(),
        message: "m".into(),
        kind: NotificationKind::Info,
        category: NotificationCategory::System,
        link: None,
    }
}

#[tokio::test]
async fn notices_are_scoped_by_branch_and_semester() {
    let fx = fixture();
    let teacher = user(&fx.state, Role::Teacher, "Prof Rao").await;
    let cse3 = user(&fx.state, Role::Student, "Asha").await; // CSE, semester 3
    let mut ece5 = claims(Role::Student, "Bala");
    ece5.metadata.branch = Some("ECE".into());
    ece5.metadata.semester = Some(5);

    feeds::create_notice(&fx.state, &teacher, notice("Everyone", None, None)).await.unwrap();
    feeds::create_notice(&fx.state, &teacher, notice("CSE only", Some("CSE"), None)).await.unwrap();
    feeds::create_notice(&fx.state, &teacher, notice("Sem 5 only", None, Some(5))).await.unwrap();

    let titles = |items: Vec<feeds::NoticeItem>| items.into_iter().map(|i| i.notice.title).collect::<Vec<_>>();
    let mine = titles(feeds::list_notices(&fx.state, &cse3.audience().unwrap()).await.unwrap());
    let theirs = titles(feeds::list_notices(&fx.state, &ece5.audience().unwrap()).await.unwrap());
    assert!(mine.contains(&"Everyone".to_string()) && mine.contains(&"CSE only".to_string()));
    assert!(!mine.contains(&"Sem 5 only".to_string()));
    assert!(theirs.contains(&"Sem 5 only".to_string()) && !theirs.contains(&"CSE only".to_string()));
}

#[tokio::test]
async fn students_cannot_publish_notices() {
    let fx = fixture();
    let student = user(&fx.state, Role::Student, "Asha").await;
    let err = feeds::create_notice(&fx.state, &student, notice("Hi", None, None)).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    let teacher = user(&fx.state, Role::Teacher, "Prof Rao").await;
    let err = feeds::create_notice(&fx.state, &teacher, notice("  ", None, None)).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
}

#[tokio::test]
async fn notice_feed_reads_and_clears() {
    let fx = fixture();
    let teacher = user(&fx.state, Role::Teacher, "Prof Rao").await;
    let student = user(&fx.state, Role::Student, "Asha").await;
    let first = feeds::create_notice(&fx.state, &teacher, notice("Exam", None, None)).await.unwrap();
    feeds::create_notice(&fx.state, &teacher, notice("Holiday", None, None)).await.unwrap();

    let mut feed = NoticeFeed::new(fx.state.clone(), student.audience().unwrap());
    feed.refresh().await.unwrap();
    assert_eq!(feed.unread_count(), 2);

    feed.mark_read(first.id).await.unwrap();
    assert_eq!(feed.unread_count(), 1);
    let read = feed.items().iter().find(|i| i.notice.id == first.id).unwrap();
    assert_eq!(read.state, NoticeState::Read);

    assert_eq!(feed.clear_read().await.unwrap(), 1);
    assert_eq!(feed.items().len(), 1);
    assert!(feed.items().iter().all(|i| i.notice.id != first.id));

    // clearing is per user; the notice itself stays
    let other = user(&fx.state, Role::Student, "Bala").await;
    assert_eq!(feeds::list_notices(&fx.state, &other.audience().unwrap()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn notice_feed_refetches_on_new_notice() {
    let fx = fixture();
    let teacher = user(&fx.state, Role::Teacher, "Prof Rao").await;
    let student = user(&fx.state, Role::Student, "Asha").await;
    let mut sub = fx.state.events.subscribe(Filter::all().for_user(student.sub));
    let mut feed = NoticeFeed::new(fx.state.clone(), student.audience().unwrap());
    feed.refresh().await.unwrap();

    feeds::create_notice(&fx.state, &teacher, notice("Fresh", None, None)).await.unwrap();
    let ev = sub.next().await.unwrap();
    assert!(feed.on_change(&ev).await.unwrap());
    assert_eq!(feed.unread_count(), 1);
}

#[tokio::test]
async fn clearing_notifications_keeps_unread_ones() {
    let fx = fixture();
    let me = user(&fx.state, Role::Student, "Asha").await.sub;
    let a = feeds::notify(&fx.state, ping(me, "a")).await.unwrap();
    feeds::notify(&fx.state, ping(me, "b")).await.unwrap();
    feeds::notify(&fx.state, ping(me, "c")).await.unwrap();

    let mut feed = NotificationFeed::new(fx.state.clone(), me);
    feed.refresh().await.unwrap();
    assert_eq!(feed.unread_count(), 3);
    assert_eq!(feed.items()[0].title, "c");

    feed.mark_read(a.id).await.unwrap();
    assert_eq!(feed.unread_count(), 2);
    assert_eq!(feed.clear_read().await.unwrap(), 1);
    assert_eq!(feed.items().len(), 2);
    assert!(feed.items().iter().all(|n| !n.is_read));

    assert_eq!(feed.mark_all_read().await.unwrap(), 2);
    assert_eq!(feed.unread_count(), 0);
    assert_eq!(feed.clear_read().await.unwrap(), 2);
    assert!(feed.items().is_empty());
}

#[tokio::test]
async fn notifications_are_private() {
    let fx = fixture();
    let me = user(&fx.state, Role::Student, "Asha").await.sub;
    let other = user(&fx.state, Role::Student, "Bala").await.sub;
    let theirs = feeds::notify(&fx.state, ping(other, "secret")).await.unwrap();

    let err = feeds::mark_notification_read(&fx.state, me, theirs.id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound));

    let mut feed = NotificationFeed::new(fx.state.clone(), me);
    let mut sub = fx.state.events.subscribe(Filter::all());
    feeds::notify(&fx.state, ping(other, "again")).await.unwrap();
    let ev = sub.next().await.unwrap();
    assert!(!feed.on_change(&ev).await.unwrap());
    assert!(feed.items().is_empty());
}

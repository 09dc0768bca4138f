#![cfg(feature = "inmem-store")]

mod common;

use campus::connections::{self, ConnectionBook, ConnectionState};
use campus::error::ApiError;
use campus::feeds;
use campus::models::{ConnectionStatus, NotificationCategory};
use campus::repo::ConnectionRepo;
use common::{fixture, student};

#[tokio::test]
async fn request_then_accept_connects_both_and_notifies() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;

    let mut book_a = ConnectionBook::new(fx.state.clone(), a);
    let mut book_b = ConnectionBook::new(fx.state.clone(), b);

    book_a.send_request(b).await.unwrap();
    book_b.refresh().await.unwrap();
    assert_eq!(book_a.state_of(b), ConnectionState::RequestSent);
    assert_eq!(book_b.state_of(a), ConnectionState::RequestReceived);

    // B gets one request notification
    let inbox_b = feeds::list_notifications(&fx.state, b).await.unwrap();
    assert_eq!(inbox_b.len(), 1);
    assert_eq!(inbox_b[0].link.as_deref(), Some("/connections"));

    let request = book_b.index().request_from(a).unwrap();
    book_b.accept(request).await.unwrap();
    book_a.refresh().await.unwrap();
    assert_eq!(book_a.state_of(b), ConnectionState::Connected);
    assert_eq!(book_b.state_of(a), ConnectionState::Connected);

    let inbox_a = feeds::list_notifications(&fx.state, a).await.unwrap();
    let inbox_b = feeds::list_notifications(&fx.state, b).await.unwrap();
    assert_eq!(inbox_a.len(), 1);
    assert_eq!(inbox_b.len(), 2);
    assert_eq!(inbox_a[0].link, Some(format!("/chat?id={b}")));
    assert_eq!(inbox_b[0].link, Some(format!("/chat?id={a}")));
    assert!(inbox_a.iter().chain(&inbox_b).all(|n| n.category == NotificationCategory::Social));
}

#[tokio::test]
async fn self_and_duplicate_requests_are_rejected() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;

    let err = connections::send_request(&fx.state, a, a).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    connections::send_request(&fx.state, a, b).await.unwrap();
    // the other side answers with its own request instead of accepting
    let err = connections::send_request(&fx.state, b, a).await.unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    let pending = fx.state.repo.list_connections(b).await.unwrap();
    connections::accept_request(&fx.state, b, pending[0].id).await.unwrap();
    let err = connections::send_request(&fx.state, a, b).await.unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
}

#[tokio::test]
async fn repeating_a_pending_request_notifies_once() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;

    let first = connections::send_request(&fx.state, a, b).await.unwrap();
    let again = connections::send_request(&fx.state, a, b).await.unwrap();
    assert_eq!(first.id, again.id);
    assert_eq!(again.status, ConnectionStatus::Pending);

    let inbox_b = feeds::list_notifications(&fx.state, b).await.unwrap();
    assert_eq!(inbox_b.len(), 1);
    assert_eq!(fx.state.repo.list_connections(a).await.unwrap().len(), 1);
}

#[tokio::test]
async fn only_the_recipient_accepts_a_pending_request() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;
    let conn = connections::send_request(&fx.state, a, b).await.unwrap();

    let err = connections::accept_request(&fx.state, a, conn.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    let rejected = connections::reject_request(&fx.state, b, conn.id).await.unwrap();
    assert_eq!(rejected.status, ConnectionStatus::Rejected);
    let err = connections::accept_request(&fx.state, b, conn.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    // a rejected pair can be asked again
    let again = connections::send_request(&fx.state, a, b).await.unwrap();
    assert_eq!(again.status, ConnectionStatus::Pending);
}

#[tokio::test]
async fn disconnect_removes_connection_and_direct_history() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;
    let conn = connections::send_request(&fx.state, a, b).await.unwrap();
    connections::accept_request(&fx.state, b, conn.id).await.unwrap();

    let conversation = campus::conversations::get_or_create(&fx.state, a, b).await.unwrap();
    campus::chat::send_message(&fx.state, a, conversation, campus::models::NewMessage::text("hi")).await.unwrap();

    let mut book = ConnectionBook::new(fx.state.clone(), a);
    book.disconnect(b).await.unwrap();
    assert_eq!(book.state_of(b), ConnectionState::NotConnected);
    assert!(campus::conversations::list(&fx.state, a).await.unwrap().is_empty());
    assert!(campus::conversations::list(&fx.state, b).await.unwrap().is_empty());

    let err = connections::disconnect(&fx.state, a, b).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound));
}

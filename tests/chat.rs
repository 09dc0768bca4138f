#![cfg(feature = "inmem-store")]

mod common;

use std::io::Cursor;

use campus::chat::{self, MessageStream, Sender, StreamEffect, MAX_ATTACHMENT_BYTES};
use campus::conversations;
use campus::error::ApiError;
use campus::models::{MessageType, NewMessage};
use campus::realtime::{Filter, Table};
use campus::storage::Bucket;
use common::{fixture, student};
use image::{ImageFormat, RgbImage};

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    RgbImage::new(width, height).write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

#[tokio::test]
async fn open_send_and_receive() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;
    let id = conversations::get_or_create(&fx.state, a, b).await.unwrap();
    chat::send_message(&fx.state, b, id, NewMessage::text("first")).await.unwrap();

    let mut stream = MessageStream::new(fx.state.clone(), a);
    stream.open(id).await.unwrap();
    assert_eq!(stream.messages().len(), 1);
    assert_eq!(stream.messages()[0].sender, Sender::Other);

    stream.draft = "second".into();
    let sent = stream.send().await.unwrap();
    assert!(stream.draft.is_empty());
    assert_eq!(stream.messages().last().unwrap().message.id, sent.id);
    assert_eq!(stream.messages().last().unwrap().sender, Sender::User);
}

#[tokio::test]
async fn realtime_echo_of_own_send_is_not_duplicated() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;
    let id = conversations::get_or_create(&fx.state, a, b).await.unwrap();

    let mut sub = fx.state.events.subscribe(Filter::table(Table::Messages).for_user(a));
    let mut stream = MessageStream::new(fx.state.clone(), a);
    stream.open(id).await.unwrap();
    stream.draft = "hello".into();
    stream.send().await.unwrap();

    let echo = sub.next().await.unwrap();
    assert_eq!(stream.apply(&echo), StreamEffect::Ignored);
    assert_eq!(stream.messages().len(), 1);

    chat::send_message(&fx.state, b, id, NewMessage::text("reply")).await.unwrap();
    let incoming = sub.next().await.unwrap();
    assert_eq!(stream.apply(&incoming), StreamEffect::Appended);
    assert_eq!(stream.messages().len(), 2);
}

#[tokio::test]
async fn inserts_for_other_conversations_only_refresh_the_list() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;
    let c = student(&fx.state, "Chitra").await;
    let open = conversations::get_or_create(&fx.state, a, b).await.unwrap();
    let other = conversations::get_or_create(&fx.state, a, c).await.unwrap();

    let mut sub = fx.state.events.subscribe(Filter::table(Table::Messages).for_user(a));
    let mut stream = MessageStream::new(fx.state.clone(), a);
    stream.open(open).await.unwrap();

    chat::send_message(&fx.state, c, other, NewMessage::text("elsewhere")).await.unwrap();
    let ev = sub.next().await.unwrap();
    assert_eq!(stream.apply(&ev), StreamEffect::RefreshList);
    assert!(stream.messages().is_empty());
}

#[tokio::test]
async fn repeated_client_id_returns_the_first_row() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;
    let id = conversations::get_or_create(&fx.state, a, b).await.unwrap();

    let msg = NewMessage::text("once");
    let first = chat::send_message(&fx.state, a, id, msg.clone()).await.unwrap();
    let retry = chat::send_message(&fx.state, a, id, msg).await.unwrap();
    assert_eq!(first.id, retry.id);
    assert_eq!(chat::list_messages(&fx.state, b, id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn empty_draft_and_outsiders_are_rejected() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;
    let outsider = student(&fx.state, "Dev").await;
    let id = conversations::get_or_create(&fx.state, a, b).await.unwrap();

    let mut stream = MessageStream::new(fx.state.clone(), a);
    stream.open(id).await.unwrap();
    stream.draft = "   ".into();
    assert!(matches!(stream.send().await, Err(ApiError::BadRequest(_))));
    assert_eq!(stream.draft, "   ");

    let err = chat::send_message(&fx.state, outsider, id, NewMessage::text("hi")).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));
    let err = chat::list_messages(&fx.state, outsider, id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));
}

#[tokio::test]
async fn oversized_attachment_is_rejected_before_upload() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;
    let id = conversations::get_or_create(&fx.state, a, b).await.unwrap();

    let mut stream = MessageStream::new(fx.state.clone(), a);
    stream.open(id).await.unwrap();
    let err = stream.send_attachment("big.png", vec![0u8; 12 * 1024 * 1024]).await.unwrap_err();
    assert!(matches!(err, ApiError::PayloadTooLarge));

    assert!(stream.messages().is_empty());
    assert!(chat::list_messages(&fx.state, b, id).await.unwrap().is_empty());
    assert!(!fx.dir.path().join("storage").join(Bucket::ChatAttachments.name()).exists());
    assert!(MAX_ATTACHMENT_BYTES < 12 * 1024 * 1024);
}

#[tokio::test]
async fn image_attachment_is_compressed_and_sent() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;
    let id = conversations::get_or_create(&fx.state, a, b).await.unwrap();

    let mut stream = MessageStream::new(fx.state.clone(), a);
    stream.open(id).await.unwrap();
    let msg = stream.send_attachment("holiday.png", png(2400, 1200)).await.unwrap();

    assert_eq!(msg.message_type, MessageType::Image);
    assert_eq!(msg.file_name.as_deref(), Some("holiday.jpg"));
    let url = msg.file_url.clone().unwrap();
    let prefix = format!("/storage/chat-attachments/{a}/");
    assert!(url.starts_with(&prefix), "{url}");

    let key = url.trim_start_matches("/storage/chat-attachments/");
    let (bytes, mime) = fx.state.objects.get(Bucket::ChatAttachments, key).await.unwrap();
    assert_eq!(mime, "image/jpeg");
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!(decoded.width(), 1920);

    let rows = conversations::list(&fx.state, b).await.unwrap();
    assert_eq!(conversations::preview(rows[0].last_message.as_ref().unwrap()), "Sent an image");
}

#[tokio::test]
async fn plain_files_keep_their_bytes() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;
    let id = conversations::get_or_create(&fx.state, a, b).await.unwrap();

    let attachment = chat::upload_attachment(&fx.state, a, "notes v2.txt", b"plain text".to_vec()).await.unwrap();
    assert_eq!(attachment.message_type, MessageType::File);
    assert_eq!(attachment.file_size, 10);
    let msg = chat::send_message(&fx.state, a, id, attachment.into_message(None)).await.unwrap();
    assert_eq!(msg.file_name.as_deref(), Some("notes v2.txt"));
    assert!(msg.file_url.unwrap().ends_with("_notes_v2.txt"));
}

/// 2x2 uncompressed 24-bit BMP; the decoder is built without BMP support.
fn bmp() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&70u32.to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&54u32.to_le_bytes());
    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&2i32.to_le_bytes());
    out.extend_from_slice(&2i32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&24u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&2835i32.to_le_bytes());
    out.extend_from_slice(&2835i32.to_le_bytes());
    out.extend_from_slice(&[0; 8]);
    // two rows of two pixels, padded to four bytes
    out.extend_from_slice(&[0xff; 16]);
    out
}

#[tokio::test]
async fn undecodable_image_formats_are_stored_as_uploaded() {
    let fx = fixture();
    let a = student(&fx.state, "Asha").await;
    let b = student(&fx.state, "Bala").await;
    let id = conversations::get_or_create(&fx.state, a, b).await.unwrap();

    let original = bmp();
    assert!(infer::is_image(&original));
    let mut stream = MessageStream::new(fx.state.clone(), a);
    stream.open(id).await.unwrap();
    let msg = stream.send_attachment("scan.bmp", original.clone()).await.unwrap();

    assert_eq!(msg.message_type, MessageType::Image);
    assert_eq!(stream.messages().len(), 1);
    let url = msg.file_url.unwrap();
    let key = url.trim_start_matches("/storage/chat-attachments/");
    let (bytes, _) = fx.state.objects.get(Bucket::ChatAttachments, key).await.unwrap();
    if msg.file_name.as_deref() == Some("scan.bmp") {
        assert_eq!(bytes, original);
    }
    assert_eq!(chat::list_messages(&fx.state, b, id).await.unwrap().len(), 1);
}

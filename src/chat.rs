//! Message stream of one focused conversation plus the server-side send
//! pipeline it drives.

use std::io::Cursor;

use actix_web::web;
use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::conversations::ensure_participant;
use crate::error::{ApiError, ValidationError};
use crate::models::{Id, Message, MessageType, NewMessage};
use crate::realtime::{Audience, ChangeEvent, ChangeKind, Record, Table};
use crate::routes::AppState;
use crate::storage::{object_key, Bucket};

pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024; // 10 MB
pub const MAX_IMAGE_SIDE: u32 = 1920;
const JPEG_QUALITY: u8 = 80;

/// Re-encodes an image as JPEG, downscaling when either side exceeds
/// `MAX_IMAGE_SIDE`. Returns bytes, content type and the renamed file.
pub fn compress_image(bytes: &[u8], file_name: &str) -> Result<(Vec<u8>, String, String), ValidationError> {
    let img = image::load_from_memory(bytes).map_err(|e| ValidationError::Invalid(format!("unsupported image: {e}")))?;
    let img = if img.width() > MAX_IMAGE_SIDE || img.height() > MAX_IMAGE_SIDE {
        img.resize(MAX_IMAGE_SIDE, MAX_IMAGE_SIDE, FilterType::Triangle)
    } else {
        img
    };
    let rgb = img.to_rgb8();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| ValidationError::Invalid(format!("image encode failed: {e}")))?;
    let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
    Ok((out.into_inner(), "image/jpeg".into(), format!("{stem}.jpg")))
}

fn sniff_mime(bytes: &[u8]) -> String {
    infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".into())
}

/// Compresses an image on the blocking pool. Formats the decoder does not
/// handle are kept as uploaded, with their sniffed content type.
pub async fn prepare_image(bytes: Vec<u8>, file_name: &str) -> Result<(Vec<u8>, String, String), ApiError> {
    let name = file_name.to_string();
    web::block(move || match compress_image(&bytes, &name) {
        Ok(compressed) => compressed,
        Err(e) => {
            warn!(file = %name, "storing image uncompressed: {e}");
            let ct = sniff_mime(&bytes);
            (bytes, ct, name)
        }
    })
    .await
    .map_err(|e| {
        error!("image compression task failed: {e}");
        ApiError::Internal
    })
}

/// Uploaded chat attachment, ready to be referenced by a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct Attachment {
    pub url: String,
    pub file_name: String,
    pub file_size: i64,
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

impl Attachment {
    pub fn into_message(self, client_id: Option<uuid::Uuid>) -> NewMessage {
        NewMessage {
            content: self.file_name.clone(),
            message_type: self.message_type,
            file_url: Some(self.url),
            file_name: Some(self.file_name),
            file_size: Some(self.file_size),
            client_id,
        }
    }
}

pub fn check_attachment_size(size: usize) -> Result<(), ValidationError> {
    if size > MAX_ATTACHMENT_BYTES {
        return Err(ValidationError::FileTooLarge { size: size as u64, limit: MAX_ATTACHMENT_BYTES as u64 });
    }
    Ok(())
}

/// Stores an attachment under `<uploader>/<millis>_<name>`; images are compressed first.
pub async fn upload_attachment(state: &AppState, me: Id, file_name: &str, bytes: Vec<u8>) -> Result<Attachment, ApiError> {
    check_attachment_size(bytes.len())?;
    let (bytes, content_type, file_name, message_type) = if infer::is_image(&bytes) {
        let (bytes, ct, name) = prepare_image(bytes, file_name).await?;
        (bytes, ct, name, MessageType::Image)
    } else {
        let ct = sniff_mime(&bytes);
        (bytes, ct, file_name.to_string(), MessageType::File)
    };
    let size = bytes.len() as i64;
    let key = object_key(me, &file_name, Utc::now().timestamp_millis());
    let url = state.objects.put(Bucket::ChatAttachments, &key, &content_type, bytes).await?;
    Ok(Attachment { url, file_name, file_size: size, message_type })
}

fn validate_message(new: &NewMessage) -> Result<(), ValidationError> {
    match new.message_type {
        MessageType::Text if new.content.trim().is_empty() => Err(ValidationError::EmptyMessage),
        MessageType::Image | MessageType::File if new.file_url.as_deref().map_or(true, str::is_empty) => {
            Err(ValidationError::Invalid("attachment url is required".into()))
        }
        _ => Ok(()),
    }
}

pub async fn list_messages(state: &AppState, me: Id, conversation: Id) -> Result<Vec<Message>, ApiError> {
    ensure_participant(state, conversation, me).await?;
    Ok(state.repo.list_messages(conversation, me).await?)
}

/// insert → undelete for every participant → move the conversation pointer →
/// publish. Steps are sequential; a failure leaves earlier steps in place.
pub async fn send_message(state: &AppState, me: Id, conversation: Id, new: NewMessage) -> Result<Message, ApiError> {
    validate_message(&new)?;
    let participants = ensure_participant(state, conversation, me).await?;

    let msg = state.repo.insert_message(conversation, me, new).await?;
    state.repo.undelete_conversation(conversation).await.map_err(|e| {
        error!(conversation = %conversation, message = %msg.id, "undelete after send failed: {e}");
        e
    })?;
    state.repo.update_last_message(conversation, msg.id, msg.created_at).await.map_err(|e| {
        error!(conversation = %conversation, message = %msg.id, "pointer update after send failed: {e}");
        e
    })?;

    let audience = participants.iter().map(|p| p.user_id).collect();
    state.events.publish(ChangeKind::Insert, Record::Message(msg.clone()), Audience::Users(audience));
    info!(conversation = %conversation, sender = %me, message = %msg.id, "message sent");
    Ok(msg)
}

/// Flips `is_read` on everything the caller did not send.
pub async fn mark_read(state: &AppState, me: Id, conversation: Id) -> Result<u64, ApiError> {
    ensure_participant(state, conversation, me).await?;
    Ok(state.repo.mark_conversation_read(conversation, me).await?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Sender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEffect {
    /// Insert for the open conversation, appended.
    Appended,
    /// Insert for another conversation; only the list needs a refresh.
    RefreshList,
    /// Already shown, or not a message insert.
    Ignored,
}

/// Append-only, time-ordered view of the focused conversation.
pub struct MessageStream {
    state: AppState,
    me: Id,
    conversation: Option<Id>,
    messages: Vec<ChatMessage>,
    pub draft: String,
}

impl MessageStream {
    pub fn new(state: AppState, me: Id) -> Self {
        Self { state, me, conversation: None, messages: Vec::new(), draft: String::new() }
    }

    pub fn conversation(&self) -> Option<Id> {
        self.conversation
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn classify(&self, message: Message) -> ChatMessage {
        let sender = if message.sender_id == self.me { Sender::User } else { Sender::Other };
        ChatMessage { message, sender }
    }

    fn contains(&self, msg: &Message) -> bool {
        self.messages.iter().any(|m| {
            m.message.id == msg.id || (msg.client_id.is_some() && m.message.client_id == msg.client_id && m.message.sender_id == msg.sender_id)
        })
    }

    fn push(&mut self, msg: Message) -> bool {
        if self.contains(&msg) {
            return false;
        }
        let entry = self.classify(msg);
        self.messages.push(entry);
        true
    }

    /// Loads the full thread and focuses it.
    pub async fn open(&mut self, conversation: Id) -> Result<(), ApiError> {
        let rows = list_messages(&self.state, self.me, conversation).await?;
        self.messages = rows.into_iter().map(|m| self.classify(m)).collect();
        self.conversation = Some(conversation);
        Ok(())
    }

    pub fn close(&mut self) {
        self.conversation = None;
        self.messages.clear();
    }

    pub fn apply(&mut self, ev: &ChangeEvent) -> StreamEffect {
        let (Table::Messages, ChangeKind::Insert, Record::Message(msg)) = (ev.table, ev.kind, &ev.record) else {
            return StreamEffect::Ignored;
        };
        if Some(msg.conversation_id) != self.conversation {
            return StreamEffect::RefreshList;
        }
        if self.push(msg.clone()) { StreamEffect::Appended } else { StreamEffect::Ignored }
    }

    /// Sends the draft. The draft is cleared before the write and is not
    /// restored if the write fails.
    pub async fn send(&mut self) -> Result<Message, ApiError> {
        let conversation = self.conversation.ok_or(ApiError::BadRequest("no conversation selected".into()))?;
        if self.draft.trim().is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let content = std::mem::take(&mut self.draft);
        let msg = send_message(&self.state, self.me, conversation, NewMessage::text(content)).await?;
        self.push(msg.clone());
        Ok(msg)
    }

    /// Size is checked before anything leaves the session. Upload and message
    /// insert are separate writes; a failed insert leaves the object behind.
    pub async fn send_attachment(&mut self, file_name: &str, bytes: Vec<u8>) -> Result<Message, ApiError> {
        let conversation = self.conversation.ok_or(ApiError::BadRequest("no conversation selected".into()))?;
        check_attachment_size(bytes.len())?;
        let attachment = upload_attachment(&self.state, self.me, file_name, bytes).await?;
        let new = attachment.into_message(Some(uuid::Uuid::new_v4()));
        let msg = send_message(&self.state, self.me, conversation, new).await?;
        self.push(msg.clone());
        Ok(msg)
    }

    pub async fn mark_read(&self) -> Result<u64, ApiError> {
        match self.conversation {
            Some(c) => mark_read(&self.state, self.me, c).await,
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::new(width, height).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn large_images_are_downscaled_to_jpeg() {
        let (bytes, ct, name) = compress_image(&png(2400, 1200), "shot.png").unwrap();
        assert_eq!(ct, "image/jpeg");
        assert_eq!(name, "shot.jpg");
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1920, 960));
    }

    #[test]
    fn small_images_keep_dimensions() {
        let (bytes, _, _) = compress_image(&png(64, 32), "a.png").unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
    }

    #[test]
    fn undecodable_images_are_rejected_by_the_encoder() {
        assert!(compress_image(b"GIF89a-truncated", "a.gif").is_err());
    }

    #[test]
    fn size_cap() {
        assert!(check_attachment_size(MAX_ATTACHMENT_BYTES).is_ok());
        assert!(matches!(check_attachment_size(12 * 1024 * 1024), Err(ValidationError::FileTooLarge { .. })));
    }

    #[test]
    fn empty_text_rejected() {
        assert_eq!(validate_message(&NewMessage::text("  ")), Err(ValidationError::EmptyMessage));
        let file = NewMessage { message_type: MessageType::File, ..Default::default() };
        assert!(validate_message(&file).is_err());
    }
}

use crate::models::{
    AccountStatus, Connection, ConnectionStatus, ConversationParticipant, ConversationRow, LastMessagePreview, Message,
    MessageType, NewGroupConversation, NewMessage, NewNote, NewNotice, Note, NoteCounters, NoteFlag, NoteFlags, NoteType,
    Notice, NoticeView, Notification, NotificationCategory, NotificationKind, ParticipantProfile, Profile, Role,
    UpdateProfile,
};
use crate::routes::{chat, feeds, files, live, notes, social};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        social::get_me,
        social::update_me,
        social::search_profiles,
        social::get_profile,
        social::set_status,
        files::upload_avatar,
        social::list_connections,
        social::connection_state,
        social::send_request,
        social::accept_request,
        social::reject_request,
        social::disconnect,
        chat::list_conversations,
        chat::open_direct,
        chat::create_group,
        chat::set_pinned,
        chat::delete_for_me,
        chat::clear_for_me,
        chat::list_messages,
        chat::send_message,
        chat::mark_read,
        chat::unread_count,
        files::send_attachment,
        feeds::list_notices,
        feeds::create_notice,
        feeds::mark_notice_read,
        feeds::clear_notices,
        feeds::list_notifications,
        feeds::mark_notification_read,
        feeds::mark_all_read,
        feeds::clear_notifications,
        notes::list_notes,
        notes::create_note,
        notes::get_note,
        notes::my_flags,
        notes::set_flag,
        notes::unset_flag,
        files::upload_note_file,
        files::upload,
        live::stream,
        live::track,
        live::untrack,
        live::online,
    ),
    components(schemas(
        Role, AccountStatus, Profile, UpdateProfile, ConnectionStatus, Connection,
        ConversationParticipant, ParticipantProfile, LastMessagePreview, ConversationRow, NewGroupConversation,
        MessageType, Message, NewMessage, Notice, NewNotice, NoticeView, NotificationKind, NotificationCategory,
        Notification, NoteType, Note, NewNote, NoteFlag, NoteFlags, NoteCounters,
        crate::feeds::NoticeItem, crate::feeds::NoticeState, crate::connections::ConnectionState,
        crate::routes::IdResponse, crate::routes::UrlResponse, crate::routes::CountResponse, crate::routes::TargetRequest,
        social::StatusRequest, social::ConnectionStateResponse, chat::PinRequest, chat::UnreadResponse,
        live::TrackResponse,
    )),
    tags(
        (name = "profiles", description = "Profiles and account status"),
        (name = "connections", description = "Connection requests between users"),
        (name = "conversations", description = "Direct and group conversations"),
        (name = "messages", description = "Messages and attachments"),
        (name = "notices", description = "Institute notices"),
        (name = "notifications", description = "Personal notifications"),
        (name = "notes", description = "Notes library"),
        (name = "files", description = "Local uploads"),
        (name = "realtime", description = "Change feed"),
        (name = "presence", description = "Online users"),
    )
)]
pub struct ApiDoc;

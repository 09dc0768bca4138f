use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use super::*;

const PROFILE_COLS: &str = "id, full_name, avatar_url, role, branch, semester, institute_code, account_status, created_at";
const CONNECTION_COLS: &str = "id, requester_id, recipient_id, status, created_at, updated_at";
const CONVERSATION_COLS: &str =
    "c.id, c.is_group, c.name, c.description, c.avatar_url, c.created_by, c.last_message_id, c.pinned_by, c.created_at, c.updated_at";
const MESSAGE_COLS: &str =
    "m.id, m.conversation_id, m.sender_id, m.content, m.message_type, m.file_url, m.file_name, m.file_size, m.is_read, m.client_id, m.created_at";
const NOTE_SELECT: &str = r#"
    SELECT n.id, n.author_id, n.title, n.description, n.content, n.note_type, n.file_url,
           n.subject, n.branch, n.semester, n.views,
           (SELECT count(*) FROM note_likes l WHERE l.note_id = n.id) AS likes,
           n.created_at
    FROM notes n
"#;
const NOTIFICATION_COLS: &str = "id, user_id, title, message, kind, category, link, is_read, created_at";

fn db_err(e: sqlx::Error) -> RepoError {
    match e {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(ref d) if d.is_unique_violation() || d.is_foreign_key_violation() => RepoError::Conflict,
        other => RepoError::Internal(other.to_string()),
    }
}

#[derive(Clone)]
pub struct PgRepo { pool: Pool<Postgres> }

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl ProfileRepo for PgRepo {
    async fn create_profile(&self, new: NewProfile) -> RepoResult<Profile> {
        sqlx::query_as::<_, Profile>(&format!(
            "INSERT INTO profiles (id, full_name, avatar_url, role, branch, semester, institute_code) \
             VALUES ($1,$2,$3,$4,$5,$6,$7) RETURNING {PROFILE_COLS}"
        ))
        .bind(new.id)
        .bind(&new.full_name)
        .bind(&new.avatar_url)
        .bind(new.role)
        .bind(&new.branch)
        .bind(new.semester)
        .bind(&new.institute_code)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn get_profile(&self, id: Id) -> RepoResult<Profile> {
        sqlx::query_as::<_, Profile>(&format!("SELECT {PROFILE_COLS} FROM profiles WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn list_profiles(&self, query: &ProfileQuery) -> RepoResult<Vec<Profile>> {
        let page = query.page();
        let pattern = query.search.as_ref().map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")));
        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLS} FROM profiles \
             WHERE ($1::text IS NULL OR full_name ILIKE $1) \
               AND ($2::text IS NULL OR role = $2) \
               AND ($3::text IS NULL OR institute_code = $3) \
             ORDER BY full_name LIMIT $4 OFFSET $5"
        ))
        .bind(pattern)
        .bind(query.role)
        .bind(&query.institute_code)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<Profile> {
        sqlx::query_as::<_, Profile>(&format!(
            "UPDATE profiles SET full_name = COALESCE($2, full_name), avatar_url = COALESCE($3, avatar_url), \
             branch = COALESCE($4, branch), semester = COALESCE($5, semester) \
             WHERE id = $1 RETURNING {PROFILE_COLS}"
        ))
        .bind(id)
        .bind(upd.full_name)
        .bind(upd.avatar_url)
        .bind(upd.branch)
        .bind(upd.semester)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn set_account_status(&self, id: Id, status: AccountStatus) -> RepoResult<Profile> {
        sqlx::query_as::<_, Profile>(&format!(
            "UPDATE profiles SET account_status = $2 WHERE id = $1 RETURNING {PROFILE_COLS}"
        ))
        .bind(id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }
}

#[async_trait]
impl ConnectionRepo for PgRepo {
    async fn list_connections(&self, user: Id) -> RepoResult<Vec<Connection>> {
        sqlx::query_as::<_, Connection>(&format!(
            "SELECT {CONNECTION_COLS} FROM connections WHERE requester_id = $1 OR recipient_id = $1 ORDER BY created_at"
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn get_connection(&self, id: Id) -> RepoResult<Connection> {
        sqlx::query_as::<_, Connection>(&format!("SELECT {CONNECTION_COLS} FROM connections WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn upsert_connection_request(&self, requester: Id, recipient: Id) -> RepoResult<Connection> {
        // the WHERE on the conflict arm leaves accepted rows alone -> no row returned
        let rec = sqlx::query_as::<_, Connection>(&format!(
            "INSERT INTO connections (id, requester_id, recipient_id, status) VALUES ($1,$2,$3,'pending') \
             ON CONFLICT ((LEAST(requester_id, recipient_id)), (GREATEST(requester_id, recipient_id))) DO UPDATE \
               SET requester_id = EXCLUDED.requester_id, recipient_id = EXCLUDED.recipient_id, \
                   status = 'pending', updated_at = now() \
               WHERE connections.status <> 'accepted' \
             RETURNING {CONNECTION_COLS}"
        ))
        .bind(Uuid::new_v4())
        .bind(requester)
        .bind(recipient)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match db_err(e) {
            RepoError::Conflict => RepoError::NotFound, // recipient profile missing (fk)
            other => other,
        })?;
        rec.ok_or(RepoError::Conflict)
    }

    async fn set_connection_status(&self, id: Id, status: ConnectionStatus) -> RepoResult<Connection> {
        sqlx::query_as::<_, Connection>(&format!(
            "UPDATE connections SET status = $2, updated_at = now() WHERE id = $1 RETURNING {CONNECTION_COLS}"
        ))
        .bind(id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }
}

#[derive(sqlx::FromRow)]
struct ParticipantRow {
    conversation_id: Id,
    id: Id,
    full_name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(sqlx::FromRow)]
struct UnreadRow {
    conversation_id: Id,
    unread: i64,
}

#[async_trait]
impl ConversationRepo for PgRepo {
    async fn get_or_create_conversation(&self, caller: Id, target: Id) -> RepoResult<Id> {
        if caller == target {
            return Err(RepoError::Conflict);
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        // serialise concurrent creators of the same pair
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext(LEAST($1::text, $2::text) || GREATEST($1::text, $2::text)))")
            .bind(caller.to_string())
            .bind(target.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let target_exists: Option<Id> = sqlx::query_scalar("SELECT id FROM profiles WHERE id = $1")
            .bind(target)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        if target_exists.is_none() {
            return Err(RepoError::NotFound);
        }
        let existing: Option<Id> = sqlx::query_scalar(
            "SELECT c.id FROM conversations c \
             JOIN conversation_participants a ON a.conversation_id = c.id AND a.user_id = $1 \
             JOIN conversation_participants b ON b.conversation_id = c.id AND b.user_id = $2 \
             WHERE NOT c.is_group LIMIT 1",
        )
        .bind(caller)
        .bind(target)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let id = match existing {
            Some(id) => {
                sqlx::query("UPDATE conversation_participants SET deleted_at = NULL WHERE conversation_id = $1 AND user_id = $2")
                    .bind(id)
                    .bind(caller)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                id
            }
            None => {
                let id = Uuid::new_v4();
                sqlx::query("INSERT INTO conversations (id, is_group, created_by) VALUES ($1, false, $2)")
                    .bind(id)
                    .bind(caller)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                sqlx::query("INSERT INTO conversation_participants (conversation_id, user_id) VALUES ($1,$2), ($1,$3)")
                    .bind(id)
                    .bind(caller)
                    .bind(target)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                id
            }
        };
        tx.commit().await.map_err(db_err)?;
        Ok(id)
    }

    async fn create_group_conversation(&self, creator: Id, group: NewGroupConversation) -> RepoResult<Id> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO conversations (id, is_group, name, description, avatar_url, created_by) VALUES ($1, true, $2, $3, $4, $5)")
            .bind(id)
            .bind(&group.name)
            .bind(&group.description)
            .bind(&group.avatar_url)
            .bind(creator)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let mut members = vec![creator];
        members.extend(group.member_ids.iter().copied().filter(|m| *m != creator));
        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id) \
             SELECT $1, u FROM UNNEST($2::uuid[]) AS u ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(&members)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(id)
    }

    async fn get_user_conversations(&self, user: Id) -> RepoResult<Vec<ConversationRow>> {
        let convs = sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLS} FROM conversations c \
             JOIN conversation_participants cp ON cp.conversation_id = c.id AND cp.user_id = $1 \
             WHERE cp.deleted_at IS NULL ORDER BY c.updated_at DESC"
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let ids: Vec<Id> = convs.iter().map(|c| c.id).collect();

        let participants = sqlx::query_as::<_, ParticipantRow>(
            "SELECT cp.conversation_id, cp.user_id AS id, p.full_name, p.avatar_url \
             FROM conversation_participants cp LEFT JOIN profiles p ON p.id = cp.user_id \
             WHERE cp.conversation_id = ANY($1) AND cp.user_id <> $2 ORDER BY cp.joined_at",
        )
        .bind(&ids)
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let mut by_conv: HashMap<Id, Vec<ParticipantProfile>> = HashMap::new();
        for p in participants {
            by_conv.entry(p.conversation_id).or_default().push(ParticipantProfile {
                id: p.id,
                full_name: p.full_name,
                avatar_url: p.avatar_url,
            });
        }

        let visible = "JOIN conversation_participants cp ON cp.conversation_id = m.conversation_id AND cp.user_id = $2 \
                       WHERE m.conversation_id = ANY($1) AND (cp.cleared_at IS NULL OR m.created_at > cp.cleared_at)";
        let last = sqlx::query_as::<_, Message>(&format!(
            "SELECT DISTINCT ON (m.conversation_id) {MESSAGE_COLS} FROM messages m {visible} \
             ORDER BY m.conversation_id, m.created_at DESC"
        ))
        .bind(&ids)
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let mut last_by_conv: HashMap<Id, Message> = last.into_iter().map(|m| (m.conversation_id, m)).collect();

        let unread = sqlx::query_as::<_, UnreadRow>(&format!(
            "SELECT m.conversation_id, count(*) AS unread FROM messages m {visible} \
             AND m.sender_id <> $2 AND NOT m.is_read GROUP BY m.conversation_id"
        ))
        .bind(&ids)
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let unread_by_conv: HashMap<Id, i64> = unread.into_iter().map(|u| (u.conversation_id, u.unread)).collect();

        Ok(convs
            .into_iter()
            .map(|c| ConversationRow {
                id: c.id,
                is_group: c.is_group,
                participants: by_conv.remove(&c.id).unwrap_or_default(),
                last_message: last_by_conv.remove(&c.id).map(|m| LastMessagePreview {
                    id: m.id,
                    sender_id: m.sender_id,
                    content: m.content,
                    message_type: m.message_type,
                    created_at: m.created_at,
                }),
                unread_count: unread_by_conv.get(&c.id).copied().unwrap_or(0),
                name: c.name,
                description: c.description,
                avatar_url: c.avatar_url,
                updated_at: c.updated_at,
                pinned_by: c.pinned_by,
            })
            .collect())
    }

    async fn get_conversation(&self, id: Id) -> RepoResult<Conversation> {
        sqlx::query_as::<_, Conversation>(&format!("SELECT {CONVERSATION_COLS} FROM conversations c WHERE c.id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn list_participants(&self, conversation: Id) -> RepoResult<Vec<ConversationParticipant>> {
        let rows = sqlx::query_as::<_, ConversationParticipant>(
            "SELECT conversation_id, user_id, joined_at, deleted_at, cleared_at \
             FROM conversation_participants WHERE conversation_id = $1 ORDER BY joined_at",
        )
        .bind(conversation)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        if rows.is_empty() {
            return Err(RepoError::NotFound);
        }
        Ok(rows)
    }

    async fn undelete_conversation(&self, conversation: Id) -> RepoResult<()> {
        sqlx::query("UPDATE conversation_participants SET deleted_at = NULL WHERE conversation_id = $1")
            .bind(conversation)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_conversation_for_user(&self, conversation: Id, user: Id) -> RepoResult<()> {
        let res = sqlx::query(
            "UPDATE conversation_participants SET deleted_at = now(), cleared_at = now() \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation)
        .bind(user)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
        Ok(())
    }

    async fn clear_chat_for_user(&self, conversation: Id, user: Id) -> RepoResult<()> {
        let res = sqlx::query("UPDATE conversation_participants SET cleared_at = now() WHERE conversation_id = $1 AND user_id = $2")
            .bind(conversation)
            .bind(user)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
        Ok(())
    }

    async fn disconnect_user(&self, caller: Id, target: Id) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let res = sqlx::query(
            "DELETE FROM connections WHERE status = 'accepted' AND \
             ((requester_id = $1 AND recipient_id = $2) OR (requester_id = $2 AND recipient_id = $1))",
        )
        .bind(caller)
        .bind(target)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        // messages and participants go with the conversation (ON DELETE CASCADE)
        sqlx::query(
            "DELETE FROM conversations c WHERE NOT c.is_group \
             AND EXISTS (SELECT 1 FROM conversation_participants a WHERE a.conversation_id = c.id AND a.user_id = $1) \
             AND EXISTS (SELECT 1 FROM conversation_participants b WHERE b.conversation_id = c.id AND b.user_id = $2)",
        )
        .bind(caller)
        .bind(target)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn set_pinned(&self, conversation: Id, user: Id, pinned: bool) -> RepoResult<()> {
        let res = sqlx::query(
            "UPDATE conversations SET pinned_by = CASE WHEN $3 THEN array_append(array_remove(pinned_by, $2), $2) \
                                                 ELSE array_remove(pinned_by, $2) END \
             WHERE id = $1 AND EXISTS (SELECT 1 FROM conversation_participants cp WHERE cp.conversation_id = $1 AND cp.user_id = $2)",
        )
        .bind(conversation)
        .bind(user)
        .bind(pinned)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
        Ok(())
    }

    async fn update_last_message(&self, conversation: Id, message: Id, at: DateTime<Utc>) -> RepoResult<()> {
        let res = sqlx::query("UPDATE conversations SET last_message_id = $2, updated_at = $3 WHERE id = $1")
            .bind(conversation)
            .bind(message)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
        Ok(())
    }
}

#[async_trait]
impl MessageRepo for PgRepo {
    async fn list_messages(&self, conversation: Id, viewer: Id) -> RepoResult<Vec<Message>> {
        let member: Option<Id> = sqlx::query_scalar(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation)
        .bind(viewer)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        if member.is_none() {
            return Err(RepoError::NotFound);
        }
        sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLS} FROM messages m \
             JOIN conversation_participants cp ON cp.conversation_id = m.conversation_id AND cp.user_id = $2 \
             WHERE m.conversation_id = $1 AND (cp.cleared_at IS NULL OR m.created_at > cp.cleared_at) \
             ORDER BY m.created_at ASC"
        ))
        .bind(conversation)
        .bind(viewer)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn insert_message(&self, conversation: Id, sender: Id, new: NewMessage) -> RepoResult<Message> {
        let cols = MESSAGE_COLS.replace("m.", "");
        let inserted = sqlx::query_as::<_, Message>(&format!(
            "INSERT INTO messages (id, conversation_id, sender_id, content, message_type, file_url, file_name, file_size, client_id) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) ON CONFLICT (sender_id, client_id) DO NOTHING RETURNING {cols}"
        ))
        .bind(Uuid::new_v4())
        .bind(conversation)
        .bind(sender)
        .bind(&new.content)
        .bind(new.message_type)
        .bind(&new.file_url)
        .bind(&new.file_name)
        .bind(new.file_size)
        .bind(new.client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match db_err(e) {
            RepoError::Conflict => RepoError::NotFound, // conversation fk
            other => other,
        })?;
        match inserted {
            Some(m) => Ok(m),
            // retried send with the same client id
            None => sqlx::query_as::<_, Message>(&format!(
                "SELECT {MESSAGE_COLS} FROM messages m WHERE m.sender_id = $1 AND m.client_id = $2"
            ))
            .bind(sender)
            .bind(new.client_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err),
        }
    }

    async fn mark_conversation_read(&self, conversation: Id, reader: Id) -> RepoResult<u64> {
        let res = sqlx::query("UPDATE messages SET is_read = true WHERE conversation_id = $1 AND sender_id <> $2 AND NOT is_read")
            .bind(conversation)
            .bind(reader)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected())
    }

    async fn unread_count(&self, conversation: Id, reader: Id) -> RepoResult<i64> {
        sqlx::query_scalar(
            "SELECT count(*) FROM messages m \
             JOIN conversation_participants cp ON cp.conversation_id = m.conversation_id AND cp.user_id = $2 \
             WHERE m.conversation_id = $1 AND m.sender_id <> $2 AND NOT m.is_read \
               AND (cp.cleared_at IS NULL OR m.created_at > cp.cleared_at)",
        )
        .bind(conversation)
        .bind(reader)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }
}

#[derive(sqlx::FromRow)]
struct NoticeJoinRow {
    #[sqlx(flatten)]
    notice: Notice,
    view_user_id: Option<Id>,
    is_cleared: Option<bool>,
    viewed_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl NoticeRepo for PgRepo {
    async fn create_notice(&self, author: Id, institute_code: &str, new: NewNotice) -> RepoResult<Notice> {
        sqlx::query_as::<_, Notice>(
            "INSERT INTO notices (id, author_id, title, content, institute_code, branch, semester) \
             VALUES ($1,$2,$3,$4,$5,$6,$7) \
             RETURNING id, author_id, title, content, institute_code, branch, semester, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(author)
        .bind(&new.title)
        .bind(&new.content)
        .bind(institute_code)
        .bind(&new.branch)
        .bind(new.semester)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_notices(&self, audience: &NoticeAudience) -> RepoResult<Vec<NoticeEntry>> {
        let rows = sqlx::query_as::<_, NoticeJoinRow>(
            "SELECT n.id, n.author_id, n.title, n.content, n.institute_code, n.branch, n.semester, n.created_at, \
                    v.user_id AS view_user_id, v.is_cleared, v.viewed_at \
             FROM notices n LEFT JOIN notice_views v ON v.notice_id = n.id AND v.user_id = $1 \
             WHERE n.institute_code = $2 \
               AND (n.branch IS NULL OR n.branch = $3) \
               AND (n.semester IS NULL OR n.semester = $4) \
             ORDER BY n.created_at DESC",
        )
        .bind(audience.user_id)
        .bind(&audience.institute_code)
        .bind(&audience.branch)
        .bind(audience.semester)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let view = match (r.view_user_id, r.is_cleared, r.viewed_at) {
                    (Some(user_id), Some(is_cleared), Some(viewed_at)) => {
                        Some(NoticeView { notice_id: r.notice.id, user_id, is_cleared, viewed_at })
                    }
                    _ => None,
                };
                NoticeEntry { notice: r.notice, view }
            })
            .collect())
    }

    async fn mark_notice_read(&self, notice: Id, user: Id) -> RepoResult<NoticeView> {
        sqlx::query(
            "INSERT INTO notice_views (notice_id, user_id) VALUES ($1,$2) ON CONFLICT (notice_id, user_id) DO NOTHING",
        )
        .bind(notice)
        .bind(user)
        .execute(&self.pool)
        .await
        .map_err(|e| match db_err(e) {
            RepoError::Conflict => RepoError::NotFound,
            other => other,
        })?;
        sqlx::query_as::<_, NoticeView>(
            "SELECT notice_id, user_id, is_cleared, viewed_at FROM notice_views WHERE notice_id = $1 AND user_id = $2",
        )
        .bind(notice)
        .bind(user)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn clear_read_notices(&self, user: Id) -> RepoResult<u64> {
        let res = sqlx::query("UPDATE notice_views SET is_cleared = true WHERE user_id = $1 AND NOT is_cleared")
            .bind(user)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl NotificationRepo for PgRepo {
    async fn create_notification(&self, new: NewNotification) -> RepoResult<Notification> {
        sqlx::query_as::<_, Notification>(&format!(
            "INSERT INTO notifications (id, user_id, title, message, kind, category, link) \
             VALUES ($1,$2,$3,$4,$5,$6,$7) RETURNING {NOTIFICATION_COLS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(&new.title)
        .bind(&new.message)
        .bind(new.kind)
        .bind(new.category)
        .bind(&new.link)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_notifications(&self, user: Id) -> RepoResult<Vec<Notification>> {
        sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLS} FROM notifications WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn mark_notification_read(&self, id: Id, user: Id) -> RepoResult<Notification> {
        sqlx::query_as::<_, Notification>(&format!(
            "UPDATE notifications SET is_read = true WHERE id = $1 AND user_id = $2 RETURNING {NOTIFICATION_COLS}"
        ))
        .bind(id)
        .bind(user)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn mark_all_notifications_read(&self, user: Id) -> RepoResult<u64> {
        let res = sqlx::query("UPDATE notifications SET is_read = true WHERE user_id = $1 AND NOT is_read")
            .bind(user)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected())
    }

    async fn delete_read_notifications(&self, user: Id) -> RepoResult<u64> {
        let res = sqlx::query("DELETE FROM notifications WHERE user_id = $1 AND is_read")
            .bind(user)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl NoteRepo for PgRepo {
    async fn create_note(&self, author: Id, new: NewNote) -> RepoResult<Note> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO notes (id, author_id, title, description, content, note_type, file_url, subject, branch, semester) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(id)
        .bind(author)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.content)
        .bind(new.note_type)
        .bind(&new.file_url)
        .bind(&new.subject)
        .bind(&new.branch)
        .bind(new.semester)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.get_note(id).await
    }

    async fn list_notes(&self, query: &NoteQuery) -> RepoResult<Vec<Note>> {
        let page = query.page();
        let pattern = query.search.as_ref().map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")));
        sqlx::query_as::<_, Note>(&format!(
            "{NOTE_SELECT} WHERE ($1::text IS NULL OR n.title ILIKE $1) \
               AND ($2::text IS NULL OR n.note_type = $2) \
               AND ($3::uuid IS NULL OR n.author_id = $3) \
             ORDER BY n.created_at DESC LIMIT $4 OFFSET $5"
        ))
        .bind(pattern)
        .bind(query.note_type)
        .bind(query.author_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn get_note(&self, id: Id) -> RepoResult<Note> {
        sqlx::query_as::<_, Note>(&format!("{NOTE_SELECT} WHERE n.id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn increment_view_count(&self, id: Id) -> RepoResult<i64> {
        sqlx::query_scalar("UPDATE notes SET views = views + 1 WHERE id = $1 RETURNING views")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn set_note_flag(&self, note: Id, user: Id, flag: NoteFlag, on: bool) -> RepoResult<NoteCounters> {
        // table name comes from a closed enum, never from input
        let table = flag.table();
        let sql = if on {
            format!("INSERT INTO {table} (user_id, note_id) VALUES ($1,$2) ON CONFLICT DO NOTHING")
        } else {
            format!("DELETE FROM {table} WHERE user_id = $1 AND note_id = $2")
        };
        sqlx::query(&sql)
            .bind(user)
            .bind(note)
            .execute(&self.pool)
            .await
            .map_err(|e| match db_err(e) {
                RepoError::Conflict => RepoError::NotFound,
                other => other,
            })?;
        let n = self.get_note(note).await?;
        Ok(NoteCounters { views: n.views, likes: n.likes })
    }

    async fn note_flags(&self, user: Id) -> RepoResult<NoteFlags> {
        let mut flags = NoteFlags::default();
        for flag in [NoteFlag::Like, NoteFlag::Save, NoteFlag::Completion] {
            let ids: Vec<Id> = sqlx::query_scalar(&format!("SELECT note_id FROM {} WHERE user_id = $1", flag.table()))
                .bind(user)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
            match flag {
                NoteFlag::Like => flags.liked = ids,
                NoteFlag::Save => flags.saved = ids,
                NoteFlag::Completion => flags.completed = ids,
            }
        }
        Ok(flags)
    }
}

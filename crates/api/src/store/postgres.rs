//! Postgres-backed storage capabilities

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use huddle_shared::{
    ChatId, ChatKind, MessageBody, MessageId, PersistedMessage, Room, Sender, StoreError,
    StoreResult, UserId, UserProfile,
};

use super::{MessageStore, ParticipantAuthorizer, UserDirectory};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    chat_id: Uuid,
    sender_id: Option<Uuid>,
    content: Option<String>,
    encrypted_content: Option<String>,
    encrypted_keys: Option<serde_json::Value>,
    created_at: OffsetDateTime,
}

impl TryFrom<MessageRow> for PersistedMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let body = match (row.encrypted_content, row.content) {
            (Some(encrypted_content), _) => {
                let encrypted_keys: HashMap<String, String> = match row.encrypted_keys {
                    Some(keys) => serde_json::from_value(keys).map_err(|e| {
                        StoreError::Corrupt(format!("message {}: bad encrypted_keys: {e}", row.id))
                    })?,
                    None => HashMap::new(),
                };
                MessageBody::Encrypted {
                    encrypted_content,
                    encrypted_keys,
                }
            }
            (None, Some(content)) => MessageBody::Plain { content },
            (None, None) => {
                return Err(StoreError::Corrupt(format!("message {} has no payload", row.id)));
            }
        };

        Ok(PersistedMessage {
            id: MessageId(row.id),
            chat_id: ChatId(row.chat_id),
            sender: Sender::from_column(row.sender_id),
            body,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl ParticipantAuthorizer for PgStore {
    async fn find_room(&self, chat_id: ChatId) -> StoreResult<Option<Room>> {
        let kind = sqlx::query_scalar::<_, ChatKind>("SELECT type FROM chats WHERE id = $1")
            .bind(chat_id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(kind.map(|kind| Room { id: chat_id, kind }))
    }

    async fn is_member(&self, user_id: UserId, chat_id: ChatId) -> StoreResult<bool> {
        let is_member = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM chat_participants WHERE chat_id = $1 AND user_id = $2)",
        )
        .bind(chat_id.0)
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(is_member)
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<UserProfile>> {
        let username = sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE id = $1")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(username.map(|username| UserProfile {
            id: user_id,
            username,
        }))
    }

    async fn set_presence(
        &self,
        user_id: UserId,
        is_online: bool,
        last_seen: Option<OffsetDateTime>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users SET
              is_online = $2,
              last_seen = COALESCE($3, last_seen)
            WHERE id = $1
            "#,
        )
        .bind(user_id.0)
        .bind(is_online)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Newest first; `id` breaks ties between rows written in the same instant
const RECENT_HISTORY_SQL: &str = r#"
    SELECT id, chat_id, sender_id, content, encrypted_content, encrypted_keys, created_at
    FROM messages
    WHERE chat_id = $1
    ORDER BY created_at DESC, id DESC
    LIMIT $2
"#;

#[async_trait]
impl MessageStore for PgStore {
    async fn append(
        &self,
        chat_id: ChatId,
        sender: Sender,
        body: MessageBody,
    ) -> StoreResult<PersistedMessage> {
        let (content, encrypted_content, encrypted_keys) = match body {
            MessageBody::Plain { content } => (Some(content), None, None),
            MessageBody::Encrypted {
                encrypted_content,
                encrypted_keys,
            } => (
                None,
                Some(encrypted_content),
                Some(serde_json::to_value(encrypted_keys).map_err(|e| {
                    StoreError::Corrupt(format!("unserializable encrypted_keys: {e}"))
                })?),
            ),
        };

        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (id, chat_id, sender_id, content, encrypted_content, encrypted_keys)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, chat_id, sender_id, content, encrypted_content, encrypted_keys, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(chat_id.0)
        .bind(sender.to_column())
        .bind(content)
        .bind(encrypted_content)
        .bind(encrypted_keys)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn recent_history(&self, chat_id: ChatId, limit: usize) -> StoreResult<Vec<PersistedMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(RECENT_HISTORY_SQL)
            .bind(chat_id.0)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(PersistedMessage::try_from).collect()
    }
}

//! SQLite persistence for conversations, messages, and document references.
//!
//! Timestamps are stored as fixed-width RFC 3339 (UTC, microseconds) so the
//! textual ordering the indexes provide is also chronological order.
//! `append_message` enforces the monotonic-timestamp rule: a new message is
//! stamped strictly after the latest one already in its conversation.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use super::RepoError;
use crate::db::Database;
use crate::domain::{CompanyRef, Conversation, DocumentRef, DocumentScope, Message, MessageRole, Source};
use crate::pipeline::IngestionStatus;

fn stamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_stamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

fn scope_columns(scope: &DocumentScope) -> (&'static str, String, String) {
    match scope {
        DocumentScope::Conversation { user, conversation } => {
            ("user_document", user.clone(), conversation.clone())
        }
        DocumentScope::System => ("system_knowledge_base", String::new(), String::new()),
    }
}

fn scope_from_columns(owner: &str, user: String, conversation: String) -> DocumentScope {
    if owner == "user_document" {
        DocumentScope::Conversation { user, conversation }
    } else {
        DocumentScope::System
    }
}

#[derive(Clone)]
pub struct SqliteRepository {
    conn: Connection,
}

impl SqliteRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    fn storage(err: impl std::fmt::Display) -> RepoError {
        RepoError::Storage(err.to_string())
    }

    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
        company_names: Vec<String>,
    ) -> Result<Conversation, RepoError> {
        if title.trim().is_empty() {
            return Err(RepoError::Validation(
                "conversation title must not be empty".into(),
            ));
        }
        if company_names.iter().any(|name| name.trim().is_empty()) {
            return Err(RepoError::Validation("company name must not be empty".into()));
        }

        let now = Utc::now();
        let conversation_id = Uuid::new_v4().to_string();
        let user_id = user_id.to_string();
        let title = title.to_string();

        let companies = {
            let conversation_id = conversation_id.clone();
            let user_id = user_id.clone();
            let title = title.clone();
            let created = stamp(&now);
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                    tx.execute(
                        "INSERT INTO conversations (id, user_id, title, ingestion_status, \
                         created_at, updated_at) VALUES (?1, ?2, ?3, NULL, ?4, ?4)",
                        params![conversation_id, user_id, title, created],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                    let mut companies = Vec::with_capacity(company_names.len());
                    for (position, name) in company_names.iter().enumerate() {
                        tx.execute(
                            "INSERT INTO conversation_companies (conversation_id, position, name) \
                             VALUES (?1, ?2, ?3)",
                            params![conversation_id, position as i64, name],
                        )
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        companies.push(CompanyRef {
                            id: tx.last_insert_rowid(),
                            name: name.clone(),
                        });
                    }
                    tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                    Ok(companies)
                })
                .await
                .map_err(Self::storage)?
        };

        Ok(Conversation {
            id: conversation_id,
            title,
            user_id,
            created_at: now,
            updated_at: now,
            ingestion_status: None,
            companies,
        })
    }

    /// Fetch a conversation owned by `user_id`; anything else is `NotFound`.
    pub async fn get_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Conversation, RepoError> {
        let conversation_id = conversation_id.to_string();
        let user_id = user_id.to_string();

        self.conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT id, user_id, title, ingestion_status, created_at, updated_at \
                         FROM conversations WHERE id = ?1 AND user_id = ?2",
                        params![conversation_id, user_id],
                        |row| {
                            let status: Option<String> = row.get(3)?;
                            Ok(Conversation {
                                id: row.get(0)?,
                                user_id: row.get(1)?,
                                title: row.get(2)?,
                                ingestion_status: status
                                    .as_deref()
                                    .and_then(IngestionStatus::decode),
                                created_at: parse_stamp(&row.get::<_, String>(4)?, 4)?,
                                updated_at: parse_stamp(&row.get::<_, String>(5)?, 5)?,
                                companies: Vec::new(),
                            })
                        },
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let Some(mut conversation) = row else {
                    return Ok(Err(RepoError::NotFound {
                        what: "conversation",
                        id: conversation_id,
                    }));
                };

                let mut stmt = conn
                    .prepare(
                        "SELECT id, name FROM conversation_companies \
                         WHERE conversation_id = ?1 ORDER BY position ASC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mapped = stmt
                    .query_map(params![conversation.id], |row| {
                        Ok(CompanyRef {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for company in mapped {
                    conversation
                        .companies
                        .push(company.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(Ok(conversation))
            })
            .await
            .map_err(Self::storage)?
    }

    /// Replace the conversation's ordered company list.
    pub async fn set_companies(
        &self,
        conversation_id: &str,
        company_names: Vec<String>,
    ) -> Result<Vec<CompanyRef>, RepoError> {
        if company_names.iter().any(|name| name.trim().is_empty()) {
            return Err(RepoError::Validation("company name must not be empty".into()));
        }
        let conversation_id = conversation_id.to_string();
        let now = stamp(&Utc::now());

        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "DELETE FROM conversation_companies WHERE conversation_id = ?1",
                    params![conversation_id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut companies = Vec::with_capacity(company_names.len());
                for (position, name) in company_names.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO conversation_companies (conversation_id, position, name) \
                         VALUES (?1, ?2, ?3)",
                        params![conversation_id, position as i64, name],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    companies.push(CompanyRef {
                        id: tx.last_insert_rowid(),
                        name: name.clone(),
                    });
                }
                tx.execute(
                    "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                    params![now, conversation_id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(companies)
            })
            .await
            .map_err(Self::storage)
    }

    /// Write the conversation's ingestion-status mirror. Done only on
    /// terminal pipeline transitions.
    pub async fn set_ingestion_status(
        &self,
        conversation_id: &str,
        status: Option<IngestionStatus>,
    ) -> Result<(), RepoError> {
        let conversation_id = conversation_id.to_string();
        let status = status.map(|s| s.encode().to_string());
        let now = stamp(&Utc::now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE conversations SET ingestion_status = ?1, updated_at = ?2 \
                     WHERE id = ?3",
                    params![status, now, conversation_id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(Self::storage)
    }

    /// Refresh `updated_at`.
    pub async fn touch_conversation(&self, conversation_id: &str) -> Result<(), RepoError> {
        let conversation_id = conversation_id.to_string();
        let now = stamp(&Utc::now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                    params![now, conversation_id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(Self::storage)
    }

    /// Delete a conversation with its messages and citations. The caller is
    /// responsible for also clearing the conversation's vector-store scope.
    pub async fn delete_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), RepoError> {
        let conversation_id = conversation_id.to_string();
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                let removed = tx
                    .execute(
                        "DELETE FROM conversations WHERE id = ?1 AND user_id = ?2",
                        params![conversation_id, user_id],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                if removed == 0 {
                    return Ok(Err(RepoError::NotFound {
                        what: "conversation",
                        id: conversation_id,
                    }));
                }
                tx.execute(
                    "DELETE FROM message_sources WHERE message_id IN \
                     (SELECT id FROM messages WHERE conversation_id = ?1)",
                    params![conversation_id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "DELETE FROM messages WHERE conversation_id = ?1",
                    params![conversation_id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "DELETE FROM conversation_companies WHERE conversation_id = ?1",
                    params![conversation_id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(Ok(()))
            })
            .await
            .map_err(Self::storage)?
    }

    /// Persist a message, clamping its timestamp strictly after the latest
    /// message already in the conversation, and refresh the conversation's
    /// `updated_at`. Returns the message as stored.
    pub async fn append_message(&self, message: Message) -> Result<Message, RepoError> {
        let metadata_json =
            serde_json::to_string(&message.metadata).map_err(Self::storage)?;
        let mut message = message;

        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;

                let known: Option<String> = tx
                    .query_row(
                        "SELECT id FROM conversations WHERE id = ?1",
                        params![message.conversation_id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                if known.is_none() {
                    return Ok(Err(RepoError::NotFound {
                        what: "conversation",
                        id: message.conversation_id.clone(),
                    }));
                }

                let last: Option<String> = tx
                    .query_row(
                        "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
                        params![message.conversation_id],
                        |row| row.get(0),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                if let Some(last_raw) = last {
                    let last_ts = parse_stamp(&last_raw, 0)
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    if message.created_at <= last_ts {
                        message.created_at = last_ts + Duration::microseconds(1);
                    }
                }

                tx.execute(
                    "INSERT INTO messages (id, conversation_id, role, content, created_at, \
                     metadata) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        message.id,
                        message.conversation_id,
                        message.role.encode(),
                        message.content,
                        stamp(&message.created_at),
                        metadata_json,
                    ],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;

                for source in &message.sources {
                    tx.execute(
                        "INSERT INTO message_sources (message_id, ord, document_id, \
                         document_title, relevance_score, chunks_used) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            message.id,
                            source.order as i64,
                            source.document_id,
                            source.document_title,
                            f64::from(source.relevance_score),
                            source.chunks_used as i64,
                        ],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }

                tx.execute(
                    "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                    params![stamp(&Utc::now()), message.conversation_id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;

                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(Ok(message))
            })
            .await
            .map_err(Self::storage)?
    }

    /// Ordered message history with source citations attached.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, RepoError> {
        let conversation_id = conversation_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, conversation_id, role, content, created_at, metadata \
                         FROM messages WHERE conversation_id = ?1 \
                         ORDER BY created_at ASC, rowid ASC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mapped = stmt
                    .query_map(params![conversation_id], |row| {
                        let role_raw: String = row.get(2)?;
                        let metadata_raw: String = row.get(5)?;
                        Ok(Message {
                            id: row.get(0)?,
                            conversation_id: row.get(1)?,
                            role: MessageRole::decode(&role_raw).unwrap_or(MessageRole::System),
                            content: row.get(3)?,
                            created_at: parse_stamp(&row.get::<_, String>(4)?, 4)?,
                            metadata: serde_json::from_str(&metadata_raw).unwrap_or_default(),
                            sources: Vec::new(),
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut messages = Vec::new();
                for message in mapped {
                    messages.push(message.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }

                let mut stmt = conn
                    .prepare(
                        "SELECT s.message_id, s.ord, s.document_id, s.document_title, \
                         s.relevance_score, s.chunks_used \
                         FROM message_sources s \
                         JOIN messages m ON m.id = s.message_id \
                         WHERE m.conversation_id = ?1 \
                         ORDER BY s.message_id ASC, s.ord ASC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mapped = stmt
                    .query_map(params![conversation_id], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            Source {
                                order: row.get::<_, i64>(1)? as usize,
                                document_id: row.get(2)?,
                                document_title: row.get(3)?,
                                relevance_score: row.get::<_, f64>(4)? as f32,
                                chunks_used: row.get::<_, i64>(5)? as usize,
                            },
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for entry in mapped {
                    let (message_id, source) = entry.map_err(tokio_rusqlite::Error::Rusqlite)?;
                    if let Some(message) = messages.iter_mut().find(|m| m.id == message_id) {
                        message.sources.push(source);
                    }
                }
                Ok(messages)
            })
            .await
            .map_err(Self::storage)
    }

    pub async fn upsert_document(&self, document: DocumentRef) -> Result<(), RepoError> {
        let (owner, user_scope, conversation_scope) = scope_columns(&document.scope);
        let blob_path = document
            .blob_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO documents (id, title, content_type, blob_path, full_text, \
                     owner, user_scope, conversation_scope) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                     ON CONFLICT(id) DO UPDATE SET title = ?2, content_type = ?3, \
                     blob_path = ?4, full_text = ?5, owner = ?6, user_scope = ?7, \
                     conversation_scope = ?8",
                    params![
                        document.id,
                        document.title,
                        document.content_type,
                        blob_path,
                        document.full_text,
                        owner,
                        user_scope,
                        conversation_scope,
                    ],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(Self::storage)
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRef>, RepoError> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, title, content_type, blob_path, full_text, owner, \
                     user_scope, conversation_scope FROM documents WHERE id = ?1",
                    params![document_id],
                    |row| {
                        let owner: String = row.get(5)?;
                        let blob_path: Option<String> = row.get(3)?;
                        Ok(DocumentRef {
                            id: row.get(0)?,
                            title: row.get(1)?,
                            content_type: row.get(2)?,
                            blob_path: blob_path.map(Into::into),
                            full_text: row.get(4)?,
                            scope: scope_from_columns(&owner, row.get(6)?, row.get(7)?),
                        })
                    },
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(Self::storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo() -> SqliteRepository {
        let db = Database::open_in_memory().await.unwrap();
        SqliteRepository::new(&db)
    }

    #[tokio::test]
    async fn create_and_fetch_conversation_with_companies() {
        let repo = repo().await;
        let created = repo
            .create_conversation("user-1", "Apple filings", vec!["Apple Inc.".into()])
            .await
            .unwrap();
        assert_eq!(created.companies.len(), 1);

        let fetched = repo.get_conversation(&created.id, "user-1").await.unwrap();
        assert_eq!(fetched.title, "Apple filings");
        assert_eq!(fetched.companies[0].name, "Apple Inc.");
        assert!(fetched.ingestion_status.is_none());
    }

    #[tokio::test]
    async fn foreign_user_cannot_see_conversation() {
        let repo = repo().await;
        let created = repo
            .create_conversation("user-1", "Private", vec![])
            .await
            .unwrap();
        let err = repo.get_conversation(&created.id, "user-2").await.unwrap_err();
        assert!(matches!(err, RepoError::NotFound { .. }));
    }

    #[tokio::test]
    async fn empty_company_name_is_rejected() {
        let repo = repo().await;
        let err = repo
            .create_conversation("user-1", "Title", vec!["  ".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
    }

    #[tokio::test]
    async fn message_timestamps_are_strictly_monotonic() {
        let repo = repo().await;
        let conversation = repo
            .create_conversation("user-1", "Chat", vec![])
            .await
            .unwrap();

        let ts = Utc::now();
        let mut user_msg = Message::user(conversation.id.clone(), "question");
        user_msg.created_at = ts;
        let stored_user = repo.append_message(user_msg).await.unwrap();

        // Same wall-clock instant: the assistant reply must still land after.
        let mut assistant_msg = Message::assistant(conversation.id.clone(), "answer");
        assistant_msg.created_at = ts;
        let stored_assistant = repo.append_message(assistant_msg).await.unwrap();
        assert!(stored_assistant.created_at > stored_user.created_at);

        let history = repo.list_messages(&conversation.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn sources_round_trip_in_order() {
        let repo = repo().await;
        let conversation = repo
            .create_conversation("user-1", "Chat", vec![])
            .await
            .unwrap();
        let sources = vec![
            Source {
                document_id: "10-K-1".into(),
                document_title: "Annual report".into(),
                relevance_score: 0.91,
                chunks_used: 4,
                order: 0,
            },
            Source {
                document_id: "10-Q-2".into(),
                document_title: "Quarterly report".into(),
                relevance_score: 0.52,
                chunks_used: 1,
                order: 1,
            },
        ];
        let message = Message::assistant(conversation.id.clone(), "grounded answer")
            .with_sources(sources.clone());
        repo.append_message(message).await.unwrap();

        let history = repo.list_messages(&conversation.id).await.unwrap();
        let stored = &history[0].sources;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].document_id, "10-K-1");
        assert_eq!(stored[1].order, 1);
        assert!((stored[0].relevance_score - 0.91).abs() < 1e-6);
    }

    #[tokio::test]
    async fn append_updates_conversation_timestamp() {
        let repo = repo().await;
        let conversation = repo
            .create_conversation("user-1", "Chat", vec![])
            .await
            .unwrap();
        repo.append_message(Message::user(conversation.id.clone(), "hello"))
            .await
            .unwrap();
        let fetched = repo.get_conversation(&conversation.id, "user-1").await.unwrap();
        assert!(fetched.updated_at >= conversation.updated_at);
    }

    #[tokio::test]
    async fn delete_cascades_messages_and_sources() {
        let repo = repo().await;
        let conversation = repo
            .create_conversation("user-1", "Chat", vec!["Apple".into()])
            .await
            .unwrap();
        let message = Message::assistant(conversation.id.clone(), "a").with_sources(vec![Source {
            document_id: "d".into(),
            document_title: "t".into(),
            relevance_score: 0.5,
            chunks_used: 1,
            order: 0,
        }]);
        repo.append_message(message).await.unwrap();

        repo.delete_conversation(&conversation.id, "user-1")
            .await
            .unwrap();
        assert!(repo
            .get_conversation(&conversation.id, "user-1")
            .await
            .is_err());
        assert!(repo.list_messages(&conversation.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ingestion_status_mirror_round_trips() {
        let repo = repo().await;
        let conversation = repo
            .create_conversation("user-1", "Chat", vec![])
            .await
            .unwrap();
        repo.set_ingestion_status(&conversation.id, Some(IngestionStatus::Completed))
            .await
            .unwrap();
        let fetched = repo.get_conversation(&conversation.id, "user-1").await.unwrap();
        assert_eq!(fetched.ingestion_status, Some(IngestionStatus::Completed));
    }

    #[tokio::test]
    async fn documents_round_trip() {
        let repo = repo().await;
        let doc = DocumentRef {
            id: "10-K-0000320193-24-000123".into(),
            title: "aapl-20240928.htm".into(),
            scope: DocumentScope::Conversation {
                user: "user-1".into(),
                conversation: "conv-1".into(),
            },
            content_type: Some("text/html".into()),
            blob_path: Some("/staging/conv-1/raw/aapl-20240928.htm".into()),
            full_text: None,
        };
        repo.upsert_document(doc.clone()).await.unwrap();
        let fetched = repo.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(fetched, doc);
        assert!(repo.get_document("missing").await.unwrap().is_none());
    }
}

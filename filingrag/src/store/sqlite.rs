//! SQLite-backed vector store using the `sqlite-vec` extension.
//!
//! Vectors are stored as JSON float arrays and compared with
//! `vec_distance_cosine(vec_f32(...), vec_f32(...))`; similarity reported to
//! callers is `1 − distance`. Scope columns store absent components as empty
//! strings so the uniqueness constraint covers unscoped rows too.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::params;
use rustc_hash::FxHashMap;
use tokio_rusqlite::Connection;

use super::{EmbeddingUpsert, ScoredChunk, StoreError, StoredEmbedding, UpsertOutcome, VectorStore};
use crate::db::Database;
use crate::types::{EmbeddingOwner, EmbeddingScope};

fn hash_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

/// Map a connection error, singling out SQLite constraint violations so the
/// uniqueness invariant surfaces as its own error class.
fn store_err(err: tokio_rusqlite::Error) -> StoreError {
    if let tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(code, _)) = &err {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            return StoreError::UniquenessViolation(err.to_string());
        }
    }
    StoreError::Storage(err.to_string())
}

/// Pre-serialized upsert row, safe to move into the connection closure.
struct PreparedRow {
    owner: String,
    user_scope: String,
    conversation_scope: String,
    document_id: String,
    document_title: String,
    chunk_index: i64,
    chunk_hash: String,
    content: String,
    vector_json: String,
}

#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Connection,
}

impl SqliteVectorStore {
    pub fn new(db: &Database) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    fn prepare_rows(items: Vec<EmbeddingUpsert>) -> Result<Vec<PreparedRow>, StoreError> {
        items
            .into_iter()
            .map(|item| {
                let vector_json = serde_json::to_string(&item.vector)
                    .map_err(|err| StoreError::Encode(err.to_string()))?;
                Ok(PreparedRow {
                    owner: item.owner.encode().to_string(),
                    user_scope: item.scope.user.unwrap_or_default(),
                    conversation_scope: item.scope.conversation.unwrap_or_default(),
                    document_id: item.document_id,
                    document_title: item.document_title,
                    chunk_index: item.chunk_index as i64,
                    chunk_hash: item.chunk_hash,
                    content: item.text,
                    vector_json,
                })
            })
            .collect()
    }

    /// Shared upsert body. With `scope_in_key` the preload and update match
    /// on the full scope tuple; without it they match on `(owner, document)`
    /// only, which is the bulk corpus-load behavior.
    async fn upsert_grouped(
        &self,
        items: Vec<EmbeddingUpsert>,
        scope_in_key: bool,
    ) -> Result<UpsertOutcome, StoreError> {
        if items.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let rows = Self::prepare_rows(items)?;

        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut outcome = UpsertOutcome::default();

                let mut groups: BTreeMap<(String, String, String, String), Vec<usize>> =
                    BTreeMap::new();
                for (idx, row) in rows.iter().enumerate() {
                    let key = if scope_in_key {
                        (
                            row.owner.clone(),
                            row.user_scope.clone(),
                            row.conversation_scope.clone(),
                            row.document_id.clone(),
                        )
                    } else {
                        (
                            row.owner.clone(),
                            String::new(),
                            String::new(),
                            row.document_id.clone(),
                        )
                    };
                    groups.entry(key).or_default().push(idx);
                }

                for ((owner, user, conversation, document_id), indices) in groups {
                    let mut existing: FxHashMap<i64, String> = FxHashMap::default();
                    {
                        let (sql, bind_scope) = if scope_in_key {
                            (
                                "SELECT chunk_index, chunk_hash FROM embeddings \
                                 WHERE owner = ?1 AND user_scope = ?2 \
                                   AND conversation_scope = ?3 AND document_id = ?4",
                                true,
                            )
                        } else {
                            (
                                "SELECT chunk_index, chunk_hash FROM embeddings \
                                 WHERE owner = ?1 AND document_id = ?2",
                                false,
                            )
                        };
                        let mut stmt =
                            tx.prepare(sql).map_err(tokio_rusqlite::Error::Rusqlite)?;
                        let mapped = if bind_scope {
                            stmt.query_map(
                                params![owner, user, conversation, document_id],
                                hash_row,
                            )
                        } else {
                            stmt.query_map(params![owner, document_id], hash_row)
                        }
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                        for entry in mapped {
                            let (chunk_index, hash) =
                                entry.map_err(tokio_rusqlite::Error::Rusqlite)?;
                            existing.insert(chunk_index, hash);
                        }
                    }

                    for idx in indices {
                        let row = &rows[idx];
                        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
                        match existing.get(&row.chunk_index) {
                            Some(hash) if *hash == row.chunk_hash => {
                                outcome.unchanged += 1;
                            }
                            Some(_) => {
                                if scope_in_key {
                                    tx.execute(
                                        "UPDATE embeddings SET content = ?1, embedding = ?2, \
                                         document_title = ?3, chunk_hash = ?4, updated_at = ?5 \
                                         WHERE owner = ?6 AND user_scope = ?7 \
                                           AND conversation_scope = ?8 AND document_id = ?9 \
                                           AND chunk_index = ?10",
                                        params![
                                            row.content,
                                            row.vector_json,
                                            row.document_title,
                                            row.chunk_hash,
                                            now,
                                            row.owner,
                                            row.user_scope,
                                            row.conversation_scope,
                                            row.document_id,
                                            row.chunk_index,
                                        ],
                                    )
                                } else {
                                    tx.execute(
                                        "UPDATE embeddings SET content = ?1, embedding = ?2, \
                                         document_title = ?3, chunk_hash = ?4, updated_at = ?5 \
                                         WHERE owner = ?6 AND document_id = ?7 \
                                           AND chunk_index = ?8",
                                        params![
                                            row.content,
                                            row.vector_json,
                                            row.document_title,
                                            row.chunk_hash,
                                            now,
                                            row.owner,
                                            row.document_id,
                                            row.chunk_index,
                                        ],
                                    )
                                }
                                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                                outcome.updated += 1;
                            }
                            None => {
                                tx.execute(
                                    "INSERT INTO embeddings (owner, user_scope, \
                                     conversation_scope, document_id, document_title, \
                                     chunk_index, chunk_hash, content, embedding, \
                                     created_at, updated_at) \
                                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                                    params![
                                        row.owner,
                                        row.user_scope,
                                        row.conversation_scope,
                                        row.document_id,
                                        row.document_title,
                                        row.chunk_index,
                                        row.chunk_hash,
                                        row.content,
                                        row.vector_json,
                                        now,
                                        now,
                                    ],
                                )
                                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                                outcome.inserted += 1;
                            }
                        }
                    }
                }

                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(outcome)
            })
            .await
            .map_err(store_err)
    }

    async fn knn(
        &self,
        query: &[f32],
        owner: EmbeddingOwner,
        max_k: Option<usize>,
        min_similarity: f32,
        scope: Option<&EmbeddingScope>,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let query_json =
            serde_json::to_string(query).map_err(|err| StoreError::Encode(err.to_string()))?;
        let owner = owner.encode().to_string();
        let user = scope
            .and_then(|s| s.user.clone())
            .unwrap_or_default();
        let conversation = scope
            .and_then(|s| s.conversation.clone())
            .unwrap_or_default();
        let max_distance = f64::from(1.0 - min_similarity);
        // SQLite treats a negative LIMIT as "no limit".
        let limit = max_k.map(|k| k as i64).unwrap_or(-1);

        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT content, document_id, document_title, \
                         vec_distance_cosine(vec_f32(embedding), vec_f32(?1)) AS distance \
                         FROM embeddings \
                         WHERE owner = ?2 \
                           AND (?3 = '' OR user_scope = ?3) \
                           AND (?4 = '' OR conversation_scope = ?4) \
                           AND vec_distance_cosine(vec_f32(embedding), vec_f32(?1)) <= ?5 \
                         ORDER BY distance ASC, document_id ASC, content ASC \
                         LIMIT ?6",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let mapped = stmt
                    .query_map(
                        params![query_json, owner, user, conversation, max_distance, limit],
                        |row| {
                            let distance: f64 = row.get(3)?;
                            Ok(ScoredChunk {
                                text: row.get(0)?,
                                document_id: row.get(1)?,
                                document_title: row.get(2)?,
                                similarity: (1.0 - distance) as f32,
                            })
                        },
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let mut results = Vec::new();
                for row in mapped {
                    results.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(results)
            })
            .await
            .map_err(store_err)
    }

    /// Total stored rows; handy for tests and admin inspection.
    pub async fn count(&self) -> Result<usize, StoreError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(count as usize)
            })
            .await
            .map_err(store_err)
    }

    /// `(chunk_index, chunk_hash, updated_at)` per row of one document, in
    /// chunk order. The hash-gated upsert promises `updated_at` stays put for
    /// unchanged rows; this is how that promise is audited.
    pub async fn chunk_revisions(
        &self,
        document_id: &str,
    ) -> Result<Vec<(i64, String, String)>, StoreError> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT chunk_index, chunk_hash, updated_at FROM embeddings \
                         WHERE document_id = ?1 ORDER BY chunk_index ASC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mapped = stmt
                    .query_map(params![document_id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut out = Vec::new();
                for row in mapped {
                    out.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(out)
            })
            .await
            .map_err(store_err)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert_embeddings(
        &self,
        items: Vec<EmbeddingUpsert>,
    ) -> Result<UpsertOutcome, StoreError> {
        self.upsert_grouped(items, true).await
    }

    async fn upsert_document_embeddings(
        &self,
        items: Vec<EmbeddingUpsert>,
    ) -> Result<UpsertOutcome, StoreError> {
        self.upsert_grouped(items, false).await
    }

    async fn find_similar_all_system(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        self.knn(query, EmbeddingOwner::UserDocument, Some(top_k), -1.0, None)
            .await
    }

    async fn find_similar_in_conversation(
        &self,
        query: &[f32],
        scope: &EmbeddingScope,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        self.knn(
            query,
            EmbeddingOwner::UserDocument,
            Some(top_k),
            -1.0,
            Some(scope),
        )
        .await
    }

    async fn find_similar_adaptive(
        &self,
        query: &[f32],
        owner: EmbeddingOwner,
        max_k: Option<usize>,
        min_similarity: f32,
        scope: Option<&EmbeddingScope>,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        self.knn(query, owner, max_k, min_similarity, scope).await
    }

    async fn load_document_embeddings(
        &self,
        owner: EmbeddingOwner,
        scope: &EmbeddingScope,
        document_id: &str,
    ) -> Result<Vec<StoredEmbedding>, StoreError> {
        let owner = owner.encode().to_string();
        let user = scope.user.clone().unwrap_or_default();
        let conversation = scope.conversation.clone().unwrap_or_default();
        let document_id = document_id.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT document_id, document_title, chunk_index, content, embedding \
                         FROM embeddings \
                         WHERE owner = ?1 \
                           AND (?2 = '' OR user_scope = ?2) \
                           AND (?3 = '' OR conversation_scope = ?3) \
                           AND document_id = ?4 \
                         ORDER BY chunk_index ASC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mapped = stmt
                    .query_map(params![owner, user, conversation, document_id], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut raw = Vec::new();
                for row in mapped {
                    raw.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(raw)
            })
            .await
            .map_err(store_err)?
            .into_iter()
            .map(|(document_id, document_title, chunk_index, text, vector_json)| {
                let vector: Vec<f32> = serde_json::from_str(&vector_json)
                    .map_err(|err| StoreError::Storage(err.to_string()))?;
                Ok(StoredEmbedding {
                    document_id,
                    document_title,
                    chunk_index: chunk_index as usize,
                    text,
                    vector,
                })
            })
            .collect()
    }

    async fn delete_conversation_scope(
        &self,
        user: &str,
        conversation: &str,
    ) -> Result<usize, StoreError> {
        let user = user.to_string();
        let conversation = conversation.to_string();
        self.conn
            .call(move |conn| {
                let deleted = conn
                    .execute(
                        "DELETE FROM embeddings WHERE user_scope = ?1 AND conversation_scope = ?2",
                        params![user, conversation],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(deleted)
            })
            .await
            .map_err(store_err)
    }
}

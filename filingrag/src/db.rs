//! SQLite database handle shared by the vector store and the conversation
//! repository.
//!
//! The `sqlite-vec` extension is registered process-wide before the first
//! connection opens, so every connection (including in-memory test databases)
//! can evaluate `vec_distance_cosine`.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use tokio_rusqlite::{ffi, Connection};

use crate::store::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    ingestion_status TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_companies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    UNIQUE (conversation_id, position)
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages (conversation_id, created_at);

CREATE TABLE IF NOT EXISTS message_sources (
    message_id TEXT NOT NULL,
    ord INTEGER NOT NULL,
    document_id TEXT NOT NULL,
    document_title TEXT NOT NULL,
    relevance_score REAL NOT NULL,
    chunks_used INTEGER NOT NULL,
    PRIMARY KEY (message_id, ord)
);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content_type TEXT,
    blob_path TEXT,
    full_text TEXT,
    owner TEXT NOT NULL,
    user_scope TEXT NOT NULL DEFAULT '',
    conversation_scope TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    user_scope TEXT NOT NULL DEFAULT '',
    conversation_scope TEXT NOT NULL DEFAULT '',
    document_id TEXT NOT NULL,
    document_title TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    chunk_hash TEXT NOT NULL,
    content TEXT NOT NULL,
    embedding TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (owner, user_scope, conversation_scope, document_id, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_embeddings_scope_document
    ON embeddings (owner, user_scope, conversation_scope, document_id);
"#;

/// Shared handle over one SQLite file (or in-memory database).
///
/// `tokio_rusqlite::Connection` is internally a channel to a dedicated
/// thread, so clones of it serialize their statements — the repository and
/// the vector store share one.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| StoreError::Storage(err.to_string()))?;
        Self::initialize(conn).await
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        register_sqlite_vec()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| StoreError::Storage(err.to_string()))?;
        Self::initialize(conn).await
    }

    async fn initialize(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            // Fail fast if the vec extension did not load.
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            conn.execute_batch(SCHEMA)
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await
        .map_err(|err| StoreError::Storage(err.to_string()))?;
        Ok(Self { conn })
    }

    /// Clone of the underlying connection handle.
    pub fn connection(&self) -> Connection {
        self.conn.clone()
    }
}

fn register_sqlite_vec() -> Result<(), StoreError> {
    use std::sync::Mutex;

    static INIT: Once = Once::new();
    static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

    INIT.call_once(|| {
        let result = unsafe {
            type SqliteExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *mut c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn: SqliteExtensionInit =
                transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc != 0 {
                Err(format!("failed to register sqlite-vec extension (code {rc})"))
            } else {
                Ok(())
            }
        };
        *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
    });

    INIT_RESULT
        .lock()
        .expect("init result mutex poisoned")
        .clone()
        .expect("init was called but result not set")
        .map_err(StoreError::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_database_has_vec_extension() {
        let db = Database::open_in_memory().await.unwrap();
        let distance: f64 = db
            .connection()
            .call(|conn| {
                conn.query_row(
                    "select vec_distance_cosine(vec_f32('[1.0, 0.0]'), vec_f32('[0.0, 1.0]'))",
                    [],
                    |row| row.get(0),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .unwrap();
        assert!((distance - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn schema_applies_twice_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.sqlite");
        let _first = Database::open(&path).await.unwrap();
        let _second = Database::open(&path).await.unwrap();
    }
}

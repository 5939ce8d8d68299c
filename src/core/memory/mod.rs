//! Style memory: an append-only store of published posts, queryable by
//! channel, used to give generation prompts a stylistic anchor.
//!
//! Backed by SQLite with the sqlite-vec extension. The plain table is the
//! source of truth; the vec0 virtual table carries optional embeddings for
//! similarity recall and is strictly best-effort — a missing or failed
//! embedding never fails a write.

pub mod embeddings;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{Connection, ffi::sqlite3_auto_extension, params};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::error::{PipelineError, Result};
use crate::core::memory::embeddings::EmbeddingClient;
use crate::core::types::{Channel, StyleRecord};

pub const EMBEDDING_DIM: usize = 1536;

#[async_trait]
pub trait StyleMemory: Send + Sync {
    /// Text of the most recently remembered record for `channel`, by
    /// creation time. `None` when the channel has no history yet.
    async fn recall_latest(&self, channel: Channel) -> Result<Option<String>>;

    /// Append a published post. Called only after a successful publish;
    /// callers swallow failures (the publish and the acknowledgment stand).
    async fn remember(&self, record: StyleRecord) -> Result<()>;
}

fn load_vec_extension() {
    unsafe {
        sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(
                *mut rusqlite::ffi::sqlite3,
                *mut *mut std::os::raw::c_char,
                *const rusqlite::ffi::sqlite3_api_routines,
            ) -> std::os::raw::c_int,
        >(sqlite_vec::sqlite3_vec_init as *const ())));
    }
}

fn db_err(e: rusqlite::Error) -> PipelineError {
    PipelineError::StyleMemory(e.to_string())
}

pub struct VectorStyleMemory {
    db: Arc<Mutex<Connection>>,
    embedder: Option<EmbeddingClient>,
}

impl VectorStyleMemory {
    pub fn open<P: AsRef<Path>>(path: P, embedder: Option<EmbeddingClient>) -> Result<Self> {
        load_vec_extension();
        let db = Connection::open(path.as_ref()).map_err(db_err)?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS style_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                item_id TEXT NOT NULL,
                content TEXT NOT NULL,
                url TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(db_err)?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_style_records_channel_created
                ON style_records(channel, created_at)",
            [],
        )
        .map_err(db_err)?;
        db.execute(
            &format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS vss_style_records USING vec0(
                    embedding float[{}]
                )",
                EMBEDDING_DIM
            ),
            [],
        )
        .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            embedder,
        })
    }

    /// KNN lookup over remembered posts. Requires an embedding provider.
    #[allow(dead_code)]
    pub async fn find_similar(&self, text: &str, top_k: usize) -> Result<Vec<(String, f64)>> {
        let Some(embedder) = &self.embedder else {
            return Err(PipelineError::Unsupported(
                "similarity recall requires an embedding provider".to_string(),
            ));
        };
        let query = embedder.embed(text).await?;
        let query_json =
            serde_json::to_string(&query).map_err(|e| PipelineError::StyleMemory(e.to_string()))?;

        let db = self.db.lock().await;
        let mut stmt = db
            .prepare(
                "SELECT r.content, v.distance
                   FROM vss_style_records v
                   JOIN style_records r ON r.id = v.rowid
                  WHERE v.embedding MATCH ?1 AND k = ?2
                  ORDER BY v.distance",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![query_json, top_k as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })
            .map_err(db_err)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(db_err)?);
        }
        Ok(results)
    }
}

#[async_trait]
impl StyleMemory for VectorStyleMemory {
    async fn recall_latest(&self, channel: Channel) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare(
                "SELECT content FROM style_records
                  WHERE channel = ?1
                  ORDER BY created_at DESC, id DESC
                  LIMIT 1",
            )
            .map_err(db_err)?;
        let mut rows = stmt.query(params![channel.as_str()]).map_err(db_err)?;
        match rows.next().map_err(db_err)? {
            Some(row) => Ok(Some(row.get(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    async fn remember(&self, record: StyleRecord) -> Result<()> {
        // Embed outside the connection lock; failures only cost the
        // similarity index, never the record itself.
        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(&record.content).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    warn!("embedding skipped for item '{}': {}", record.item_id, e);
                    None
                }
            },
            None => None,
        };

        let doc_id = uuid::Uuid::new_v4().to_string();
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| PipelineError::StyleMemory(e.to_string()))?;

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO style_records (doc_id, channel, item_id, content, url, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                doc_id,
                record.channel.as_str(),
                record.item_id,
                record.content,
                record.url,
                metadata,
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        if let Some(vector) = embedding {
            let rowid = db.last_insert_rowid();
            let vector_json = serde_json::to_string(&vector)
                .map_err(|e| PipelineError::StyleMemory(e.to_string()))?;
            if let Err(e) = db.execute(
                "INSERT INTO vss_style_records (rowid, embedding) VALUES (?1, ?2)",
                params![rowid, vector_json],
            ) {
                warn!("embedding row insert failed for doc {}: {}", doc_id, e);
            }
        }

        info!(
            "Style record stored: doc={} channel={} item={}",
            doc_id, record.channel, record.item_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn record(channel: Channel, content: &str, hour: u32) -> StyleRecord {
        StyleRecord {
            channel,
            item_id: "job1".to_string(),
            content: content.to_string(),
            url: Some("https://example.test/1".to_string()),
            metadata: HashMap::new(),
            created_at: Utc.with_ymd_and_hms(2026, 8, 7, hour, 0, 0).unwrap(),
        }
    }

    fn open_memory() -> (tempfile::TempDir, VectorStyleMemory) {
        let dir = tempfile::tempdir().unwrap();
        let memory = VectorStyleMemory::open(dir.path().join("style.db"), None).unwrap();
        (dir, memory)
    }

    #[tokio::test]
    async fn recall_on_empty_store_is_none() {
        let (_dir, memory) = open_memory();
        assert!(memory.recall_latest(Channel::Vk).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remember_then_recall_round_trip() {
        let (_dir, memory) = open_memory();
        memory
            .remember(record(Channel::Vk, "first post", 9))
            .await
            .unwrap();
        let recalled = memory.recall_latest(Channel::Vk).await.unwrap();
        assert_eq!(recalled.as_deref(), Some("first post"));
    }

    #[tokio::test]
    async fn latest_is_by_creation_time_per_channel() {
        let (_dir, memory) = open_memory();
        memory.remember(record(Channel::Vk, "older", 8)).await.unwrap();
        memory.remember(record(Channel::Vk, "newer", 19)).await.unwrap();
        memory
            .remember(record(Channel::Telegram, "telegram only", 12))
            .await
            .unwrap();

        assert_eq!(
            memory.recall_latest(Channel::Vk).await.unwrap().as_deref(),
            Some("newer")
        );
        assert_eq!(
            memory
                .recall_latest(Channel::Telegram)
                .await
                .unwrap()
                .as_deref(),
            Some("telegram only")
        );
    }

    #[tokio::test]
    async fn find_similar_without_embedder_is_unsupported() {
        let (_dir, memory) = open_memory();
        let err = memory.find_similar("coffee", 3).await.unwrap_err();
        assert!(matches!(err, PipelineError::Unsupported(_)));
    }
}

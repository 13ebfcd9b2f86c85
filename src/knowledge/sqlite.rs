//! SQLite DocumentStore - rusqlite 기반 영속 저장소
//!
//! 저장 위치: ~/.civic-rag/knowledge.db
//!
//! - sources: 소스 문서 (메타데이터는 JSON, 임베딩은 f32 LE BLOB)
//! - chunks: 청크 (source_id, chunk_index 인덱스)
//! - conversations: 대화 턴 (scope 인덱스)

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::config::default_db_path;
use crate::error::{PipelineError, Result};

use super::store::{check_batch, DocumentStore, WriteOp, DEFAULT_MAX_BATCH_OPS};
use super::types::{Chunk, ConversationTurn, ProcessingStatus, SourceDocument};
use super::vector::{blob_to_vec, vec_to_blob};

const SOURCE_COLUMNS: &str =
    "id, scope, content, embedding, metadata, status, error_message, created_at, updated_at";

const CHUNK_COLUMNS: &str =
    "id, source_id, scope, chunk_index, content, embedding, token_estimate, created_at";

// ============================================================================
// SqliteStore
// ============================================================================

/// SQLite 문서 저장소
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    max_batch_ops: usize,
}

impl SqliteStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
            max_batch_ops: DEFAULT_MAX_BATCH_OPS,
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기본 위치에서 열기 (~/.civic-rag/knowledge.db)
    pub fn open_default() -> Result<Self> {
        Self::open(&default_db_path())
    }

    /// 커밋 상한 변경
    pub fn with_batch_limit(mut self, max_batch_ops: usize) -> Self {
        self.max_batch_ops = max_batch_ops;
        self
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PipelineError::Store(format!("Lock error: {}", e)))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                scope TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB,
                metadata TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sources_scope ON sources(scope);

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT NOT NULL UNIQUE,
                source_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                token_estimate INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_id, chunk_index);
            CREATE INDEX IF NOT EXISTS idx_chunks_scope ON chunks(scope);

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                scope TEXT NOT NULL,
                messages TEXT NOT NULL,
                sources_used TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_scope ON conversations(scope);
            "#,
        )?;

        tracing::debug!("Document store initialized at {:?}", self.db_path);
        Ok(())
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

/// sources 행 원본 값 (JSON 파싱 전)
struct SourceRow {
    id: String,
    scope: String,
    content: String,
    embedding: Option<Vec<u8>>,
    metadata: String,
    status: String,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SourceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            scope: row.get(1)?,
            content: row.get(2)?,
            embedding: row.get(3)?,
            metadata: row.get(4)?,
            status: row.get(5)?,
            error_message: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_source(self) -> Result<SourceDocument> {
        Ok(SourceDocument {
            id: self.id,
            scope: self.scope,
            content: self.content,
            embedding: self.embedding.as_deref().map(blob_to_vec),
            metadata: serde_json::from_str(&self.metadata)?,
            status: ProcessingStatus::parse(&self.status),
            error_message: self.error_message,
            created_at: parse_datetime(self.created_at),
            updated_at: parse_datetime(self.updated_at),
        })
    }
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    let embedding: Vec<u8> = row.get(5)?;
    Ok(Chunk {
        id: row.get(0)?,
        source_id: row.get(1)?,
        scope: row.get(2)?,
        chunk_index: row.get::<_, i64>(3)? as usize,
        content: row.get(4)?,
        embedding: blob_to_vec(&embedding),
        token_estimate: row.get::<_, i64>(6)? as usize,
        created_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

// ============================================================================
// DocumentStore Impl
// ============================================================================

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get_source(&self, id: &str) -> Result<Option<SourceDocument>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM sources WHERE id = ?1", SOURCE_COLUMNS);

        let row = conn
            .query_row(&sql, params![id], SourceRow::from_row)
            .optional()?;

        row.map(SourceRow::into_source).transpose()
    }

    async fn list_sources(&self, scope: &str) -> Result<Vec<SourceDocument>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM sources WHERE scope = ?1 ORDER BY created_at, id",
            SOURCE_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![scope], SourceRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(SourceRow::into_source).collect()
    }

    async fn list_chunks(&self, scope: &str) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM chunks WHERE scope = ?1 ORDER BY rowid",
            CHUNK_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let chunks = stmt
            .query_map(params![scope], chunk_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(chunks)
    }

    async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM chunks WHERE source_id = ?1 ORDER BY chunk_index",
            CHUNK_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let chunks = stmt
            .query_map(params![source_id], chunk_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(chunks)
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<()> {
        check_batch(&ops, self.max_batch_ops)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for op in &ops {
            match op {
                WriteOp::PutSource(source) => {
                    let metadata = serde_json::to_string(&source.metadata)?;
                    let embedding = source.embedding.as_deref().map(vec_to_blob);
                    tx.execute(
                        "INSERT INTO sources
                            (id, scope, content, embedding, metadata, status, error_message,
                             created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                         ON CONFLICT(id) DO UPDATE SET
                            scope = excluded.scope,
                            content = excluded.content,
                            embedding = excluded.embedding,
                            metadata = excluded.metadata,
                            status = excluded.status,
                            error_message = excluded.error_message,
                            updated_at = excluded.updated_at",
                        params![
                            source.id,
                            source.scope,
                            source.content,
                            embedding,
                            metadata,
                            source.status.as_str(),
                            source.error_message,
                            source.created_at.to_rfc3339(),
                            source.updated_at.to_rfc3339(),
                        ],
                    )?;
                }
                WriteOp::PutChunk(chunk) => {
                    tx.execute(
                        "INSERT OR REPLACE INTO chunks
                            (id, source_id, scope, chunk_index, content, embedding,
                             token_estimate, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            chunk.id,
                            chunk.source_id,
                            chunk.scope,
                            chunk.chunk_index as i64,
                            chunk.content,
                            vec_to_blob(&chunk.embedding),
                            chunk.token_estimate as i64,
                            chunk.created_at.to_rfc3339(),
                        ],
                    )?;
                }
                WriteOp::DeleteSource(id) => {
                    tx.execute("DELETE FROM sources WHERE id = ?1", params![id])?;
                }
                WriteOp::DeleteChunk(id) => {
                    tx.execute("DELETE FROM chunks WHERE id = ?1", params![id])?;
                }
                WriteOp::DeleteChunksOf(source_id) => {
                    tx.execute("DELETE FROM chunks WHERE source_id = ?1", params![source_id])?;
                }
            }
        }

        tx.commit()?;
        tracing::debug!("SQLite commit applied ({} ops)", ops.len());
        Ok(())
    }

    fn max_batch_ops(&self) -> usize {
        self.max_batch_ops
    }

    async fn append_conversation(&self, turn: &ConversationTurn) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO conversations (id, scope, messages, sources_used, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                turn.id,
                turn.scope,
                serde_json::to_string(&turn.messages)?,
                serde_json::to_string(&turn.sources_used)?,
                turn.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn list_conversations(
        &self,
        scope: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, scope, messages, sources_used, created_at FROM conversations
             WHERE scope = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![scope, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, scope, messages, sources_used, created_at)| {
                Ok(ConversationTurn {
                    id,
                    scope,
                    messages: serde_json::from_str(&messages)?,
                    sources_used: serde_json::from_str(&sources_used)?,
                    created_at: parse_datetime(created_at),
                })
            })
            .collect()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::types::{Message, SourceUsage};
    use crate::testing::{sample_chunk, sample_source};
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = SqliteStore::open(&db_path).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_and_get_source() {
        let (_dir, store) = create_test_store();
        let mut source = sample_source("villajoyosa", "Concierto de Jazz", 4);
        source.embedding = Some(vec![0.25, -0.5, 1.0]);
        let id = source.id.clone();

        store
            .commit(vec![WriteOp::PutSource(source.clone())])
            .await
            .unwrap();

        let loaded = store.get_source(&id).await.unwrap().unwrap();
        assert_eq!(loaded.metadata, source.metadata);
        assert_eq!(loaded.embedding, Some(vec![0.25, -0.5, 1.0]));
        assert_eq!(loaded.status, ProcessingStatus::Pending);

        assert!(store.get_source("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let (_dir, store) = create_test_store();
        let source = sample_source("villajoyosa", "Concierto", 4);
        store
            .commit(vec![WriteOp::PutSource(source.clone())])
            .await
            .unwrap();

        let mut updated = source.clone();
        updated.status = ProcessingStatus::Embedded;
        updated.content = "actualizado".into();
        updated.created_at = source.created_at + chrono::Duration::days(1);
        store.commit(vec![WriteOp::PutSource(updated)]).await.unwrap();

        let sources = store.list_sources("villajoyosa").await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].content, "actualizado");
        assert_eq!(sources[0].status, ProcessingStatus::Embedded);
        assert_eq!(
            sources[0].created_at.timestamp(),
            source.created_at.timestamp()
        );
    }

    #[tokio::test]
    async fn test_chunks_roundtrip_and_delete() {
        let (_dir, store) = create_test_store();
        let source = sample_source("villajoyosa", "Teatro", 2);
        let sid = source.id.clone();

        store
            .commit(vec![
                WriteOp::PutSource(source),
                WriteOp::PutChunk(sample_chunk(&sid, "villajoyosa", 0, vec![1.0, 0.0, 0.0])),
                WriteOp::PutChunk(sample_chunk(&sid, "villajoyosa", 1, vec![0.0, 1.0, 0.0])),
            ])
            .await
            .unwrap();

        let chunks = store.chunks_for_source(&sid).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].embedding, vec![0.0, 1.0, 0.0]);
        assert_eq!(store.list_chunks("villajoyosa").await.unwrap().len(), 2);
        assert!(store.list_chunks("benidorm").await.unwrap().is_empty());

        store
            .commit(vec![
                WriteOp::DeleteChunksOf(sid.clone()),
                WriteOp::DeleteSource(sid.clone()),
            ])
            .await
            .unwrap();

        assert!(store.chunks_for_source(&sid).await.unwrap().is_empty());
        assert!(store.get_source(&sid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_limit() {
        let (_dir, store) = create_test_store();
        let store = store.with_batch_limit(1);

        let result = store
            .commit(vec![
                WriteOp::DeleteSource("a".into()),
                WriteOp::DeleteSource("b".into()),
            ])
            .await;

        assert!(matches!(
            result,
            Err(PipelineError::BatchTooLarge { ops: 2, limit: 1 })
        ));
    }

    #[tokio::test]
    async fn test_conversations() {
        let (_dir, store) = create_test_store();
        let turn = ConversationTurn {
            id: "turn-1".into(),
            scope: "villajoyosa".into(),
            messages: vec![
                Message::user("¿Qué hay este fin de semana?"),
                Message::assistant("Hay un concierto."),
            ],
            sources_used: vec![SourceUsage {
                source_id: "event-x".into(),
                similarity: 0.82,
                preview: "Concierto...".into(),
            }],
            created_at: Utc::now(),
        };

        store.append_conversation(&turn).await.unwrap();

        let turns = store.list_conversations("villajoyosa", 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].messages, turn.messages);
        assert_eq!(turns[0].sources_used, turn.sources_used);

        // 추가 전용: 같은 ID 재삽입은 실패
        assert!(store.append_conversation(&turn).await.is_err());
    }

    #[tokio::test]
    async fn test_stats_by_status() {
        let (_dir, store) = create_test_store();
        let a = sample_source("villajoyosa", "A", 1);
        let mut b = sample_source("villajoyosa", "B", 2);
        b.status = ProcessingStatus::Embedded;
        b.embedding = Some(vec![1.0]);
        let mut c = sample_source("villajoyosa", "C", 3);
        c.status = ProcessingStatus::Error;

        store
            .commit(vec![
                WriteOp::PutSource(a),
                WriteOp::PutSource(b),
                WriteOp::PutSource(c),
            ])
            .await
            .unwrap();

        let stats = store.stats("villajoyosa").await.unwrap();
        assert_eq!(stats.total_sources, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.embedded, 1);
        assert_eq!(stats.error, 1);
        assert_eq!(stats.with_embeddings, 1);
    }
}

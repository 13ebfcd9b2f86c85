//! In-memory DocumentStore - 테스트 및 임시 실행용 백엔드
//!
//! `HashMap`과 `Vec`을 `std::sync::RwLock` 뒤에 두고 사용합니다.
//! 커밋은 쓰기 잠금 하나 안에서 적용되므로 원자적입니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{PipelineError, Result};

use super::store::{check_batch, DocumentStore, WriteOp, DEFAULT_MAX_BATCH_OPS};
use super::types::{Chunk, ConversationTurn, SourceDocument};

#[derive(Default)]
struct State {
    sources: HashMap<String, SourceDocument>,
    /// 삽입 순서 = 생성 순서
    chunks: Vec<Chunk>,
    conversations: Vec<ConversationTurn>,
}

/// 인메모리 저장소
pub struct InMemoryStore {
    state: RwLock<State>,
    max_batch_ops: usize,
    commits: AtomicUsize,
    fail_conversations: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_batch_limit(DEFAULT_MAX_BATCH_OPS)
    }

    /// 커밋 상한을 지정하여 생성
    pub fn with_batch_limit(max_batch_ops: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            max_batch_ops,
            commits: AtomicUsize::new(0),
            fail_conversations: AtomicBool::new(false),
        }
    }

    /// 지금까지 성공한 커밋 수
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// 대화 저장을 실패시키기 (저장 실패 경로 확인용)
    pub fn set_fail_conversations(&self, fail: bool) {
        self.fail_conversations.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|e| PipelineError::Store(format!("Lock error: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|e| PipelineError::Store(format!("Lock error: {}", e)))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_source(&self, id: &str) -> Result<Option<SourceDocument>> {
        Ok(self.read()?.sources.get(id).cloned())
    }

    async fn list_sources(&self, scope: &str) -> Result<Vec<SourceDocument>> {
        let state = self.read()?;
        let mut sources: Vec<SourceDocument> = state
            .sources
            .values()
            .filter(|s| s.scope == scope)
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sources)
    }

    async fn list_chunks(&self, scope: &str) -> Result<Vec<Chunk>> {
        let state = self.read()?;
        Ok(state
            .chunks
            .iter()
            .filter(|c| c.scope == scope)
            .cloned()
            .collect())
    }

    async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<Chunk>> {
        let state = self.read()?;
        let mut chunks: Vec<Chunk> = state
            .chunks
            .iter()
            .filter(|c| c.source_id == source_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<()> {
        check_batch(&ops, self.max_batch_ops)?;

        let mut state = self.write()?;
        for op in ops {
            match op {
                WriteOp::PutSource(mut source) => {
                    if let Some(existing) = state.sources.get(&source.id) {
                        source.created_at = existing.created_at;
                    }
                    state.sources.insert(source.id.clone(), source);
                }
                WriteOp::PutChunk(chunk) => {
                    state.chunks.retain(|c| c.id != chunk.id);
                    state.chunks.push(chunk);
                }
                WriteOp::DeleteSource(id) => {
                    state.sources.remove(&id);
                }
                WriteOp::DeleteChunk(id) => {
                    state.chunks.retain(|c| c.id != id);
                }
                WriteOp::DeleteChunksOf(source_id) => {
                    state.chunks.retain(|c| c.source_id != source_id);
                }
            }
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn max_batch_ops(&self) -> usize {
        self.max_batch_ops
    }

    async fn append_conversation(&self, turn: &ConversationTurn) -> Result<()> {
        if self.fail_conversations.load(Ordering::SeqCst) {
            return Err(PipelineError::Store(
                "conversation collection unavailable".into(),
            ));
        }
        self.write()?.conversations.push(turn.clone());
        Ok(())
    }

    async fn list_conversations(
        &self,
        scope: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let state = self.read()?;
        Ok(state
            .conversations
            .iter()
            .rev()
            .filter(|t| t.scope == scope)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

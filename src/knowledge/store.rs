//! Document Store - 저장소 추상화
//!
//! 소스 문서, 청크, 대화 기록을 영속화하는 비동기 트레이트입니다.
//! 파이프라인은 이 트레이트에만 의존하므로 SQLite 백엔드와
//! 인메모리 백엔드를 교체할 수 있습니다.
//!
//! | 연산 | 설명 |
//! |------|------|
//! | `get_source` | ID로 소스 조회 |
//! | `list_sources` | 스코프의 모든 소스 (생성 순) |
//! | `list_chunks` | 스코프의 모든 청크 (생성 순) |
//! | `chunks_for_source` | 소스의 청크 (chunk_index 순) |
//! | `commit` | 쓰기 연산 묶음을 원자적으로 적용 |
//! | `append_conversation` | 대화 턴 추가 |
//! | `list_conversations` | 최신 대화 턴부터 조회 |

use async_trait::async_trait;

use crate::error::{PipelineError, Result};

use super::types::{Chunk, ConversationTurn, ProcessingStatus, ScopeStats, SourceDocument};

/// 커밋당 기본 최대 연산 수
pub const DEFAULT_MAX_BATCH_OPS: usize = 500;

// ============================================================================
// Write Operations
// ============================================================================

/// 커밋 단위의 쓰기 연산
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// 소스 upsert (같은 ID면 제자리 갱신, created_at 유지)
    PutSource(SourceDocument),
    /// 청크 upsert
    PutChunk(Chunk),
    /// 소스 삭제
    DeleteSource(String),
    /// 청크 하나 삭제
    DeleteChunk(String),
    /// 소스에 속한 청크 전체 삭제
    DeleteChunksOf(String),
}

impl WriteOp {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PutSource(_) => "put_source",
            Self::PutChunk(_) => "put_chunk",
            Self::DeleteSource(_) => "delete_source",
            Self::DeleteChunk(_) => "delete_chunk",
            Self::DeleteChunksOf(_) => "delete_chunks_of",
        }
    }
}

/// 커밋 크기 검사
pub fn check_batch(ops: &[WriteOp], limit: usize) -> Result<()> {
    if ops.len() > limit {
        return Err(PipelineError::BatchTooLarge {
            ops: ops.len(),
            limit,
        });
    }
    Ok(())
}

// ============================================================================
// DocumentStore Trait
// ============================================================================

/// 문서 저장소 트레이트 (async)
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// ID로 소스 조회
    async fn get_source(&self, id: &str) -> Result<Option<SourceDocument>>;

    /// 스코프의 소스 목록 (생성 순)
    async fn list_sources(&self, scope: &str) -> Result<Vec<SourceDocument>>;

    /// 스코프의 청크 목록 (생성 순)
    async fn list_chunks(&self, scope: &str) -> Result<Vec<Chunk>>;

    /// 소스의 청크 목록 (chunk_index 순)
    async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<Chunk>>;

    /// 쓰기 연산 적용
    ///
    /// 모두 적용되거나 하나도 적용되지 않습니다.
    /// `max_batch_ops()`를 넘으면 `BatchTooLarge`를 반환합니다.
    async fn commit(&self, ops: Vec<WriteOp>) -> Result<()>;

    /// 커밋당 최대 연산 수
    fn max_batch_ops(&self) -> usize {
        DEFAULT_MAX_BATCH_OPS
    }

    /// 대화 턴 추가
    async fn append_conversation(&self, turn: &ConversationTurn) -> Result<()>;

    /// 스코프의 대화 목록 (최신순)
    async fn list_conversations(&self, scope: &str, limit: usize)
        -> Result<Vec<ConversationTurn>>;

    /// 스코프 통계
    async fn stats(&self, scope: &str) -> Result<ScopeStats> {
        let sources = self.list_sources(scope).await?;
        let total_chunks = self.list_chunks(scope).await?.len();

        let mut stats = ScopeStats {
            total_sources: sources.len(),
            total_chunks,
            ..Default::default()
        };

        for source in &sources {
            match source.status {
                ProcessingStatus::Pending => stats.pending += 1,
                ProcessingStatus::Embedded => stats.embedded += 1,
                ProcessingStatus::Error => stats.error += 1,
            }
            if source.embedding.is_some() {
                stats.with_embeddings += 1;
            }
        }

        Ok(stats)
    }
}

// ============================================================================
// Grouped Commits
// ============================================================================

/// 분할 커밋 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub commits: usize,
    pub ops: usize,
}

/// 연산 그룹을 배치 상한 이하의 커밋으로 나눠 순차 적용
///
/// 한 그룹(보통 소스 하나와 그 청크들)은 가능한 한 같은 커밋에 들어갑니다.
/// 그룹 자체가 상한을 넘을 때만 그룹을 쪼갭니다.
pub async fn commit_grouped(
    store: &dyn DocumentStore,
    groups: Vec<Vec<WriteOp>>,
    limit: usize,
) -> Result<CommitReport> {
    let limit = limit.min(store.max_batch_ops()).max(1);
    let mut report = CommitReport::default();
    let mut pending: Vec<WriteOp> = Vec::new();

    for group in groups {
        if group.is_empty() {
            continue;
        }

        if !pending.is_empty() && pending.len() + group.len() > limit {
            flush(store, &mut pending, &mut report).await?;
        }

        if group.len() > limit {
            tracing::debug!(
                "Splitting oversized write group of {} ops (limit {})",
                group.len(),
                limit
            );
            let mut group = group;
            while !group.is_empty() {
                let rest = group.split_off(group.len().min(limit));
                pending = group;
                flush(store, &mut pending, &mut report).await?;
                group = rest;
            }
        } else {
            pending.extend(group);
        }
    }

    if !pending.is_empty() {
        flush(store, &mut pending, &mut report).await?;
    }

    Ok(report)
}

async fn flush(
    store: &dyn DocumentStore,
    pending: &mut Vec<WriteOp>,
    report: &mut CommitReport,
) -> Result<()> {
    let ops = std::mem::take(pending);
    let count = ops.len();
    store.commit(ops).await?;
    report.commits += 1;
    report.ops += count;
    tracing::debug!("Committed batch #{} ({} ops)", report.commits, count);
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::memory::InMemoryStore;
    use crate::testing::sample_source;

    fn delete_group(n: usize) -> Vec<WriteOp> {
        (0..n)
            .map(|i| WriteOp::DeleteChunk(format!("c{}", i)))
            .collect()
    }

    #[test]
    fn test_check_batch() {
        assert!(check_batch(&delete_group(3), 3).is_ok());
        assert!(matches!(
            check_batch(&delete_group(4), 3),
            Err(PipelineError::BatchTooLarge { ops: 4, limit: 3 })
        ));
    }

    #[tokio::test]
    async fn test_commit_grouped_packs_groups() {
        let store = InMemoryStore::with_batch_limit(5);

        // 3 + 2 → 한 커밋, 4 → 다음 커밋
        let groups = vec![delete_group(3), delete_group(2), delete_group(4)];
        let report = commit_grouped(&store, groups, 500).await.unwrap();

        assert_eq!(report, CommitReport { commits: 2, ops: 9 });
        assert_eq!(store.commit_count(), 2);
    }

    #[tokio::test]
    async fn test_commit_grouped_splits_oversized_group() {
        let store = InMemoryStore::with_batch_limit(4);

        let report = commit_grouped(&store, vec![delete_group(10)], 500)
            .await
            .unwrap();

        assert_eq!(report.commits, 3);
        assert_eq!(report.ops, 10);
    }

    #[tokio::test]
    async fn test_commit_grouped_1200_ops_at_500() {
        let store = InMemoryStore::new();
        let groups: Vec<Vec<WriteOp>> = (0..600).map(|_| delete_group(2)).collect();

        let report = commit_grouped(&store, groups, 500).await.unwrap();

        assert_eq!(report.ops, 1200);
        assert_eq!(report.commits, 3);
    }

    #[tokio::test]
    async fn test_default_stats() {
        let store = InMemoryStore::new();
        let source = sample_source("villajoyosa", "Concierto", 3);
        store
            .commit(vec![WriteOp::PutSource(source)])
            .await
            .unwrap();

        let stats = store.stats("villajoyosa").await.unwrap();
        assert_eq!(stats.total_sources, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.with_embeddings, 0);

        let other = store.stats("benidorm").await.unwrap();
        assert_eq!(other.total_sources, 0);
    }
}

//! Vector Search - 브루트포스 코사인 유사도 검색
//!
//! 스코프 안의 모든 청크 임베딩을 읽어 선형 탐색합니다 (O(n)).
//! 청크 수가 많아지면 ANN 인덱스가 필요하지만, 현재는 정확도와
//! 테스트 용이성을 위해 전수 비교를 유지합니다.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{PipelineError, Result};

use super::store::DocumentStore;
use super::types::Chunk;

// ============================================================================
// Types
// ============================================================================

/// 유사도가 매겨진 청크
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub similarity: f32,
}

// ============================================================================
// SimilaritySearch
// ============================================================================

/// 유사도 검색기
pub struct SimilaritySearch {
    store: Arc<dyn DocumentStore>,
}

impl SimilaritySearch {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// 벡터 검색
    ///
    /// 유사도 ≥ `threshold`인 청크를 유사도 내림차순으로 최대 `limit`개 반환합니다.
    /// 동점이면 먼저 생성된 청크가 앞에 옵니다.
    ///
    /// # Errors
    /// 청크 임베딩 차원이 쿼리와 다르면 `DimensionMismatch`
    pub async fn search(
        &self,
        scope: &str,
        query_embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let chunks = self.store.list_chunks(scope).await?;
        let total = chunks.len();

        let ranked = rank_chunks(chunks, query_embedding, threshold, limit)?;

        tracing::debug!(
            "Vector search in '{}': {} chunks scanned, {} above {:.2}",
            scope,
            total,
            ranked.len(),
            threshold
        );

        Ok(ranked)
    }
}

/// 청크 목록을 쿼리와 비교하여 순위화
///
/// `chunks`는 생성 순서여야 합니다 (안정 정렬로 동점 순서 유지).
pub fn rank_chunks(
    chunks: Vec<Chunk>,
    query_embedding: &[f32],
    threshold: f32,
    limit: usize,
) -> Result<Vec<ScoredChunk>> {
    let mut scored = Vec::new();

    for chunk in chunks {
        if chunk.embedding.len() != query_embedding.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: query_embedding.len(),
                actual: chunk.embedding.len(),
            });
        }

        let similarity = cosine_similarity(query_embedding, &chunk.embedding);
        if similarity >= threshold {
            scored.push(ScoredChunk { chunk, similarity });
        }
    }

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    scored.truncate(limit);

    Ok(scored)
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 두 벡터 간의 코사인 유사도를 계산합니다.
/// 결과는 -1.0 ~ 1.0 범위입니다. 어느 한쪽의 크기가 0이면 0.0입니다.
///
/// # Arguments
/// * `a` - 첫 번째 벡터
/// * `b` - 두 번째 벡터
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// f32 벡터 → little-endian BLOB
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// little-endian BLOB → f32 벡터
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

//! 하이브리드 검색 - 벡터 + 키워드 점수 융합
//!
//! 벡터 검색(limit × 2)과 키워드 점수를 병렬로 구한 뒤 소스 ID 기준으로 합칩니다.
//!
//! 융합 점수 = 벡터 유사도 + 0.5 × 키워드 점수 (없는 쪽은 0)
//!
//! | 발견 위치 | 태그 | 점수 |
//! |-----------|------|------|
//! | 벡터만 | vectorial | v |
//! | 키워드만 | textual | 0.5·t |
//! | 양쪽 | hybrid | v + 0.5·t |

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::SearchConfig;
use crate::embedding::EmbeddingClient;
use crate::error::Result;

use super::store::DocumentStore;
use super::types::{SearchMethod, SearchResult, SourceDocument, SourceSnapshot};
use super::vector::{ScoredChunk, SimilaritySearch};

/// 키워드 점수 가중치
pub const TEXT_WEIGHT: f32 = 0.5;

// ============================================================================
// Types
// ============================================================================

/// 벡터 검색 결과 (소스당 최고 청크 하나)
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub source_id: String,
    pub chunk_id: String,
    pub content: String,
    pub similarity: f32,
    pub source: SourceSnapshot,
}

/// 키워드 검색 결과
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub source_id: String,
    pub content: String,
    pub score: f32,
    pub source: SourceSnapshot,
}

// ============================================================================
// Keyword Scoring
// ============================================================================

/// 키워드 점수 계산
///
/// 쿼리를 소문자로 바꿔 공백 기준으로 나누고, 각 소스에 대해
/// `(본문 일치 수 + 2 × 제목 일치 수) / 쿼리 토큰 수`를 구합니다.
/// 0보다 큰 점수만 남겨 내림차순으로 최대 `limit`개 반환합니다.
pub fn keyword_scores(query: &str, sources: &[SourceDocument], limit: usize) -> Vec<KeywordHit> {
    let lowered = query.to_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();
    if tokens.is_empty() || limit == 0 {
        return vec![];
    }

    let mut hits: Vec<KeywordHit> = sources
        .iter()
        .filter_map(|source| {
            let content = source.content.to_lowercase();
            let title = source.metadata.title.to_lowercase();

            let content_matches = tokens.iter().filter(|t| content.contains(*t)).count();
            let title_matches = tokens.iter().filter(|t| title.contains(*t)).count();

            let score = (content_matches + 2 * title_matches) as f32 / tokens.len() as f32;
            (score > 0.0).then(|| KeywordHit {
                source_id: source.id.clone(),
                content: source.content.clone(),
                score,
                source: source.snapshot(),
            })
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    hits.truncate(limit);
    hits
}

/// 청크 단위 벡터 결과를 소스 단위로 축약 (소스당 최고 유사도 청크)
///
/// 입력이 유사도 내림차순이므로 처음 등장한 청크가 최고 점수입니다.
/// 소스가 없는 청크는 건너뜁니다.
pub fn collapse_by_source(
    scored: Vec<ScoredChunk>,
    sources: &HashMap<String, SourceSnapshot>,
) -> Vec<VectorHit> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut hits = Vec::new();

    for item in scored {
        let source_id = item.chunk.source_id.clone();
        if seen.contains(&source_id) {
            continue;
        }

        let Some(snapshot) = sources.get(&source_id) else {
            tracing::warn!("Chunk {} has no source document, skipping", item.chunk.id);
            continue;
        };

        seen.insert(source_id.clone());
        hits.push(VectorHit {
            source_id,
            chunk_id: item.chunk.id,
            content: item.chunk.content,
            similarity: item.similarity,
            source: snapshot.clone(),
        });
    }

    hits
}

// ============================================================================
// Fusion
// ============================================================================

/// 벡터 결과와 키워드 결과를 소스 ID 기준으로 융합
///
/// 융합 점수 내림차순으로 정렬하며 동점이면 먼저 들어온 항목이 앞섭니다.
pub fn fuse(vector: Vec<VectorHit>, keyword: Vec<KeywordHit>, limit: usize) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = Vec::with_capacity(vector.len() + keyword.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for hit in vector {
        if index.contains_key(&hit.source_id) {
            continue;
        }
        index.insert(hit.source_id.clone(), results.len());
        results.push(SearchResult {
            source_id: hit.source_id,
            chunk_id: Some(hit.chunk_id),
            content: hit.content,
            vector_similarity: Some(hit.similarity),
            text_score: None,
            fused_score: hit.similarity,
            method: SearchMethod::Vectorial,
            source: hit.source,
        });
    }

    for hit in keyword {
        match index.get(&hit.source_id) {
            Some(&i) => {
                let entry = &mut results[i];
                if entry.text_score.is_some() {
                    continue;
                }
                let v = entry.vector_similarity.unwrap_or(0.0);
                entry.text_score = Some(hit.score);
                entry.fused_score = v + TEXT_WEIGHT * hit.score;
                entry.method = SearchMethod::Hybrid;
            }
            None => {
                index.insert(hit.source_id.clone(), results.len());
                results.push(SearchResult {
                    source_id: hit.source_id,
                    chunk_id: None,
                    content: hit.content,
                    vector_similarity: None,
                    text_score: Some(hit.score),
                    fused_score: TEXT_WEIGHT * hit.score,
                    method: SearchMethod::Textual,
                    source: hit.source,
                });
            }
        }
    }

    results.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(Ordering::Equal)
    });
    results.truncate(limit);
    results
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
pub struct HybridRetriever {
    store: Arc<dyn DocumentStore>,
    vector: SimilaritySearch,
    embedder: Arc<EmbeddingClient>,
    config: SearchConfig,
}

impl HybridRetriever {
    /// 새 하이브리드 검색기 생성
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<EmbeddingClient>,
        config: SearchConfig,
    ) -> Self {
        Self {
            vector: SimilaritySearch::new(store.clone()),
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// 하이브리드 검색
    ///
    /// `SearchConfig::hybrid`가 false면 키워드 점수 없이 벡터 결과만 반환합니다.
    ///
    /// # Arguments
    /// * `scope` - 검색 범위 (도시)
    /// * `query` - 검색 쿼리
    /// * `limit` - 최대 결과 수
    pub async fn search(&self, scope: &str, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(vec![]);
        }

        let vector_task = async {
            let query_embedding = self.embedder.embed_query(query).await?;
            self.vector
                .search(
                    scope,
                    &query_embedding,
                    self.config.similarity_threshold,
                    limit * 2,
                )
                .await
        };

        let keyword_task = async {
            let sources = self.store.list_sources(scope).await?;
            let hits = if self.config.hybrid {
                keyword_scores(query, &sources, limit)
            } else {
                Vec::new()
            };
            let snapshots: HashMap<String, SourceSnapshot> = sources
                .iter()
                .map(|s| (s.id.clone(), s.snapshot()))
                .collect();
            Ok::<_, crate::error::PipelineError>((hits, snapshots))
        };

        let (scored, keyword) = tokio::join!(vector_task, keyword_task);
        let scored = scored?;
        let (keyword_hits, snapshots) = keyword?;

        let vector_hits = collapse_by_source(scored, &snapshots);

        tracing::debug!(
            "Hybrid search '{}': {} vector sources, {} keyword sources",
            query,
            vector_hits.len(),
            keyword_hits.len()
        );

        Ok(fuse(vector_hits, keyword_hits, limit))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::memory::InMemoryStore;
    use crate::knowledge::store::WriteOp;
    use crate::testing::{sample_chunk, sample_source, KeywordEmbedder};

    fn vhit(id: &str, similarity: f32) -> VectorHit {
        VectorHit {
            source_id: id.into(),
            chunk_id: format!("{}_chunk_0", id),
            content: format!("chunk of {}", id),
            similarity,
            source: SourceSnapshot::default(),
        }
    }

    fn khit(id: &str, score: f32) -> KeywordHit {
        KeywordHit {
            source_id: id.into(),
            content: format!("content of {}", id),
            score,
            source: SourceSnapshot::default(),
        }
    }

    #[test]
    fn test_fuse_ranking() {
        let results = fuse(
            vec![vhit("A", 0.8), vhit("C", 0.5)],
            vec![khit("B", 0.6), khit("C", 0.4)],
            10,
        );

        let order: Vec<(&str, f32)> = results
            .iter()
            .map(|r| (r.source_id.as_str(), r.fused_score))
            .collect();

        assert_eq!(order.len(), 3);
        assert_eq!(order[0].0, "A");
        assert!((order[0].1 - 0.8).abs() < 1e-6);
        assert_eq!(order[1].0, "C");
        assert!((order[1].1 - 0.7).abs() < 1e-6);
        assert_eq!(order[2].0, "B");
        assert!((order[2].1 - 0.3).abs() < 1e-6);

        assert_eq!(results[0].method, SearchMethod::Vectorial);
        assert_eq!(results[1].method, SearchMethod::Hybrid);
        assert_eq!(results[2].method, SearchMethod::Textual);
        assert_eq!(results[1].chunk_id.as_deref(), Some("C_chunk_0"));
    }

    #[test]
    fn test_fuse_both_never_below_vector_only() {
        for (v, t) in [(0.9, 0.0), (0.1, 3.0), (-0.2, 0.5)] {
            let results = fuse(vec![vhit("X", v)], vec![khit("X", t)], 1);
            let fused = results[0].fused_score;
            assert!((fused - (v + 0.5 * t)).abs() < 1e-6);
            assert!(fused >= v);
        }
    }

    #[test]
    fn test_fuse_truncates() {
        let results = fuse(
            vec![vhit("A", 0.9), vhit("B", 0.8), vhit("C", 0.7)],
            vec![],
            2,
        );
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_keyword_scores() {
        let mut concert = sample_source("villajoyosa", "Concierto de jazz", 3);
        concert.content = "Concierto de jazz en la plaza mayor".into();
        let mut theatre = sample_source("villajoyosa", "Teatro infantil", 3);
        theatre.content = "Obra de teatro para familias en la plaza".into();
        let sources = vec![concert, theatre];

        let hits = keyword_scores("JAZZ plaza", &sources, 5);

        assert_eq!(hits.len(), 2);
        // jazz: 본문+제목, plaza: 본문 → (2 + 2) / 2 = 2.0
        assert_eq!(hits[0].source.title, "Concierto de jazz");
        assert!((hits[0].score - 2.0).abs() < 1e-6);
        // plaza: 본문만 → 1 / 2
        assert!((hits[1].score - 0.5).abs() < 1e-6);

        assert!(keyword_scores("   ", &sources, 5).is_empty());
        assert!(keyword_scores("karaoke", &sources, 5).is_empty());
    }

    #[test]
    fn test_collapse_keeps_best_chunk() {
        let mut snapshots = HashMap::new();
        snapshots.insert("s1".to_string(), SourceSnapshot::default());

        let scored = vec![
            ScoredChunk {
                chunk: sample_chunk("s1", "x", 1, vec![1.0]),
                similarity: 0.9,
            },
            ScoredChunk {
                chunk: sample_chunk("s1", "x", 0, vec![1.0]),
                similarity: 0.8,
            },
            ScoredChunk {
                chunk: sample_chunk("orphan", "x", 0, vec![1.0]),
                similarity: 0.7,
            },
        ];

        let hits = collapse_by_source(scored, &snapshots);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "s1_chunk_1");
    }

    #[tokio::test]
    async fn test_retriever_search() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(EmbeddingClient::new(
            Arc::new(KeywordEmbedder::new()),
            Default::default(),
        ));

        let mut concert = sample_source("villajoyosa", "Concierto de jazz", 3);
        concert.content = "Concierto de jazz en la plaza".into();
        let cid = concert.id.clone();
        let chunk_vec = embedder.embed_all(&[concert.content.clone()]).await.unwrap();
        let chunk = sample_chunk(&cid, "villajoyosa", 0, chunk_vec[0].clone());

        store
            .commit(vec![WriteOp::PutSource(concert), WriteOp::PutChunk(chunk)])
            .await
            .unwrap();

        let config = SearchConfig {
            similarity_threshold: 0.1,
            top_k: 3,
            hybrid: true,
        };
        let retriever = HybridRetriever::new(store, embedder, config);

        let results = retriever
            .search("villajoyosa", "concierto jazz", 3)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id, cid);
        assert_eq!(results[0].method, SearchMethod::Hybrid);

        let empty = retriever.search("benidorm", "concierto", 3).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_retriever_vector_only() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(EmbeddingClient::new(
            Arc::new(KeywordEmbedder::new()),
            Default::default(),
        ));

        let mut concert = sample_source("villajoyosa", "Concierto de jazz", 3);
        concert.content = "Concierto de jazz en la plaza".into();
        let cid = concert.id.clone();
        let chunk_vec = embedder.embed_all(&[concert.content.clone()]).await.unwrap();
        let chunk = sample_chunk(&cid, "villajoyosa", 0, chunk_vec[0].clone());

        // 청크가 없어 키워드로만 찾을 수 있는 소스
        let mut theatre = sample_source("villajoyosa", "Teatro", 4);
        theatre.content = "Concierto de jazz para niños".into();

        store
            .commit(vec![
                WriteOp::PutSource(concert),
                WriteOp::PutChunk(chunk),
                WriteOp::PutSource(theatre),
            ])
            .await
            .unwrap();

        let config = SearchConfig {
            similarity_threshold: 0.1,
            top_k: 3,
            hybrid: false,
        };
        let retriever = HybridRetriever::new(store, embedder, config);

        let results = retriever
            .search("villajoyosa", "concierto jazz", 3)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id, cid);
        assert_eq!(results[0].method, SearchMethod::Vectorial);
        assert_eq!(results[0].source.title, "Concierto de jazz");
    }
}

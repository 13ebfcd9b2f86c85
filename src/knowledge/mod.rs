//! Knowledge 모듈 - 소스/청크 저장소와 검색
//!
//! - Store: `DocumentStore` 트레이트 + 분할 커밋
//! - Memory / SQLite: 저장소 구현
//! - Vector: 코사인 유사도 전수 검색
//! - Hybrid: 벡터 + 키워드 점수 융합
//! - Chunker: 문단 경계 텍스트 분할

pub mod chunker;
pub mod hybrid;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;
pub mod vector;

// Re-exports
pub use chunker::{chunk_text, default_chunker, Chunker, ParagraphChunker};
pub use hybrid::{fuse, keyword_scores, HybridRetriever, KeywordHit, VectorHit, TEXT_WEIGHT};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use store::{commit_grouped, CommitReport, DocumentStore, WriteOp, DEFAULT_MAX_BATCH_OPS};
pub use types::{
    Chunk, ConversationTurn, Message, ProcessingStatus, Role, ScopeStats, SearchMethod,
    SearchResult, SourceDocument, SourceMetadata, SourceSnapshot, SourceUsage,
};
pub use vector::{cosine_similarity, ScoredChunk, SimilaritySearch};

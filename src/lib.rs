//! civic-rag - 지자체 행사 지식 수집 및 RAG 파이프라인
//!
//! 웹 페이지에서 행사 정보를 추출해 청킹/임베딩 후 저장하고,
//! 벡터 + 키워드 하이브리드 검색으로 질문에 답합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod ingest;
pub mod knowledge;
pub mod llm;
pub mod rag;
pub mod scraper;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::{get_api_key, get_data_dir, has_api_key, PipelineConfig};
pub use embedding::{EmbeddingClient, EmbeddingProvider, GeminiEmbedding};
pub use error::{PipelineError, Result, ValidationError};
pub use extraction::{ExtractedEvent, ExtractionAgent};
pub use ingest::{CleanupResult, IngestionOrchestrator, IngestionResult, ReembedResult};
pub use knowledge::{
    DocumentStore, HybridRetriever, InMemoryStore, ParagraphChunker, SearchResult, SqliteStore,
};
pub use llm::{GeminiGenerator, LanguageModel};
pub use rag::{RagAnswer, RagSynthesizer};
pub use scraper::{Fetcher, WebScraper};

//! 설정 모듈 - 파이프라인 설정 및 환경변수 로드
//!
//! 모든 튜닝 값은 `PipelineConfig` 하나로 모아 서비스 생성 시 주입합니다.
//! 환경변수(`CIVIC_RAG_*`)로 기본값을 덮어쓸 수 있습니다.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PipelineError, Result};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.civic-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".civic-rag")
}

/// 기본 SQLite 파일 경로
pub fn default_db_path() -> PathBuf {
    get_data_dir().join("knowledge.db")
}

// ============================================================================
// API Key Management
// ============================================================================

const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"];

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String> {
    for var in API_KEY_VARS {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    Err(PipelineError::Config(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable. \
         Get your API key at: https://aistudio.google.com/app/apikey"
            .to_string(),
    ))
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    API_KEY_VARS
        .iter()
        .any(|var| std::env::var(var).map(|k| !k.is_empty()).unwrap_or(false))
}

// ============================================================================
// Sub Configs
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub max_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_characters: 1000,
        }
    }
}

/// 임베딩 호출 설정
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// 한 배치에서 동시에 보내는 호출 수
    pub batch_size: usize,
    /// 호출당 타임아웃
    pub call_timeout: Duration,
    /// 출력 차원 (768, 1536, 3072)
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            call_timeout: Duration::from_secs(30),
            dimension: 768,
        }
    }
}

/// 검색 설정
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub similarity_threshold: f32,
    pub top_k: usize,
    /// false면 벡터 검색만 사용
    pub hybrid: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            top_k: 3,
            hybrid: true,
        }
    }
}

/// 수집(ingestion) 설정
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// 커밋당 최대 쓰기 연산 수
    pub commit_batch_size: usize,
    /// 엔티티 간 대기
    pub item_pause: Duration,
    /// URL 간 대기
    pub url_pause: Duration,
    /// 실행 전체 상한. 초과 시 부분 결과를 반환합니다.
    pub run_timeout: Duration,
    /// 추출 프롬프트에 넣을 원문 최대 길이 (문자 수)
    pub max_prompt_chars: usize,
    /// 이 파이프라인이 만든 소스에 붙는 태그 (cleanup 대상 식별)
    pub source_tag: String,
    /// fetch 호출 타임아웃
    pub fetch_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            commit_batch_size: 500,
            item_pause: Duration::from_millis(500),
            url_pause: Duration::from_secs(2),
            run_timeout: Duration::from_secs(600),
            max_prompt_chars: 25_000,
            source_tag: "event-agent".to_string(),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl IngestConfig {
    /// 테스트용: 대기 없음
    pub fn without_pauses() -> Self {
        Self {
            item_pause: Duration::ZERO,
            url_pause: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// 언어 모델 호출 설정
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub call_timeout: Duration,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            temperature: 0.1,
            max_output_tokens: 8192,
        }
    }
}

// ============================================================================
// PipelineConfig
// ============================================================================

/// 파이프라인 전체 설정
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub chunk: ChunkConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub ingest: IngestConfig,
    pub llm: LlmConfig,
}

impl PipelineConfig {
    /// 환경변수에서 로드 (없으면 기본값)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 키 조회 함수로 로드
    ///
    /// 값이 있지만 파싱할 수 없으면 `PipelineError::Config`를 반환합니다.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var::<usize, _>(&lookup, "CIVIC_RAG_MAX_CHUNK_CHARS")? {
            config.chunk.max_characters = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "CIVIC_RAG_EMBED_BATCH_SIZE")? {
            config.embedding.batch_size = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "CIVIC_RAG_EMBED_DIMENSION")? {
            config.embedding.dimension = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "CIVIC_RAG_CALL_TIMEOUT_SECS")? {
            config.embedding.call_timeout = Duration::from_secs(v);
            config.ingest.fetch_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "CIVIC_RAG_LLM_TIMEOUT_SECS")? {
            config.llm.call_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<f32, _>(&lookup, "CIVIC_RAG_SIMILARITY_THRESHOLD")? {
            config.search.similarity_threshold = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "CIVIC_RAG_TOP_K")? {
            config.search.top_k = v;
        }
        if let Some(v) = parse_var::<bool, _>(&lookup, "CIVIC_RAG_HYBRID_SEARCH")? {
            config.search.hybrid = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "CIVIC_RAG_COMMIT_BATCH")? {
            config.ingest.commit_batch_size = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "CIVIC_RAG_ITEM_PAUSE_MS")? {
            config.ingest.item_pause = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "CIVIC_RAG_URL_PAUSE_MS")? {
            config.ingest.url_pause = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "CIVIC_RAG_RUN_TIMEOUT_SECS")? {
            config.ingest.run_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "CIVIC_RAG_MAX_PROMPT_CHARS")? {
            config.ingest.max_prompt_chars = v;
        }
        if let Some(tag) = lookup("CIVIC_RAG_SOURCE_TAG").filter(|t| !t.trim().is_empty()) {
            config.ingest.source_tag = tag.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    /// 값 범위 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk.max_characters == 0 {
            return Err(PipelineError::Config(
                "max chunk size must be greater than 0".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(PipelineError::Config(
                "embedding batch size must be greater than 0".into(),
            ));
        }
        if self.ingest.commit_batch_size == 0 {
            return Err(PipelineError::Config(
                "commit batch size must be greater than 0".into(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.search.similarity_threshold) {
            return Err(PipelineError::Config(format!(
                "similarity threshold {} is outside [-1, 1]",
                self.search.similarity_threshold
            )));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| PipelineError::Config(format!("invalid value for {}: {:?}", key, raw))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunk.max_characters, 1000);
        assert_eq!(config.embedding.batch_size, 5);
        assert_eq!(config.search.top_k, 3);
        assert!(config.search.hybrid);
        assert!((config.search.similarity_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.ingest.commit_batch_size, 500);
        assert_eq!(config.ingest.max_prompt_chars, 25_000);
        assert_eq!(config.ingest.source_tag, "event-agent");
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("CIVIC_RAG_MAX_CHUNK_CHARS", "800"),
            ("CIVIC_RAG_TOP_K", "5"),
            ("CIVIC_RAG_HYBRID_SEARCH", "false"),
            ("CIVIC_RAG_ITEM_PAUSE_MS", "0"),
            ("CIVIC_RAG_SOURCE_TAG", " crawler "),
        ]))
        .unwrap();

        assert_eq!(config.chunk.max_characters, 800);
        assert_eq!(config.search.top_k, 5);
        assert!(!config.search.hybrid);
        assert_eq!(config.ingest.item_pause, Duration::ZERO);
        assert_eq!(config.ingest.source_tag, "crawler");
        // 지정하지 않은 값은 기본값 유지
        assert_eq!(config.embedding.batch_size, 5);
    }

    #[test]
    fn test_from_lookup_invalid_value() {
        let result = PipelineConfig::from_lookup(lookup_from(&[("CIVIC_RAG_TOP_K", "many")]));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let result =
            PipelineConfig::from_lookup(lookup_from(&[("CIVIC_RAG_MAX_CHUNK_CHARS", "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_data_dir_name() {
        assert!(get_data_dir().ends_with(".civic-rag"));
        assert!(default_db_path().ends_with("knowledge.db"));
    }
}

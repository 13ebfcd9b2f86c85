//! 임베딩 모듈 - Gemini API를 통한 텍스트 벡터화
//!
//! - `EmbeddingProvider`: 외부 임베딩 모델 인터페이스 (텍스트 하나 → 벡터 하나)
//! - `GeminiEmbedding`: gemini-embedding-001 구현체
//! - `EmbeddingClient`: 고정 크기 배치로 나눠 호출하고 입력 순서대로 벡터를 돌려줌
//!
//! ## 사용법
//! ```rust,ignore
//! let provider = Arc::new(GeminiEmbedding::from_env()?);
//! let client = EmbeddingClient::new(provider, EmbeddingConfig::default());
//! let vectors = client.embed_all(&texts).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::config::{get_api_key, EmbeddingConfig};
use crate::error::{with_timeout, PipelineError, Result};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 문서 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 검색 쿼리 임베딩 (기본 구현: 문서 임베딩과 동일)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// EmbeddingClient
// ============================================================================

/// 배치 임베딩 클라이언트
///
/// 배치 안에서는 병렬 호출, 배치끼리는 순차 호출합니다.
/// 호출 하나라도 실패하면 전체가 실패합니다 (재시도는 호출자 몫).
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingConfig) -> Self {
        Self { provider, config }
    }

    /// 출력 벡터 차원
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// 여러 텍스트 임베딩 (입력 순서 유지)
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batch_size = self.config.batch_size.max(1);
        let mut vectors = Vec::with_capacity(texts.len());
        let total_batches = texts.len().div_ceil(batch_size);

        for (i, batch) in texts.chunks(batch_size).enumerate() {
            tracing::debug!(
                "Embedding batch {}/{} ({} texts)",
                i + 1,
                total_batches,
                batch.len()
            );

            let calls = batch.iter().map(|text| {
                with_timeout(
                    self.provider.name(),
                    self.config.call_timeout,
                    self.provider.embed(text),
                )
            });

            for vector in try_join_all(calls).await? {
                self.check_dimension(&vector)?;
                vectors.push(vector);
            }
        }

        Ok(vectors)
    }

    /// 검색 쿼리 임베딩
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vector = with_timeout(
            self.provider.name(),
            self.config.call_timeout,
            self.provider.embed_query(text),
        )
        .await?;
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        let expected = self.provider.dimension();
        if vector.len() != expected {
            return Err(PipelineError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// Gemini 임베딩 API 엔드포인트 (gemini-embedding-001 - MRL 지원)
/// source: https://ai.google.dev/gemini-api/docs/embeddings
const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

const SERVICE: &str = "gemini-embedding";

/// 기본 HTTP 요청 타임아웃
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Google Gemini 임베딩 구현체
///
/// source: https://ai.google.dev/gemini-api/docs/embeddings
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    request_timeout: Duration,
}

impl GeminiEmbedding {
    /// 새 Gemini 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_dimension(api_key, DEFAULT_DIMENSION)
    }

    /// 차원을 지정하여 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `dimension` - 임베딩 차원 (768, 1536, 3072 중 선택)
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self> {
        Self::with_options(api_key, dimension, DEFAULT_REQUEST_TIMEOUT)
    }

    /// 차원과 HTTP 요청 타임아웃을 지정하여 생성
    pub fn with_options(api_key: String, dimension: usize, request_timeout: Duration) -> Result<Self> {
        // 유효한 차원 확인
        if ![768, 1536, 3072].contains(&dimension) {
            return Err(PipelineError::Config(format!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| PipelineError::external(SERVICE, e))?;

        Ok(Self {
            api_key,
            client,
            dimension,
            request_timeout,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// 환경변수에서 API 키를 읽어 생성
    ///
    /// 우선순위: GEMINI_API_KEY > GOOGLE_AI_API_KEY
    pub fn from_env() -> Result<Self> {
        Self::new(get_api_key()?)
    }

    /// 환경변수에서 API 키를 읽어 차원 지정하여 생성
    pub fn from_env_with_dimension(dimension: usize) -> Result<Self> {
        Self::with_dimension(get_api_key()?, dimension)
    }

    /// 환경변수의 API 키와 임베딩 설정으로 생성
    pub fn from_env_with_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::with_options(get_api_key()?, config.dimension, config.call_timeout)
    }

    async fn request(&self, text: &str, task_type: &str) -> Result<Vec<f32>> {
        // 빈 텍스트 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: "models/gemini-embedding-001".to_string(),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: task_type.to_string(),
            output_dimensionality: Some(self.dimension),
        };

        // API 키는 URL이 아닌 헤더로 전송
        let response = self
            .client
            .post(GEMINI_EMBED_URL)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::Timeout {
                        service: SERVICE.into(),
                        seconds: self.request_timeout.as_secs(),
                    }
                } else {
                    PipelineError::external(SERVICE, format!("Failed to send request: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::external(SERVICE, format!("Failed to read body: {}", e)))?;

        if status.as_u16() == 429 {
            tracing::warn!("Embedding rate limit hit (429)");
            return Err(PipelineError::RateLimited {
                service: SERVICE.into(),
            });
        }

        if !status.is_success() {
            return Err(api_error(SERVICE, status, &body));
        }

        let parsed: EmbedResponse = serde_json::from_str(&body)
            .map_err(|e| PipelineError::Parse(format!("embedding response: {}", e)))?;
        Ok(parsed.embedding.values)
    }
}

/// Gemini 에러 응답 본문을 `ExternalService` 에러로 변환
pub(crate) fn api_error(service: &str, status: reqwest::StatusCode, body: &str) -> PipelineError {
    match serde_json::from_str::<GeminiError>(body) {
        Ok(error) => PipelineError::external(
            service,
            format!(
                "Gemini API error ({}): {}",
                error.error.status, error.error.message
            ),
        ),
        Err(_) => PipelineError::external(service, format!("Gemini API error ({}): {}", status, body)),
    }
}

/// Gemini API 요청 본문
/// source: https://ai.google.dev/gemini-api/docs/embeddings
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request(text, "RETRIEVAL_DOCUMENT").await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.request(text, "RETRIEVAL_QUERY").await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "gemini-embedding-001"
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 임베딩 클라이언트 생성 (Gemini API)
///
/// 환경변수에서 API 키를 읽어 GeminiEmbedding을 감쌉니다.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<EmbeddingClient> {
    let provider = GeminiEmbedding::from_env_with_config(config)?;
    tracing::info!(
        "Using Gemini API embedding (dimension: {}, batch: {})",
        provider.dimension(),
        config.batch_size
    );
    Ok(EmbeddingClient::new(Arc::new(provider), config.clone()))
}

// ============================================================================
// Tests
// ============================================================================

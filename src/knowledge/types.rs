//! 지식 저장소 데이터 모델
//!
//! 소스 문서, 청크, 대화 기록, 검색 결과 타입을 정의합니다.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Processing Status
// ============================================================================

/// 소스 문서 처리 상태
///
/// `Pending` → `Embedded` | `Error`. 재수집 시 `Pending`으로 되돌아갑니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Embedded,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Embedded => "embedded",
            Self::Error => "error",
        }
    }

    /// 저장된 문자열에서 복원 (알 수 없는 값은 `Pending`)
    pub fn parse(s: &str) -> Self {
        match s {
            "embedded" => Self::Embedded,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }

    /// 종료 상태 여부
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

// ============================================================================
// Source Document
// ============================================================================

/// 소스 문서의 구조화 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub location: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 이벤트 상세 링크
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub confidence: f32,
    pub dedup_key: String,
    /// 추출에 사용된 원본 페이지
    pub source_url: String,
    /// 생성한 파이프라인 태그
    pub source_tag: String,
}

/// 소스 문서
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// 결정적 ID (scope + dedup key에서 파생)
    pub id: String,
    pub scope: String,
    /// 임베딩 대상이 되는 전체 텍스트
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: SourceMetadata,
    pub status: ProcessingStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SourceDocument {
    pub fn title(&self) -> &str {
        &self.metadata.title
    }

    /// 검색 결과 표시용 스냅샷
    pub fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot {
            title: self.metadata.title.clone(),
            url: self.metadata.url.clone(),
            date: Some(self.metadata.date),
            location: Some(self.metadata.location.clone()),
            category: Some(self.metadata.category.clone()),
        }
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 소스 문서의 청크
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `{source_id}_chunk_{index}`
    pub id: String,
    pub source_id: String,
    pub scope: String,
    /// 0부터 시작
    pub chunk_index: usize,
    pub content: String,
    pub embedding: Vec<f32>,
    pub token_estimate: usize,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(
        source_id: &str,
        scope: &str,
        chunk_index: usize,
        content: String,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: chunk_id(source_id, chunk_index),
            source_id: source_id.to_string(),
            scope: scope.to_string(),
            chunk_index,
            token_estimate: estimate_tokens(&content),
            content,
            embedding,
            created_at: Utc::now(),
        }
    }
}

/// 청크 ID 생성
pub fn chunk_id(source_id: &str, chunk_index: usize) -> String {
    format!("{}_chunk_{}", source_id, chunk_index)
}

/// 토큰 수 추정 (문자 4개 ≈ 토큰 1개)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

// ============================================================================
// Conversation
// ============================================================================

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// 대화 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// 답변에 사용된 소스 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUsage {
    pub source_id: String,
    pub similarity: f32,
    /// 잘린 본문 미리보기
    pub preview: String,
}

/// 대화 턴 (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub scope: String,
    pub messages: Vec<Message>,
    pub sources_used: Vec<SourceUsage>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Search Result
// ============================================================================

/// 검색 방법
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    /// 벡터 검색에서만 발견
    Vectorial,
    /// 키워드 검색에서만 발견
    Textual,
    /// 양쪽 모두
    Hybrid,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vectorial => "vectorial",
            Self::Textual => "textual",
            Self::Hybrid => "hybrid",
        }
    }
}

/// 표시용 소스 메타데이터
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub title: String,
    pub url: String,
    pub date: Option<NaiveDate>,
    pub location: Option<String>,
    pub category: Option<String>,
}

/// 검색 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub source_id: String,
    /// 벡터 검색으로 찾은 청크 (키워드 전용 결과는 None)
    pub chunk_id: Option<String>,
    pub content: String,
    pub vector_similarity: Option<f32>,
    pub text_score: Option<f32>,
    pub fused_score: f32,
    pub method: SearchMethod,
    pub source: SourceSnapshot,
}

impl SearchResult {
    /// 컨텍스트에 표시할 관련도 (벡터 유사도 우선)
    pub fn relevance(&self) -> f32 {
        self.vector_similarity
            .or(self.text_score)
            .unwrap_or(self.fused_score)
    }
}

/// 스코프 통계
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScopeStats {
    pub total_sources: usize,
    pub total_chunks: usize,
    pub pending: usize,
    pub embedded: usize,
    pub error: usize,
    pub with_embeddings: usize,
}

// ============================================================================
// Tests
// ============================================================================

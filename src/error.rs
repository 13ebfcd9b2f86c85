//! 에러 모듈 - 파이프라인 에러 분류
//!
//! 라이브러리 전체에서 사용하는 `PipelineError`와
//! 엔티티 검증 실패를 나타내는 `ValidationError`를 정의합니다.
//!
//! - 항목 단위 에러(Validation, Parse)는 호출자에게 올라가지 않고 집계만 됩니다
//! - 단계 단위 에러(ExternalService, Store 등)는 오케스트레이터로 전파됩니다

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// 라이브러리 결과 타입
pub type Result<T> = std::result::Result<T, PipelineError>;

// ============================================================================
// ValidationError
// ============================================================================

/// 엔티티 검증 실패 사유
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("entity is not a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field type: {0}")]
    InvalidType(&'static str),

    #[error("unparseable date: {0}")]
    InvalidDate(String),

    #[error("date {date} is before {today}")]
    PastDate {
        date: chrono::NaiveDate,
        today: chrono::NaiveDate,
    },
}

// ============================================================================
// PipelineError
// ============================================================================

/// 파이프라인 에러
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{service} call failed: {message}")]
    ExternalService { service: String, message: String },

    #[error("{service} rate limit exceeded (429)")]
    RateLimited { service: String },

    #[error("{service} timed out after {seconds}s")]
    Timeout { service: String, seconds: u64 },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("store error: {0}")]
    Store(String),

    #[error("commit of {ops} operations exceeds batch limit {limit}")]
    BatchTooLarge { ops: usize, limit: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// 외부 서비스 에러 생성 헬퍼
    pub fn external(service: impl Into<String>, message: impl ToString) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// 호출자가 재시도를 고려해도 되는 에러인지 여부
    ///
    /// 레이트 리밋과 타임아웃만 재시도 대상입니다. 내부 재시도는 하지 않습니다.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout { .. })
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

// ============================================================================
// Timeout Helper
// ============================================================================

/// 외부 호출에 타임아웃 적용
///
/// 시간 초과 시 `PipelineError::Timeout`을 반환합니다.
pub async fn with_timeout<T, F>(service: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            service: service.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::external("embedding", "connection refused");
        assert_eq!(err.to_string(), "embedding call failed: connection refused");

        let err = PipelineError::BatchTooLarge { ops: 501, limit: 500 };
        assert_eq!(
            err.to_string(),
            "commit of 501 operations exceeds batch limit 500"
        );

        let err = PipelineError::from(ValidationError::MissingField("title"));
        assert_eq!(
            err.to_string(),
            "validation error: missing required field: title"
        );
    }

    #[test]
    fn test_is_retriable() {
        assert!(PipelineError::RateLimited {
            service: "gemini".into()
        }
        .is_retriable());
        assert!(PipelineError::Timeout {
            service: "gemini".into(),
            seconds: 30
        }
        .is_retriable());
        assert!(!PipelineError::external("gemini", "boom").is_retriable());
        assert!(!PipelineError::Parse("bad".into()).is_retriable());
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(PipelineError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let result = with_timeout("fast", Duration::from_secs(1), async { Ok(42) }).await;
        assert_eq!(result.ok(), Some(42));
    }
}

//! 추출 모듈 - 원문 텍스트에서 이벤트 엔티티 추출
//!
//! 언어 모델에 구조화 추출 프롬프트를 보내고, 돌아온 자유 형식 텍스트에서
//! JSON을 방어적으로 꺼낸 뒤 엔티티마다 스키마 검증을 합니다.
//!
//! - 응답 파싱 실패: 빈 결과 (에러 아님, `parse_failed`로 집계)
//! - 엔티티 검증 실패: 해당 엔티티만 건너뜀
//! - 모델 호출 실패: 호출자에게 에러 전파

mod event;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::Value;

use crate::config::{IngestConfig, LlmConfig};
use crate::error::{with_timeout, PipelineError, Result, ValidationError};
use crate::llm::LanguageModel;

pub use event::{
    classify_category, dedup_key, generate_tags, normalize_title, parse_date, source_id,
    validate_event, ExtractedEvent, DEFAULT_CATEGORY, DEFAULT_CONFIDENCE, DEFAULT_DESCRIPTION,
    DEFAULT_LOCATION,
};

// ============================================================================
// Prompt
// ============================================================================

/// 문자 단위로 자른 원문 (멀티바이트 경계 안전)
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// 추출 프롬프트 생성
///
/// 원문은 `max_chars` 문자까지만 포함합니다.
pub fn build_extraction_prompt(
    text: &str,
    source_url: &str,
    scope: &str,
    today: NaiveDate,
    max_chars: usize,
) -> String {
    let body = truncate_chars(text, max_chars);

    format!(
        r#"You are an assistant that extracts public events from municipal web pages.

Town: {scope}
Source page: {url}
Today: {today}

Extract ALL events mentioned in the content below. Rules:
- Dates must use the YYYY-MM-DD format.
- Include only events happening today or later.
- Keep the original language of the page for titles and descriptions.
- Use null for unknown optional fields.

Respond ONLY with JSON in exactly this shape:
{{"events":[{{"title":"","description":"","date":"YYYY-MM-DD","time":null,"location":"","category":"","tags":[],"link":null,"price":null,"organizer":null,"imageUrl":null,"fullContent":"","confidence":0.9}}]}}

CONTENT:
{body}"#,
        scope = scope,
        url = source_url,
        today = today.format("%Y-%m-%d"),
        body = body,
    )
}

// ============================================================================
// Response Parsing
// ============================================================================

/// 모델 출력에서 JSON 값 추출
///
/// 코드 펜스를 제거하고 첫 `{`부터 마지막 `}`까지만 파싱합니다.
pub fn parse_model_json(raw: &str) -> Result<Value> {
    let cleaned = raw.replace("```json", "").replace("```", "");

    let start = cleaned
        .find('{')
        .ok_or_else(|| PipelineError::Parse("no JSON object in model output".into()))?;
    let end = cleaned
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| PipelineError::Parse("unterminated JSON object in model output".into()))?;

    serde_json::from_str(&cleaned[start..=end]).map_err(PipelineError::from)
}

/// 파싱된 값에서 엔티티 배열 선택 (`{"events": [...]}` 또는 단일 객체)
fn entity_candidates(value: Value) -> Vec<Value> {
    match value {
        Value::Object(mut obj) => match obj.remove("events") {
            Some(Value::Array(items)) => items,
            Some(_) => vec![],
            None => vec![Value::Object(obj)],
        },
        Value::Array(items) => items,
        _ => vec![],
    }
}

// ============================================================================
// ExtractionStats / ExtractionOutcome
// ============================================================================

/// 추출 통계 (거부 사유별 건수)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub candidates: usize,
    pub accepted: usize,
    pub parse_failed: usize,
    pub not_object: usize,
    pub missing_field: usize,
    pub invalid_type: usize,
    pub invalid_date: usize,
    pub past_date: usize,
    pub duplicates: usize,
}

impl ExtractionStats {
    /// 검증 실패 사유 기록
    pub fn record(&mut self, err: &ValidationError) {
        match err {
            ValidationError::NotAnObject => self.not_object += 1,
            ValidationError::MissingField(_) => self.missing_field += 1,
            ValidationError::InvalidType(_) => self.invalid_type += 1,
            ValidationError::InvalidDate(_) => self.invalid_date += 1,
            ValidationError::PastDate { .. } => self.past_date += 1,
        }
    }

    /// 거부된 엔티티 수 (중복 포함)
    pub fn rejected(&self) -> usize {
        self.not_object
            + self.missing_field
            + self.invalid_type
            + self.invalid_date
            + self.past_date
            + self.duplicates
    }
}

/// URL 하나의 추출 결과
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub events: Vec<ExtractedEvent>,
    pub stats: ExtractionStats,
}

/// 모델 원문 응답 → 검증된 이벤트 목록
///
/// 같은 응답 안의 중복 키는 첫 번째만 남깁니다.
pub fn events_from_response(
    raw: &str,
    source_url: &str,
    scope: &str,
    today: NaiveDate,
) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();

    let value = match parse_model_json(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Unparseable extraction output for {}: {}", source_url, e);
            outcome.stats.parse_failed = 1;
            return outcome;
        }
    };

    let mut seen = HashSet::new();
    for candidate in entity_candidates(value) {
        outcome.stats.candidates += 1;

        match validate_event(&candidate, source_url, scope, today) {
            Ok(event) => {
                if seen.insert(event.dedup_key.clone()) {
                    outcome.events.push(event);
                } else {
                    outcome.stats.duplicates += 1;
                }
            }
            Err(e) => {
                tracing::debug!("Rejected entity from {}: {}", source_url, e);
                outcome.stats.record(&e);
            }
        }
    }

    outcome.stats.accepted = outcome.events.len();
    outcome
}

// ============================================================================
// ExtractionAgent
// ============================================================================

/// 언어 모델 기반 이벤트 추출기
pub struct ExtractionAgent {
    llm: Arc<dyn LanguageModel>,
    max_prompt_chars: usize,
    call_timeout: Duration,
}

impl ExtractionAgent {
    pub fn new(llm: Arc<dyn LanguageModel>, ingest: &IngestConfig, llm_config: &LlmConfig) -> Self {
        Self {
            llm,
            max_prompt_chars: ingest.max_prompt_chars,
            call_timeout: llm_config.call_timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        self.llm.name()
    }

    /// 원문에서 이벤트 추출
    ///
    /// 모델 호출 실패(타임아웃 포함)만 에러로 반환합니다.
    pub async fn extract(
        &self,
        text: &str,
        source_url: &str,
        scope: &str,
        today: NaiveDate,
    ) -> Result<ExtractionOutcome> {
        if text.trim().is_empty() {
            tracing::warn!("Empty content for {}, skipping extraction", source_url);
            return Ok(ExtractionOutcome::default());
        }

        let prompt = build_extraction_prompt(text, source_url, scope, today, self.max_prompt_chars);
        tracing::debug!(
            "Extraction prompt for {} ({} chars, model {})",
            source_url,
            prompt.chars().count(),
            self.llm.name()
        );

        let raw = with_timeout(self.llm.name(), self.call_timeout, self.llm.generate(&prompt)).await?;
        let outcome = events_from_response(&raw, source_url, scope, today);

        tracing::info!(
            "Extracted {} events from {} ({} rejected)",
            outcome.events.len(),
            source_url,
            outcome.stats.rejected()
        );

        Ok(outcome)
    }
}

// ============================================================================
// Tests
// ============================================================================

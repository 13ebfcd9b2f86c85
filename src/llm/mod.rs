//! 언어 모델 모듈 - Gemini generateContent 클라이언트
//!
//! 프롬프트 하나를 보내고 자유 형식 텍스트를 받습니다.
//! 출력 구조는 보장되지 않으므로 파싱은 호출자가 방어적으로 수행합니다.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{get_api_key, LlmConfig};
use crate::embedding::api_error;
use crate::error::{PipelineError, Result};

/// 기본 모델
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const SERVICE: &str = "gemini-generate";

// ============================================================================
// LanguageModel Trait
// ============================================================================

/// 언어 모델 트레이트
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// 프롬프트 → 텍스트
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// GeminiGenerator
// ============================================================================

/// Gemini 텍스트 생성기
pub struct GeminiGenerator {
    api_key: String,
    model: String,
    client: reqwest::Client,
    config: LlmConfig,
}

impl GeminiGenerator {
    /// 새 생성기
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `model` - 모델 이름 (예: gemini-2.5-flash-lite)
    pub fn new(api_key: String, model: impl Into<String>, config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout + Duration::from_secs(5))
            .build()
            .map_err(|e| PipelineError::external(SERVICE, e))?;

        Ok(Self {
            api_key,
            model: model.into(),
            client,
            config,
        })
    }

    /// 환경변수의 API 키로 기본 모델 생성
    pub fn from_env(config: LlmConfig) -> Result<Self> {
        Self::new(get_api_key()?, DEFAULT_MODEL, config)
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model)
    }
}

#[async_trait]
impl LanguageModel for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::external(SERVICE, format!("Failed to send request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::external(SERVICE, format!("Failed to read body: {}", e)))?;

        if status.as_u16() == 429 {
            tracing::warn!("Language model rate limit hit (429)");
            return Err(PipelineError::RateLimited {
                service: SERVICE.into(),
            });
        }

        if !status.is_success() {
            return Err(api_error(SERVICE, status, &body));
        }

        let text = parse_generate_response(&body)?;
        if text.is_empty() {
            tracing::warn!("Empty response from {}", self.model);
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// 첫 번째 후보의 텍스트 파트를 이어 붙여 반환
fn parse_generate_response(body: &str) -> Result<String> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::Parse(format!("generateContent response: {}", e)))?;

    let text = response
        .candidates
        .into_iter()
        .next()
        .map(|c| {
            c.content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    Ok(text)
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    text: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate_response() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Hola "},{"text":"mundo"}]}}]}"#;
        assert_eq!(parse_generate_response(body).unwrap(), "Hola mundo");
    }

    #[test]
    fn test_parse_generate_response_empty() {
        assert_eq!(parse_generate_response(r#"{"candidates":[]}"#).unwrap(), "");
        assert_eq!(parse_generate_response("{}").unwrap(), "");
        assert!(matches!(
            parse_generate_response("not json"),
            Err(PipelineError::Parse(_))
        ));
    }

    #[test]
    fn test_endpoint() {
        let generator =
            GeminiGenerator::new("k".into(), "gemini-2.0-flash", LlmConfig::default()).unwrap();
        assert!(generator
            .endpoint()
            .ends_with("/models/gemini-2.0-flash:generateContent"));
        assert_eq!(generator.name(), "gemini-2.0-flash");
    }

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: "p".into() }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 10,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 10);
        assert_eq!(json["contents"][0]["parts"][0]["text"], "p");
    }
}

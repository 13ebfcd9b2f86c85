//! 테스트용 가짜 협력자와 픽스처

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, Utc};

use crate::embedding::EmbeddingProvider;
use crate::error::{PipelineError, Result};
use crate::extraction::{dedup_key, source_id};
use crate::knowledge::types::{Chunk, ProcessingStatus, SourceDocument, SourceMetadata};
use crate::llm::LanguageModel;
use crate::scraper::Fetcher;

// ============================================================================
// Fixtures
// ============================================================================

/// 오늘부터 `days_ahead`일 뒤의 pending 소스
pub fn sample_source(scope: &str, title: &str, days_ahead: u64) -> SourceDocument {
    let date = Utc::now().date_naive() + Days::new(days_ahead);
    let key = dedup_key(scope, title, date);
    let now = Utc::now();

    SourceDocument {
        id: source_id(scope, &key),
        scope: scope.to_string(),
        content: title.to_string(),
        embedding: None,
        metadata: SourceMetadata {
            title: title.to_string(),
            description: format!("Descripción de {}", title),
            date,
            time: None,
            location: "Plaza Mayor".into(),
            category: "general".into(),
            tags: vec!["general".into()],
            url: format!("https://{}.es/agenda", scope),
            price: None,
            organizer: None,
            image_url: None,
            confidence: 0.9,
            dedup_key: key,
            source_url: format!("https://{}.es/agenda", scope),
            source_tag: "event-agent".into(),
        },
        status: ProcessingStatus::Pending,
        error_message: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn sample_chunk(source_id: &str, scope: &str, index: usize, embedding: Vec<f32>) -> Chunk {
    Chunk::new(
        source_id,
        scope,
        index,
        format!("chunk {} of {}", index, source_id),
        embedding,
    )
}

// ============================================================================
// KeywordEmbedder
// ============================================================================

const KEYWORD_DIMENSION: usize = 64;

/// 단어 해시 기반 결정적 임베딩 (bag of words)
pub struct KeywordEmbedder {
    fail_on: Option<String>,
    delay_on: Option<(String, Duration)>,
    reported_dimension: usize,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            fail_on: None,
            delay_on: None,
            reported_dimension: KEYWORD_DIMENSION,
        }
    }

    /// 해당 단어가 포함된 텍스트에서 실패
    pub fn failing_on(mut self, word: &str) -> Self {
        self.fail_on = Some(word.to_lowercase());
        self
    }

    /// 해당 단어가 포함된 텍스트는 늦게 응답
    pub fn delay_on(mut self, word: &str, delay: Duration) -> Self {
        self.delay_on = Some((word.to_lowercase(), delay));
        self
    }

    /// 실제 벡터 길이와 다른 차원을 보고
    pub fn with_reported_dimension(mut self, dimension: usize) -> Self {
        self.reported_dimension = dimension;
        self
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; KEYWORD_DIMENSION];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            // FNV-1a
            let hash = token
                .bytes()
                .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
            vector[(hash % KEYWORD_DIMENSION as u64) as usize] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some((word, delay)) = &self.delay_on {
            if text.to_lowercase().contains(word.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }
        if let Some(word) = &self.fail_on {
            if text.to_lowercase().contains(word.as_str()) {
                return Err(PipelineError::external("keyword", format!("refused: {}", word)));
            }
        }
        Ok(Self::vector(text))
    }

    fn dimension(&self) -> usize {
        self.reported_dimension
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

// ============================================================================
// ScriptedModel
// ============================================================================

enum Reply {
    Text(String),
    Fail,
}

/// 프롬프트 내용에 따라 정해진 응답을 돌려주는 언어 모델
///
/// 라우트는 등록 순서대로 검사하며 프롬프트에 포함된 첫 문자열이 선택됩니다.
pub struct ScriptedModel {
    routes: Vec<(String, Reply)>,
    fallback: Reply,
    delays: Vec<(String, Duration)>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedModel {
    fn with_fallback(fallback: Reply) -> Self {
        Self {
            routes: Vec::new(),
            fallback,
            delays: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 항상 같은 텍스트
    pub fn fixed(text: &str) -> Self {
        Self::with_fallback(Reply::Text(text.to_string()))
    }

    /// 항상 ExternalService 에러
    pub fn failing() -> Self {
        Self::with_fallback(Reply::Fail)
    }

    /// 라우트 외에는 빈 이벤트 목록
    pub fn routed() -> Self {
        Self::fixed(r#"{"events": []}"#)
    }

    pub fn route(mut self, needle: &str, text: &str) -> Self {
        self.routes.push((needle.to_string(), Reply::Text(text.to_string())));
        self
    }

    pub fn fail_on(mut self, needle: &str) -> Self {
        self.routes.push((needle.to_string(), Reply::Fail));
        self
    }

    /// 해당 문자열이 포함된 프롬프트는 `delay`만큼 지연
    pub fn delay_on(mut self, needle: &str, delay: Duration) -> Self {
        self.delays.push((needle.to_string(), delay));
        self
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn prompt_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        if let Some((_, delay)) = self.delays.iter().find(|(n, _)| prompt.contains(n.as_str())) {
            tokio::time::sleep(*delay).await;
        }

        let reply = self
            .routes
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply)
            .unwrap_or(&self.fallback);

        match reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Fail => Err(PipelineError::external("scripted", "model unavailable")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// MapFetcher
// ============================================================================

/// URL → 텍스트 맵 (없는 URL은 실패)
#[derive(Default)]
pub struct MapFetcher {
    pages: HashMap<String, String>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), text.to_string());
        self
    }
}

#[async_trait]
impl Fetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::external("fetch", format!("404 for {}", url)))
    }
}

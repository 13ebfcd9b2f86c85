//! RAG 모듈 - 검색 기반 답변 생성
//!
//! 하이브리드 검색 결과로 컨텍스트를 만들고 언어 모델을 한 번 호출합니다.
//! 응답 속 엔티티 카드를 파싱하고 대화 턴을 저장합니다.
//!
//! 검색 결과가 없으면 "관련 정보 없음" 문장을 컨텍스트로 넣고
//! 모델에게 지어내지 말고 거절하라고 지시합니다.

mod markers;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::LlmConfig;
use crate::error::{with_timeout, Result};
use crate::extraction::ExtractedEvent;
use crate::knowledge::hybrid::HybridRetriever;
use crate::knowledge::store::DocumentStore;
use crate::knowledge::types::{ConversationTurn, Message, SearchResult, SourceUsage};
use crate::llm::LanguageModel;

pub use markers::{parse_entity_cards, strip_entity_cards, CARD_END, CARD_START};

/// 검색 결과가 없을 때의 컨텍스트
pub const NO_CONTEXT: &str =
    "No relevant information was found in the knowledge base for this query.";

/// 소스 미리보기 길이 (문자 수)
const PREVIEW_CHARS: usize = 200;

// ============================================================================
// Context / Prompt
// ============================================================================

/// 검색 결과 → 번호 매긴 컨텍스트 블록
pub fn build_context(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_CONTEXT.to_string();
    }

    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. {}\n   Source: {} ({}) (Relevance: {:.0}%)",
                i + 1,
                r.content,
                r.source.title,
                r.source.url,
                r.relevance() * 100.0
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 전체 프롬프트 = 지시문 + 컨텍스트 + 대화 기록 + 질문
pub fn build_prompt(
    scope: &str,
    today: NaiveDate,
    context: &str,
    history: &[Message],
    query: &str,
) -> String {
    let mut prompt = format!(
        r#"You are the events assistant for the town of {scope}. Today is {today}.

Answer the user's question using ONLY the information in the CONTEXT section.
- Reply in the same language as the user's question.
- If the context does not contain the answer, say plainly that you have no information about it. Never invent events, dates, places or prices.
- For every concrete upcoming event you mention, append a card in exactly this format:
{start}{{"title":"...","date":"YYYY-MM-DD","time":"...","location":"...","description":"...","link":"..."}}{end}
- Do not emit cards for events dated before today.

CONTEXT:
{context}
"#,
        scope = scope,
        today = today.format("%Y-%m-%d"),
        start = CARD_START,
        end = CARD_END,
        context = context,
    );

    if !history.is_empty() {
        prompt.push_str("\nCONVERSATION HISTORY:\n");
        for message in history {
            prompt.push_str(&format!("{}: {}\n", message.role.as_str(), message.content));
        }
    }

    prompt.push_str(&format!("\nUser question: {}", query));
    prompt
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}

// ============================================================================
// RagSynthesizer
// ============================================================================

/// 답변 결과
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    /// 카드 블록을 뺀 본문
    pub prose: String,
    pub entities: Vec<ExtractedEvent>,
    pub sources_used: Vec<SourceUsage>,
    /// 대화 저장 실패 시 None
    pub conversation_id: Option<String>,
}

/// 검색 + 생성 + 마커 파싱 + 대화 저장
pub struct RagSynthesizer {
    retriever: HybridRetriever,
    llm: Arc<dyn LanguageModel>,
    store: Arc<dyn DocumentStore>,
    call_timeout: Duration,
}

impl RagSynthesizer {
    pub fn new(
        retriever: HybridRetriever,
        llm: Arc<dyn LanguageModel>,
        store: Arc<dyn DocumentStore>,
        llm_config: &LlmConfig,
    ) -> Self {
        Self {
            retriever,
            llm,
            store,
            call_timeout: llm_config.call_timeout,
        }
    }

    /// 질문에 답변
    ///
    /// # Arguments
    /// * `scope` - 검색 범위 (도시)
    /// * `query` - 사용자 질문
    /// * `history` - 이전 대화 (오래된 순)
    pub async fn answer(&self, scope: &str, query: &str, history: &[Message]) -> Result<RagAnswer> {
        let today = Utc::now().date_naive();
        let top_k = self.retriever.config().top_k;

        let results = self.retriever.search(scope, query, top_k).await?;
        tracing::info!("RAG query on {}: {} supporting results", scope, results.len());

        let context = build_context(&results);
        let prompt = build_prompt(scope, today, &context, history, query);

        let raw = with_timeout(self.llm.name(), self.call_timeout, self.llm.generate(&prompt)).await?;

        let entities = parse_entity_cards(&raw, scope, today);
        let prose = strip_entity_cards(&raw);

        let sources_used: Vec<SourceUsage> = results
            .iter()
            .map(|r| SourceUsage {
                source_id: r.source_id.clone(),
                similarity: r.relevance(),
                preview: preview(&r.content),
            })
            .collect();

        let mut messages = history.to_vec();
        messages.push(Message::user(query));
        messages.push(Message::assistant(raw.as_str()));

        let turn = ConversationTurn {
            id: Uuid::new_v4().to_string(),
            scope: scope.to_string(),
            messages,
            sources_used: sources_used.clone(),
            created_at: Utc::now(),
        };

        let conversation_id = match self.store.append_conversation(&turn).await {
            Ok(()) => Some(turn.id),
            Err(e) => {
                tracing::error!("Failed to persist conversation for {}: {}", scope, e);
                None
            }
        };

        Ok(RagAnswer {
            prose,
            entities,
            sources_used,
            conversation_id,
        })
    }

    /// 최근 대화 목록 (최신순)
    pub async fn conversations(&self, scope: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        self.store.list_conversations(scope, limit).await
    }
}

// ============================================================================
// Tests
// ============================================================================

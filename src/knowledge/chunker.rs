//! Text Chunking Module
//!
//! 문단(빈 줄로 구분된 블록) 경계를 존중하면서
//! 최대 크기 이하의 청크로 텍스트를 분할합니다.
//!
//! 크기는 바이트가 아닌 문자(char) 수 기준입니다.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::ChunkConfig;

/// 청크를 다시 이어 붙일 때 쓰는 구분자
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// 문단 경계 (공백만 있는 줄 포함)
static PARAGRAPH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("valid paragraph pattern"));

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// ParagraphChunker
// ============================================================================

/// 문단 기반 청커
///
/// - 문단을 순서대로 탐욕적으로 채워 넣습니다 (구분자 포함 길이 ≤ 최대 크기)
/// - 최대 크기를 넘는 단일 문단은 문자 수 기준으로 강제 분할합니다
/// - 빈 입력은 빈 목록을 반환합니다
pub struct ParagraphChunker {
    config: ChunkConfig,
}

impl ParagraphChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    pub fn max_characters(&self) -> usize {
        self.config.max_characters
    }

    /// 문단 분할 (앞뒤 공백 제거, 빈 문단 제외)
    fn split_paragraphs<'a>(&self, text: &'a str) -> Vec<&'a str> {
        PARAGRAPH_RE
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let max = self.config.max_characters.max(1);
        let separator_len = PARAGRAPH_SEPARATOR.chars().count();

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_len = 0usize;

        for para in self.split_paragraphs(text) {
            let para_len = para.chars().count();

            // 단일 문단이 최대 크기 초과 → 현재 청크를 닫고 강제 분할
            if para_len > max {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                chunks.extend(split_by_chars(para, max));
                continue;
            }

            let needed = if current.is_empty() {
                para_len
            } else {
                current_len + separator_len + para_len
            };

            if needed > max {
                chunks.push(std::mem::take(&mut current));
                current.push_str(para);
                current_len = para_len;
            } else {
                if !current.is_empty() {
                    current.push_str(PARAGRAPH_SEPARATOR);
                }
                current.push_str(para);
                current_len = needed;
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "ParagraphChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 문자 수 기준 강제 분할 (UTF-8 안전)
fn split_by_chars(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;

    for ch in text.chars() {
        if count == max_chars {
            pieces.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    // 공백으로 끝나는 조각은 다듬되 빈 조각은 남기지 않음
    pieces
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(ParagraphChunker::with_defaults())
}

/// 최대 크기를 지정한 일회성 분할
pub fn chunk_text(text: &str, max_characters: usize) -> Vec<String> {
    ParagraphChunker::new(ChunkConfig { max_characters }).chunk(text)
}

// ============================================================================
// Tests
// ============================================================================

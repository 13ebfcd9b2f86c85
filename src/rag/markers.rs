//! 엔티티 카드 마커 파서
//!
//! 모델 응답 안의 `[ENTITY_CARD_START] {json} [ENTITY_CARD_END]` 블록을
//! 순서대로 찾아 이벤트로 검증합니다. 잘못된 블록은 건너뜁니다.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::extraction::{parse_model_json, validate_event, ExtractedEvent};

pub const CARD_START: &str = "[ENTITY_CARD_START]";
pub const CARD_END: &str = "[ENTITY_CARD_END]";

static CARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(?s){}(.*?){}",
        regex::escape(CARD_START),
        regex::escape(CARD_END)
    );
    Regex::new(&pattern).expect("valid entity card pattern")
});

/// 응답에서 엔티티 카드 추출 (문서 순서 유지)
pub fn parse_entity_cards(text: &str, scope: &str, today: NaiveDate) -> Vec<ExtractedEvent> {
    let mut events = Vec::new();
    for (i, captures) in CARD_RE.captures_iter(text).enumerate() {
        let body = captures.get(1).map(|m| m.as_str()).unwrap_or_default();

        let value = match parse_model_json(body) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Skipping entity card #{}: {}", i + 1, e);
                continue;
            }
        };

        let source_url = value
            .get("link")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        match validate_event(&value, &source_url, scope, today) {
            Ok(event) => events.push(event),
            Err(e) => tracing::debug!("Rejected entity card #{}: {}", i + 1, e),
        }
    }

    events
}

/// 카드 블록을 제거한 본문
pub fn strip_entity_cards(text: &str) -> String {
    let stripped = CARD_RE.replace_all(text, "");
    // 제거 후 남은 연속 빈 줄 정리
    let mut out = String::with_capacity(stripped.len());
    let mut blank_run = 0;
    for line in stripped.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }

    out.trim().to_string()
}

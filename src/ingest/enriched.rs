//! 임베딩 대상 텍스트 레이아웃
//!
//! 고정 순서의 필드 블록 하나와 원문 블록 하나를 빈 줄로 구분합니다.
//! 청커가 두 블록을 문단 경계로 인식합니다.
//!
//! ```text
//! Title: ...
//! Description: ...
//! Date: YYYY-MM-DD
//! Time: ... | Not specified
//! Location: ...
//! Category: ...
//! Organizer: ...      (있을 때만)
//! Price: ...          (있을 때만)
//! Town: {scope}
//! Link: ...
//! Tags: a, b
//!
//! FULL CONTENT:
//! ...
//! ```

use crate::extraction::ExtractedEvent;

const NOT_SPECIFIED: &str = "Not specified";

/// 이벤트 → 임베딩용 확장 텍스트
pub fn enriched_content(event: &ExtractedEvent, scope: &str) -> String {
    let mut lines = vec![
        format!("Title: {}", event.title),
        format!("Description: {}", event.description),
        format!("Date: {}", event.date.format("%Y-%m-%d")),
        format!("Time: {}", event.time.as_deref().unwrap_or(NOT_SPECIFIED)),
        format!("Location: {}", event.location),
        format!("Category: {}", event.category),
    ];

    if let Some(organizer) = &event.organizer {
        lines.push(format!("Organizer: {}", organizer));
    }
    if let Some(price) = &event.price {
        lines.push(format!("Price: {}", price));
    }

    lines.push(format!("Town: {}", scope));
    lines.push(format!("Link: {}", event.link));
    lines.push(format!("Tags: {}", event.tags.join(", ")));

    format!("{}\n\nFULL CONTENT:\n{}", lines.join("\n"), event.full_content)
}

//! 이벤트 엔티티 - 스키마 검증, 기본값, 중복 키
//!
//! 언어 모델이 돌려준 JSON 객체 하나를 `ExtractedEvent`로 바꿉니다.
//! 실패는 `ValidationError`로 돌려주고 호출자가 건너뛰며 집계합니다.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

pub const DEFAULT_LOCATION: &str = "Location not specified";
pub const DEFAULT_DESCRIPTION: &str = "No description";
pub const DEFAULT_CATEGORY: &str = "general";
pub const DEFAULT_CONFIDENCE: f32 = 0.9;

/// 키워드 → 태그 규칙 (앞선 규칙이 카테고리 분류에도 우선)
const TAG_RULES: &[(&[&str], &str)] = &[
    (&["concierto", "música", "musica", "concert"], "música"),
    (&["teatro", "obra"], "teatro"),
    (&["danza", "baile"], "danza"),
    (&["cine", "película", "pelicula"], "cine"),
    (&["exposición", "exposicion", "museo"], "arte"),
    (&["festival", "fiesta"], "festival"),
    (&["deporte", "deportivo", "carrera"], "deporte"),
    (&["gastronom", "comida"], "gastronomía"),
    (&["niños", "infantil", "familia"], "familia"),
    (&["gratis", "gratuito", "gratuita"], "gratis"),
];

// ============================================================================
// ExtractedEvent
// ============================================================================

/// 검증된 이벤트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEvent {
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    pub time: Option<String>,
    pub location: String,
    pub category: String,
    pub tags: Vec<String>,
    pub link: String,
    pub price: Option<String>,
    pub organizer: Option<String>,
    pub image_url: Option<String>,
    /// 이벤트 관련 원문 전체 (없으면 설명)
    pub full_content: String,
    pub confidence: f32,
    pub dedup_key: String,
    pub source_url: String,
}

impl ExtractedEvent {
    /// 저장용 결정적 ID
    pub fn source_id(&self, scope: &str) -> String {
        source_id(scope, &self.dedup_key)
    }
}

// ============================================================================
// Validation
// ============================================================================

/// JSON 값 하나를 이벤트로 검증
///
/// - `title`, `date`는 필수 (빈 문자열도 누락으로 취급)
/// - `date`가 `today`보다 이전이면 거부 (날짜 단위 비교)
/// - 나머지 필드는 기본값 적용
pub fn validate_event(
    value: &Value,
    source_url: &str,
    scope: &str,
    today: NaiveDate,
) -> Result<ExtractedEvent, ValidationError> {
    let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

    let title = required_string(obj, "title")?;
    let raw_date = required_string(obj, "date")?;
    let date = parse_date(&raw_date).ok_or_else(|| ValidationError::InvalidDate(raw_date.clone()))?;

    if date < today {
        return Err(ValidationError::PastDate { date, today });
    }

    let description =
        optional_string(obj, "description")?.unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
    let category = match optional_string(obj, "category")? {
        Some(c) => c,
        None => classify_category(&title, &description),
    };

    let tags = match optional_tags(obj)? {
        Some(tags) if !tags.is_empty() => dedup_preserving_order(tags),
        _ => generate_tags(&title, &description, &category),
    };

    let confidence = match obj.get("confidence") {
        None | Some(Value::Null) => DEFAULT_CONFIDENCE,
        Some(v) => v
            .as_f64()
            .map(|c| (c as f32).clamp(0.0, 1.0))
            .ok_or(ValidationError::InvalidType("confidence"))?,
    };

    let full_content = optional_string(obj, "fullContent")?.unwrap_or_else(|| description.clone());

    Ok(ExtractedEvent {
        dedup_key: dedup_key(scope, &title, date),
        time: optional_string(obj, "time")?,
        location: optional_string(obj, "location")?
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
        link: optional_string(obj, "link")?.unwrap_or_else(|| source_url.to_string()),
        price: optional_string(obj, "price")?,
        organizer: optional_string(obj, "organizer")?,
        image_url: optional_string(obj, "imageUrl")?,
        source_url: source_url.to_string(),
        title,
        description,
        date,
        category,
        tags,
        full_content,
        confidence,
    })
}

fn required_string(obj: &Map<String, Value>, field: &'static str) -> Result<String, ValidationError> {
    optional_string(obj, field)?.ok_or(ValidationError::MissingField(field))
}

/// 문자열 필드 (숫자는 문자열로 변환, 공백만 있으면 None)
fn optional_string(
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(ValidationError::InvalidType(field)),
    }
}

/// 태그: 문자열 배열 또는 쉼표 구분 문자열
fn optional_tags(obj: &Map<String, Value>) -> Result<Option<Vec<String>>, ValidationError> {
    match obj.get("tags") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        )),
        Some(Value::String(s)) => Ok(Some(
            s.split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        )),
        Some(_) => Err(ValidationError::InvalidType("tags")),
    }
}

/// 날짜 파싱 (YYYY-MM-DD, RFC3339, 날짜+시간)
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    None
}

// ============================================================================
// Dedup Key / IDs
// ============================================================================

/// 제목 정규화 (소문자, 영숫자 외 문자는 '-'로 접기)
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_dash = false;

    for ch in title.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }

    out
}

/// 중복 키 = scope | 정규화된 제목 | 날짜
pub fn dedup_key(scope: &str, title: &str, date: NaiveDate) -> String {
    format!("{}|{}|{}", scope, normalize_title(title), date.format("%Y-%m-%d"))
}

/// 중복 키에서 파생한 소스 ID
pub fn source_id(scope: &str, dedup_key: &str) -> String {
    let digest = Sha256::digest(dedup_key.as_bytes());
    let hex = format!("{:x}", digest);
    format!("event-{}-{}", normalize_title(scope), &hex[..16])
}

// ============================================================================
// Category / Tags
// ============================================================================

fn matched_rules(text: &str) -> impl Iterator<Item = &'static str> + '_ {
    TAG_RULES
        .iter()
        .filter(move |(keywords, _)| keywords.iter().any(|k| text.contains(k)))
        .map(|(_, tag)| *tag)
}

/// 제목과 설명으로 카테고리 추정 (규칙이 없으면 general)
pub fn classify_category(title: &str, description: &str) -> String {
    let text = format!("{} {}", title, description).to_lowercase();
    let category = matched_rules(&text)
        .find(|tag| *tag != "gratis" && *tag != "familia")
        .unwrap_or(DEFAULT_CATEGORY);
    category.to_string()
}

/// 규칙 기반 태그 생성 (없으면 카테고리 하나)
pub fn generate_tags(title: &str, description: &str, category: &str) -> Vec<String> {
    let text = format!("{} {} {}", title, description, category).to_lowercase();
    let tags: Vec<String> = matched_rules(&text).map(str::to_string).collect();

    if tags.is_empty() {
        vec![category.to_lowercase()]
    } else {
        dedup_preserving_order(tags)
    }
}

fn dedup_preserving_order(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter().filter(|t| seen.insert(t.clone())).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 10).unwrap()
    }

    #[test]
    fn test_validate_full_event() {
        let value = json!({
            "title": "  Concierto de Jazz ",
            "description": "Trío de jazz en directo",
            "date": "2026-05-20",
            "time": "21:00",
            "location": "Plaza Mayor",
            "price": 12,
            "tags": ["Música", "música", "noche"],
            "confidence": 1.7
        });

        let event = validate_event(&value, "https://vila.es/agenda", "villajoyosa", today()).unwrap();

        assert_eq!(event.title, "Concierto de Jazz");
        assert_eq!(event.date, NaiveDate::from_ymd_opt(2026, 5, 20).unwrap());
        assert_eq!(event.price.as_deref(), Some("12"));
        assert_eq!(event.link, "https://vila.es/agenda");
        assert_eq!(event.tags, vec!["música", "noche"]);
        assert_eq!(event.category, "música");
        assert_eq!(event.confidence, 1.0);
        assert_eq!(event.full_content, "Trío de jazz en directo");
        assert_eq!(event.dedup_key, "villajoyosa|concierto-de-jazz|2026-05-20");
    }

    #[test]
    fn test_validate_defaults() {
        let value = json!({"title": "Mercadillo", "date": "2026-05-10"});
        let event = validate_event(&value, "https://x", "villajoyosa", today()).unwrap();

        assert_eq!(event.location, DEFAULT_LOCATION);
        assert_eq!(event.description, DEFAULT_DESCRIPTION);
        assert_eq!(event.category, DEFAULT_CATEGORY);
        assert_eq!(event.tags, vec!["general"]);
        assert_eq!(event.confidence, DEFAULT_CONFIDENCE);
        assert!(event.time.is_none());
    }

    #[test]
    fn test_validate_rejections() {
        let t = today();
        assert_eq!(
            validate_event(&json!("text"), "", "s", t),
            Err(ValidationError::NotAnObject)
        );
        assert_eq!(
            validate_event(&json!({"date": "2026-06-01"}), "", "s", t),
            Err(ValidationError::MissingField("title"))
        );
        assert_eq!(
            validate_event(&json!({"title": "  ", "date": "2026-06-01"}), "", "s", t),
            Err(ValidationError::MissingField("title"))
        );
        assert_eq!(
            validate_event(&json!({"title": "A"}), "", "s", t),
            Err(ValidationError::MissingField("date"))
        );
        assert_eq!(
            validate_event(&json!({"title": "A", "date": "next friday"}), "", "s", t),
            Err(ValidationError::InvalidDate("next friday".into()))
        );
        assert_eq!(
            validate_event(&json!({"title": ["A"], "date": "2026-06-01"}), "", "s", t),
            Err(ValidationError::InvalidType("title"))
        );
        assert!(matches!(
            validate_event(&json!({"title": "A", "date": "2026-05-09"}), "", "s", t),
            Err(ValidationError::PastDate { .. })
        ));
    }

    #[test]
    fn test_past_date_compares_whole_days() {
        // 오늘 자정 이전 시각이 포함되어도 날짜가 오늘이면 허용
        let value = json!({"title": "Feria", "date": "2026-05-10T00:00:01+02:00"});
        assert!(validate_event(&value, "", "s", today()).is_ok());
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2026, 7, 4);
        assert_eq!(parse_date("2026-07-04"), expected);
        assert_eq!(parse_date("2026-07-04T18:30:00Z"), expected);
        assert_eq!(parse_date("2026-07-04 18:30"), expected);
        assert_eq!(parse_date("04/07/2026"), None);
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  Concierto: Jazz & Blues!! "), "concierto-jazz-blues");
        assert_eq!(normalize_title("Fiesta de San Juan"), "fiesta-de-san-juan");
        assert_eq!(normalize_title("Exposición Año 2026"), "exposición-año-2026");
    }

    #[test]
    fn test_source_id_deterministic() {
        let date = today();
        let a = source_id("villajoyosa", &dedup_key("villajoyosa", "Concierto", date));
        let b = source_id("villajoyosa", &dedup_key("villajoyosa", "CONCIERTO ", date));
        let c = source_id("benidorm", &dedup_key("benidorm", "Concierto", date));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("event-villajoyosa-"));
        assert_eq!(a.len(), "event-villajoyosa-".len() + 16);
    }

    #[test]
    fn test_generate_tags() {
        let tags = generate_tags("Cine de verano", "Película para toda la familia, entrada gratuita", "cine");
        assert_eq!(tags, vec!["cine", "familia", "gratis"]);
        assert_eq!(classify_category("Taller infantil de teatro", ""), "teatro");
    }

    #[test]
    fn test_classify_category_skips_audience_tags() {
        assert_eq!(classify_category("Mercado gratuito", "para toda la familia"), "general");
        assert_eq!(classify_category("Ruta", "Festival de cine"), "cine");
        assert_eq!(classify_category("", ""), DEFAULT_CATEGORY);
    }
}

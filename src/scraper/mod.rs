//! 웹 스크래퍼 모듈 - URL 콘텐츠 추출
//!
//! `Fetcher` 트레이트는 URL 하나의 원문 텍스트를 돌려주는 외부 협력자입니다.
//! `WebScraper`는 HTML을 받아 제목과 블록 단위 문단만 남긴 텍스트로 바꿉니다.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use crate::error::{PipelineError, Result};

const SERVICE: &str = "fetch";

/// 본문 후보 영역 (우선순위 순)
const ROOT_SELECTORS: [&str; 6] = [
    "article",
    "main",
    "[role=main]",
    ".content",
    "#content",
    "body",
];

/// 문단으로 취급할 블록 요소
const BLOCK_SELECTOR: &str = "h1, h2, h3, h4, p, li, dt, dd, time, address, td";

// ============================================================================
// Fetcher Trait
// ============================================================================

/// URL → 원문 텍스트
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// 스크랩된 콘텐츠
#[derive(Debug, Clone)]
pub struct ScrapedContent {
    /// 페이지 제목
    pub title: Option<String>,
    /// 문단 목록 (HTML 태그 제거됨)
    pub paragraphs: Vec<String>,
    /// 원본 URL
    pub url: String,
}

impl ScrapedContent {
    /// `제목\n\n문단\n\n문단…` 형태의 텍스트
    pub fn to_text(&self) -> String {
        let mut blocks: Vec<&str> = Vec::with_capacity(self.paragraphs.len() + 1);
        if let Some(title) = &self.title {
            blocks.push(title);
        }
        blocks.extend(self.paragraphs.iter().map(String::as_str));
        blocks.join("\n\n")
    }
}

// ============================================================================
// WebScraper
// ============================================================================

/// 웹 스크래퍼
pub struct WebScraper {
    client: reqwest::Client,
}

impl WebScraper {
    /// 새 스크래퍼 생성
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("civic-rag/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::external(SERVICE, format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self { client })
    }

    /// URL에서 콘텐츠 추출
    pub async fn scrape(&self, url: &str) -> Result<ScrapedContent> {
        url::Url::parse(url)
            .map_err(|e| PipelineError::external(SERVICE, format!("invalid url {}: {}", url, e)))?;

        tracing::info!("Scraping: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::external(SERVICE, format!("HTTP 요청 실패: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::external(
                SERVICE,
                format!("{} returned {}", url, status),
            ));
        }

        let html = response
            .text()
            .await
            .map_err(|e| PipelineError::external(SERVICE, format!("응답 본문 읽기 실패: {}", e)))?;

        Ok(parse_html(url, &html))
    }
}

#[async_trait]
impl Fetcher for WebScraper {
    async fn fetch(&self, url: &str) -> Result<String> {
        Ok(self.scrape(url).await?.to_text())
    }
}

impl Default for WebScraper {
    fn default() -> Self {
        Self::new(Duration::from_secs(30)).unwrap_or_else(|e| {
            tracing::error!("WebScraper 생성 실패: {}", e);
            // 최소한의 클라이언트로 폴백
            Self {
                client: reqwest::Client::new(),
            }
        })
    }
}

// ============================================================================
// HTML Parsing
// ============================================================================

/// HTML 문서 → 제목 + 문단
pub fn parse_html(url: &str, html: &str) -> ScrapedContent {
    let document = Html::parse_document(html);

    ScrapedContent {
        title: extract_title(&document),
        paragraphs: extract_paragraphs(&document),
        url: url.to_string(),
    }
}

/// 제목 추출 (<title> → <h1>)
fn extract_title(document: &Html) -> Option<String> {
    for selector_str in ["title", "h1"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let title = collapse_whitespace(&element.text().collect::<String>());
                if !title.is_empty() {
                    return Some(title);
                }
            }
        }
    }
    None
}

/// 본문 영역을 고른 뒤 블록 요소 단위 문단 추출
fn extract_paragraphs(document: &Html) -> Vec<String> {
    let Some(root) = find_root(document) else {
        return vec![];
    };

    let mut seen = HashSet::new();
    let mut paragraphs = Vec::new();

    if let Ok(blocks) = Selector::parse(BLOCK_SELECTOR) {
        for element in root.select(&blocks) {
            let text = element_text(&element);
            if text.is_empty() || !seen.insert(text.clone()) {
                continue;
            }
            paragraphs.push(text);
        }
    }

    // 블록 요소가 없는 페이지는 전체 텍스트를 한 문단으로
    if paragraphs.is_empty() {
        let text = element_text(&root);
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }

    paragraphs
}

/// 본문 후보 중 텍스트가 충분한 첫 영역 (없으면 body)
fn find_root(document: &Html) -> Option<ElementRef<'_>> {
    for selector_str in ROOT_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                if element_text(&element).len() > 100 {
                    return Some(element);
                }
            }
        }
    }

    Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
}

/// 요소 텍스트 (script/style/noscript 제외, 공백 정리)
fn element_text(element: &ElementRef<'_>) -> String {
    let mut text = String::new();

    for node in element.descendants() {
        let Some(t) = node.value().as_text() else {
            continue;
        };

        let inside_ignored = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| matches!(e.name(), "script" | "style" | "noscript"))
                .unwrap_or(false)
        });
        if inside_ignored {
            continue;
        }

        text.push(' ');
        text.push_str(t);
    }

    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scraper_creation() {
        assert!(WebScraper::new(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_extract_title() {
        let html = r#"
            <html>
                <head><title>Agenda Cultural</title></head>
                <body><h1>Main Heading</h1></body>
            </html>
        "#;
        let content = parse_html("https://example.com", html);
        assert_eq!(content.title, Some("Agenda Cultural".to_string()));
    }

    #[test]
    fn test_extract_title_h1_fallback() {
        let html = r#"
            <html>
                <head><title></title></head>
                <body><h1>H1 Heading</h1></body>
            </html>
        "#;
        let content = parse_html("https://example.com", html);
        assert_eq!(content.title, Some("H1 Heading".to_string()));
    }

    #[test]
    fn test_paragraphs_from_article() {
        let html = r#"
            <html>
                <head><title>Eventos</title><style>.x { color: red }</style></head>
                <body>
                    <nav><p>Menú principal</p></nav>
                    <article>
                        <h2>Concierto de verano</h2>
                        <p>Sábado 12 de julio en la Plaza Mayor, a las 21:00 horas.</p>
                        <p>Entrada gratuita para todos los públicos del municipio.</p>
                        <script>var tracking = true;</script>
                    </article>
                    <footer><p>Footer</p></footer>
                </body>
            </html>
        "#;
        let content = parse_html("https://example.com/agenda", html);

        assert_eq!(
            content.paragraphs,
            vec![
                "Concierto de verano".to_string(),
                "Sábado 12 de julio en la Plaza Mayor, a las 21:00 horas.".to_string(),
                "Entrada gratuita para todos los públicos del municipio.".to_string(),
            ]
        );

        let text = content.to_text();
        assert!(text.starts_with("Eventos\n\nConcierto de verano\n\n"));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("Menú"));
    }

    #[test]
    fn test_paragraphs_fallback_to_body_text() {
        let html = "<html><body><div>Solo texto <b>suelto</b></div><script>x()</script></body></html>";
        let content = parse_html("https://example.com", html);
        assert_eq!(content.paragraphs, vec!["Solo texto suelto".to_string()]);
    }

    #[test]
    fn test_duplicate_blocks_skipped() {
        let html = "<html><body><ul><li><p>Repetido</p></li></ul><p>Repetido</p></body></html>";
        let content = parse_html("https://example.com", html);
        assert_eq!(content.paragraphs, vec!["Repetido".to_string()]);
    }

    #[tokio::test]
    async fn test_scrape_rejects_invalid_url() {
        let scraper = WebScraper::default();
        let result = scraper.scrape("not a url").await;
        assert!(matches!(result, Err(PipelineError::ExternalService { .. })));
    }
}

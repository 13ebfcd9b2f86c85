//! CLI 모듈
//!
//! civic-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{default_db_path, get_data_dir, has_api_key, PipelineConfig};
use crate::embedding::{create_embedder, EmbeddingClient};
use crate::extraction::ExtractionAgent;
use crate::ingest::{IngestionOrchestrator, IngestionResult};
use crate::knowledge::{DocumentStore, HybridRetriever, ParagraphChunker, SqliteStore};
use crate::llm::GeminiGenerator;
use crate::rag::RagSynthesizer;
use crate::scraper::WebScraper;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "civic-rag")]
#[command(version, about = "지자체 행사 정보 수집 및 RAG 질의 도구", long_about = None)]
pub struct Cli {
    /// SQLite 파일 경로 (기본: ~/.civic-rag/knowledge.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// URL에서 행사를 추출해 지식베이스에 저장
    Ingest {
        /// 대상 도시 (scope)
        #[arg(short, long)]
        scope: String,

        /// 수집할 URL (여러 번 지정 가능)
        #[arg(short, long = "url", required = true)]
        urls: Vec<String>,

        /// 수집 전에 기존 데이터 정리
        #[arg(long)]
        cleanup: bool,
    },

    /// 도시의 수집 데이터 삭제
    Cleanup {
        #[arg(short, long)]
        scope: String,
    },

    /// 도시별 통계
    Stats {
        #[arg(short, long)]
        scope: String,
    },

    /// 질문하기
    Ask {
        #[arg(short, long)]
        scope: String,

        /// 질문
        query: String,

        /// 가장 최근 대화를 이어서 질문
        #[arg(short = 'c', long = "continue")]
        continue_last: bool,
    },

    /// 최근 대화 기록
    History {
        #[arg(short, long)]
        scope: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// pending/error 상태 소스 재임베딩
    Reembed {
        #[arg(short, long)]
        scope: String,
    },

    /// 소스가 없는 청크 정리
    Purge {
        #[arg(short, long)]
        scope: String,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let db = cli.db.unwrap_or_else(default_db_path);

    match cli.command {
        Commands::Ingest {
            scope,
            urls,
            cleanup,
        } => cmd_ingest(&db, &scope, &urls, cleanup).await,
        Commands::Cleanup { scope } => cmd_cleanup(&db, &scope).await,
        Commands::Stats { scope } => cmd_stats(&db, &scope).await,
        Commands::Ask {
            scope,
            query,
            continue_last,
        } => cmd_ask(&db, &scope, &query, continue_last).await,
        Commands::History { scope, limit } => cmd_history(&db, &scope, limit).await,
        Commands::Reembed { scope } => cmd_reembed(&db, &scope).await,
        Commands::Purge { scope } => cmd_purge(&db, &scope).await,
        Commands::Status => cmd_status(&db).await,
    }
}

// ============================================================================
// Service Wiring
// ============================================================================

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

fn load_config() -> Result<PipelineConfig> {
    let config = PipelineConfig::from_env().context("설정 로드 실패")?;
    config.validate().context("잘못된 설정")?;
    Ok(config)
}

fn open_store(db: &Path, config: &PipelineConfig) -> Result<Arc<dyn DocumentStore>> {
    let store = SqliteStore::open(db)
        .with_context(|| format!("SqliteStore 열기 실패: {}", db.display()))?
        .with_batch_limit(config.ingest.commit_batch_size);
    Ok(Arc::new(store))
}

fn embedder(config: &PipelineConfig) -> Result<Arc<EmbeddingClient>> {
    Ok(Arc::new(
        create_embedder(&config.embedding).context("임베딩 클라이언트 생성 실패")?,
    ))
}

fn orchestrator(db: &Path) -> Result<IngestionOrchestrator> {
    require_api_key()?;
    let config = load_config()?;
    let store = open_store(db, &config)?;

    let llm = GeminiGenerator::from_env(config.llm.clone()).context("언어 모델 생성 실패")?;
    let agent = ExtractionAgent::new(Arc::new(llm), &config.ingest, &config.llm);
    let fetcher = WebScraper::new(config.ingest.fetch_timeout).context("WebScraper 생성 실패")?;

    Ok(IngestionOrchestrator::new(
        store,
        Arc::new(fetcher),
        agent,
        embedder(&config)?,
        ParagraphChunker::new(config.chunk.clone()),
        config.ingest,
    ))
}

fn synthesizer(db: &Path) -> Result<RagSynthesizer> {
    require_api_key()?;
    let config = load_config()?;
    let store = open_store(db, &config)?;

    let retriever = HybridRetriever::new(store.clone(), embedder(&config)?, config.search.clone());
    let llm = GeminiGenerator::from_env(config.llm.clone()).context("언어 모델 생성 실패")?;

    Ok(RagSynthesizer::new(retriever, Arc::new(llm), store, &config.llm))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 수집 명령어 (ingest)
async fn cmd_ingest(db: &Path, scope: &str, urls: &[String], cleanup: bool) -> Result<()> {
    let orchestrator = orchestrator(db)?;

    println!("[*] {} 수집 시작: URL {} 개", scope, urls.len());
    if cleanup {
        println!("[*] 기존 데이터 정리 후 수집합니다");
    }

    let result = orchestrator
        .ingest(scope, urls, cleanup)
        .await
        .context("수집 실패")?;

    print_ingestion_result(&result);
    Ok(())
}

fn print_ingestion_result(result: &IngestionResult) {
    println!();
    if let Some(cleaned) = result.cleaned {
        println!("[OK] 정리: {} 문서 삭제", cleaned);
    }
    println!("[OK] 처리된 URL: {}", result.urls_processed);
    println!(
        "     추출 {} / 신규 {} / 갱신 {} / 제외 {} / 임베딩 {}",
        result.entities_extracted,
        result.entities_saved,
        result.entities_updated,
        result.entities_rejected,
        result.entities_embedded
    );

    if result.timed_out {
        println!("[!] 실행 시간 상한에 도달해 부분 결과만 저장되었습니다");
        println!("    남은 항목은 `civic-rag reembed`로 이어서 처리할 수 있습니다");
    }

    if !result.errors.is_empty() {
        println!("[!] 에러 {} 건:", result.errors.len());
        for error in &result.errors {
            println!("    - {}", truncate_text(error, 160));
        }
    }
}

/// 정리 명령어 (cleanup)
async fn cmd_cleanup(db: &Path, scope: &str) -> Result<()> {
    let orchestrator = orchestrator(db)?;
    let result = orchestrator.cleanup(scope).await.context("정리 실패")?;

    println!(
        "[OK] {} 정리 완료: 소스 {}, 청크 {} (총 {} 문서)",
        scope,
        result.sources_deleted,
        result.chunks_deleted,
        result.deleted()
    );
    Ok(())
}

/// 통계 명령어 (stats) - API 키 없이 동작
async fn cmd_stats(db: &Path, scope: &str) -> Result<()> {
    let config = load_config()?;
    let store = open_store(db, &config)?;
    let stats = store.stats(scope).await.context("통계 조회 실패")?;

    println!("[OK] {} 통계", scope);
    println!("     소스: {} (임베딩 보유 {})", stats.total_sources, stats.with_embeddings);
    println!("     청크: {}", stats.total_chunks);
    println!(
        "     상태: pending {} / embedded {} / error {}",
        stats.pending, stats.embedded, stats.error
    );
    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(db: &Path, scope: &str, query: &str, continue_last: bool) -> Result<()> {
    let rag = synthesizer(db)?;

    let history = if continue_last {
        rag.conversations(scope, 1)
            .await
            .context("대화 기록 조회 실패")?
            .into_iter()
            .next()
            .map(|turn| turn.messages)
            .unwrap_or_default()
    } else {
        vec![]
    };

    println!("[*] 질문 중: \"{}\"", query);

    let answer = rag.answer(scope, query, &history).await.context("답변 생성 실패")?;

    println!();
    println!("{}", answer.prose);

    if !answer.entities.is_empty() {
        println!();
        println!("[OK] 행사 {} 건:", answer.entities.len());
        for event in &answer.entities {
            println!(
                "  - {} | {} {} | {}",
                event.title,
                event.date,
                event.time.as_deref().unwrap_or(""),
                event.location
            );
            if !event.link.is_empty() {
                println!("    {}", event.link);
            }
        }
    }

    if !answer.sources_used.is_empty() {
        println!();
        println!("[*] 참고한 소스:");
        for usage in &answer.sources_used {
            println!(
                "  - [{:.0}%] {}",
                usage.similarity * 100.0,
                truncate_text(&usage.preview, 80)
            );
        }
    }

    if answer.conversation_id.is_none() {
        println!();
        println!("[!] 대화 기록 저장에 실패했습니다");
    }

    Ok(())
}

/// 대화 기록 명령어 (history) - API 키 없이 동작
async fn cmd_history(db: &Path, scope: &str, limit: usize) -> Result<()> {
    let config = load_config()?;
    let store = open_store(db, &config)?;
    let turns = store
        .list_conversations(scope, limit)
        .await
        .context("대화 기록 조회 실패")?;

    if turns.is_empty() {
        println!("[!] 저장된 대화가 없습니다.");
        return Ok(());
    }

    println!("[OK] 최근 대화 ({} 건):\n", turns.len());
    for turn in turns {
        println!(
            "  {} | 메시지 {} | 소스 {}",
            turn.created_at.format("%Y-%m-%d %H:%M"),
            turn.messages.len(),
            turn.sources_used.len()
        );
        for message in turn.messages.iter().rev().take(2).rev() {
            println!(
                "    {}: {}",
                message.role.as_str(),
                truncate_text(&message.content, 100)
            );
        }
        println!();
    }

    Ok(())
}

/// 재임베딩 명령어 (reembed)
async fn cmd_reembed(db: &Path, scope: &str) -> Result<()> {
    let orchestrator = orchestrator(db)?;
    let result = orchestrator.reembed(scope).await.context("재임베딩 실패")?;

    if result.attempted == 0 {
        println!("[OK] 재임베딩할 소스가 없습니다");
    } else {
        println!(
            "[OK] 재임베딩: 시도 {}, 성공 {}, 실패 {}",
            result.attempted, result.succeeded, result.failed
        );
    }
    Ok(())
}

/// 고아 청크 정리 명령어 (purge)
async fn cmd_purge(db: &Path, scope: &str) -> Result<()> {
    let orchestrator = orchestrator(db)?;
    let purged = orchestrator
        .purge_orphan_chunks(scope)
        .await
        .context("고아 청크 정리 실패")?;

    println!("[OK] 고아 청크 {} 개 삭제", purged);
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(db: &Path) -> Result<()> {
    println!("civic-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());
    println!("[*] 데이터베이스: {}", db.display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match PipelineConfig::from_env().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => {
            println!(
                "[OK] 설정: 청크 {}자, 임베딩 배치 {}, 유사도 임계값 {}, top-k {}, 검색 {}",
                config.chunk.max_characters,
                config.embedding.batch_size,
                config.search.similarity_threshold,
                config.search.top_k,
                if config.search.hybrid { "하이브리드" } else { "벡터" }
            );
        }
        Err(e) => println!("[!] 설정 오류: {}", e),
    }

    if db.exists() {
        match std::fs::metadata(db) {
            Ok(meta) => println!("[OK] DB 크기: {}", format_bytes(meta.len() as usize)),
            Err(e) => tracing::debug!("DB 메타데이터 조회 실패: {}", e),
        }
    } else {
        println!("[!] 데이터베이스가 아직 없습니다 (첫 ingest 시 생성)");
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

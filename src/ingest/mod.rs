//! 수집 모듈 - fetch → 추출 → 청킹 → 임베딩 → 업서트
//!
//! URL마다 원문을 받아 이벤트를 추출하고, 이벤트별 확장 텍스트를
//! 청킹/임베딩해서 저장소에 업서트합니다.
//!
//! 처리 순서 (URL 단위):
//! 1. fetch + 추출 (실패 시 해당 URL만 건너뜀)
//! 2. 이번 실행의 모든 이벤트를 `pending` 상태로 업서트
//! 3. 이벤트별 청킹 + 임베딩 → `embedded` 또는 `error`
//!
//! 소스마다 임베딩이 끝나는 즉시 커밋하므로, 실행 상한을 넘겨 중단되어도
//! 그때까지 끝난 소스는 저장되어 있습니다. 커밋에 실패한 소스는 `error`로
//! 표시하고 다음 소스로 넘어갑니다. `error` 기록마저 실패하면 저장소 장애로
//! 보고 실행 전체를 중단합니다.
//! 중단된 시점에 `pending`으로 남은 소스는 `reembed`로 복구합니다.

mod enriched;
mod locks;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::config::IngestConfig;
use crate::embedding::EmbeddingClient;
use crate::error::{with_timeout, Result};
use crate::extraction::{ExtractedEvent, ExtractionAgent};
use crate::knowledge::chunker::{Chunker, ParagraphChunker};
use crate::knowledge::store::{commit_grouped, DocumentStore, WriteOp};
use crate::knowledge::types::{
    Chunk, ProcessingStatus, ScopeStats, SourceDocument, SourceMetadata,
};
use crate::scraper::Fetcher;

pub use enriched::enriched_content;
pub use locks::{ScopeGuard, ScopeLocks};

// ============================================================================
// Results
// ============================================================================

/// 수집 실행 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionResult {
    /// fetch와 추출까지 끝난 URL 수
    pub urls_processed: usize,
    pub entities_extracted: usize,
    /// 새로 생성된 소스
    pub entities_saved: usize,
    /// 기존 소스를 갱신한 수
    pub entities_updated: usize,
    /// 검증 실패 + 중복
    pub entities_rejected: usize,
    pub entities_embedded: usize,
    /// 사전 정리로 삭제된 문서 수
    pub cleaned: Option<usize>,
    pub errors: Vec<String>,
    /// 실행 상한 초과로 중단됨
    pub timed_out: bool,
}

/// 정리 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupResult {
    pub sources_deleted: usize,
    pub chunks_deleted: usize,
}

impl CleanupResult {
    /// 삭제된 문서 총수 (소스 + 청크)
    pub fn deleted(&self) -> usize {
        self.sources_deleted + self.chunks_deleted
    }
}

/// 재임베딩 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReembedResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

// ============================================================================
// IngestionOrchestrator
// ============================================================================

/// 수집 오케스트레이터
pub struct IngestionOrchestrator {
    store: Arc<dyn DocumentStore>,
    fetcher: Arc<dyn Fetcher>,
    agent: ExtractionAgent,
    embedder: Arc<EmbeddingClient>,
    chunker: ParagraphChunker,
    config: IngestConfig,
    locks: ScopeLocks,
}

impl IngestionOrchestrator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        fetcher: Arc<dyn Fetcher>,
        agent: ExtractionAgent,
        embedder: Arc<EmbeddingClient>,
        chunker: ParagraphChunker,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            agent,
            embedder,
            chunker,
            config,
            locks: ScopeLocks::new(),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// URL 목록 수집
    ///
    /// 같은 스코프의 다른 수집/정리 작업이 끝날 때까지 기다립니다.
    /// `cleanup_before`면 정리가 완전히 끝난 뒤에 수집을 시작합니다.
    pub async fn ingest(
        &self,
        scope: &str,
        urls: &[String],
        cleanup_before: bool,
    ) -> Result<IngestionResult> {
        let _guard = self.locks.acquire(scope).await;
        let today = Utc::now().date_naive();
        let mut result = IngestionResult::default();

        tracing::info!(
            "Ingesting {} URLs for scope {} (cleanup: {})",
            urls.len(),
            scope,
            cleanup_before
        );

        if cleanup_before {
            let cleaned = self.cleanup_locked(scope).await?;
            result.cleaned = Some(cleaned.deleted());
        }

        let run = self.run(scope, urls, today, &mut result);
        match tokio::time::timeout(self.config.run_timeout, run).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                tracing::warn!(
                    "Ingestion for {} hit the {}s ceiling, returning partial results",
                    scope,
                    self.config.run_timeout.as_secs()
                );
                result.timed_out = true;
                result.errors.push(format!(
                    "run exceeded {}s ceiling",
                    self.config.run_timeout.as_secs()
                ));
            }
        }

        tracing::info!(
            "Ingestion done for {}: {} URLs, {} extracted, {} new, {} updated, {} errors",
            scope,
            result.urls_processed,
            result.entities_extracted,
            result.entities_saved,
            result.entities_updated,
            result.errors.len()
        );

        Ok(result)
    }

    async fn run(
        &self,
        scope: &str,
        urls: &[String],
        today: NaiveDate,
        result: &mut IngestionResult,
    ) -> Result<()> {
        let mut seen = HashSet::new();

        for (i, url) in urls.iter().enumerate() {
            if i > 0 && !self.config.url_pause.is_zero() {
                tokio::time::sleep(self.config.url_pause).await;
            }

            let events = match self.extract_url(scope, url, today, result).await {
                Some(events) => events,
                None => continue,
            };

            // 여러 URL에 같은 이벤트가 나오면 처음 것만 사용
            let before = events.len();
            let events: Vec<ExtractedEvent> = events
                .into_iter()
                .filter(|e| seen.insert(e.dedup_key.clone()))
                .collect();
            result.entities_rejected += before - events.len();

            if events.is_empty() {
                continue;
            }

            let documents = match self.upsert_pending(scope, &events, result).await {
                Ok(documents) => documents,
                Err(e) => {
                    tracing::error!("Storing pending sources from {} failed: {}", url, e);
                    result.errors.push(format!("{}: store failed: {}", url, e));
                    continue;
                }
            };
            self.embed_and_store(documents, result).await?;
        }

        Ok(())
    }

    /// URL 하나 fetch + 추출 (실패는 기록 후 None)
    async fn extract_url(
        &self,
        scope: &str,
        url: &str,
        today: NaiveDate,
        result: &mut IngestionResult,
    ) -> Option<Vec<ExtractedEvent>> {
        let text = match with_timeout("fetch", self.config.fetch_timeout, self.fetcher.fetch(url)).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Fetch failed for {}: {}", url, e);
                result.errors.push(format!("{}: {}", url, e));
                return None;
            }
        };

        let outcome = match self.agent.extract(&text, url, scope, today).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Extraction failed for {}: {}", url, e);
                result.errors.push(format!("{}: {}", url, e));
                return None;
            }
        };

        result.urls_processed += 1;
        result.entities_extracted += outcome.events.len();
        result.entities_rejected += outcome.stats.rejected();
        if outcome.stats.parse_failed > 0 {
            result
                .errors
                .push(format!("{}: unparseable extraction output", url));
        }

        Some(outcome.events)
    }

    /// 이벤트들을 pending 상태로 업서트
    ///
    /// 신규/갱신 건수는 커밋이 성공한 뒤에만 반영합니다.
    async fn upsert_pending(
        &self,
        scope: &str,
        events: &[ExtractedEvent],
        result: &mut IngestionResult,
    ) -> Result<Vec<SourceDocument>> {
        let now = Utc::now();
        let mut documents = Vec::with_capacity(events.len());
        let (mut saved, mut updated) = (0, 0);

        for event in events {
            let id = event.source_id(scope);
            let created_at = match self.store.get_source(&id).await? {
                Some(existing) => {
                    updated += 1;
                    existing.created_at
                }
                None => {
                    saved += 1;
                    now
                }
            };

            documents.push(SourceDocument {
                id,
                scope: scope.to_string(),
                content: enriched_content(event, scope),
                embedding: None,
                metadata: self.metadata_for(event),
                status: ProcessingStatus::Pending,
                error_message: None,
                created_at,
                updated_at: now,
            });
        }

        let groups = documents
            .iter()
            .map(|d| vec![WriteOp::PutSource(d.clone())])
            .collect();
        commit_grouped(self.store.as_ref(), groups, self.config.commit_batch_size).await?;
        result.entities_saved += saved;
        result.entities_updated += updated;

        Ok(documents)
    }

    fn metadata_for(&self, event: &ExtractedEvent) -> SourceMetadata {
        SourceMetadata {
            title: event.title.clone(),
            description: event.description.clone(),
            date: event.date,
            time: event.time.clone(),
            location: event.location.clone(),
            category: event.category.clone(),
            tags: event.tags.clone(),
            url: event.link.clone(),
            price: event.price.clone(),
            organizer: event.organizer.clone(),
            image_url: event.image_url.clone(),
            confidence: event.confidence,
            dedup_key: event.dedup_key.clone(),
            source_url: event.source_url.clone(),
            source_tag: self.config.source_tag.clone(),
        }
    }

    /// 소스별 청킹 + 임베딩 후 소스 단위로 바로 커밋
    ///
    /// 임베딩 실패나 커밋 실패는 해당 소스를 `error`로 표시하고 계속합니다.
    /// 카운터는 커밋이 성공한 소스만 셉니다.
    async fn embed_and_store(
        &self,
        documents: Vec<SourceDocument>,
        result: &mut IngestionResult,
    ) -> Result<ReembedResult> {
        let mut report = ReembedResult::default();

        for (i, document) in documents.into_iter().enumerate() {
            if i > 0 && !self.config.item_pause.is_zero() {
                tokio::time::sleep(self.config.item_pause).await;
            }

            report.attempted += 1;
            let fallback = document.clone();
            let (ops, failure) = match self.embed_document(document).await {
                Ok(ops) => (ops, None),
                Err((ops, message)) => (ops, Some(message)),
            };

            let committed =
                commit_grouped(self.store.as_ref(), vec![ops], self.config.commit_batch_size).await;
            match committed {
                Ok(_) => match failure {
                    None => {
                        report.succeeded += 1;
                        result.entities_embedded += 1;
                    }
                    Some(message) => {
                        report.failed += 1;
                        result.errors.push(message);
                    }
                },
                Err(e) => {
                    tracing::error!("Commit failed for {}: {}", fallback.title(), e);
                    report.failed += 1;
                    if let Some(message) = failure {
                        result.errors.push(message);
                    }
                    result
                        .errors
                        .push(format!("{}: store commit failed: {}", fallback.title(), e));
                    self.mark_error(fallback, &e.to_string()).await?;
                }
            }
        }

        Ok(report)
    }

    /// 커밋에 실패한 소스를 `error`로 기록 (청크 제거 포함)
    async fn mark_error(&self, mut document: SourceDocument, message: &str) -> Result<()> {
        let id = document.id.clone();
        document.embedding = None;
        document.status = ProcessingStatus::Error;
        document.error_message = Some(message.to_string());
        document.updated_at = Utc::now();

        let ops = vec![WriteOp::DeleteChunksOf(id.clone()), WriteOp::PutSource(document)];
        if let Err(e) =
            commit_grouped(self.store.as_ref(), vec![ops], self.config.commit_batch_size).await
        {
            tracing::error!("Could not mark {} as error, store unavailable: {}", id, e);
            return Err(e);
        }
        Ok(())
    }

    /// 소스 하나의 쓰기 연산 생성
    ///
    /// 성공/실패 모두 기존 청크를 먼저 지웁니다. 실패 시 `Err`에 상태를
    /// `error`로 바꾼 연산과 에러 메시지를 담습니다.
    async fn embed_document(
        &self,
        mut document: SourceDocument,
    ) -> std::result::Result<Vec<WriteOp>, (Vec<WriteOp>, String)> {
        let pieces = self.chunker.chunk(&document.content);

        // 소스 전체 텍스트 + 청크들을 한 번에 임베딩
        let mut texts = Vec::with_capacity(pieces.len() + 1);
        texts.push(document.content.clone());
        texts.extend(pieces.iter().cloned());

        let now = Utc::now();
        let mut ops = vec![WriteOp::DeleteChunksOf(document.id.clone())];

        match self.embedder.embed_all(&texts).await {
            Ok(mut vectors) => {
                let chunk_vectors = vectors.split_off(1);
                document.embedding = vectors.pop();
                document.status = ProcessingStatus::Embedded;
                document.error_message = None;
                document.updated_at = now;

                tracing::debug!(
                    "Embedded {} ({} chunks)",
                    document.title(),
                    pieces.len()
                );

                let chunks: Vec<Chunk> = pieces
                    .into_iter()
                    .zip(chunk_vectors)
                    .enumerate()
                    .map(|(idx, (content, embedding))| {
                        Chunk::new(&document.id, &document.scope, idx, content, embedding)
                    })
                    .collect();

                ops.push(WriteOp::PutSource(document));
                ops.extend(chunks.into_iter().map(WriteOp::PutChunk));
                Ok(ops)
            }
            Err(e) => {
                tracing::warn!("Embedding failed for {}: {}", document.title(), e);
                let message = format!("{}: embedding failed: {}", document.title(), e);

                document.embedding = None;
                document.status = ProcessingStatus::Error;
                document.error_message = Some(e.to_string());
                document.updated_at = now;

                ops.push(WriteOp::PutSource(document));
                Err((ops, message))
            }
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// 이 파이프라인이 만든 스코프의 소스와 청크를 모두 삭제
    pub async fn cleanup(&self, scope: &str) -> Result<CleanupResult> {
        let _guard = self.locks.acquire(scope).await;
        self.cleanup_locked(scope).await
    }

    async fn cleanup_locked(&self, scope: &str) -> Result<CleanupResult> {
        let sources: Vec<SourceDocument> = self
            .store
            .list_sources(scope)
            .await?
            .into_iter()
            .filter(|s| s.metadata.source_tag == self.config.source_tag)
            .collect();

        let mut chunks_by_source: HashMap<String, Vec<String>> = HashMap::new();
        for chunk in self.store.list_chunks(scope).await? {
            chunks_by_source
                .entry(chunk.source_id)
                .or_default()
                .push(chunk.id);
        }

        let mut result = CleanupResult::default();
        let mut groups = Vec::with_capacity(sources.len());

        for source in sources {
            let chunk_ids = chunks_by_source.remove(&source.id).unwrap_or_default();
            result.chunks_deleted += chunk_ids.len();
            result.sources_deleted += 1;

            let mut ops: Vec<WriteOp> = chunk_ids.into_iter().map(WriteOp::DeleteChunk).collect();
            ops.push(WriteOp::DeleteSource(source.id));
            groups.push(ops);
        }

        let report =
            commit_grouped(self.store.as_ref(), groups, self.config.commit_batch_size).await?;

        tracing::info!(
            "Cleanup for {}: {} sources, {} chunks deleted in {} commits",
            scope,
            result.sources_deleted,
            result.chunks_deleted,
            report.commits
        );

        Ok(result)
    }

    /// 스코프 통계
    pub async fn stats(&self, scope: &str) -> Result<ScopeStats> {
        self.store.stats(scope).await
    }

    /// `pending`/`error` 상태 소스의 청킹 + 임베딩 재실행
    pub async fn reembed(&self, scope: &str) -> Result<ReembedResult> {
        let _guard = self.locks.acquire(scope).await;

        let documents: Vec<SourceDocument> = self
            .store
            .list_sources(scope)
            .await?
            .into_iter()
            .filter(|s| s.status != ProcessingStatus::Embedded)
            .collect();

        if documents.is_empty() {
            tracing::info!("Nothing to re-embed for {}", scope);
            return Ok(ReembedResult::default());
        }

        tracing::info!("Re-embedding {} sources for {}", documents.len(), scope);

        let mut scratch = IngestionResult::default();
        let report = self.embed_and_store(documents, &mut scratch).await?;

        for error in &scratch.errors {
            tracing::warn!("Re-embed failure: {}", error);
        }

        Ok(report)
    }

    /// 소스가 없는 청크 삭제
    pub async fn purge_orphan_chunks(&self, scope: &str) -> Result<usize> {
        let _guard = self.locks.acquire(scope).await;

        let source_ids: HashSet<String> = self
            .store
            .list_sources(scope)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();

        let orphans: Vec<Vec<WriteOp>> = self
            .store
            .list_chunks(scope)
            .await?
            .into_iter()
            .filter(|c| !source_ids.contains(&c.source_id))
            .map(|c| vec![WriteOp::DeleteChunk(c.id)])
            .collect();

        let count = orphans.len();
        if count > 0 {
            commit_grouped(self.store.as_ref(), orphans, self.config.commit_batch_size).await?;
            tracing::info!("Purged {} orphan chunks for {}", count, scope);
        }

        Ok(count)
    }
}

// ============================================================================
// Tests
// ============================================================================

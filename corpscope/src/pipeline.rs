//! Generate-or-reuse report pipeline.
//!
//! For one subject: take the lock, serve the cached report if there is one,
//! otherwise search news, extract article text, generate a report through the
//! model selector and cache it. The lock is released on every exit path,
//! including a panic inside a collaborator.
//! Cache and lock outages degrade the request instead of failing it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use common::Config;

use crate::error::AnalysisError;
use crate::kv::KvStore;
use crate::llm::selector::ModelSelector;
use crate::llm::GenerationRequest;
use crate::lock::{DistributedLock, LockGuard};
use crate::news::NewsSearch;
use crate::prompts::{self, ChatTurn, SourceDocument};
use crate::scoring::{score_attention, AttentionScore};
use crate::scraping::TextExtractor;
use crate::subject::SubjectKey;

pub const MAX_QUESTION_CHARS: usize = 1000;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Must outlast search + extraction + model selection, or a second caller may regenerate
    pub lock_ttl: Duration,
    pub report_ttl: Duration,
    /// Extracted documents shorter than this are dropped
    pub min_document_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(120),
            report_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            min_document_chars: 100,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lock_ttl: config.pipeline.lock_ttl(),
            report_ttl: config.pipeline.report_ttl(),
            min_document_chars: config.scraping.min_document_chars(),
        }
    }
}

/// Outcome of a successful analysis
#[derive(Debug, Clone, Serialize)]
pub struct ReportResult {
    pub company: String,
    pub subject_key: String,
    pub report: String,
    /// Served from the cache rather than generated for this request
    pub cached: bool,
    /// `namespace/model` that generated the report; absent for cached reports
    pub model: Option<String>,
    pub attention: AttentionScore,
}

impl ReportResult {
    fn new(subject: &SubjectKey, report: String, cached: bool, model: Option<String>) -> Self {
        let attention = score_attention(&report);
        Self {
            company: subject.display().to_string(),
            subject_key: subject.key().to_string(),
            report,
            cached,
            model,
            attention,
        }
    }
}

pub struct ReportPipeline {
    store: Arc<dyn KvStore>,
    lock: DistributedLock,
    news: Arc<dyn NewsSearch>,
    extractor: Arc<dyn TextExtractor>,
    selector: ModelSelector,
    settings: PipelineSettings,
}

impl ReportPipeline {
    pub fn new(
        store: Arc<dyn KvStore>,
        news: Arc<dyn NewsSearch>,
        extractor: Arc<dyn TextExtractor>,
        selector: ModelSelector,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            lock: DistributedLock::new(store.clone()),
            store,
            news,
            extractor,
            selector,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn cache_configured(&self) -> bool {
        self.store.is_configured()
    }

    pub fn namespaces(&self) -> &[String] {
        self.selector.namespaces()
    }

    /// Serve or produce the report for `raw_subject`.
    pub async fn analyze(&self, raw_subject: &str) -> Result<ReportResult, AnalysisError> {
        let subject = SubjectKey::parse(raw_subject)?;

        let guard = self.acquire_lock(&subject).await?;
        let outcome = AssertUnwindSafe(self.generate_or_reuse(&subject))
            .catch_unwind()
            .await;
        if let Some(guard) = guard {
            self.lock.release(&guard).await;
        }
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                error!(subject = %subject, "analysis panicked; lock released");
                panic::resume_unwind(payload);
            }
        };

        match &outcome {
            Ok(result) => info!(subject = %subject, cached = result.cached, "analysis completed"),
            Err(e) => warn!(subject = %subject, kind = e.kind(), error = %e, "analysis failed"),
        }
        outcome
    }

    /// `Ok(None)` means proceed unguarded; contention is an error.
    async fn acquire_lock(&self, subject: &SubjectKey) -> Result<Option<LockGuard>, AnalysisError> {
        match self.lock.acquire(&subject.lock_key(), self.settings.lock_ttl).await {
            Ok(Some(guard)) => Ok(Some(guard)),
            Ok(None) if self.store.is_configured() => {
                info!(subject = %subject, "analysis already in progress; rejecting");
                Err(AnalysisError::Busy {
                    subject: subject.display().to_string(),
                })
            }
            Ok(None) => {
                warn!(subject = %subject, degraded = true, "lock backend not configured; proceeding without lock");
                Ok(None)
            }
            Err(e) => {
                warn!(subject = %subject, degraded = true, error = %e, "lock backend unavailable; proceeding without lock");
                Ok(None)
            }
        }
    }

    async fn generate_or_reuse(&self, subject: &SubjectKey) -> Result<ReportResult, AnalysisError> {
        let report_key = subject.report_key();

        match self.store.get(&report_key).await {
            Ok(Some(report)) if !report.trim().is_empty() => {
                info!(subject = %subject, "serving cached report");
                return Ok(ReportResult::new(subject, report, true, None));
            }
            Ok(_) => debug!(subject = %subject, "report cache miss"),
            Err(e) => warn!(subject = %subject, degraded = true, error = %e, "cache read failed; treating as miss"),
        }

        let sources = self.gather_sources(subject).await?;
        info!(subject = %subject, documents = sources.len(), "building report prompt");

        let prompt = prompts::report_prompt(subject.display(), &sources);
        let response = self.selector.generate(GenerationRequest::new(prompt)).await?;

        if let Err(e) = self
            .store
            .set_with_expiry(&report_key, &response.content, self.settings.report_ttl)
            .await
        {
            warn!(subject = %subject, degraded = true, error = %e, "failed to cache report");
        }

        let model = format!("{}/{}", response.namespace, response.model);
        Ok(ReportResult::new(subject, response.content, false, Some(model)))
    }

    /// Search, then extract every hit concurrently; keeps source order.
    async fn gather_sources(&self, subject: &SubjectKey) -> Result<Vec<SourceDocument>, AnalysisError> {
        let documents = self
            .news
            .search(subject.display())
            .await
            .map_err(|e| AnalysisError::Upstream(format!("news search failed: {:#}", e)))?;

        if documents.is_empty() {
            return Err(AnalysisError::NoSourceData {
                subject: subject.display().to_string(),
            });
        }

        let mut tasks = JoinSet::new();
        for (index, document) in documents.into_iter().enumerate() {
            let extractor = self.extractor.clone();
            tasks.spawn(async move {
                let text = extractor.extract(&document.url).await;
                (index, document, text)
            });
        }

        let mut extracted = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(item) => extracted.push(item),
                Err(e) => warn!(subject = %subject, error = %e, "document extraction task failed"),
            }
        }
        extracted.sort_by_key(|(index, _, _)| *index);

        let min_chars = self.settings.min_document_chars;
        let sources: Vec<SourceDocument> = extracted
            .into_iter()
            .filter_map(|(_, document, text)| {
                let len = text.trim().chars().count();
                if len < min_chars {
                    debug!(url = %document.url, chars = len, "discarding short document");
                    return None;
                }
                Some(SourceDocument {
                    url: document.url,
                    title: document.title,
                    text,
                })
            })
            .collect();

        if sources.is_empty() {
            return Err(AnalysisError::NoSourceData {
                subject: subject.display().to_string(),
            });
        }
        Ok(sources)
    }

    /// Answer a question about the cached report for `raw_subject`.
    pub async fn follow_up(
        &self,
        raw_subject: &str,
        question: &str,
        history: &[ChatTurn],
    ) -> Result<String, AnalysisError> {
        let subject = SubjectKey::parse(raw_subject)?;
        let question = question.trim();
        if question.is_empty() {
            return Err(AnalysisError::InputInvalid("question is required".to_string()));
        }
        if question.chars().count() > MAX_QUESTION_CHARS {
            return Err(AnalysisError::InputInvalid(format!(
                "question must be at most {} characters",
                MAX_QUESTION_CHARS
            )));
        }

        let report = match self.store.get(&subject.report_key()).await {
            Ok(Some(report)) if !report.trim().is_empty() => report,
            Ok(_) => {
                return Err(AnalysisError::ReportNotFound {
                    subject: subject.display().to_string(),
                })
            }
            Err(e) => {
                warn!(subject = %subject, degraded = true, error = %e, "cache read failed for follow-up");
                return Err(AnalysisError::ReportNotFound {
                    subject: subject.display().to_string(),
                });
            }
        };

        let prompt = prompts::follow_up_prompt(subject.display(), &report, history, question);
        let response = self.selector.generate(GenerationRequest::new(prompt)).await?;
        info!(subject = %subject, model = %response.model, "follow-up answered");
        Ok(response.content)
    }
}

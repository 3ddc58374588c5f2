//! Wiring of the concrete clients from configuration.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use common::{Config, Credentials};
use tracing::{info, warn};

use crate::kv::{KvStore, MemoryKvStore, RestKvClient};
use crate::llm::remote::GeminiClient;
use crate::llm::selector::ModelSelector;
use crate::news::NewsApiClient;
use crate::pipeline::{PipelineSettings, ReportPipeline};
use crate::scraping::WebTextExtractor;

/// Which key-value backend the service runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Rest,
    Memory,
    Disabled,
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheMode::Rest => "rest",
            CacheMode::Memory => "memory",
            CacheMode::Disabled => "disabled",
        })
    }
}

pub fn build_store(config: &Config, credentials: &Credentials) -> (Arc<dyn KvStore>, CacheMode) {
    if credentials.has_cache_backend() {
        let client = RestKvClient::new(credentials.cache_endpoint.clone(), credentials.cache_token.clone())
            .with_timeout(config.cache.timeout());
        info!(endpoint = ?credentials.cache_endpoint, "key-value store: REST backend");
        (Arc::new(client), CacheMode::Rest)
    } else if config.cache.in_memory.unwrap_or(false) {
        info!("key-value store: in-process (single instance only)");
        (Arc::new(MemoryKvStore::new()), CacheMode::Memory)
    } else {
        warn!(degraded = true, "key-value store not configured; running without cache and lock");
        (Arc::new(RestKvClient::unconfigured()), CacheMode::Disabled)
    }
}

pub fn build_model_client(config: &Config, credentials: &Credentials) -> GeminiClient {
    GeminiClient::new(config.model.api_url(), credentials.model_api_key.clone())
        .with_timeouts(config.model.list_timeout(), config.model.generate_timeout())
        .with_defaults(config.model.max_output_tokens(), config.model.temperature())
}

pub fn build_selector(config: &Config, credentials: &Credentials) -> ModelSelector {
    ModelSelector::new(
        Arc::new(build_model_client(config, credentials)),
        config.model.namespaces(),
        config.model.preferred(),
    )
}

/// Build the full pipeline; fails only on client construction errors.
pub fn build_pipeline(config: &Config, credentials: &Credentials) -> Result<(ReportPipeline, CacheMode)> {
    let (store, mode) = build_store(config, credentials);

    let news = NewsApiClient::new(
        config.news.api_url(),
        credentials.news_api_key.clone(),
        config.news.timeout(),
    )?
    .with_query_defaults(config.news.page_size(), config.news.language());

    let extractor = WebTextExtractor::new(
        config.scraping.timeout(),
        config.scraping.max_document_chars(),
        config.scraping.user_agent(),
    )?;

    let pipeline = ReportPipeline::new(
        store,
        Arc::new(news),
        Arc::new(extractor),
        build_selector(config, credentials),
        PipelineSettings::from_config(config),
    );
    Ok((pipeline, mode))
}

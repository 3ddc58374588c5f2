#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use corpscope::kv::{KvError, KvStore, MemoryKvStore};
use corpscope::llm::selector::ModelSelector;
use corpscope::llm::{
    GenerationRequest, GenerationResponse, ModelBackend, ModelDescriptor, ModelError, UsageMetadata,
};
use corpscope::news::{NewsDocument, NewsSearch};
use corpscope::pipeline::{PipelineSettings, ReportPipeline};
use corpscope::scraping::TextExtractor;
use tokio::sync::Semaphore;

/// News search returning a fixed list
#[derive(Default)]
pub struct FakeNews {
    documents: Vec<NewsDocument>,
    fail: bool,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
}

impl FakeNews {
    pub fn with_urls(urls: &[&str]) -> Self {
        Self {
            documents: urls
                .iter()
                .enumerate()
                .map(|(i, url)| {
                    let mut doc = NewsDocument::new(*url);
                    doc.title = Some(format!("Headline {}", i + 1));
                    doc
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Each search waits for one permit of `gate`
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NewsSearch for FakeNews {
    async fn search(&self, _subject: &str) -> anyhow::Result<Vec<NewsDocument>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await?;
        }
        if self.fail {
            anyhow::bail!("connection refused");
        }
        Ok(self.documents.clone())
    }
}

/// Extractor serving canned text per URL, optionally delayed
#[derive(Default)]
pub struct FakeExtractor {
    texts: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, text: impl Into<String>) -> Self {
        self.texts.insert(url.to_string(), text.into());
        self
    }

    pub fn slow_page(mut self, url: &str, text: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self.page(url, text)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, url: &str) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        self.texts.get(url).cloned().unwrap_or_default()
    }
}

/// Scripted answer for one (namespace, model) pair
#[derive(Debug, Clone)]
pub enum Scripted {
    Text(String),
    NotFound,
    Auth,
    Quota,
    Malformed,
    Panic,
}

/// Model API double; unscripted models answer "not found".
#[derive(Default)]
pub struct FakeModels {
    listings: HashMap<String, Option<Vec<ModelDescriptor>>>,
    outcomes: HashMap<(String, String), Scripted>,
    attempts: Mutex<Vec<(String, String)>>,
    prompts: Mutex<Vec<String>>,
}

impl FakeModels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: &str, models: Vec<ModelDescriptor>) -> Self {
        self.listings.insert(namespace.to_string(), Some(models));
        self
    }

    pub fn failing_namespace(mut self, namespace: &str) -> Self {
        self.listings.insert(namespace.to_string(), None);
        self
    }

    pub fn outcome(mut self, namespace: &str, model: &str, outcome: Scripted) -> Self {
        self.outcomes
            .insert((namespace.to_string(), model.to_string()), outcome);
        self
    }

    pub fn attempts(&self) -> Vec<(String, String)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempted_models(&self) -> Vec<String> {
        self.attempts().into_iter().map(|(_, m)| m).collect()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ModelBackend for FakeModels {
    async fn list_models(&self, namespace: &str) -> Result<Vec<ModelDescriptor>, ModelError> {
        match self.listings.get(namespace) {
            Some(Some(models)) => Ok(models.clone()),
            Some(None) => Err(ModelError::Upstream {
                status: 500,
                message: "listing unavailable".to_string(),
            }),
            None => Err(ModelError::NotFound {
                namespace: namespace.to_string(),
                model: "*".to_string(),
                message: "unknown namespace".to_string(),
            }),
        }
    }

    async fn generate(
        &self,
        namespace: &str,
        model: &str,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ModelError> {
        self.attempts
            .lock()
            .unwrap()
            .push((namespace.to_string(), model.to_string()));
        self.prompts.lock().unwrap().push(request.prompt);

        let outcome = self
            .outcomes
            .get(&(namespace.to_string(), model.to_string()))
            .cloned()
            .unwrap_or(Scripted::NotFound);

        match outcome {
            Scripted::Text(content) => Ok(GenerationResponse {
                content,
                usage: UsageMetadata::default(),
                model: model.to_string(),
                namespace: namespace.to_string(),
            }),
            Scripted::NotFound => Err(ModelError::NotFound {
                namespace: namespace.to_string(),
                model: model.to_string(),
                message: "model not found".to_string(),
            }),
            Scripted::Auth => Err(ModelError::Auth {
                status: 401,
                message: "API key not valid".to_string(),
            }),
            Scripted::Quota => Err(ModelError::Quota {
                message: "quota exceeded".to_string(),
            }),
            Scripted::Malformed => Err(ModelError::Malformed("no candidates".to_string())),
            Scripted::Panic => panic!("model backend crashed"),
        }
    }
}

/// Backend that is configured but never reachable
pub struct UnreachableStore;

fn unreachable() -> KvError {
    KvError::Backend {
        status: 503,
        message: "service unavailable".to_string(),
    }
}

#[async_trait::async_trait]
impl KvStore for UnreachableStore {
    fn is_configured(&self) -> bool {
        true
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, KvError> {
        Err(unreachable())
    }

    async fn set_with_expiry(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), KvError> {
        Err(unreachable())
    }

    async fn delete(&self, _key: &str) -> Result<(), KvError> {
        Err(unreachable())
    }

    async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool, KvError> {
        Err(unreachable())
    }
}

/// In-memory store that records every expiring write
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryKvStore,
    writes: Mutex<Vec<(String, Duration)>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<(String, Duration)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl KvStore for RecordingStore {
    fn is_configured(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.inner.get(key).await
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        self.writes.lock().unwrap().push((key.to_string(), ttl));
        self.inner.set_with_expiry(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.inner.delete(key).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        self.inner.delete_if_equals(key, expected).await
    }
}

pub fn text_of_len(prefix: &str, len: usize) -> String {
    let mut text = prefix.to_string();
    while text.chars().count() < len {
        text.push('x');
    }
    text
}

pub fn selector(models: Arc<FakeModels>, preferred: &[&str]) -> ModelSelector {
    ModelSelector::new(
        models,
        vec!["v1beta".to_string(), "v1".to_string()],
        preferred.iter().map(|s| s.to_string()).collect(),
    )
}

pub fn pipeline(
    store: Arc<dyn KvStore>,
    news: Arc<FakeNews>,
    extractor: Arc<FakeExtractor>,
    models: Arc<FakeModels>,
) -> ReportPipeline {
    ReportPipeline::new(
        store,
        news,
        extractor,
        selector(models, &["modelA"]),
        PipelineSettings::default(),
    )
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Operation a model must support to be used for report generation
pub const GENERATE_CONTENT: &str = "generateContent";

/// Core trait for the upstream generation API.
///
/// Models are grouped in version namespaces (`v1beta`, `v1`, ...); both calls
/// take the namespace explicitly so callers can probe several of them.
#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync {
    /// List models advertised in `namespace`
    async fn list_models(&self, namespace: &str) -> Result<Vec<ModelDescriptor>, ModelError>;

    /// Generate a completion from `model` in `namespace`
    async fn generate(
        &self,
        namespace: &str,
        model: &str,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ModelError>;
}

/// One model as advertised upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Bare model id, without the `models/` prefix
    pub name: String,
    /// Declared operations; empty when upstream did not say
    #[serde(default)]
    pub supported_operations: Vec<String>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supported_operations: Vec::new(),
        }
    }

    pub fn with_operations<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_operations = operations.into_iter().map(Into::into).collect();
        self
    }

    /// Missing capability metadata counts as support.
    pub fn supports(&self, operation: &str) -> bool {
        self.supported_operations.is_empty()
            || self.supported_operations.iter().any(|op| op == operation)
    }
}

/// Request structure for generation
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_output_tokens: None,
            temperature: None,
        }
    }
}

/// Response from generation
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
    pub namespace: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Failures of a single model API call.
///
/// Only [`ModelError::NotFound`] lets the selector move on to another model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model '{model}' not available in {namespace}: {message}")]
    NotFound {
        namespace: String,
        model: String,
        message: String,
    },

    #[error("model API rejected the credentials ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("model API quota exhausted: {message}")]
    Quota { message: String },

    #[error("malformed model API response: {0}")]
    Malformed(String),

    #[error("model API request timed out after {0:?}")]
    Timeout(Duration),

    #[error("model API error {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("model API transport error: {0}")]
    Transport(String),
}

impl ModelError {
    pub fn is_skippable(&self) -> bool {
        matches!(self, ModelError::NotFound { .. })
    }
}

pub mod remote;
pub mod selector;

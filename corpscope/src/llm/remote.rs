use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{
    GenerationRequest, GenerationResponse, ModelBackend, ModelDescriptor, ModelError, UsageMetadata,
};

/// Upper bound on `nextPageToken` round trips when listing models
const MAX_LIST_PAGES: usize = 5;

/// Remote provider for the Google Generative Language REST API
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    list_timeout: Duration,
    generate_timeout: Duration,
    default_max_output_tokens: u32,
    default_temperature: f32,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            list_timeout: Duration::from_secs(8),
            generate_timeout: Duration::from_secs(30),
            default_max_output_tokens: 2048,
            default_temperature: 0.4,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeouts(mut self, list_timeout: Duration, generate_timeout: Duration) -> Self {
        self.list_timeout = list_timeout;
        self.generate_timeout = generate_timeout;
        self
    }

    pub fn with_defaults(mut self, max_output_tokens: u32, temperature: f32) -> Self {
        self.default_max_output_tokens = max_output_tokens;
        self.default_temperature = temperature;
        self
    }
}

#[async_trait::async_trait]
impl ModelBackend for GeminiClient {
    async fn list_models(&self, namespace: &str) -> Result<Vec<ModelDescriptor>, ModelError> {
        let url = format!("{}/{}/models", self.base_url, namespace);
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let mut query: Vec<(&str, String)> = vec![("pageSize", "1000".to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = tokio::time::timeout(
                self.list_timeout,
                self.client
                    .get(&url)
                    .header("x-goog-api-key", &self.api_key)
                    .query(&query)
                    .send(),
            )
            .await
            .map_err(|_| ModelError::Timeout(self.list_timeout))?
            .map_err(|e| ModelError::Transport(e.to_string()))?;

            let status = response.status();
            let body = tokio::time::timeout(self.list_timeout, response.text())
                .await
                .map_err(|_| ModelError::Timeout(self.list_timeout))?
                .map_err(|e| ModelError::Transport(e.to_string()))?;
            if !status.is_success() {
                return Err(classify_error(status, &body, namespace, "*"));
            }

            let page: ListModelsResponse = serde_json::from_str(&body)
                .map_err(|e| ModelError::Malformed(format!("model list: {}", e)))?;

            models.extend(page.models.into_iter().map(|m| {
                ModelDescriptor::new(bare_model_name(&m.name))
                    .with_operations(m.supported_generation_methods)
            }));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(namespace, count = models.len(), "listed models");
        Ok(models)
    }

    async fn generate(
        &self,
        namespace: &str,
        model: &str,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ModelError> {
        let url = format!(
            "{}/{}/models/{}:generateContent",
            self.base_url,
            namespace,
            bare_model_name(model)
        );

        let req_body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(request.prompt),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: Some(
                    request.max_output_tokens.unwrap_or(self.default_max_output_tokens),
                ),
                temperature: Some(request.temperature.unwrap_or(self.default_temperature)),
            },
        };

        let response = tokio::time::timeout(
            self.generate_timeout,
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&req_body)
                .send(),
        )
        .await
        .map_err(|_| ModelError::Timeout(self.generate_timeout))?
        .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        let body = tokio::time::timeout(self.generate_timeout, response.text())
            .await
            .map_err(|_| ModelError::Timeout(self.generate_timeout))?
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_error(status, &body, namespace, model));
        }

        let resp_body: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| ModelError::Malformed(format!("generateContent: {}", e)))?;

        let content = resp_body
            .candidates
            .iter()
            .flat_map(|c| c.content.iter())
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            let reason = resp_body
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidate text".to_string());
            return Err(ModelError::Malformed(format!("empty generation ({})", reason)));
        }

        let usage = resp_body
            .usage_metadata
            .map(|u| UsageMetadata {
                prompt_tokens: u.prompt_token_count.unwrap_or(0),
                completion_tokens: u.candidates_token_count.unwrap_or(0),
                total_tokens: u.total_token_count.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(GenerationResponse {
            content,
            usage,
            model: bare_model_name(model).to_string(),
            namespace: namespace.to_string(),
        })
    }
}

fn bare_model_name(name: &str) -> &str {
    name.strip_prefix("models/").unwrap_or(name)
}

/// Map a non-success response onto the error classes the selector acts on.
pub fn classify_error(status: StatusCode, body: &str, namespace: &str, model: &str) -> ModelError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|e| e.error)
        .unwrap_or_default();
    let message = detail.message.unwrap_or_else(|| body.to_string());
    let api_status = detail.status.unwrap_or_default();
    let lowered = message.to_lowercase();

    let not_found = status == StatusCode::NOT_FOUND
        || api_status == "NOT_FOUND"
        || (status == StatusCode::BAD_REQUEST
            && (lowered.contains("not found") || lowered.contains("not supported")));

    if lowered.contains("api key not valid")
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || api_status == "UNAUTHENTICATED"
        || api_status == "PERMISSION_DENIED"
    {
        ModelError::Auth {
            status: status.as_u16(),
            message,
        }
    } else if not_found {
        ModelError::NotFound {
            namespace: namespace.to_string(),
            model: model.to_string(),
            message,
        }
    } else if status == StatusCode::TOO_MANY_REQUESTS || api_status == "RESOURCE_EXHAUSTED" {
        ModelError::Quota { message }
    } else {
        ModelError::Upstream {
            status: status.as_u16(),
            message,
        }
    }
}

// Generative Language API request/response structures
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<RawModel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawModel {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<Usage>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Usage {
    #[serde(default)]
    prompt_token_count: Option<usize>,
    #[serde(default)]
    candidates_token_count: Option<usize>,
    #[serde(default)]
    total_token_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

/// One search hit; only `url` is guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsDocument {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl NewsDocument {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
            source: None,
            published_at: None,
        }
    }
}

/// News search collaborator: most relevant documents first.
#[async_trait::async_trait]
pub trait NewsSearch: Send + Sync {
    async fn search(&self, subject: &str) -> Result<Vec<NewsDocument>>;
}

/// NewsAPI `/v2/everything` client.
pub struct NewsApiClient {
    api_url: String,
    api_key: String,
    page_size: u32,
    language: String,
    client: Client,
}

impl NewsApiClient {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Corpscope/0.1.0")
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            page_size: 5,
            language: "en".to_string(),
            client,
        })
    }

    pub fn with_query_defaults(mut self, page_size: u32, language: impl Into<String>) -> Self {
        self.page_size = page_size;
        self.language = language.into();
        self
    }
}

#[async_trait::async_trait]
impl NewsSearch for NewsApiClient {
    async fn search(&self, subject: &str) -> Result<Vec<NewsDocument>> {
        let response = self
            .client
            .get(&self.api_url)
            .header("X-Api-Key", &self.api_key)
            .query(&[
                ("q", subject.to_string()),
                ("sortBy", "publishedAt".to_string()),
                ("pageSize", self.page_size.to_string()),
                ("language", self.language.clone()),
            ])
            .send()
            .await
            .context("news search request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<NewsApiError>(&body)
                .map(|e| format!("{}: {}", e.code.unwrap_or_default(), e.message.unwrap_or_default()))
                .unwrap_or(body);
            anyhow::bail!("news search failed with status {}: {}", status, message);
        }

        let body: NewsApiResponse = response
            .json()
            .await
            .context("failed to parse news search response")?;

        if body.status != "ok" {
            anyhow::bail!("news search returned status '{}'", body.status);
        }

        let mut seen = HashSet::new();
        let documents: Vec<NewsDocument> = body
            .articles
            .into_iter()
            .filter(|a| !a.url.trim().is_empty())
            // NewsAPI keeps tombstones for deleted articles
            .filter(|a| a.title.as_deref() != Some("[Removed]"))
            .filter(|a| seen.insert(a.url.clone()))
            .map(|a| NewsDocument {
                url: a.url,
                title: a.title,
                description: a.description,
                source: a.source.and_then(|s| s.name),
                published_at: a.published_at,
            })
            .collect();

        debug!(total = body.total_results, "news search raw results");
        info!(subject, count = documents.len(), "news search completed");
        Ok(documents)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiResponse {
    status: String,
    #[serde(default)]
    total_results: Option<u64>,
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiArticle {
    #[serde(default)]
    source: Option<NewsApiSource>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct NewsApiSource {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/*!
common/src/lib.rs

Shared configuration types for Corpscope.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default file with an optional override
- Credential resolution from the environment variables named in the config
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// HTTP server section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Key-value store (cache + lock) section.
///
/// When the endpoint or the token variable does not resolve, the service runs
/// without cache and without lock unless `in_memory` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub endpoint_env: Option<String>,
    pub token_env: Option<String>,
    pub in_memory: Option<bool>,
    pub timeout_seconds: Option<u64>,
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(5))
    }
}

/// News search section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub page_size: Option<u32>,
    pub language: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl NewsConfig {
    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or("https://newsapi.org/v2/everything")
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(5).clamp(1, 100)
    }

    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or("en")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(8))
    }
}

/// Article fetching / text extraction section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapingConfig {
    pub timeout_seconds: Option<u64>,
    pub max_document_chars: Option<usize>,
    pub min_document_chars: Option<usize>,
    pub user_agent: Option<String>,
}

impl ScrapingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(8))
    }

    pub fn max_document_chars(&self) -> usize {
        self.max_document_chars.unwrap_or(3000)
    }

    pub fn min_document_chars(&self) -> usize {
        self.min_document_chars.unwrap_or(100)
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or("Corpscope/0.1.0")
    }
}

/// Generation model API section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    /// API version namespaces, most feature-complete first
    pub namespaces: Option<Vec<String>>,
    /// Models tried first when available, in this order
    pub preferred: Option<Vec<String>>,
    pub list_timeout_seconds: Option<u64>,
    pub generate_timeout_seconds: Option<u64>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ModelConfig {
    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or("https://generativelanguage.googleapis.com")
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces
            .clone()
            .unwrap_or_else(|| vec!["v1beta".to_string(), "v1".to_string()])
    }

    pub fn preferred(&self) -> Vec<String> {
        self.preferred.clone().unwrap_or_else(|| {
            vec![
                "gemini-2.0-flash".to_string(),
                "gemini-1.5-flash".to_string(),
                "gemini-1.5-pro".to_string(),
                "gemini-pro".to_string(),
            ]
        })
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_seconds.unwrap_or(8))
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_seconds.unwrap_or(30))
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens.unwrap_or(2048)
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(0.4)
    }
}

/// Report pipeline section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Must exceed the worst-case search + scrape + generation time
    pub lock_ttl_seconds: Option<u64>,
    pub report_ttl_seconds: Option<u64>,
}

impl PipelineConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds.unwrap_or(120))
    }

    pub fn report_ttl(&self) -> Duration {
        Duration::from_secs(self.report_ttl_seconds.unwrap_or(7 * 24 * 60 * 60))
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub scraping: ScrapingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Secrets resolved from the environment variables the config points at.
///
/// Cache credentials are optional (missing ones select the degraded mode);
/// the news and model keys are required to start the service.
#[derive(Clone, Default)]
pub struct Credentials {
    pub cache_endpoint: Option<String>,
    pub cache_token: Option<String>,
    pub news_api_key: String,
    pub model_api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("cache_endpoint", &self.cache_endpoint)
            .field("cache_token", &self.cache_token.as_ref().map(|_| "<redacted>"))
            .field("news_api_key", &"<redacted>")
            .field("model_api_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Resolve credentials from the process environment.
    pub fn from_env(config: &Config) -> Result<Self> {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    /// Resolve credentials with an explicit variable lookup.
    pub fn resolve<F>(config: &Config, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let cache_endpoint_env = config.cache.endpoint_env.as_deref().unwrap_or("KV_REST_API_URL");
        let cache_token_env = config.cache.token_env.as_deref().unwrap_or("KV_REST_API_TOKEN");
        let news_env = config.news.api_key_env.as_deref().unwrap_or("NEWS_API_KEY");
        let model_env = config.model.api_key_env.as_deref().unwrap_or("GEMINI_API_KEY");

        let news_api_key = non_empty(news_env)
            .with_context(|| format!("News API key env var '{}' not set", news_env))?;
        let model_api_key = non_empty(model_env)
            .with_context(|| format!("Model API key env var '{}' not set", model_env))?;

        Ok(Self {
            cache_endpoint: non_empty(cache_endpoint_env).map(|v| v.trim_end_matches('/').to_string()),
            cache_token: non_empty(cache_token_env),
            news_api_key,
            model_api_key,
        })
    }

    /// Both cache endpoint and token are present.
    pub fn has_cache_backend(&self) -> bool {
        self.cache_endpoint.is_some() && self.cache_token.is_some()
    }
}

use anyhow::{Context, Result};
use reqwest::Client;
use scraper::{Html, Node};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Elements whose text never counts as article content
const BOILERPLATE_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "iframe", "svg",
];

/// Document-fetch collaborator.
///
/// Failures yield an empty string, never an error, so short-document filtering
/// downstream also absorbs unreachable pages.
#[async_trait::async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> String;
}

/// Fetches a page and extracts its readable text.
pub struct WebTextExtractor {
    client: Client,
    max_chars: usize,
}

impl WebTextExtractor {
    pub fn new(timeout: Duration, max_chars: usize, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client, max_chars })
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await.context("failed to fetch article page")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("article fetch failed with status: {}", status));
        }

        let html = response.text().await.context("failed to read response body")?;
        let url_obj = url::Url::parse(url).context("failed to parse article URL")?;

        let text = match readability_text(&html, &url_obj) {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                debug!("scraping: readability produced nothing for {}, using body text", url);
                body_text(&html)
            }
        };

        Ok(truncate_chars(&collapse_blank_lines(&text), self.max_chars))
    }
}

#[async_trait::async_trait]
impl TextExtractor for WebTextExtractor {
    async fn extract(&self, url: &str) -> String {
        match self.fetch_text(url).await {
            Ok(text) => {
                info!("scraping: extracted {} chars from {}", text.chars().count(), url);
                text
            }
            Err(e) => {
                warn!("scraping: failed for {}: {:#}", url, e);
                String::new()
            }
        }
    }
}

/// Main-content extraction converted to Markdown-ish text
fn readability_text(html: &str, url: &url::Url) -> Option<String> {
    let mut reader = Cursor::new(html.as_bytes());
    match readability::extractor::extract(&mut reader, url) {
        Ok(product) => match html2text::from_read(product.content.as_bytes(), 100) {
            Ok(markdown) => Some(markdown),
            Err(e) => {
                warn!("scraping: failed to convert extracted HTML to text: {}", e);
                Some(product.text)
            }
        },
        Err(e) => {
            warn!("scraping: readability failed for {}: {}", url, e);
            None
        }
    }
}

/// All text nodes outside boilerplate elements
fn body_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut chunks: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let in_boilerplate = node.ancestors().any(|ancestor| match ancestor.value() {
            Node::Element(el) => BOILERPLATE_TAGS.contains(&el.name()),
            _ => false,
        });
        let trimmed = text.trim();
        if !in_boilerplate && !trimmed.is_empty() {
            chunks.push(trimmed);
        }
    }

    chunks.join("\n")
}

fn collapse_blank_lines(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cut to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

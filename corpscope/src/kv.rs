//! Key-value store used for report caching and for the distributed lock.
//!
//! The remote implementation talks to a Redis-compatible REST endpoint
//! (Upstash style): reads go through `GET {endpoint}/get/{key}`, every write is
//! sent as a JSON command list to `POST {endpoint}/pipeline` so that values of
//! any length travel in the request body.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Compare-and-delete executed server side so the read and the delete cannot interleave
/// with another client's writes.
const COMPARE_AND_DELETE_SCRIPT: &str =
    "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("key-value backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("key-value command failed: {0}")]
    Command(String),

    #[error("malformed key-value response: {0}")]
    Malformed(String),

    #[error("key-value request timed out after {0:?}")]
    Timeout(Duration),

    #[error("key-value transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid key-value endpoint '{0}'")]
    InvalidEndpoint(String),
}

/// Minimal string store with expiry.
///
/// An unconfigured store answers every read with `None` and accepts every write
/// as a no-op, so callers keep working without a cache.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Whether a backend is actually behind this store.
    fn is_configured(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Store `value` only if no live value exists for `key`. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Delete `key` only if it currently holds `expected`. Returns whether it was deleted.
    ///
    /// The default reads then deletes, which leaves a small window between the two calls.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        match self.get(key).await? {
            Some(current) if current == expected => {
                self.delete(key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn ttl_seconds(ttl: Duration) -> String {
    // Redis rejects EX 0
    ttl.as_secs().max(1).to_string()
}

struct RestBackend {
    endpoint: String,
    token: String,
}

/// Upstash-style REST client.
pub struct RestKvClient {
    backend: Option<RestBackend>,
    timeout: Duration,
    client: reqwest::Client,
}

impl RestKvClient {
    /// Build a client; without both endpoint and token the client runs unconfigured.
    pub fn new(endpoint: Option<String>, token: Option<String>) -> Self {
        let backend = match (endpoint, token) {
            (Some(endpoint), Some(token)) => Some(RestBackend {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                token,
            }),
            _ => None,
        };
        Self {
            backend,
            timeout: Duration::from_secs(5),
            client: reqwest::Client::new(),
        }
    }

    pub fn unconfigured() -> Self {
        Self::new(None, None)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn get_url(backend: &RestBackend, key: &str) -> Result<url::Url, KvError> {
        let mut url = url::Url::parse(&backend.endpoint)
            .map_err(|_| KvError::InvalidEndpoint(backend.endpoint.clone()))?;
        url.path_segments_mut()
            .map_err(|_| KvError::InvalidEndpoint(backend.endpoint.clone()))?
            .pop_if_empty()
            .push("get")
            .push(key);
        Ok(url)
    }

    /// Send a request and read its body, both within the client timeout.
    async fn exchange(&self, request: reqwest::RequestBuilder) -> Result<String, KvError> {
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| KvError::Timeout(self.timeout))??;

        let status = response.status();
        let body = tokio::time::timeout(self.timeout, response.text())
            .await
            .map_err(|_| KvError::Timeout(self.timeout))??;

        if !status.is_success() {
            return Err(KvError::Backend {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(body)
    }

    /// Send one command through the pipeline endpoint and return its `result`.
    async fn command(&self, backend: &RestBackend, command: Vec<String>) -> Result<Value, KvError> {
        let url = format!("{}/pipeline", backend.endpoint);
        let request = self
            .client
            .post(&url)
            .bearer_auth(&backend.token)
            .json(&vec![command]);

        let body = self.exchange(request).await?;
        let replies: Vec<RestReply> =
            serde_json::from_str(&body).map_err(|e| KvError::Malformed(e.to_string()))?;

        let reply = replies
            .into_iter()
            .next()
            .ok_or_else(|| KvError::Malformed("empty pipeline reply".to_string()))?;

        reply.into_result()
    }
}

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RestReply {
    fn into_result(self) -> Result<Value, KvError> {
        match self.error {
            Some(err) => Err(KvError::Command(err)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<RestReply>(body)
        .ok()
        .and_then(|r| r.error)
        .unwrap_or_else(|| body.to_string())
}

#[async_trait::async_trait]
impl KvStore for RestKvClient {
    fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let Some(backend) = &self.backend else {
            return Ok(None);
        };

        let url = Self::get_url(backend, key)?;
        let body = self
            .exchange(self.client.get(url).bearer_auth(&backend.token))
            .await?;
        let reply: RestReply =
            serde_json::from_str(&body).map_err(|e| KvError::Malformed(e.to_string()))?;

        match reply.into_result()? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Err(KvError::Malformed(format!("unexpected GET result: {}", other))),
        }
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        let command = vec![
            "SET".to_string(),
            key.to_string(),
            value.to_string(),
            "EX".to_string(),
            ttl_seconds(ttl),
        ];
        match self.command(backend, command).await? {
            Value::String(ref ok) if ok == "OK" => Ok(()),
            other => Err(KvError::Malformed(format!("unexpected SET result: {}", other))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        self.command(backend, vec!["DEL".to_string(), key.to_string()]).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let Some(backend) = &self.backend else {
            return Ok(false);
        };

        let command = vec![
            "SET".to_string(),
            key.to_string(),
            value.to_string(),
            "NX".to_string(),
            "EX".to_string(),
            ttl_seconds(ttl),
        ];
        match self.command(backend, command).await? {
            Value::String(ref ok) if ok == "OK" => Ok(true),
            Value::Null => Ok(false),
            other => Err(KvError::Malformed(format!("unexpected SET NX result: {}", other))),
        }
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let Some(backend) = &self.backend else {
            return Ok(false);
        };

        let command = vec![
            "EVAL".to_string(),
            COMPARE_AND_DELETE_SCRIPT.to_string(),
            "1".to_string(),
            key.to_string(),
            expected.to_string(),
        ];
        let result = self.command(backend, command).await?;
        debug!(key, ?result, "compare-and-delete");
        match result.as_i64() {
            Some(n) => Ok(n > 0),
            None => Err(KvError::Malformed(format!("unexpected EVAL result: {}", result))),
        }
    }
}

/// In-process store with the same contract as the REST client.
///
/// Expiry is evaluated lazily on access. Used for single-instance deployments
/// (`cache.in_memory = true`) and in tests.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(entries: &mut HashMap<String, (String, Instant)>, key: &str) -> Option<String> {
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>> {
        // A poisoned map still holds consistent entries; every mutation is a single insert/remove.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKvStore {
    fn is_configured(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(Self::live_value(&mut self.entries(), key))
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        self.entries()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries().remove(key);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut entries = self.entries();
        if Self::live_value(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let mut entries = self.entries();
        match Self::live_value(&mut entries, key) {
            Some(current) if current == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_client_is_a_silent_no_op() {
        let client = RestKvClient::unconfigured();

        assert!(!client.is_configured());
        assert_eq!(client.get("report:acme").await.unwrap(), None);
        client
            .set_with_expiry("report:acme", "text", Duration::from_secs(60))
            .await
            .unwrap();
        client.delete("report:acme").await.unwrap();
        assert!(!client.set_if_absent("lock:acme", "t", Duration::from_secs(60)).await.unwrap());
    }

    #[test]
    fn partial_credentials_leave_client_unconfigured() {
        let client = RestKvClient::new(Some("https://kv.example.com".to_string()), None);
        assert!(!client.is_configured());
    }

    #[test]
    fn ttl_is_at_least_one_second() {
        assert_eq!(ttl_seconds(Duration::from_millis(10)), "1");
        assert_eq!(ttl_seconds(Duration::from_secs(604_800)), "604800");
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = MemoryKvStore::new();
        store
            .set_with_expiry("report:acme", "text", Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(store.get("report:acme").await.unwrap().as_deref(), Some("text"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("report:acme").await.unwrap(), None);
        assert!(store.set_if_absent("report:acme", "again", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn memory_store_conditional_operations() {
        let store = MemoryKvStore::new();

        assert!(store.set_if_absent("lock:acme", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_if_absent("lock:acme", "b", Duration::from_secs(5)).await.unwrap());
        assert!(!store.delete_if_equals("lock:acme", "b").await.unwrap());
        assert_eq!(store.get("lock:acme").await.unwrap().as_deref(), Some("a"));
        assert!(store.delete_if_equals("lock:acme", "a").await.unwrap());
        assert_eq!(store.get("lock:acme").await.unwrap(), None);
    }
}

//! Completion-service client with provider fallback.
//!
//! Primary provider: round-robin across a pool of keys. Fallback: a single
//! secondary key. Construction fails only when neither is configured; the
//! rotator is an explicit injected dependency, built once at startup and
//! shared across runs behind a mutex.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::{ENV_COMPLETION_KEYS, ENV_FALLBACK_KEY};
use crate::domain::{MendError, Result};

const PRIMARY_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const PRIMARY_MODEL: &str = "llama-3.3-70b-versatile";
const FALLBACK_URL: &str = "https://api.openai.com/v1/chat/completions";
const FALLBACK_MODEL: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Text-completion interface consumed by the analyzer and synthesizer.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run one system+user exchange and return the assistant text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Identity tag recorded on fixes produced through this client.
    fn model_tag(&self) -> String;
}

// ---------------------------------------------------------------------------
// Key rotation
// ---------------------------------------------------------------------------

/// Thread-safe round-robin over a fixed key pool.
#[derive(Debug)]
pub struct KeyRotator {
    keys: Vec<String>,
    cursor: Mutex<usize>,
}

impl KeyRotator {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            cursor: Mutex::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Next key in rotation. `None` when the pool is empty.
    pub fn next_key(&self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock().unwrap();
        let key = self.keys[*cursor % self.keys.len()].clone();
        *cursor = (*cursor + 1) % self.keys.len();
        Some(key)
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Chat-completions client over the OpenAI-compatible wire shape both
/// providers speak.
#[derive(Debug)]
pub struct HttpCompletionClient {
    http: reqwest::Client,
    rotator: KeyRotator,
    fallback_key: Option<String>,
}

impl HttpCompletionClient {
    /// Build from explicit key material. Errors when neither the primary
    /// pool nor the fallback key is configured.
    pub fn new(primary_keys: Vec<String>, fallback_key: Option<String>) -> Result<Self> {
        if primary_keys.is_empty() && fallback_key.is_none() {
            return Err(MendError::CompletionUnconfigured);
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| MendError::Completion(format!("http client: {e}")))?;
        Ok(Self {
            http,
            rotator: KeyRotator::new(primary_keys),
            fallback_key,
        })
    }

    /// Build from `MEND_COMPLETION_KEYS` / `MEND_FALLBACK_KEY`. Returns
    /// `None` when neither is set — callers degrade to rule-only behavior.
    pub fn from_env() -> Option<Self> {
        let primary: Vec<String> = std::env::var(ENV_COMPLETION_KEYS)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();
        let fallback = std::env::var(ENV_FALLBACK_KEY).ok().filter(|k| !k.is_empty());
        Self::new(primary, fallback).ok()
    }

    async fn request(&self, url: &str, model: &str, key: &str, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": model,
            "temperature": 0.0,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MendError::Completion(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MendError::Completion(format!(
                "provider returned {status}: {}",
                crate::domain::failure::truncate(text, 200)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| MendError::Completion(format!("malformed response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| MendError::Completion("empty choices".to_string()))
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        if let Some(key) = self.rotator.next_key() {
            return self
                .request(PRIMARY_URL, PRIMARY_MODEL, &key, system, user)
                .await;
        }
        if let Some(key) = &self.fallback_key {
            return self
                .request(FALLBACK_URL, FALLBACK_MODEL, key, system, user)
                .await;
        }
        Err(MendError::CompletionUnconfigured)
    }

    fn model_tag(&self) -> String {
        if self.rotator.is_empty() {
            FALLBACK_MODEL.to_string()
        } else {
            PRIMARY_MODEL.to_string()
        }
    }
}

/// Strip leading/trailing markdown code fences from completion output.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines
        .first()
        .map(|l| l.trim_start().starts_with("```"))
        .unwrap_or(false)
    {
        lines.remove(0);
    }
    if lines.last().map(|l| l.trim() == "```").unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotator_cycles_round_robin() {
        let rotator = KeyRotator::new(vec!["a".into(), "b".into(), "c".into()]);
        let keys: Vec<String> = (0..5).map(|_| rotator.next_key().unwrap()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "a", "b"]);
    }

    #[test]
    fn empty_rotator_yields_none() {
        let rotator = KeyRotator::new(Vec::new());
        assert!(rotator.next_key().is_none());
        assert!(rotator.is_empty());
    }

    #[test]
    fn client_requires_at_least_one_provider() {
        let err = HttpCompletionClient::new(Vec::new(), None).unwrap_err();
        assert!(matches!(err, MendError::CompletionUnconfigured));

        assert!(HttpCompletionClient::new(vec!["k".into()], None).is_ok());
        assert!(HttpCompletionClient::new(Vec::new(), Some("k".into())).is_ok());
    }

    #[test]
    fn model_tag_tracks_configured_provider() {
        let primary = HttpCompletionClient::new(vec!["k".into()], None).unwrap();
        assert_eq!(primary.model_tag(), PRIMARY_MODEL);

        let fallback = HttpCompletionClient::new(Vec::new(), Some("k".into())).unwrap();
        assert_eq!(fallback.model_tag(), FALLBACK_MODEL);
    }

    #[test]
    fn strips_fences_with_and_without_language() {
        assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("```\ncode\n```"), "code");
        assert_eq!(strip_code_fences("plain text"), "plain text");
        assert_eq!(strip_code_fences("  ```python\nx = 1\n```  "), "x = 1");
    }
}

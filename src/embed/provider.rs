// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding provider implementations.
//!
//! Network providers (Voyage, OpenAI, Ollama) speak HTTP via reqwest;
//! [`HashEmbedder`] is the deterministic terminal fallback that needs no
//! network at all.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::errors::MissingCredentialError;

/// Content categories used for provider and model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Code,
    Docs,
    Legal,
    Finance,
    General,
}

/// Whether a text is indexed content or a search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Document,
    Query,
}

/// One embedding backend in the fallback chain.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable provider name used for chain ordering and diagnostics.
    fn name(&self) -> &'static str;

    /// Whether the provider has what it needs to be tried at all.
    fn is_configured(&self) -> bool;

    /// Model identifier the provider would use for this content type.
    fn model_for(&self, content_type: ContentType) -> String;

    /// Embed a batch, preserving input order.
    async fn embed(
        &self,
        texts: &[String],
        content_type: ContentType,
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>>;
}

/// Shared HTTP client with a conservative timeout.
fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(2))
        .build()
        .context("Failed to build HTTP client")
}

fn parse_embedding_rows(rows: &[Value]) -> Result<Vec<Vec<f32>>> {
    rows.iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(|| anyhow::anyhow!("Embedding row must be an array"))?
                .iter()
                .map(|v| {
                    v.as_f64()
                        .ok_or_else(|| anyhow::anyhow!("Embedding value must be a number"))
                        .map(|f| f as f32)
                })
                .collect()
        })
        .collect()
}

/// Extract `data[].embedding` (OpenAI/Voyage response shape), in order.
fn parse_data_embeddings(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid response: missing data array"))?;

    let rows: Vec<Value> = data
        .iter()
        .map(|item| item.get("embedding").cloned().unwrap_or(Value::Null))
        .collect();
    parse_embedding_rows(&rows)
}

// ============ Voyage (specialized) ============

/// Specialized provider with per-domain models (code/finance/law).
pub struct VoyageProvider {
    api_key: Option<String>,
    /// Retries on a 429 before falling through the chain
    rate_limit_retries: usize,
}

impl VoyageProvider {
    pub fn from_env(rate_limit_retries: usize) -> Self {
        Self {
            api_key: std::env::var("VOYAGE_API_KEY").ok().filter(|k| !k.is_empty()),
            rate_limit_retries,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for VoyageProvider {
    fn name(&self) -> &'static str {
        "voyage"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn model_for(&self, content_type: ContentType) -> String {
        match content_type {
            ContentType::Code => "voyage-code-2".to_string(),
            ContentType::Finance => "voyage-finance-2".to_string(),
            ContentType::Legal => "voyage-law-2".to_string(),
            ContentType::Docs | ContentType::General => "voyage-2".to_string(),
        }
    }

    async fn embed(
        &self,
        texts: &[String],
        content_type: ContentType,
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>> {
        let api_key = self.api_key.as_deref().ok_or(MissingCredentialError {
            provider: "voyage",
            var: "VOYAGE_API_KEY",
        })?;

        let client = http_client(30)?;
        let body = serde_json::json!({
            "model": self.model_for(content_type),
            "input": texts,
            "input_type": match input_type {
                InputType::Document => "document",
                InputType::Query => "query",
            },
        });

        let mut last_err = None;
        for attempt in 0..=self.rate_limit_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500 * (1 << (attempt - 1).min(4)));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.voyageai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return parse_data_embeddings(&json);
                    }
                    // Only rate limits are worth retrying here; other errors
                    // fall through the chain immediately.
                    if status.as_u16() == 429 {
                        last_err = Some(anyhow::anyhow!("voyage rate limited ({})", status));
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    bail!("voyage error {}: {}", status, text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    break;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("voyage embedding failed")))
    }
}

// ============ OpenAI (general-purpose) ============

pub struct OpenAiProvider {
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn model_for(&self, _content_type: ContentType) -> String {
        "text-embedding-3-small".to_string()
    }

    async fn embed(
        &self,
        texts: &[String],
        content_type: ContentType,
        _input_type: InputType,
    ) -> Result<Vec<Vec<f32>>> {
        let api_key = self.api_key.as_deref().ok_or(MissingCredentialError {
            provider: "openai",
            var: "OPENAI_API_KEY",
        })?;

        let client = http_client(30)?;
        let body = serde_json::json!({
            "model": self.model_for(content_type),
            "input": texts,
        });

        let mut last_err = None;
        for attempt in 0..3 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return parse_data_embeddings(&json);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!("openai error {}", status));
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    bail!("openai error {}: {}", status, text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("openai embedding failed")))
    }
}

// ============ Ollama (local) ============

pub struct OllamaProvider {
    base_url: String,
    model: String,
    auto_start: bool,
    startup_timeout: Duration,
}

impl OllamaProvider {
    pub fn from_env(model: &str, auto_start: bool, startup_timeout_secs: u64) -> Self {
        Self {
            base_url: std::env::var("OLLAMA_URL")
                .ok()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            model: model.to_string(),
            auto_start,
            startup_timeout: Duration::from_secs(startup_timeout_secs),
        }
    }

    /// Ensure the local server is reachable, optionally spawning it and
    /// polling with exponential backoff bounded by the startup timeout.
    async fn ensure_running(&self, client: &reqwest::Client) -> Result<()> {
        let tags_url = format!("{}/api/tags", self.base_url);
        if client.get(&tags_url).send().await.is_ok() {
            return Ok(());
        }

        if !self.auto_start {
            bail!("ollama unreachable at {}", self.base_url);
        }

        Command::new("ollama")
            .arg("serve")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn 'ollama serve'")?;

        let start = std::time::Instant::now();
        let mut delay = Duration::from_millis(250);
        loop {
            tokio::time::sleep(delay).await;
            if client.get(&tags_url).send().await.is_ok() {
                return Ok(());
            }
            if start.elapsed() >= self.startup_timeout {
                bail!(
                    "ollama did not come up within {}s at {}",
                    self.startup_timeout.as_secs(),
                    self.base_url
                );
            }
            delay = (delay * 2).min(Duration::from_secs(4));
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn is_configured(&self) -> bool {
        // Local provider needs no credential; reachability is checked on use.
        true
    }

    fn model_for(&self, _content_type: ContentType) -> String {
        self.model.clone()
    }

    async fn embed(
        &self,
        texts: &[String],
        _content_type: ContentType,
        _input_type: InputType,
    ) -> Result<Vec<Vec<f32>>> {
        let client = http_client(60)?;
        self.ensure_running(&client).await?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = client
            .post(format!("{}/api/embed", self.base_url))
            .json(&body)
            .send()
            .await
            .context("ollama request failed")?;

        if !response.status().is_success() {
            bail!("ollama error {}", response.status());
        }

        let json: Value = response.json().await?;
        let rows = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid ollama response: missing embeddings"))?
            .to_vec();
        parse_embedding_rows(&rows)
    }
}

// ============ Deterministic hash fallback ============

/// Terminal fallback: hash whitespace-tokenized lowercase words into a
/// signed bucket vector and L2-normalize. Deterministic and offline.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text.to_lowercase().split_whitespace() {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let h = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]);
            let bucket = (h % self.dims as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn model_for(&self, _content_type: ContentType) -> String {
        format!("hash-{}", self.dims)
    }

    async fn embed(
        &self,
        texts: &[String],
        _content_type: ContentType,
        _input_type: InputType,
    ) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

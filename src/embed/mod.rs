// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding gateway: content-type detection, provider fallback chains,
//! batched requests with bounded concurrency, and the deterministic hashed
//! fallback when every network provider fails.

pub mod provider;

pub use provider::{
    ContentType, EmbeddingProvider, HashEmbedder, InputType, OllamaProvider, OpenAiProvider,
    VoyageProvider,
};

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::EmbeddingConfig;
use crate::scanner::{CODE_EXTENSIONS, CONFIG_EXTENSIONS, DOC_EXTENSIONS};

static DEGRADATION_LOGGED: AtomicBool = AtomicBool::new(false);
static DEGRADATION_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Parameters accompanying a batch of texts.
#[derive(Debug, Clone)]
pub struct EmbedRequest {
    pub content_type: Option<ContentType>,
    pub file_path: Option<String>,
    pub input_type: InputType,
}

impl EmbedRequest {
    pub fn document(file_path: &str) -> Self {
        Self {
            content_type: None,
            file_path: Some(file_path.to_string()),
            input_type: InputType::Document,
        }
    }

    pub fn query() -> Self {
        Self {
            content_type: None,
            file_path: None,
            input_type: InputType::Query,
        }
    }
}

/// A completed embedding round.
#[derive(Debug, Clone)]
pub struct EmbedOutcome {
    /// One vector per input text, input order
    pub vectors: Vec<Vec<f32>>,
    pub provider: String,
    pub model: String,
    pub dims: usize,
}

/// Provider chain with content-type-aware ordering and terminal fallback.
pub struct EmbeddingGateway {
    providers: Vec<Box<dyn EmbeddingProvider>>,
    fallback: HashEmbedder,
    batch_size: usize,
    max_concurrency: usize,
}

impl EmbeddingGateway {
    pub fn new(config: &EmbeddingConfig) -> Self {
        let providers: Vec<Box<dyn EmbeddingProvider>> = vec![
            Box::new(VoyageProvider::from_env(config.rate_limit_retries())),
            Box::new(OpenAiProvider::from_env()),
            Box::new(OllamaProvider::from_env(
                config.ollama_model(),
                config.ollama_auto_start(),
                config.startup_timeout_secs(),
            )),
        ];

        Self {
            providers,
            fallback: HashEmbedder::new(config.fallback_dims()),
            batch_size: config.batch_size(),
            max_concurrency: config.max_concurrency(),
        }
    }

    /// Replace the provider chain (tests and embedding-disabled setups).
    pub fn with_providers(
        providers: Vec<Box<dyn EmbeddingProvider>>,
        fallback_dims: usize,
        batch_size: usize,
        max_concurrency: usize,
    ) -> Self {
        Self {
            providers,
            fallback: HashEmbedder::new(fallback_dims),
            batch_size,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Detect the content type for a file: extension first, then keyword
    /// scan for documentation content.
    pub fn detect_content_type(file_path: Option<&str>, sample: &str) -> ContentType {
        let ext = file_path
            .and_then(|p| Path::new(p).extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        if CODE_EXTENSIONS.contains(&ext.as_str()) || CONFIG_EXTENSIONS.contains(&ext.as_str()) {
            return ContentType::Code;
        }

        if DOC_EXTENSIONS.contains(&ext.as_str()) {
            let lower = sample.to_lowercase();
            if keyword_hits(&lower, LEGAL_KEYWORDS) >= 2 {
                return ContentType::Legal;
            }
            if keyword_hits(&lower, FINANCE_KEYWORDS) >= 2 {
                return ContentType::Finance;
            }
            return ContentType::Docs;
        }

        ContentType::General
    }

    /// Provider preference order for a content type, by name. Providers
    /// with unknown names keep their insertion order at the end, so an
    /// injected test double still participates.
    fn chain_for(&self, content_type: ContentType) -> Vec<&dyn EmbeddingProvider> {
        let preferred: &[&str] = match content_type {
            ContentType::Code | ContentType::Finance | ContentType::Legal => {
                &["voyage", "openai", "ollama"]
            }
            ContentType::Docs | ContentType::General => &["openai", "voyage", "ollama"],
        };

        let mut chain: Vec<&dyn EmbeddingProvider> = Vec::with_capacity(self.providers.len());
        for name in preferred {
            if let Some(p) = self.providers.iter().find(|p| p.name() == *name) {
                chain.push(p.as_ref());
            }
        }
        for p in &self.providers {
            if !preferred.contains(&p.name()) {
                chain.push(p.as_ref());
            }
        }
        chain
    }

    /// Embed one batch through the fallback chain. Never fails: when every
    /// network provider is exhausted the deterministic hashed embedding is
    /// used, and that degradation is logged once per process.
    pub async fn embed_batch(&self, texts: &[String], request: &EmbedRequest) -> EmbedOutcome {
        if texts.is_empty() {
            return EmbedOutcome {
                vectors: Vec::new(),
                provider: "none".to_string(),
                model: String::new(),
                dims: 0,
            };
        }

        let content_type = request.content_type.unwrap_or_else(|| {
            Self::detect_content_type(request.file_path.as_deref(), &texts[0])
        });

        let mut failures: Vec<String> = Vec::new();
        for provider in self.chain_for(content_type) {
            if !provider.is_configured() {
                failures.push(format!("{}: not configured", provider.name()));
                continue;
            }
            match provider.embed(texts, content_type, request.input_type).await {
                Ok(vectors) if vectors.len() == texts.len() => {
                    let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
                    return EmbedOutcome {
                        vectors,
                        provider: provider.name().to_string(),
                        model: provider.model_for(content_type),
                        dims,
                    };
                }
                Ok(vectors) => {
                    failures.push(format!(
                        "{}: returned {} vectors for {} texts",
                        provider.name(),
                        vectors.len(),
                        texts.len()
                    ));
                }
                Err(e) => {
                    failures.push(format!("{}: {}", provider.name(), e));
                }
            }
        }

        warn_degraded_once(&failures);
        let vectors: Vec<Vec<f32>> = texts.iter().map(|t| self.fallback.embed_one(t)).collect();
        EmbedOutcome {
            vectors,
            provider: "hash".to_string(),
            model: self.fallback.model_for(content_type),
            dims: self.fallback.dims(),
        }
    }

    /// Embed arbitrarily many texts: split into provider-sized batches and
    /// issue rounds with bounded concurrency. At most `max_concurrency`
    /// requests are in flight; results come back in input order.
    pub async fn embed_many(&self, texts: &[String], request: &EmbedRequest) -> Result<Vec<EmbedOutcome>> {
        let batches: Vec<Vec<String>> = texts
            .chunks(self.batch_size)
            .map(|c| c.to_vec())
            .collect();

        let outcomes: Vec<EmbedOutcome> = stream::iter(batches.into_iter().map(|batch| {
            let request = request.clone();
            async move { self.embed_batch(&batch, &request).await }
        }))
        .buffered(self.max_concurrency)
        .collect()
        .await;

        Ok(outcomes)
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Vec<f32> {
        let outcome = self
            .embed_batch(&[text.to_string()], &EmbedRequest::query())
            .await;
        outcome.vectors.into_iter().next().unwrap_or_default()
    }
}

const LEGAL_KEYWORDS: &[&str] = &[
    "whereas",
    "hereinafter",
    "indemnif",
    "pursuant",
    "liability",
    "jurisdiction",
    "covenant",
    "arbitration",
];

const FINANCE_KEYWORDS: &[&str] = &[
    "revenue",
    "ebitda",
    "fiscal",
    "balance sheet",
    "cash flow",
    "quarterly",
    "portfolio",
    "interest rate",
];

fn keyword_hits(haystack: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| haystack.contains(*k)).count()
}

fn warn_degraded_once(failures: &[String]) {
    if !DEGRADATION_LOGGED.swap(true, Ordering::SeqCst) {
        DEGRADATION_LOG_COUNT.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(
            "all embedding providers failed; degrading to deterministic hashed embeddings ({})",
            failures.join("; ")
        );
    } else {
        tracing::debug!("embedding degradation (already reported): {}", failures.join("; "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Provider double that fails or succeeds on demand, counting calls.
    struct FakeProvider {
        name: &'static str,
        fail: bool,
        dims: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_configured(&self) -> bool {
            true
        }

        fn model_for(&self, _content_type: ContentType) -> String {
            format!("fake-{}", self.name)
        }

        async fn embed(
            &self,
            texts: &[String],
            _content_type: ContentType,
            _input_type: InputType,
        ) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("forced failure");
            }
            Ok(texts.iter().map(|_| vec![1.0; self.dims]).collect())
        }
    }

    fn fake(name: &'static str, fail: bool, calls: Arc<AtomicUsize>) -> Box<dyn EmbeddingProvider> {
        Box::new(FakeProvider {
            name,
            fail,
            dims: 8,
            calls,
        })
    }

    #[test]
    fn detects_content_types() {
        assert_eq!(
            EmbeddingGateway::detect_content_type(Some("src/main.rs"), "fn main() {}"),
            ContentType::Code
        );
        assert_eq!(
            EmbeddingGateway::detect_content_type(Some("config.toml"), "[package]"),
            ContentType::Code
        );
        assert_eq!(
            EmbeddingGateway::detect_content_type(Some("notes.md"), "# Notes\nplain prose"),
            ContentType::Docs
        );
        assert_eq!(
            EmbeddingGateway::detect_content_type(
                Some("contract.md"),
                "whereas the parties agree, pursuant to the covenant"
            ),
            ContentType::Legal
        );
        assert_eq!(
            EmbeddingGateway::detect_content_type(
                Some("report.md"),
                "quarterly revenue grew; cash flow stayed flat"
            ),
            ContentType::Finance
        );
        assert_eq!(
            EmbeddingGateway::detect_content_type(None, "free floating"),
            ContentType::General
        );
    }

    #[tokio::test]
    async fn first_healthy_provider_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gateway = EmbeddingGateway::with_providers(
            vec![
                fake("voyage", false, calls.clone()),
                fake("openai", false, calls.clone()),
            ],
            384,
            128,
            2,
        );

        let outcome = gateway
            .embed_batch(&["hello".to_string()], &EmbedRequest::document("a.rs"))
            .await;
        assert_eq!(outcome.provider, "voyage");
        assert_eq!(outcome.dims, 8);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn docs_prefer_general_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gateway = EmbeddingGateway::with_providers(
            vec![
                fake("voyage", false, calls.clone()),
                fake("openai", false, calls.clone()),
            ],
            384,
            128,
            2,
        );

        let outcome = gateway
            .embed_batch(&["prose".to_string()], &EmbedRequest::document("notes.md"))
            .await;
        assert_eq!(outcome.provider, "openai");
    }

    #[tokio::test]
    async fn exhausted_chain_degrades_to_hash_with_fallback_dims() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gateway = EmbeddingGateway::with_providers(
            vec![
                fake("voyage", true, calls.clone()),
                fake("openai", true, calls.clone()),
            ],
            384,
            128,
            2,
        );

        let texts = vec!["one".to_string(), "two".to_string()];
        let outcome = gateway
            .embed_batch(&texts, &EmbedRequest::document("a.rs"))
            .await;
        assert_eq!(outcome.provider, "hash");
        assert_eq!(outcome.vectors.len(), 2);
        assert!(outcome.vectors.iter().all(|v| v.len() == 384));

        // Second degradation must not log again
        let _ = gateway
            .embed_batch(&texts, &EmbedRequest::document("a.rs"))
            .await;
        assert_eq!(DEGRADATION_LOG_COUNT.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn embed_many_preserves_order_across_batches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gateway = EmbeddingGateway::with_providers(vec![], 16, 2, 3);
        drop(calls);

        let texts: Vec<String> = (0..7).map(|i| format!("text number {}", i)).collect();
        let outcomes = gateway
            .embed_many(&texts, &EmbedRequest::document("a.rs"))
            .await
            .unwrap();

        // 7 texts at batch size 2 -> 4 rounds
        assert_eq!(outcomes.len(), 4);
        let total: usize = outcomes.iter().map(|o| o.vectors.len()).sum();
        assert_eq!(total, 7);

        // Deterministic fallback means order is verifiable per text
        let flat: Vec<Vec<f32>> = outcomes.into_iter().flat_map(|o| o.vectors).collect();
        let expected = HashEmbedder::new(16).embed_one("text number 3");
        assert_eq!(flat[3], expected);
    }
}

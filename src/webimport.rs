// SPDX-License-Identifier: MIT OR Apache-2.0

//! URL ingestion: fetch a page, extract readable text, log it as
//! evidence so blended search can surface it.
//!
//! The fetch itself is a consumed capability behind [`WebFetcher`]; the
//! default implementation uses reqwest.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::time::Duration;

use crate::evidence::EvidenceLog;

/// External page-fetching capability.
#[async_trait]
pub trait WebFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String>;
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("ctxgrep/0.3")
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebFetcher for HttpFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        if !response.status().is_success() {
            bail!("fetch {} returned {}", url, response.status());
        }

        response.text().await.context("Failed to read response body")
    }
}

/// Extracted article content.
#[derive(Debug, Clone)]
pub struct Article {
    pub title: String,
    pub text_content: String,
}

static TITLE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex"));
static H1_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").expect("h1 regex"));
static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|head)[^>]*>.*?</(script|style|noscript|head)>")
        .expect("script regex")
});
static BLOCK_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</(p|div|section|article|li|h[1-6]|tr|br)>|<br\s*/?>").expect("block regex")
});
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("tag regex"));
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank regex"));

/// Strip markup down to readable text.
pub fn extract_article(html: &str) -> Article {
    let title = TITLE_TAG
        .captures(html)
        .or_else(|| H1_TAG.captures(html))
        .map(|c| decode_entities(c[1].trim()))
        .unwrap_or_default();

    let without_scripts = SCRIPT_BLOCK.replace_all(html, " ");
    let with_breaks = BLOCK_END.replace_all(&without_scripts, "\n");
    let stripped = ANY_TAG.replace_all(&with_breaks, " ");
    let decoded = decode_entities(&stripped);

    let text: String = decoded
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let text_content = BLANK_RUNS.replace_all(&text, "\n\n").to_string();

    Article {
        title,
        text_content,
    }
}

fn decode_entities(input: &str) -> String {
    input
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// Fetch a URL, extract its article text, and log it as evidence under
/// `source = "web"`. Returns the evidence id.
pub async fn import_url(fetcher: &dyn WebFetcher, log: &EvidenceLog, url: &str) -> Result<String> {
    let html = fetcher.fetch_html(url).await?;
    let article = extract_article(&html);

    if article.text_content.trim().is_empty() {
        bail!("no readable content extracted from {}", url);
    }

    log.add(
        "web",
        json!(article.text_content),
        Some(json!({
            "title": article.title,
            "uri": url,
            "tags": ["imported"],
        })),
    )
}

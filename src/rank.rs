// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hybrid ranking: weighted fusion of lexical, dense, prior, and
//! memory-derived signals, plus a document-oriented scorer and the
//! blended local/imported merge.
//!
//! The code-first score is a fixed linear combination favoring precision
//! on "show me the implementation" queries over pure semantic similarity.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::QueryCache;
use crate::config::{BlendMode, Config};
use crate::embed::EmbeddingGateway;
use crate::evidence::{EvidenceLog, EvidenceQuery};
use crate::lexical::LexicalIndex;
use crate::memory::MemoryStore;
use crate::store::{DocRecord, Store};
use crate::utils::short_hash;

// Fusion weights. The lexical signal dominates; memory boosts share the
// remainder equally.
const W_LEXICAL: f32 = 0.45;
const W_DENSE: f32 = 0.18;
const W_PATH: f32 = 0.12;
const W_PROXIMITY: f32 = 0.05;
const W_SYMBOL: f32 = 0.04;
const W_INTENT: f32 = 0.08;
const W_MEMORY_EACH: f32 = 0.08 / 3.0;

/// Recency window for document scoring, in months.
const DOC_RECENCY_MONTHS: f32 = 18.0;

/// Where a hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitOrigin {
    Local,
    Imported,
}

/// A ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub snippet: String,
    /// Final fused score
    pub score: f32,
    pub lexical: f32,
    pub dense: f32,
    pub origin: HitOrigin,
    /// Stable result ID
    pub result_id: String,
}

/// A scoring candidate (one chunk).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    pub symbols: Vec<String>,
    /// Lexical score normalized against the batch maximum
    pub lexical_norm: f32,
    pub embedding: Option<Vec<f32>>,
}

static SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(pub(\(\w+\))?\s+|export\s+(default\s+)?)?(async\s+)?(fn|function|def|func|class|interface|impl)\b")
        .expect("signature regex")
});
static IMPL_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(method|class|handler|function|implementation|impl)\b|\($")
        .expect("intent regex")
});
static DOC_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(plan|rfc|decision|postmortem|retro|roadmap|changelog|status report|design doc)\b")
        .expect("doc cue regex")
});

/// Query-derived context shared across candidates.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub raw: String,
    pub terms: Vec<String>,
    pub wants_implementation: bool,
    pub embedding: Option<Vec<f32>>,
}

impl QueryContext {
    pub fn new(query: &str, embedding: Option<Vec<f32>>) -> Self {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '_').to_string())
            .filter(|t| t.len() > 1)
            .collect();

        Self {
            raw: query.to_string(),
            terms,
            wants_implementation: IMPL_CUE.is_match(query.trim()),
            embedding: embedding.filter(|e| !e.is_empty()),
        }
    }
}

/// Whether a query reads like a documentation lookup.
pub fn is_doc_query(query: &str) -> bool {
    DOC_CUE.is_match(query)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Path/extension prior in [0, 1]: reward source trees and code
/// extensions, penalize docs/examples and markdown.
fn path_prior(path: &str) -> f32 {
    let lower = path.to_lowercase();
    let mut prior = 0.5f32;

    if lower.starts_with("src/") || lower.contains("/src/") {
        prior += 0.3;
    }
    if lower.contains("docs/") || lower.contains("examples/") || lower.contains("test") {
        prior -= 0.3;
    }

    let ext = std::path::Path::new(&lower)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    if crate::scanner::CODE_EXTENSIONS.contains(&ext) {
        prior += 0.2;
    } else if ext == "md" || ext == "markdown" || ext == "txt" {
        prior -= 0.2;
    }

    prior.clamp(0.0, 1.0)
}

/// Proximity bonus in [0, 1]: rewards query terms clustered close
/// together in the candidate text.
fn proximity_bonus(terms: &[String], text: &str) -> f32 {
    if terms.len() < 2 {
        return 0.0;
    }
    let tokens: Vec<String> = text
        .to_lowercase()
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '_').to_string())
        .collect();

    let mut positions = Vec::new();
    for term in terms {
        if let Some(pos) = tokens.iter().position(|t| t == term || t.contains(term.as_str())) {
            positions.push(pos);
        }
    }
    if positions.len() < 2 {
        return 0.0;
    }

    let min = *positions.iter().min().unwrap_or(&0);
    let max = *positions.iter().max().unwrap_or(&0);
    let span = (max - min) as f32;
    (1.0 - (span / 50.0).min(1.0)) * (positions.len() as f32 / terms.len() as f32)
}

/// Exact-symbol bonus: a query term that names one of the chunk's
/// declared symbols.
fn symbol_bonus(terms: &[String], symbols: &[String]) -> f32 {
    let hit = terms
        .iter()
        .any(|t| symbols.iter().any(|s| s.to_lowercase() == *t));
    if hit {
        1.0
    } else {
        0.0
    }
}

/// Implementation-intent bonus: query asks for an implementation and the
/// candidate carries a signature/class declaration.
fn intent_bonus(wants_implementation: bool, text: &str) -> f32 {
    if wants_implementation && SIGNATURE.is_match(text) {
        1.0
    } else {
        0.0
    }
}

/// Fuse all signals for a set of candidates and sort deterministically.
pub fn rerank_code_first(
    ctx: &QueryContext,
    candidates: Vec<Candidate>,
    memory: &MemoryStore,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .map(|c| {
            let dense = match (&ctx.embedding, &c.embedding) {
                (Some(q), Some(e)) => (cosine_similarity(q, e) + 1.0) / 2.0,
                _ => 0.5,
            };

            let style = memory.style_boost(&c.text);
            let arch = memory.architecture_boost(&c.path);
            let usage = memory.usage_boost(&c.path);

            let score = W_LEXICAL * c.lexical_norm
                + W_DENSE * dense
                + W_PATH * path_prior(&c.path)
                + W_PROXIMITY * proximity_bonus(&ctx.terms, &c.text)
                + W_SYMBOL * symbol_bonus(&ctx.terms, &c.symbols)
                + W_INTENT * intent_bonus(ctx.wants_implementation, &c.text)
                + W_MEMORY_EACH * (style.clamp(0.0, 1.0) + arch.clamp(0.0, 1.0) + usage.clamp(0.0, 1.0));

            let snippet = snippet_of(&c.text);
            SearchHit {
                result_id: short_hash(&format!("{}:{}:{}", c.path, c.start_line, snippet)),
                path: c.path,
                start_line: c.start_line,
                end_line: c.end_line,
                snippet,
                score,
                lexical: c.lexical_norm,
                dense,
                origin: HitOrigin::Local,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });

    hits
}

fn snippet_of(text: &str) -> String {
    let mut snippet = String::new();
    for line in text.lines().take(3) {
        if !snippet.is_empty() {
            snippet.push('\n');
        }
        snippet.push_str(line.trim_end());
    }
    if snippet.len() > 240 {
        snippet.truncate(240);
    }
    snippet
}

// ---- document scoring ----

fn term_fraction(terms: &[String], text: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let hits = terms.iter().filter(|t| lower.contains(t.as_str())).count();
    hits as f32 / terms.len() as f32
}

fn doc_type_prior(doc: &DocRecord) -> f32 {
    let base = match doc.doc_type.as_str() {
        "completion" | "decision" => 0.15,
        "plan" | "design" | "rfc" | "spec" => 0.10,
        "postmortem" | "retro" | "status" => 0.08,
        _ => 0.05,
    };
    if doc.status.as_deref().map(|s| s.eq_ignore_ascii_case("draft")).unwrap_or(false) {
        base - 0.1
    } else {
        base
    }
}

/// Linear recency decay over the ~18-month window.
fn recency_decay(date: Option<&str>) -> f32 {
    let Some(date) = date else { return 0.0 };
    let mut parts = date.split('-');
    let year: i64 = match parts.next().and_then(|p| p.parse().ok()) {
        Some(y) => y,
        None => return 0.0,
    };
    let month: i64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1);
    let day: i64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1);

    let doc_days = (year - 1970) as f64 * 365.25 + (month - 1) as f64 * 30.44 + day as f64;
    let now_days = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as f64
        / 86_400.0;

    let age_months = ((now_days - doc_days) / 30.44).max(0.0) as f32;
    (1.0 - age_months / DOC_RECENCY_MONTHS).max(0.0) * 0.15
}

/// Score doc records against a document-oriented query.
pub fn rank_documents(ctx: &QueryContext, docs: &[DocRecord], top_k: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = docs
        .iter()
        .map(|doc| {
            let score = 0.5 * term_fraction(&ctx.terms, &doc.title)
                + 0.3 * term_fraction(&ctx.terms, &doc.summary)
                + doc_type_prior(doc)
                + recency_decay(doc.date.as_deref());

            SearchHit {
                result_id: short_hash(&format!("doc:{}", doc.id)),
                path: doc.uri.clone(),
                start_line: 1,
                end_line: 1,
                snippet: if doc.summary.is_empty() {
                    doc.title.clone()
                } else {
                    doc.summary.clone()
                },
                score,
                lexical: 0.0,
                dense: 0.0,
                origin: HitOrigin::Local,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    hits.truncate(top_k);
    hits
}

// ---- imported evidence scoring ----

/// Score evidence items by term overlap; used for the imported side of a
/// blended search.
pub fn rank_evidence(ctx: &QueryContext, log: &EvidenceLog, top_k: usize) -> Result<Vec<SearchHit>> {
    let items = log.find(&EvidenceQuery::default())?;

    let mut hits: Vec<SearchHit> = items
        .into_iter()
        .map(|item| {
            let haystack = format!(
                "{} {} {}",
                item.title.as_deref().unwrap_or(""),
                item.snippet.as_deref().unwrap_or(""),
                item.data
            );
            let score = term_fraction(&ctx.terms, &haystack)
                + item.score.unwrap_or(0.0).clamp(0.0, 1.0) * 0.1;

            SearchHit {
                result_id: short_hash(&format!("evidence:{}", item.id)),
                path: item
                    .uri
                    .clone()
                    .unwrap_or_else(|| format!("evidence://{}", item.id)),
                start_line: 1,
                end_line: 1,
                snippet: item
                    .snippet
                    .or(item.title)
                    .unwrap_or_else(|| item.id.clone()),
                score,
                lexical: 0.0,
                dense: 0.0,
                origin: HitOrigin::Imported,
            }
        })
        .filter(|h| h.score > 0.0)
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    hits.truncate(top_k);
    Ok(hits)
}

/// Merge local and imported hits under the configured mode. Interleave
/// alternates strictly one-for-one in score order until `top_k` is full.
pub fn blend_hits(
    local: Vec<SearchHit>,
    imported: Vec<SearchHit>,
    mode: BlendMode,
    top_k: usize,
) -> Vec<SearchHit> {
    match mode {
        BlendMode::Local => local.into_iter().take(top_k).collect(),
        BlendMode::Imported => imported.into_iter().take(top_k).collect(),
        BlendMode::Interleave => {
            let mut out = Vec::with_capacity(top_k);
            let mut local = local.into_iter();
            let mut imported = imported.into_iter();
            loop {
                if out.len() >= top_k {
                    break;
                }
                match (local.next(), imported.next()) {
                    (Some(l), Some(i)) => {
                        out.push(l);
                        if out.len() < top_k {
                            out.push(i);
                        }
                    }
                    (Some(l), None) => out.push(l),
                    (None, Some(i)) => out.push(i),
                    (None, None) => break,
                }
            }
            out
        }
    }
}

// ---- search engine ----

/// Workspace-scoped search over the store, lexical index, memory, and
/// evidence log.
pub struct SearchEngine<'a> {
    pub store: &'a Store,
    pub lexical: &'a LexicalIndex,
    pub memory: &'a MemoryStore,
    pub gateway: &'a EmbeddingGateway,
    pub cache: &'a QueryCache<Vec<SearchHit>>,
    pub config: &'a Config,
}

impl<'a> SearchEngine<'a> {
    /// Ranked search over the local index.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if self.config.cache.enabled() {
            if let Some(hits) = self.cache.get(query, top_k) {
                tracing::debug!("query cache hit for {:?}", query);
                return Ok(hits);
            }
        }

        let hits = if is_doc_query(query) {
            let ctx = QueryContext::new(query, None);
            let docs = self.store.load_docs()?;
            rank_documents(&ctx, &docs, top_k)
        } else {
            self.code_first_search(query, top_k).await?
        };

        for hit in &hits {
            self.memory.record_usage(&hit.path);
        }
        if let Err(e) = self.memory.save() {
            tracing::debug!("failed to persist usage counters: {}", e);
        }

        if self.config.cache.enabled() {
            self.cache.set(query, top_k, hits.clone());
        }
        Ok(hits)
    }

    async fn code_first_search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let candidate_k = self.config.search.candidate_k();
        let lexical_hits = self.lexical.search(query, candidate_k)?;
        if lexical_hits.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.gateway.embed_query(query).await;
        let ctx = QueryContext::new(query, Some(query_embedding));

        let max_score = lexical_hits
            .iter()
            .map(|h| h.score)
            .fold(f32::NEG_INFINITY, f32::max)
            .max(f32::EPSILON);

        // Chunk records are loaded once per file, not per candidate
        let mut file_cache: HashMap<String, Option<crate::store::FileChunks>> = HashMap::new();
        let mut candidates = Vec::with_capacity(lexical_hits.len());
        for hit in lexical_hits {
            let record = file_cache
                .entry(hit.path.clone())
                .or_insert_with(|| self.store.load_file_chunks(&hit.path).ok().flatten());

            let (symbols, embedding) = match record {
                Some(file) => file
                    .chunks
                    .iter()
                    .find(|c| c.start_line == hit.start_line && c.end_line == hit.end_line)
                    .map(|c| {
                        (
                            c.symbols.clone(),
                            c.embedding.as_ref().map(|e| e.vector.decode()),
                        )
                    })
                    .unwrap_or_default(),
                None => (Vec::new(), None),
            };

            candidates.push(Candidate {
                path: hit.path,
                start_line: hit.start_line,
                end_line: hit.end_line,
                text: hit.text,
                symbols,
                lexical_norm: hit.score / max_score,
                embedding,
            });
        }

        let mut hits = rerank_code_first(&ctx, candidates, self.memory);
        hits = self.maybe_cross_encode(query, hits).await;
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Optional cross-encoder pass over the top candidates; runs only when
    /// the provider credential is configured, otherwise a no-op.
    async fn maybe_cross_encode(&self, query: &str, hits: Vec<SearchHit>) -> Vec<SearchHit> {
        let Ok(api_key) = std::env::var("COHERE_API_KEY") else {
            return hits;
        };
        if api_key.is_empty() || hits.is_empty() {
            return hits;
        }

        let window = self.config.search.rerank_window().min(hits.len());
        let (head, tail) = hits.split_at(window);
        let documents: Vec<&str> = head.iter().map(|h| h.snippet.as_str()).collect();

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
        {
            Ok(c) => c,
            Err(_) => return hits,
        };

        let body = serde_json::json!({
            "model": "rerank-english-v3.0",
            "query": query,
            "documents": documents,
            "top_n": window,
        });

        let response = client
            .post("https://api.cohere.com/v1/rerank")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await;

        let json: serde_json::Value = match response {
            Ok(r) if r.status().is_success() => match r.json().await {
                Ok(j) => j,
                Err(_) => return hits,
            },
            _ => {
                tracing::debug!("cross-encoder rerank unavailable; keeping fused order");
                return hits;
            }
        };

        let Some(results) = json.get("results").and_then(|r| r.as_array()) else {
            return hits;
        };

        let mut reordered = Vec::with_capacity(hits.len());
        for entry in results {
            if let Some(idx) = entry.get("index").and_then(|i| i.as_u64()) {
                if let Some(hit) = head.get(idx as usize) {
                    let mut hit = hit.clone();
                    if let Some(score) = entry.get("relevance_score").and_then(|s| s.as_f64()) {
                        hit.score = score as f32;
                    }
                    reordered.push(hit);
                }
            }
        }
        if reordered.is_empty() {
            return hits;
        }
        reordered.extend(tail.iter().cloned());
        reordered
    }

    /// Blended search: local index and imported evidence, each guarded by
    /// an independent hard timeout that degrades that half to empty.
    pub async fn blended_search(
        &self,
        query: &str,
        top_k: usize,
        mode: BlendMode,
        evidence: &EvidenceLog,
    ) -> Result<Vec<SearchHit>> {
        let budget = Duration::from_secs(self.config.search.timeout_secs());

        let local = match tokio::time::timeout(budget, self.search(query, top_k)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                tracing::warn!("local search failed in blend: {}", e);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("local search timed out after {:?}", budget);
                Vec::new()
            }
        };

        let ctx = QueryContext::new(query, None);
        let imported = match tokio::time::timeout(
            budget,
            async { rank_evidence(&ctx, evidence, top_k) },
        )
        .await
        {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                tracing::warn!("evidence search failed in blend: {}", e);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("evidence search timed out after {:?}", budget);
                Vec::new()
            }
        };

        Ok(blend_hits(local, imported, mode, top_k))
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Behavioral memory: learned style conventions, detected architectural
//! patterns, and per-file usage counters, persisted per workspace in
//! `.ctxgrep/memory.json`.
//!
//! The document is versioned; older documents are migrated on load by
//! defaulting missing fields, never rejected. Style and architecture are
//! overwritten wholesale on each analysis pass so they always reflect the
//! current snapshot; usage counters are incremented and never reset.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::utils::now_ms;

/// Current on-disk schema version.
pub const MEMORY_VERSION: u32 = 2;

/// Usage count at which the log-scaled boost saturates.
const USAGE_SATURATION: f64 = 50.0;

/// Naming-style majority below this confidence collapses to "mixed".
const NAMING_CONFIDENCE_FLOOR: f32 = 0.55;

/// Learned style conventions; a single record per workspace, overwritten
/// (not merged) on each analysis pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StyleMemory {
    /// camelCase | snake_case | PascalCase | kebab-case | mixed
    pub naming_preference: String,
    pub naming_confidence: f32,
    /// tabs | spaces | mixed
    pub indent_style: String,
    pub indent_size: usize,
    /// single | double | mixed
    pub quote_style: String,
    /// relative | absolute | mixed
    pub import_style: String,
    pub identifier_examples: Vec<String>,
    pub updated_at: u64,
}

/// A detected layered-architecture pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitecturalPattern {
    pub name: String,
    pub description: String,
    pub files: Vec<String>,
    /// 0..1
    pub confidence: f32,
    pub tags: Vec<String>,
    pub detected_at: u64,
}

impl Default for ArchitecturalPattern {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            files: Vec::new(),
            confidence: 0.0,
            tags: Vec::new(),
            detected_at: 0,
        }
    }
}

/// Per-file usage counter, keyed by normalized lowercase path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRecord {
    pub count: u64,
    pub last_accessed: u64,
}

/// The versioned memory document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryDoc {
    pub version: u32,
    pub updated_at: u64,
    pub style: Option<StyleMemory>,
    pub architecture: Vec<ArchitecturalPattern>,
    pub usage: HashMap<String, UsageRecord>,
}

/// Upgrade an older document in place. Missing fields were already
/// defaulted by serde; this records the schema the process writes.
fn migrate(doc: &mut MemoryDoc) {
    if doc.version < MEMORY_VERSION {
        doc.version = MEMORY_VERSION;
    }
}

/// Workspace-scoped persistence and boost computation.
pub struct MemoryStore {
    path: PathBuf,
    doc: Mutex<MemoryDoc>,
}

impl MemoryStore {
    /// Load (or initialize) the memory document under the store directory.
    pub fn load(store_dir: &Path) -> Result<Self> {
        let path = store_dir.join("memory.json");
        let mut doc = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("memory document unreadable, starting fresh: {}", e);
                MemoryDoc::default()
            })
        } else {
            MemoryDoc::default()
        };
        migrate(&mut doc);

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn save(&self) -> Result<()> {
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        let json = serde_json::to_string(&*doc).context("Failed to serialize memory")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    pub fn snapshot(&self) -> MemoryDoc {
        self.doc.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Overwrite the style record.
    pub fn set_style(&self, style: StyleMemory) {
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        doc.style = Some(style);
        doc.updated_at = now_ms();
    }

    /// Overwrite the architecture pattern list wholesale.
    pub fn set_architecture(&self, patterns: Vec<ArchitecturalPattern>) {
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        doc.architecture = patterns;
        doc.updated_at = now_ms();
    }

    /// Record that a file was surfaced/consumed. Counters never reset.
    pub fn record_usage(&self, file: &str) {
        let key = file.to_lowercase();
        let mut doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        let record = doc.usage.entry(key).or_default();
        record.count += 1;
        record.last_accessed = now_ms();
        doc.updated_at = record.last_accessed;
    }

    /// Log-scaled usage boost in [0, 1].
    pub fn usage_boost(&self, file: &str) -> f32 {
        let key = file.to_lowercase();
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        let count = doc.usage.get(&key).map(|r| r.count).unwrap_or(0);
        if count == 0 {
            return 0.0;
        }
        let boost = ((1.0 + count as f64).ln() / (1.0 + USAGE_SATURATION).ln()) as f32;
        boost.min(1.0)
    }

    /// Confidence-weighted architecture boost in [0, 1]; a file matches a
    /// pattern by exact path or directory-prefix membership.
    pub fn architecture_boost(&self, file: &str) -> f32 {
        let needle = file.to_lowercase();
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        let mut best = 0.0f32;
        for pattern in &doc.architecture {
            let member = pattern.files.iter().any(|f| {
                let f = f.to_lowercase();
                f == needle || needle.starts_with(&format!("{}/", f.trim_end_matches('/')))
            });
            if member {
                best = best.max(pattern.confidence);
            }
        }
        best.clamp(0.0, 1.0)
    }

    /// Reward snippets that agree with the learned style, in [0, 1].
    pub fn style_boost(&self, snippet: &str) -> f32 {
        let doc = self.doc.lock().unwrap_or_else(|e| e.into_inner());
        let Some(style) = &doc.style else {
            return 0.0;
        };

        let mut score = 0.0f32;

        // Identifier agreement
        if style.naming_preference != "mixed" && !style.naming_preference.is_empty() {
            let idents = collect_identifiers(snippet, 32);
            if !idents.is_empty() {
                let matching = idents
                    .iter()
                    .filter(|i| classify_identifier(i) == Some(style.naming_preference.as_str()))
                    .count();
                score += matching as f32 / idents.len() as f32 / 3.0;
            }
        }

        // Indentation agreement
        let (tabs, space_runs) = indent_counts(snippet);
        let indented = tabs + space_runs.len();
        if indented > 0 {
            let agrees = match style.indent_style.as_str() {
                "tabs" => tabs as f32 / indented as f32,
                "spaces" => space_runs.len() as f32 / indented as f32,
                _ => 0.0,
            };
            score += agrees / 3.0;
        }

        // Quote agreement
        let (single, double) = quote_counts(snippet);
        if single + double > 0 {
            let agrees = match style.quote_style.as_str() {
                "single" => single as f32 / (single + double) as f32,
                "double" => double as f32 / (single + double) as f32,
                _ => 0.0,
            };
            score += agrees / 3.0;
        }

        score.clamp(0.0, 1.0)
    }
}

// ---- style learning ----

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-zA-Z_][a-zA-Z0-9_-]{2,}\b").expect("identifier regex"));
static CAMEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]+(?:[A-Z][a-z0-9]*)+$").expect("camel regex"));
static SNAKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:_[a-z0-9]+)+$").expect("snake regex"));
static PASCAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[A-Z][a-z0-9]+){2,}$").expect("pascal regex"));
static KEBAB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)+$").expect("kebab regex"));
static IMPORT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:import\s|from\s|const\s+\w+\s*=\s*require\(|use\s)"#).expect("import regex")
});

fn classify_identifier(ident: &str) -> Option<&'static str> {
    if SNAKE.is_match(ident) {
        Some("snake_case")
    } else if CAMEL.is_match(ident) {
        Some("camelCase")
    } else if PASCAL.is_match(ident) {
        Some("PascalCase")
    } else if KEBAB.is_match(ident) {
        Some("kebab-case")
    } else {
        None
    }
}

fn collect_identifiers(text: &str, cap: usize) -> Vec<String> {
    IDENTIFIER
        .find_iter(text)
        .take(cap)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Tab-indented line count and the run lengths of space-indented lines.
fn indent_counts(text: &str) -> (usize, Vec<usize>) {
    let mut tabs = 0usize;
    let mut space_runs = Vec::new();
    for line in text.lines() {
        if line.starts_with('\t') {
            tabs += 1;
        } else {
            let run = line.chars().take_while(|c| *c == ' ').count();
            if run > 0 {
                space_runs.push(run);
            }
        }
    }
    (tabs, space_runs)
}

fn quote_counts(text: &str) -> (usize, usize) {
    let single = text.matches('\'').count();
    let double = text.matches('"').count();
    (single, double)
}

/// Samples recently-changed files and derives the dominant conventions.
pub struct StyleLearner {
    sample_cap: usize,
}

impl StyleLearner {
    pub fn new(sample_cap: usize) -> Self {
        Self { sample_cap }
    }

    /// Analyze `(path, text)` samples; the result overwrites any previous
    /// style record.
    pub fn analyze(&self, samples: &[(String, String)]) -> StyleMemory {
        let mut naming: HashMap<&'static str, usize> = HashMap::new();
        let mut examples: Vec<String> = Vec::new();
        let mut tabs = 0usize;
        let mut space_runs: Vec<usize> = Vec::new();
        let mut single_quotes = 0usize;
        let mut double_quotes = 0usize;
        let mut relative_imports = 0usize;
        let mut absolute_imports = 0usize;

        for (_, text) in samples.iter().take(self.sample_cap) {
            for ident in collect_identifiers(text, 400) {
                if let Some(style) = classify_identifier(&ident) {
                    *naming.entry(style).or_default() += 1;
                    if examples.len() < 10 && !examples.contains(&ident) {
                        examples.push(ident);
                    }
                }
            }

            let (t, runs) = indent_counts(text);
            tabs += t;
            space_runs.extend(runs);

            let (s, d) = quote_counts(text);
            single_quotes += s;
            double_quotes += d;

            for line in text.lines() {
                if IMPORT_LINE.is_match(line) {
                    if line.contains("\"./") || line.contains("'./")
                        || line.contains("\"../") || line.contains("'../")
                    {
                        relative_imports += 1;
                    } else {
                        absolute_imports += 1;
                    }
                }
            }
        }

        let total_named: usize = naming.values().sum();
        let (naming_preference, naming_confidence) = if total_named == 0 {
            ("mixed".to_string(), 0.0)
        } else {
            let (style, count) = naming
                .iter()
                .max_by_key(|(_, c)| **c)
                .map(|(s, c)| (*s, *c))
                .unwrap_or(("mixed", 0));
            let confidence = count as f32 / total_named as f32;
            if confidence < NAMING_CONFIDENCE_FLOOR {
                // A weak majority is not worth asserting
                ("mixed".to_string(), confidence)
            } else {
                (style.to_string(), confidence)
            }
        };

        let indent_style = if tabs > space_runs.len() {
            "tabs"
        } else if space_runs.is_empty() && tabs == 0 {
            "mixed"
        } else {
            "spaces"
        };

        let indent_size = if indent_style == "spaces" {
            mode(&space_runs).unwrap_or(4)
        } else {
            0
        };

        let quote_style = if single_quotes + double_quotes == 0 {
            "mixed"
        } else if single_quotes > double_quotes * 2 {
            "single"
        } else if double_quotes > single_quotes * 2 {
            "double"
        } else {
            "mixed"
        };

        let import_style = if relative_imports + absolute_imports == 0 {
            "mixed"
        } else if relative_imports > absolute_imports {
            "relative"
        } else {
            "absolute"
        };

        StyleMemory {
            naming_preference,
            naming_confidence,
            indent_style: indent_style.to_string(),
            indent_size,
            quote_style: quote_style.to_string(),
            import_style: import_style.to_string(),
            identifier_examples: examples,
            updated_at: now_ms(),
        }
    }
}

/// Most common value of a non-empty slice.
fn mode(values: &[usize]) -> Option<usize> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for v in values {
        *counts.entry(*v).or_default() += 1;
    }
    counts.into_iter().max_by_key(|(_, c)| *c).map(|(v, _)| v)
}

// ---- architecture detection ----

struct PatternSpec {
    name: &'static str,
    description: &'static str,
    markers: &'static [&'static str],
    tags: &'static [&'static str],
}

const PATTERN_SPECS: &[PatternSpec] = &[
    PatternSpec {
        name: "mvc",
        description: "controller/model/view layering",
        markers: &["controllers/", "models/", "views/"],
        tags: &["layered"],
    },
    PatternSpec {
        name: "service-repository",
        description: "service layer over repositories",
        markers: &["services/", "repositories/", "service/", "repository/"],
        tags: &["layered"],
    },
    PatternSpec {
        name: "api-handlers",
        description: "route/handler directories for an API surface",
        markers: &["api/", "handlers/", "routes/", "endpoints/"],
        tags: &["api"],
    },
    PatternSpec {
        name: "monorepo-packages",
        description: "multi-package monorepo layout",
        markers: &["packages/", "crates/", "apps/"],
        tags: &["monorepo"],
    },
    PatternSpec {
        name: "domain-usecases",
        description: "domain modules with use-case entry points",
        markers: &["domain/", "usecases/", "use_cases/", "use-cases/"],
        tags: &["ddd"],
    },
    PatternSpec {
        name: "ui-components",
        description: "UI component and hook directories",
        markers: &["components/", "hooks/"],
        tags: &["ui"],
    },
];

/// Minimum files touching a pattern's markers before it is reported.
const PATTERN_MIN_FILES: usize = 2;

/// Detects layered-architecture patterns from indexed file paths. The
/// result overwrites the previous pattern list.
pub struct ArchitectureMemory;

impl ArchitectureMemory {
    pub fn analyze(paths: &[String]) -> Vec<ArchitecturalPattern> {
        let lower: Vec<String> = paths.iter().map(|p| p.to_lowercase()).collect();
        let mut patterns = Vec::new();

        for spec in PATTERN_SPECS {
            let mut files: Vec<String> = Vec::new();
            for (path, orig) in lower.iter().zip(paths.iter()) {
                if spec.markers.iter().any(|m| path.contains(m)) {
                    files.push(orig.clone());
                }
            }
            if files.len() < PATTERN_MIN_FILES {
                continue;
            }

            // Confidence scales with how much of the tree participates
            let confidence = ((files.len() as f32) / 10.0).min(1.0);
            files.truncate(20);

            patterns.push(ArchitecturalPattern {
                name: spec.name.to_string(),
                description: spec.description.to_string(),
                files,
                confidence,
                tags: spec.tags.iter().map(|t| t.to_string()).collect(),
                detected_at: now_ms(),
            });
        }

        patterns
    }
}

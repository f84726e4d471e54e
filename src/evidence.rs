// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-or-upsert findings log.
//!
//! Every item is one JSON file under `.ctxgrep/evidence/`, keyed by id.
//! Items can come from any tool (web imports, index runs, external
//! pipelines) and are queryable by source, group, tag, or text substring.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::{now_ms, short_hash};

/// A single logged finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    pub source: String,
    pub timestamp: u64,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Query over the evidence log; all set fields must match.
#[derive(Debug, Clone, Default)]
pub struct EvidenceQuery {
    pub source: Option<String>,
    pub group: Option<String>,
    pub tag: Option<String>,
    /// Case-insensitive substring over title/snippet/data
    pub text: Option<String>,
}

/// File-per-item evidence store.
pub struct EvidenceLog {
    dir: PathBuf,
}

impl EvidenceLog {
    pub fn open(store_dir: &Path) -> Result<Self> {
        let dir = store_dir.join("evidence");
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create evidence directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn item_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Add a finding. The id is derived from (source, data) unless the
    /// meta carries an explicit `id`; an existing item with the same id is
    /// replaced.
    pub fn add(&self, source: &str, data: Value, meta: Option<Value>) -> Result<String> {
        let id = meta
            .as_ref()
            .and_then(|m| m.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| short_hash(&format!("{}\u{0}{}", source, data)));

        let title = meta
            .as_ref()
            .and_then(|m| m.get("title"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let uri = meta
            .as_ref()
            .and_then(|m| m.get("uri"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let group = meta
            .as_ref()
            .and_then(|m| m.get("group"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let tags = meta
            .as_ref()
            .and_then(|m| m.get("tags"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| t.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let snippet = data.as_str().map(|s| s.chars().take(240).collect());

        let item = EvidenceItem {
            id: id.clone(),
            source: source.to_string(),
            timestamp: now_ms(),
            data,
            meta,
            title,
            snippet,
            uri,
            score: None,
            tags,
            group,
        };

        self.upsert(&item)?;
        Ok(id)
    }

    /// Insert or replace a fully-formed item.
    pub fn upsert(&self, item: &EvidenceItem) -> Result<()> {
        let json = serde_json::to_string(item).context("Failed to serialize evidence item")?;
        let path = self.item_path(&item.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<EvidenceItem>> {
        let path = self.item_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(serde_json::from_str(&content).with_context(|| {
            format!("Failed to parse {}", path.display())
        })?))
    }

    /// All items matching the query, newest first.
    pub fn find(&self, query: &EvidenceQuery) -> Result<Vec<EvidenceItem>> {
        let mut items = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.path().extension().map(|e| e == "json").unwrap_or(false) {
                continue;
            }
            let content = match fs::read_to_string(entry.path()) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let item: EvidenceItem = match serde_json::from_str(&content) {
                Ok(i) => i,
                Err(_) => continue,
            };
            if matches(&item, query) {
                items.push(item);
            }
        }
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    pub fn all(&self) -> Result<Vec<EvidenceItem>> {
        self.find(&EvidenceQuery::default())
    }
}

fn matches(item: &EvidenceItem, query: &EvidenceQuery) -> bool {
    if let Some(source) = &query.source {
        if &item.source != source {
            return false;
        }
    }
    if let Some(group) = &query.group {
        if item.group.as_deref() != Some(group.as_str()) {
            return false;
        }
    }
    if let Some(tag) = &query.tag {
        if !item.tags.iter().any(|t| t == tag) {
            return false;
        }
    }
    if let Some(text) = &query.text {
        let needle = text.to_lowercase();
        let haystack = format!(
            "{} {} {}",
            item.title.as_deref().unwrap_or(""),
            item.snippet.as_deref().unwrap_or(""),
            item.data
        )
        .to_lowercase();
        if !haystack.contains(&needle) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn add_and_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let log = EvidenceLog::open(dir.path()).unwrap();

        let id = log
            .add("web", json!("page body text"), Some(json!({"title": "Page", "uri": "https://x"})))
            .unwrap();

        let item = log.get(&id).unwrap().unwrap();
        assert_eq!(item.source, "web");
        assert_eq!(item.title.as_deref(), Some("Page"));
        assert_eq!(item.snippet.as_deref(), Some("page body text"));
    }

    #[test]
    fn same_source_and_data_upserts() {
        let dir = TempDir::new().unwrap();
        let log = EvidenceLog::open(dir.path()).unwrap();

        let a = log.add("scan", json!("same"), None).unwrap();
        let b = log.add("scan", json!("same"), None).unwrap();
        assert_eq!(a, b);
        assert_eq!(log.all().unwrap().len(), 1);
    }

    #[test]
    fn find_filters_by_source_group_tag_text() {
        let dir = TempDir::new().unwrap();
        let log = EvidenceLog::open(dir.path()).unwrap();

        log.add(
            "web",
            json!("retry with backoff"),
            Some(json!({"group": "g1", "tags": ["http"]})),
        )
        .unwrap();
        log.add("scan", json!("unrelated"), Some(json!({"group": "g2"})))
            .unwrap();

        let by_source = log
            .find(&EvidenceQuery {
                source: Some("web".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_source.len(), 1);

        let by_tag = log
            .find(&EvidenceQuery {
                tag: Some("http".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_tag.len(), 1);

        let by_text = log
            .find(&EvidenceQuery {
                text: Some("BACKOFF".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_text.len(), 1);

        let miss = log
            .find(&EvidenceQuery {
                group: Some("nope".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(miss.is_empty());
    }
}

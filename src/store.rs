// SPDX-License-Identifier: MIT OR Apache-2.0

//! On-disk persistence for chunks, embeddings, file map, stats, and doc
//! records.
//!
//! Everything is a JSON record under `.ctxgrep/`: one file per indexed
//! source file for chunks, one file per content hash in the embedding
//! cache, plus `filemap.json`, `stats.json`, and `docs.json`. Writes go
//! through write-then-rename so a crash never leaves a torn record.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::chunker::ChunkKind;
use crate::utils::{now_ms, short_hash, INDEX_DIR};

/// Vector payload: plain floats, or packed little-endian f32 bytes in
/// base64 when compression is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VectorData {
    Floats(Vec<f32>),
    Packed(String),
}

impl VectorData {
    pub fn encode(vector: &[f32], compress: bool) -> Self {
        if compress {
            let mut bytes = Vec::with_capacity(vector.len() * 4);
            for v in vector {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            VectorData::Packed(BASE64.encode(bytes))
        } else {
            VectorData::Floats(vector.to_vec())
        }
    }

    pub fn decode(&self) -> Vec<f32> {
        match self {
            VectorData::Floats(v) => v.clone(),
            VectorData::Packed(b64) => {
                let bytes = BASE64.decode(b64).unwrap_or_default();
                bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect()
            }
        }
    }
}

/// Embedding attached to a stored chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkEmbedding {
    pub vector: VectorData,
    pub model: String,
    pub dims: usize,
    pub provider: String,
}

/// A persisted chunk. Identity is (file, start_line, end_line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    pub content_hash: String,
    pub kind: ChunkKind,
    /// Symbol names declared inside this chunk's span
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<ChunkEmbedding>,
}

/// All chunks for one source file, rewritten as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChunks {
    pub path: String,
    pub file_hash: String,
    pub indexed_at_ms: u64,
    pub chunks: Vec<StoredChunk>,
}

/// Content-hash-keyed embedding cache record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub content_hash: String,
    pub vector: VectorData,
    pub model: String,
    pub dims: usize,
    pub provider: String,
    pub created_at_ms: u64,
}

/// Per-file metadata backing the non-VCS change-detection path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMapEntry {
    pub path: String,
    pub mtime_ms: u64,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_indexed_revision: Option<String>,
}

/// Singleton index statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub chunks: u64,
    pub embeddings: u64,
    pub files: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_head: Option<String>,
    /// Advances only on a full reindex
    pub indexed_at: u64,
    /// Advances on every run; TTL gating reads this
    pub updated_at: u64,
    pub storage_mb: f64,
    pub compression: bool,
}

/// Extracted documentation metadata (see docs.rs for extraction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocRecord {
    pub id: String,
    pub uri: String,
    pub title: String,
    pub doc_type: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

/// JSON-record store rooted at `<workspace>/.ctxgrep/`.
pub struct Store {
    dir: PathBuf,
    compression: bool,
}

impl Store {
    /// Open (creating directories as needed) the store for a workspace.
    pub fn open(root: &Path, compression: bool) -> Result<Self> {
        let dir = root.join(INDEX_DIR);
        for sub in ["chunks", "embed-cache", "evidence"] {
            fs::create_dir_all(dir.join(sub))
                .with_context(|| format!("Failed to create store directory: {}", dir.display()))?;
        }
        Ok(Self { dir, compression })
    }

    /// The `.ctxgrep` directory this store writes under.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    pub fn encode_vector(&self, vector: &[f32]) -> VectorData {
        VectorData::encode(vector, self.compression)
    }

    // ---- chunks ----

    fn chunk_record_path(&self, file: &str) -> PathBuf {
        self.dir.join("chunks").join(format!("{}.json", short_hash(file)))
    }

    /// Replace all chunks for one file.
    pub fn save_file_chunks(&self, record: &FileChunks) -> Result<()> {
        write_json_atomic(&self.chunk_record_path(&record.path), record)
    }

    pub fn load_file_chunks(&self, file: &str) -> Result<Option<FileChunks>> {
        read_json_opt(&self.chunk_record_path(file))
    }

    /// Delete every chunk for a file. Idempotent.
    pub fn delete_chunks_for_file(&self, file: &str) -> Result<bool> {
        let path = self.chunk_record_path(file);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete chunk record: {}", path.display()))?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Iterate every file's chunk record.
    pub fn all_file_chunks(&self) -> Result<Vec<FileChunks>> {
        let mut out = Vec::new();
        let chunks_dir = self.dir.join("chunks");
        for entry in fs::read_dir(&chunks_dir)? {
            let entry = entry?;
            if entry.path().extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(record) = read_json_opt::<FileChunks>(&entry.path())? {
                    out.push(record);
                }
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    /// Live chunk/embedding counts, for stats consistency.
    pub fn count_chunks_and_embeddings(&self) -> Result<(u64, u64)> {
        let mut chunks = 0u64;
        let mut embeddings = 0u64;
        for record in self.all_file_chunks()? {
            chunks += record.chunks.len() as u64;
            embeddings += record.chunks.iter().filter(|c| c.embedding.is_some()).count() as u64;
        }
        Ok((chunks, embeddings))
    }

    // ---- embedding cache ----

    fn cache_record_path(&self, content_hash: &str) -> PathBuf {
        self.dir
            .join("embed-cache")
            .join(format!("{}.json", content_hash))
    }

    pub fn embed_cache_get(&self, content_hash: &str) -> Result<Option<EmbeddingRecord>> {
        read_json_opt(&self.cache_record_path(content_hash))
    }

    pub fn embed_cache_put(&self, record: &EmbeddingRecord) -> Result<()> {
        write_json_atomic(&self.cache_record_path(&record.content_hash), record)
    }

    // ---- file map ----

    pub fn load_file_map(&self) -> Result<HashMap<String, FileMapEntry>> {
        Ok(read_json_opt(&self.dir.join("filemap.json"))?.unwrap_or_default())
    }

    pub fn save_file_map(&self, map: &HashMap<String, FileMapEntry>) -> Result<()> {
        write_json_atomic(&self.dir.join("filemap.json"), map)
    }

    // ---- stats ----

    pub fn load_stats(&self) -> Result<Option<IndexStats>> {
        read_json_opt(&self.dir.join("stats.json"))
    }

    pub fn save_stats(&self, stats: &IndexStats) -> Result<()> {
        write_json_atomic(&self.dir.join("stats.json"), stats)
    }

    // ---- doc records ----

    pub fn load_docs(&self) -> Result<Vec<DocRecord>> {
        Ok(read_json_opt(&self.dir.join("docs.json"))?.unwrap_or_default())
    }

    /// Replace the doc records owned by `uri` with a fresh batch.
    pub fn save_docs_for_uri(&self, uri: &str, batch: Vec<DocRecord>) -> Result<()> {
        let mut docs = self.load_docs()?;
        docs.retain(|d| d.uri != uri);
        docs.extend(batch);
        write_json_atomic(&self.dir.join("docs.json"), &docs)
    }

    /// Drop doc records for a removed file.
    pub fn delete_docs_for_uri(&self, uri: &str) -> Result<()> {
        let mut docs = self.load_docs()?;
        let before = docs.len();
        docs.retain(|d| d.uri != uri);
        if docs.len() != before {
            write_json_atomic(&self.dir.join("docs.json"), &docs)?;
        }
        Ok(())
    }

    // ---- storage budget ----

    /// On-disk size of the store directory in megabytes.
    pub fn measure_disk_mb(&self) -> f64 {
        let mut bytes = 0u64;
        for entry in walkdir::WalkDir::new(&self.dir).into_iter().flatten() {
            if entry.file_type().is_file() {
                bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        bytes as f64 / (1024.0 * 1024.0)
    }

    /// Soft-cap enforcement: when over budget, prune embedding-cache
    /// records oldest-first until under budget or the cache is empty. The
    /// primary chunk index is never touched.
    pub fn enforce_budget(&self, max_disk_mb: u64) -> Result<usize> {
        let used = self.measure_disk_mb();
        if used <= max_disk_mb as f64 {
            return Ok(0);
        }

        tracing::warn!(
            "store at {:.1}MB exceeds budget of {}MB; pruning embedding cache",
            used,
            max_disk_mb
        );

        let cache_dir = self.dir.join("embed-cache");
        let mut entries: Vec<(PathBuf, u64, u64)> = Vec::new();
        for entry in fs::read_dir(&cache_dir)? {
            let entry = entry?;
            if let Ok(meta) = entry.metadata() {
                let created = read_json_opt::<EmbeddingRecord>(&entry.path())?
                    .map(|r| r.created_at_ms)
                    .unwrap_or(0);
                entries.push((entry.path(), created, meta.len()));
            }
        }
        entries.sort_by_key(|(_, created, _)| *created);

        let mut pruned = 0usize;
        let mut remaining = used;
        for (path, _, len) in entries {
            if remaining <= max_disk_mb as f64 {
                break;
            }
            fs::remove_file(&path)?;
            remaining -= len as f64 / (1024.0 * 1024.0);
            pruned += 1;
        }

        Ok(pruned)
    }
}

/// Make an embedding cache record from a fresh vector.
pub fn cache_record(
    content_hash: &str,
    vector: VectorData,
    model: &str,
    dims: usize,
    provider: &str,
) -> EmbeddingRecord {
    EmbeddingRecord {
        content_hash: content_hash.to_string(),
        vector,
        model: model.to_string(),
        dims,
        provider: provider.to_string(),
        created_at_ms: now_ms(),
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string(value).context("Failed to serialize record")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn read_json_opt<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

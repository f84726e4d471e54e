// SPDX-License-Identifier: MIT OR Apache-2.0

//! Indexing orchestrator.
//!
//! Drives a full or incremental run: enumerate files, detect changes,
//! chunk and tag changed files, embed cache-misses in bounded batches,
//! persist chunks/vectors/docs, refresh stats and behavioral memory, and
//! enforce the storage budget. Recoverable failures are logged and
//! counted; the caller always gets a structured outcome, never an
//! exception, and only an unresolvable early-stage failure reports
//! `ok: false`.

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

use crate::changes::{ChangeDetector, ChangeSet};
use crate::chunker::chunk_file;
use crate::docs::{extract_doc_records, is_doc_file};
use crate::embed::{ContentType, EmbedRequest, EmbeddingGateway, InputType};
use crate::memory::{ArchitectureMemory, StyleLearner};
use crate::registry::Workspace;
use crate::scanner::{detect_language, FileEntry, FileScanner};
use crate::store::{cache_record, DocRecord, FileChunks, FileMapEntry, IndexStats, StoredChunk};
use crate::symbols::CompositeExtractor;
use crate::utils::{content_hash, now_ms};

/// Options for one indexing run.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Bounded run: smaller file budget, TTL gate, deferral of excess
    pub quick: bool,
    /// Ignore the change set and reindex everything
    pub force: bool,
    /// Explicit target paths/globs; bypasses the TTL gate
    pub include: Vec<String>,
    /// Render a progress bar (CLI)
    pub progress: bool,
}

/// Structured result of an indexing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexOutcome {
    pub ok: bool,
    pub chunks: u64,
    pub embeddings: u64,
    pub files: u64,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub took_ms: u64,
    pub storage_mb: f64,
    /// Files deferred to a later run (quick mode over budget)
    pub pending: Vec<String>,
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub embed_errors: u64,
}

/// Run phases, for logging and error attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Scanning,
    Chunking,
    Embedding,
    Persisting,
    Done,
}

struct ProcessedFile {
    entry: FileEntry,
    file_hash: String,
    chunks: Vec<StoredChunk>,
    docs: Vec<DocRecord>,
}

/// Index the workspace. See module docs for the error contract.
pub async fn index_repo(workspace: &Workspace, options: &IndexOptions) -> IndexOutcome {
    let started = Instant::now();

    if !workspace.root.exists() {
        return IndexOutcome {
            ok: false,
            error: Some(format!(
                "workspace root does not exist: {}",
                workspace.root.display()
            )),
            ..Default::default()
        };
    }

    let prior_stats = workspace.store.load_stats().ok().flatten();

    // TTL gate: rapid repeated quick triggers reuse the last-known stats.
    if options.quick && !options.force && options.include.is_empty() {
        if let Some(stats) = &prior_stats {
            let ttl_ms = workspace.config.index.ttl_secs() * 1000;
            if now_ms().saturating_sub(stats.updated_at) < ttl_ms {
                tracing::debug!("index fresh within TTL; skipping run");
                return IndexOutcome {
                    ok: true,
                    chunks: stats.chunks,
                    embeddings: stats.embeddings,
                    files: stats.files,
                    storage_mb: stats.storage_mb,
                    took_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                };
            }
        }
    }

    let mut phase = Phase::Scanning;
    tracing::debug!("indexing {} ({:?})", workspace.root.display(), phase);

    let scanner = FileScanner::new(&workspace.root)
        .with_max_file_size(workspace.config.index.max_file_size())
        .with_excludes(workspace.config.index.exclude_paths());
    let files = match scanner.list_files() {
        Ok(files) => files,
        Err(e) => {
            return IndexOutcome {
                ok: false,
                error: Some(format!("cannot enumerate workspace: {}", e)),
                took_ms: started.elapsed().as_millis() as u64,
                ..Default::default()
            };
        }
    };

    let mut file_map = workspace.store.load_file_map().unwrap_or_default();
    let by_rel: HashMap<&str, &FileEntry> =
        files.iter().map(|f| (f.rel_path.as_str(), f)).collect();

    let detector = ChangeDetector::new(&workspace.root);
    let change_set = compute_change_set(
        &detector,
        &files,
        &file_map,
        prior_stats.as_ref(),
        options,
    );

    // Cap the work; quick mode defers the excess instead of dropping it.
    let mut to_index: Vec<String> = change_set
        .paths_to_index()
        .into_iter()
        .filter(|p| by_rel.contains_key(p.as_str()))
        .collect();
    let budget = if options.quick {
        workspace.config.index.quick_budget()
    } else {
        workspace.config.index.max_files_per_run()
    };
    let pending: Vec<String> = if to_index.len() > budget {
        to_index.split_off(budget)
    } else {
        Vec::new()
    };
    let partial = !pending.is_empty();
    if partial {
        tracing::info!(
            "changed set exceeds budget of {}; deferring {} files",
            budget,
            pending.len()
        );
    }

    // Removed files: chunks, lexical docs, doc records, and the filemap
    // entry go before anything new is written for those paths.
    let mut removed: Vec<String> = Vec::new();
    if !change_set.deleted.is_empty() {
        if let Ok(mut writer) = workspace.lexical.writer() {
            for path in &change_set.deleted {
                let _ = workspace.store.delete_chunks_for_file(path);
                let _ = workspace.store.delete_docs_for_uri(path);
                workspace.lexical.delete_file(&writer, path);
                file_map.remove(path);
                removed.push(path.clone());
            }
            if let Err(e) = writer.commit() {
                tracing::error!("failed to commit deletions: {}", e);
            }
            drop(writer);
        }
    }

    phase = Phase::Chunking;
    tracing::debug!("{} files to chunk ({:?})", to_index.len(), phase);

    let progress = if options.progress {
        let pb = ProgressBar::new(to_index.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.cyan/blue}] {pos}/{len} files | {msg}")
                .expect("valid progress bar template")
                .progress_chars("##."),
        );
        Some(pb)
    } else {
        None
    };

    let extractor = CompositeExtractor::new();
    let processed: Vec<ProcessedFile> = to_index
        .par_iter()
        .filter_map(|rel| {
            let entry = by_rel.get(rel.as_str())?;
            if let Some(pb) = &progress {
                pb.set_message(rel.clone());
            }

            let text = match std::fs::read_to_string(&entry.path) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("failed to read {}: {}", rel, e);
                    if let Some(pb) = &progress {
                        pb.inc(1);
                    }
                    return None;
                }
            };

            let file_hash = content_hash(&text);
            let spans = chunk_file(rel, &text);

            let ext = std::path::Path::new(rel)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            let symbols = match detect_language(ext) {
                Some(lang) => extractor.extract_symbols(rel, &text, &lang),
                None => Vec::new(),
            };

            let chunks: Vec<StoredChunk> = spans
                .into_iter()
                .map(|span| {
                    let names: Vec<String> = symbols
                        .iter()
                        .filter(|s| {
                            let line = s.line as u32;
                            line >= span.start_line && line <= span.end_line
                        })
                        .map(|s| s.name.clone())
                        .collect();
                    StoredChunk {
                        file: rel.clone(),
                        start_line: span.start_line,
                        end_line: span.end_line,
                        content_hash: content_hash(&span.text),
                        text: span.text,
                        kind: span.kind,
                        symbols: names,
                        embedding: None,
                    }
                })
                .collect();

            let docs = if is_doc_file(rel) {
                extract_doc_records(rel, &text)
            } else {
                Vec::new()
            };

            if let Some(pb) = &progress {
                pb.inc(1);
            }

            Some(ProcessedFile {
                entry: (*entry).clone(),
                file_hash,
                chunks,
                docs,
            })
        })
        .collect();

    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }

    phase = Phase::Embedding;
    let (mut processed, embed_errors) = embed_cache_misses(workspace, processed, phase).await;

    phase = Phase::Persisting;
    tracing::debug!("persisting {} files ({:?})", processed.len(), phase);

    let head = change_set.head.clone().or_else(|| detector.current_head());
    match workspace.lexical.writer() {
        Ok(mut writer) => {
            for file in &mut processed {
                workspace.lexical.delete_file(&writer, &file.entry.rel_path);
                for chunk in &file.chunks {
                    if let Err(e) = workspace.lexical.add_chunk(&writer, chunk) {
                        tracing::error!("failed to index chunk of {}: {}", chunk.file, e);
                    }
                }

                let record = FileChunks {
                    path: file.entry.rel_path.clone(),
                    file_hash: file.file_hash.clone(),
                    indexed_at_ms: now_ms(),
                    chunks: std::mem::take(&mut file.chunks),
                };
                if let Err(e) = workspace.store.save_file_chunks(&record) {
                    tracing::error!("failed to persist chunks of {}: {}", record.path, e);
                    continue;
                }

                if is_doc_file(&file.entry.rel_path) {
                    if let Err(e) = workspace
                        .store
                        .save_docs_for_uri(&file.entry.rel_path, std::mem::take(&mut file.docs))
                    {
                        tracing::error!("failed to persist docs of {}: {}", file.entry.rel_path, e);
                    }
                }

                file_map.insert(
                    file.entry.rel_path.clone(),
                    FileMapEntry {
                        path: file.entry.rel_path.clone(),
                        mtime_ms: file.entry.mtime_ms,
                        size: file.entry.size,
                        last_indexed_revision: head.clone(),
                    },
                );
            }
            if let Err(e) = writer.commit() {
                tracing::error!("failed to commit lexical index: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("lexical writer unavailable: {}", e);
        }
    }

    if let Err(e) = workspace.store.save_file_map(&file_map) {
        tracing::error!("failed to persist file map: {}", e);
    }

    // Stats reflect live store counts so they can never silently drift.
    let (chunk_count, embedding_count) = workspace
        .store
        .count_chunks_and_embeddings()
        .unwrap_or((0, 0));
    let storage_mb = workspace.store.measure_disk_mb();
    let now = now_ms();
    let stats = IndexStats {
        chunks: chunk_count,
        embeddings: embedding_count,
        files: file_map.len() as u64,
        revision_head: head,
        indexed_at: if options.force {
            now
        } else {
            prior_stats.as_ref().map(|s| s.indexed_at).unwrap_or(now)
        },
        updated_at: now,
        storage_mb,
        compression: workspace.store.compression(),
    };
    if let Err(e) = workspace.store.save_stats(&stats) {
        tracing::error!("failed to persist stats: {}", e);
    }

    if workspace.config.storage.auto_cleanup() {
        match workspace
            .store
            .enforce_budget(workspace.config.storage.max_disk_usage_mb())
        {
            Ok(0) => {}
            Ok(pruned) => tracing::info!("pruned {} embedding cache records", pruned),
            Err(e) => tracing::warn!("storage budget enforcement failed: {}", e),
        }
    }

    run_learners(workspace, &processed, &file_map);

    // Cached rankings must not outlive the data they ranked.
    workspace.cache.invalidate_all();

    phase = Phase::Done;
    tracing::debug!(
        "index run complete: {} chunks, {} embeddings, {} files ({:?})",
        stats.chunks,
        stats.embeddings,
        stats.files,
        phase
    );

    IndexOutcome {
        ok: true,
        chunks: stats.chunks,
        embeddings: stats.embeddings,
        files: stats.files,
        changed: to_index,
        removed,
        took_ms: started.elapsed().as_millis() as u64,
        storage_mb,
        pending,
        partial,
        error: None,
        embed_errors,
    }
}

fn compute_change_set(
    detector: &ChangeDetector,
    files: &[FileEntry],
    file_map: &HashMap<String, FileMapEntry>,
    prior_stats: Option<&IndexStats>,
    options: &IndexOptions,
) -> ChangeSet {
    if !options.include.is_empty() {
        // Explicit targets: index exactly those paths, current head noted.
        let targets: Vec<String> = files
            .iter()
            .filter(|f| {
                options.include.iter().any(|inc| {
                    f.rel_path == *inc || f.rel_path.starts_with(&format!("{}/", inc.trim_end_matches('/')))
                })
            })
            .map(|f| f.rel_path.clone())
            .collect();
        return ChangeSet {
            added: targets,
            head: detector.current_head(),
            ..Default::default()
        };
    }

    if options.force {
        // Full reindex: everything is "added", vanished paths are removed.
        let live: std::collections::HashSet<&str> =
            files.iter().map(|f| f.rel_path.as_str()).collect();
        return ChangeSet {
            added: files.iter().map(|f| f.rel_path.clone()).collect(),
            deleted: file_map
                .keys()
                .filter(|p| !live.contains(p.as_str()))
                .cloned()
                .collect(),
            head: detector.current_head(),
            ..Default::default()
        };
    }

    let prev_revision = prior_stats.and_then(|s| s.revision_head.clone());
    detector.detect(prev_revision.as_deref(), files, file_map)
}

/// Embed every chunk whose content hash misses the embedding cache.
/// Returns the processed set with vectors attached plus the failed-batch
/// count; a failed batch leaves its chunks unembedded for a later run.
async fn embed_cache_misses(
    workspace: &Workspace,
    mut processed: Vec<ProcessedFile>,
    phase: Phase,
) -> (Vec<ProcessedFile>, u64) {
    // (file index, chunk index) per miss, grouped by content type
    let mut miss_keys: HashMap<&'static str, (ContentType, Vec<(usize, usize)>)> = HashMap::new();
    let mut cache_hits = 0usize;

    for (fi, file) in processed.iter_mut().enumerate() {
        for (ci, chunk) in file.chunks.iter_mut().enumerate() {
            match workspace.store.embed_cache_get(&chunk.content_hash) {
                Ok(Some(record)) => {
                    chunk.embedding = Some(crate::store::ChunkEmbedding {
                        vector: record.vector,
                        model: record.model,
                        dims: record.dims,
                        provider: record.provider,
                    });
                    cache_hits += 1;
                }
                Ok(None) => {
                    let content_type = EmbeddingGateway::detect_content_type(
                        Some(&chunk.file),
                        &chunk.text,
                    );
                    let key = content_type_key(content_type);
                    miss_keys
                        .entry(key)
                        .or_insert_with(|| (content_type, Vec::new()))
                        .1
                        .push((fi, ci));
                }
                Err(e) => {
                    tracing::warn!("embed cache read failed: {}", e);
                }
            }
        }
    }

    let misses: usize = miss_keys.values().map(|(_, v)| v.len()).sum();
    tracing::debug!(
        "{} embedding cache hits, {} misses ({:?})",
        cache_hits,
        misses,
        phase
    );

    let mut embed_errors = 0u64;
    // Dedup identical text within the run so byte-identical chunks cost
    // one provider call.
    for (_, (content_type, keys)) in miss_keys {
        let mut unique: Vec<String> = Vec::new();
        let mut hash_to_slot: HashMap<String, usize> = HashMap::new();
        for (fi, ci) in &keys {
            let chunk = &processed[*fi].chunks[*ci];
            if !hash_to_slot.contains_key(&chunk.content_hash) {
                hash_to_slot.insert(chunk.content_hash.clone(), unique.len());
                unique.push(chunk.text.clone());
            }
        }

        let request = EmbedRequest {
            content_type: Some(content_type),
            file_path: None,
            input_type: InputType::Document,
        };

        let outcomes = match workspace.gateway.embed_many(&unique, &request).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::error!("embedding round failed, chunks left for retry: {}", e);
                embed_errors += keys.len() as u64;
                continue;
            }
        };

        // Flatten rounds back to the unique-text order
        let mut vectors: Vec<(Vec<f32>, String, String, usize)> = Vec::with_capacity(unique.len());
        for outcome in outcomes {
            for vector in outcome.vectors {
                vectors.push((
                    vector,
                    outcome.model.clone(),
                    outcome.provider.clone(),
                    outcome.dims,
                ));
            }
        }
        if vectors.len() != unique.len() {
            tracing::error!(
                "embedding round returned {} vectors for {} texts; skipping",
                vectors.len(),
                unique.len()
            );
            embed_errors += keys.len() as u64;
            continue;
        }

        for (fi, ci) in keys {
            let chunk = &mut processed[fi].chunks[ci];
            let slot = match hash_to_slot.get(&chunk.content_hash) {
                Some(slot) => *slot,
                None => continue,
            };
            let (vector, model, provider, dims) = &vectors[slot];
            let encoded = workspace.store.encode_vector(vector);
            chunk.embedding = Some(crate::store::ChunkEmbedding {
                vector: encoded.clone(),
                model: model.clone(),
                dims: *dims,
                provider: provider.clone(),
            });
            if let Err(e) = workspace.store.embed_cache_put(&cache_record(
                &chunk.content_hash,
                encoded,
                model,
                *dims,
                provider,
            )) {
                tracing::warn!("embed cache write failed: {}", e);
            }
        }
    }

    (processed, embed_errors)
}

fn content_type_key(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Code => "code",
        ContentType::Docs => "docs",
        ContentType::Legal => "legal",
        ContentType::Finance => "finance",
        ContentType::General => "general",
    }
}

/// Style and architecture learning over the current file set, when the
/// toggles are on.
fn run_learners(
    workspace: &Workspace,
    processed: &[ProcessedFile],
    file_map: &HashMap<String, FileMapEntry>,
) {
    let memory_config = &workspace.config.memory;

    if memory_config.learn_style() && !processed.is_empty() {
        let samples: Vec<(String, String)> = processed
            .iter()
            .take(memory_config.style_sample_cap())
            .filter_map(|f| {
                std::fs::read_to_string(workspace.root.join(&f.entry.rel_path))
                    .ok()
                    .map(|text| (f.entry.rel_path.clone(), text))
            })
            .collect();
        if !samples.is_empty() {
            let style = StyleLearner::new(memory_config.style_sample_cap()).analyze(&samples);
            workspace.memory.set_style(style);
        }
    }

    if memory_config.learn_architecture() {
        let paths: Vec<String> = file_map.keys().cloned().collect();
        if !paths.is_empty() {
            workspace
                .memory
                .set_architecture(ArchitectureMemory::analyze(&paths));
        }
    }

    if let Err(e) = workspace.memory.save() {
        tracing::warn!("failed to persist memory: {}", e);
    }
}

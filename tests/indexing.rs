// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use assert_cmd::cargo::cargo_bin_cmd;
use async_trait::async_trait;
use predicates::prelude::*;

use ctxgrep::cache::QueryCache;
use ctxgrep::config::Config;
use ctxgrep::embed::{ContentType, EmbeddingGateway, EmbeddingProvider, InputType};
use ctxgrep::evidence::EvidenceLog;
use ctxgrep::indexer::{index_repo, IndexOptions, IndexOutcome};
use ctxgrep::lexical::LexicalIndex;
use ctxgrep::memory::MemoryStore;
use ctxgrep::registry::Workspace;
use ctxgrep::store::Store;

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn run_index(repo_root: &Path, extra_args: &[&str]) -> IndexOutcome {
    let mut cmd = cargo_bin_cmd!("ctxgrep");
    cmd.env_remove("CTXGREP_ROOT")
        .env_remove("VOYAGE_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("COHERE_API_KEY");
    cmd.arg("index")
        .arg("--path")
        .arg(repo_root)
        .arg("--format")
        .arg("json")
        .args(extra_args);
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "index run failed: {:?}", output);
    serde_json::from_slice(&output.stdout).unwrap()
}

fn open_store(repo_root: &Path) -> Store {
    Store::open(repo_root, true).unwrap()
}

#[test]
fn force_reindex_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join("src").join("lib.rs"),
        "pub fn greet(name: &str) -> String {\n    format!(\"hello {}\", name)\n}\n",
    );
    write_file(&dir.path().join("README.md"), "# Greeter\n\nSays hello.\n");

    let first = run_index(dir.path(), &["--force"]);
    let second = run_index(dir.path(), &["--force"]);

    assert!(first.chunks > 0);
    assert_eq!(first.chunks, second.chunks);
    assert_eq!(first.embeddings, second.embeddings);
    assert_eq!(first.files, second.files);

    // Stats mirror live store counts
    let store = open_store(dir.path());
    let stats = store.load_stats().unwrap().unwrap();
    let (chunks, embeddings) = store.count_chunks_and_embeddings().unwrap();
    assert_eq!(stats.chunks, chunks);
    assert_eq!(stats.embeddings, embeddings);
}

#[test]
fn incremental_run_reports_add_modify_delete() {
    let dir = TempDir::new().unwrap();
    write_file(&dir.path().join("a.rs"), "fn alpha_one() {}\n");
    write_file(&dir.path().join("b.rs"), "fn beta_two() {}\n");
    write_file(&dir.path().join("c.rs"), "fn gamma_three() {}\n");

    run_index(dir.path(), &["--force"]);
    let store = open_store(dir.path());
    assert!(store.load_file_chunks("c.rs").unwrap().is_some());

    write_file(&dir.path().join("d.rs"), "fn delta_four() {}\n");
    write_file(
        &dir.path().join("b.rs"),
        "fn beta_two() {\n    let _ = 2;\n}\n",
    );
    fs::remove_file(dir.path().join("c.rs")).unwrap();

    let outcome = run_index(dir.path(), &[]);
    assert!(outcome.changed.iter().any(|p| p == "d.rs"));
    assert!(outcome.changed.iter().any(|p| p == "b.rs"));
    assert!(!outcome.changed.iter().any(|p| p == "a.rs"));
    assert_eq!(outcome.removed, vec!["c.rs"]);

    // The store no longer knows the deleted file
    assert!(store.load_file_chunks("c.rs").unwrap().is_none());
    let map = store.load_file_map().unwrap();
    assert!(!map.contains_key("c.rs"));
    assert!(map.contains_key("d.rs"));
}

#[test]
fn quick_runs_within_ttl_are_skipped() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join(".ctxgreprc.toml"),
        "[index]\nttl_secs = 300\nexclude_paths = [\".ctxgreprc.toml\"]\n",
    );
    write_file(&dir.path().join("one.rs"), "fn one() {}\n");

    let first = run_index(dir.path(), &["--force"]);
    assert_eq!(first.files, 1);

    // New file, but the index is still fresh: the quick run must not touch it
    write_file(&dir.path().join("two.rs"), "fn two() {}\n");
    let gated = run_index(dir.path(), &["--quick"]);
    assert!(gated.changed.is_empty());
    assert_eq!(gated.files, 1);

    // Force bypasses the gate
    let forced = run_index(dir.path(), &["--force"]);
    assert_eq!(forced.files, 2);
}

#[test]
fn quick_mode_defers_files_over_budget() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join(".ctxgreprc.toml"),
        "[index]\nquick_budget = 2\nexclude_paths = [\".ctxgreprc.toml\"]\n",
    );
    for i in 0..5 {
        write_file(
            &dir.path().join(format!("file{}.rs", i)),
            &format!("fn item_{}() {{}}\n", i),
        );
    }

    let outcome = run_index(dir.path(), &["--quick"]);
    assert!(outcome.partial);
    assert_eq!(outcome.changed.len(), 2);
    assert_eq!(outcome.pending.len(), 3);

    // Deferred files are picked up by the next unconstrained run
    let followup = run_index(dir.path(), &["--force"]);
    assert_eq!(followup.files, 5);
    assert!(!followup.partial);
}

#[test]
fn include_targets_index_only_matching_paths() {
    let dir = TempDir::new().unwrap();
    write_file(&dir.path().join("src").join("core.rs"), "fn core() {}\n");
    write_file(&dir.path().join("docs").join("notes.md"), "# Notes\n");

    let outcome = run_index(dir.path(), &["--include", "src"]);
    assert_eq!(outcome.changed, vec!["src/core.rs"]);

    let store = open_store(dir.path());
    assert!(store.load_file_chunks("src/core.rs").unwrap().is_some());
    assert!(store.load_file_chunks("docs/notes.md").unwrap().is_none());
}

#[test]
fn status_before_first_index_reports_nothing() {
    let dir = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("ctxgrep");
    cmd.env_remove("CTXGREP_ROOT");
    cmd.arg("status").arg("--path").arg(dir.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No index yet"));
}

#[test]
fn storage_budget_prunes_cache_but_keeps_index() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join(".ctxgreprc.toml"),
        "[storage]\nmax_disk_usage_mb = 0\nauto_cleanup = true\n",
    );
    write_file(
        &dir.path().join("src").join("engine.rs"),
        "pub fn start_engine() -> bool {\n    true\n}\n",
    );

    run_index(dir.path(), &["--force"]);

    let cache_entries = fs::read_dir(dir.path().join(".ctxgrep").join("embed-cache"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "json").unwrap_or(false))
        .count();
    assert_eq!(cache_entries, 0);

    // The primary chunk index survives budget enforcement
    let store = open_store(dir.path());
    let record = store.load_file_chunks("src/engine.rs").unwrap().unwrap();
    assert!(!record.chunks.is_empty());
}

/// Provider double that records every text it is asked to embed.
struct RecordingProvider {
    texts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl EmbeddingProvider for RecordingProvider {
    fn name(&self) -> &'static str {
        "voyage"
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn model_for(&self, _content_type: ContentType) -> String {
        "recording".to_string()
    }

    async fn embed(
        &self,
        texts: &[String],
        _content_type: ContentType,
        _input_type: InputType,
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        self.texts.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|_| vec![0.5; 16]).collect())
    }
}

fn test_workspace(root: &Path, texts: Arc<Mutex<Vec<String>>>) -> Workspace {
    let root = root.canonicalize().unwrap();
    let store = Store::open(&root, true).unwrap();
    let lexical = LexicalIndex::open_or_create(&store.dir().join("lexical")).unwrap();
    let memory = MemoryStore::load(store.dir()).unwrap();
    let evidence = EvidenceLog::open(store.dir()).unwrap();
    let gateway = EmbeddingGateway::with_providers(
        vec![Box::new(RecordingProvider { texts })],
        16,
        32,
        2,
    );

    Workspace {
        root,
        config: Config::default(),
        store,
        lexical,
        memory,
        cache: QueryCache::new(60_000, 8),
        gateway,
        evidence,
    }
}

#[tokio::test]
async fn identical_content_is_embedded_once() {
    let dir = TempDir::new().unwrap();
    let body = "fn shared_logic() {\n    let x = 1;\n}\n";
    write_file(&dir.path().join("dup_one.rs"), body);
    write_file(&dir.path().join("dup_two.rs"), body);

    let texts = Arc::new(Mutex::new(Vec::new()));
    let workspace = test_workspace(dir.path(), texts.clone());

    let outcome = index_repo(
        &workspace,
        &IndexOptions {
            force: true,
            ..Default::default()
        },
    )
    .await;
    assert!(outcome.ok);
    assert_eq!(outcome.files, 2);
    assert!(outcome.embeddings >= 2);

    // Byte-identical chunks share one provider text
    let seen = texts.lock().unwrap().clone();
    let shared = seen.iter().filter(|t| t.contains("shared_logic")).count();
    assert_eq!(shared, 1);
}

#[tokio::test]
async fn cached_embeddings_are_not_recomputed() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join("stable.rs"),
        "fn stays_the_same() {\n    let _ = 0;\n}\n",
    );

    let texts = Arc::new(Mutex::new(Vec::new()));
    let workspace = test_workspace(dir.path(), texts.clone());

    let options = IndexOptions {
        force: true,
        ..Default::default()
    };
    index_repo(&workspace, &options).await;
    let after_first = texts.lock().unwrap().len();
    assert!(after_first > 0);

    // Second forced run re-chunks but every hash hits the embed cache
    index_repo(&workspace, &options).await;
    assert_eq!(texts.lock().unwrap().len(), after_first);
}

#[tokio::test]
async fn missing_root_reports_structured_error() {
    let dir = TempDir::new().unwrap();
    let texts = Arc::new(Mutex::new(Vec::new()));
    let mut workspace = test_workspace(dir.path(), texts);
    workspace.root = dir.path().join("does-not-exist");

    let outcome = index_repo(&workspace, &IndexOptions::default()).await;
    assert!(!outcome.ok);
    assert!(outcome.error.is_some());
    assert_eq!(outcome.chunks, 0);
}

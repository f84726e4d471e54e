// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fs;
use std::path::Path;
use tempfile::TempDir;

use assert_cmd::cargo::cargo_bin_cmd;

use ctxgrep::cache::QueryCache;
use ctxgrep::config::Config;
use ctxgrep::embed::EmbeddingGateway;
use ctxgrep::evidence::EvidenceLog;
use ctxgrep::indexer::{index_repo, IndexOptions};
use ctxgrep::lexical::LexicalIndex;
use ctxgrep::memory::MemoryStore;
use ctxgrep::rank::{HitOrigin, SearchHit};
use ctxgrep::registry::Workspace;
use ctxgrep::store::Store;

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn ctxgrep(repo_root: &Path, args: &[&str]) -> Vec<u8> {
    let mut cmd = cargo_bin_cmd!("ctxgrep");
    cmd.env_remove("CTXGREP_ROOT")
        .env_remove("VOYAGE_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("COHERE_API_KEY");
    cmd.args(args)
        .arg("--path")
        .arg(repo_root)
        .arg("--format")
        .arg("json");
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "command failed: {:?}", output);
    output.stdout
}

fn index(repo_root: &Path) {
    ctxgrep(repo_root, &["index", "--force"]);
}

fn search(repo_root: &Path, query: &str) -> Vec<SearchHit> {
    serde_json::from_slice(&ctxgrep(repo_root, &["search", query])).unwrap()
}

#[test]
fn implementation_query_ranks_code_above_readme() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join("src").join("math.ts"),
        "export function add(a, b) { return a + b }\n",
    );
    write_file(
        &dir.path().join("README.md"),
        "# Math Utils\n\nAdds numbers.\n",
    );

    index(dir.path());
    let hits = search(dir.path(), "add two numbers function");

    assert!(!hits.is_empty());
    assert_eq!(hits[0].path, "src/math.ts");
}

#[test]
fn deleted_file_vanishes_from_results() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join("a.rs"),
        "fn zanzibar_frobnicate() {\n    let _ = 1;\n}\n",
    );
    write_file(&dir.path().join("b.rs"), "fn unrelated() {}\n");

    index(dir.path());
    let before = search(dir.path(), "zanzibar frobnicate");
    assert!(before.iter().any(|h| h.path == "a.rs"));

    fs::remove_file(dir.path().join("a.rs")).unwrap();
    ctxgrep(dir.path(), &["index"]);

    let after = search(dir.path(), "zanzibar frobnicate");
    assert!(after.iter().all(|h| h.path != "a.rs"));
}

#[test]
fn doc_queries_route_to_doc_records() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join("docs").join("rollout-plan.md"),
        "# Storage Rollout Plan\n\nMove chunk records to JSON, one file per source file.\n",
    );
    write_file(&dir.path().join("src").join("store.rs"), "fn rollout() {}\n");

    index(dir.path());
    let hits = search(dir.path(), "storage rollout plan");

    assert!(!hits.is_empty());
    assert_eq!(hits[0].path, "docs/rollout-plan.md");
    assert_eq!(hits[0].origin, HitOrigin::Local);
}

#[test]
fn blended_search_interleaves_local_and_imported() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join("src").join("auth.rs"),
        "fn login_handler() {\n    let _ = 0;\n}\n",
    );
    index(dir.path());

    ctxgrep(
        dir.path(),
        &[
            "evidence",
            "add",
            "web",
            "OAuth login best practices for handler code",
            "--title",
            "login guide",
        ],
    );

    let hits: Vec<SearchHit> = serde_json::from_slice(&ctxgrep(
        dir.path(),
        &["blended", "login handler", "--mode", "interleave"],
    ))
    .unwrap();

    assert!(hits.iter().any(|h| h.origin == HitOrigin::Local));
    assert!(hits.iter().any(|h| h.origin == HitOrigin::Imported));

    let local_only: Vec<SearchHit> = serde_json::from_slice(&ctxgrep(
        dir.path(),
        &["blended", "login handler", "--mode", "local"],
    ))
    .unwrap();
    assert!(local_only.iter().all(|h| h.origin == HitOrigin::Local));
}

fn library_workspace(root: &Path) -> Workspace {
    let root = root.canonicalize().unwrap();
    let store = Store::open(&root, true).unwrap();
    let lexical = LexicalIndex::open_or_create(&store.dir().join("lexical")).unwrap();
    let memory = MemoryStore::load(store.dir()).unwrap();
    let evidence = EvidenceLog::open(store.dir()).unwrap();
    // Empty provider chain: embeddings come from the deterministic fallback
    let gateway = EmbeddingGateway::with_providers(Vec::new(), 64, 32, 2);

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
async fn repeat_queries_hit_the_cache_until_reindex() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join("src").join("greet.rs"),
        "pub fn greet_users() -> &'static str {\n    \"hello\"\n}\n",
    );

    let workspace = library_workspace(dir.path());
    let options = IndexOptions {
        force: true,
        ..Default::default()
    };
    index_repo(&workspace, &options).await;

    let engine = workspace.engine();
    let first = engine.search("greet users", 5).await.unwrap();
    assert!(!first.is_empty());
    assert_eq!(workspace.cache.len(), 1);

    let second = engine.search("greet users", 5).await.unwrap();
    assert_eq!(
        first.iter().map(|h| &h.result_id).collect::<Vec<_>>(),
        second.iter().map(|h| &h.result_id).collect::<Vec<_>>()
    );

    // Reindexing clears cached rankings
    index_repo(&workspace, &options).await;
    assert!(workspace.cache.is_empty());
}

#[tokio::test]
async fn surfaced_files_accumulate_usage_boost() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join("src").join("parser.rs"),
        "pub fn parse_tokens() {\n    let _ = 0;\n}\n",
    );

    let workspace = library_workspace(dir.path());
    index_repo(
        &workspace,
        &IndexOptions {
            force: true,
            ..Default::default()
        },
    )
    .await;

    let engine = workspace.engine();
    let hits = engine.search("parse tokens", 5).await.unwrap();
    assert!(!hits.is_empty());
    assert!(workspace.memory.usage_boost(&hits[0].path) > 0.0);
}

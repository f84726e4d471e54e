// SPDX-License-Identifier: MIT OR Apache-2.0

//! ctxgrep - Local-first context indexing and hybrid retrieval
//!
//! Incremental repo-aware indexing, hybrid lexical+semantic search with
//! behavioral-memory boosts, and an evidence log for imported findings.

mod cli;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use cli::{Cli, CliBlendMode, Commands, EvidenceCommands, OutputFormat};
use ctxgrep::config::BlendMode;
use ctxgrep::evidence::EvidenceQuery;
use ctxgrep::indexer::{index_repo, IndexOptions, IndexOutcome};
use ctxgrep::rank::SearchHit;
use ctxgrep::registry::{resolve_root, workspace_for};
use ctxgrep::utils::find_workspace_root;
use ctxgrep::webimport::{import_url, HttpFetcher};

#[tokio::main]
async fn main() -> Result<()> {
    // CTXGREP_LOG=debug ctxgrep search "query"
    // Logs go to stderr so --format json output stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CTXGREP_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    match cli.command {
        Commands::Index {
            path,
            force,
            quick,
            include,
            quiet,
        } => {
            let root = resolve_root(path.as_deref().map(Path::new))?;
            let workspace = workspace_for(&root)?;
            let outcome = index_repo(
                &workspace,
                &IndexOptions {
                    quick,
                    force,
                    include,
                    progress: format == OutputFormat::Text && !quiet,
                },
            )
            .await;
            print_index_outcome(&outcome, format, quiet)?;
            if !outcome.ok {
                std::process::exit(1);
            }
        }
        Commands::Search {
            query,
            path,
            limit,
            quiet,
        } => {
            let root = search_root(path.as_deref())?;
            let workspace = workspace_for(&root)?;
            let top_k = workspace.config.merge_max_results(limit);

            let started = std::time::Instant::now();
            let hits = workspace.engine().search(&query, top_k).await?;
            print_hits(&query, &hits, format)?;
            if !quiet && format == OutputFormat::Text {
                eprintln!(
                    "\n{} results | {:.2}ms",
                    hits.len(),
                    started.elapsed().as_secs_f64() * 1000.0
                );
            }
        }
        Commands::Blended {
            query,
            path,
            limit,
            mode,
        } => {
            let root = search_root(path.as_deref())?;
            let workspace = workspace_for(&root)?;
            let top_k = workspace.config.merge_max_results(limit);
            let blend_mode = match mode {
                Some(CliBlendMode::Local) => BlendMode::Local,
                Some(CliBlendMode::Imported) => BlendMode::Imported,
                Some(CliBlendMode::Interleave) => BlendMode::Interleave,
                None => workspace.config.search.blend_mode(),
            };

            let hits = workspace
                .engine()
                .blended_search(&query, top_k, blend_mode, &workspace.evidence)
                .await?;
            print_hits(&query, &hits, format)?;
        }
        Commands::Evidence { command, path } => {
            let root = search_root(path.as_deref())?;
            let workspace = workspace_for(&root)?;

            match command {
                EvidenceCommands::Add {
                    source,
                    data,
                    title,
                    group,
                    tags,
                } => {
                    let payload = serde_json::from_str(&data)
                        .unwrap_or(serde_json::Value::String(data));
                    let mut meta = serde_json::Map::new();
                    if let Some(title) = title {
                        meta.insert("title".into(), title.into());
                    }
                    if let Some(group) = group {
                        meta.insert("group".into(), group.into());
                    }
                    if !tags.is_empty() {
                        meta.insert("tags".into(), tags.into());
                    }
                    let meta = if meta.is_empty() {
                        None
                    } else {
                        Some(serde_json::Value::Object(meta))
                    };

                    let id = workspace.evidence.add(&source, payload, meta)?;
                    match format {
                        OutputFormat::Json => {
                            println!("{}", serde_json::json!({ "id": id }))
                        }
                        OutputFormat::Text => println!("{} {}", "✓".green(), id),
                    }
                }
                EvidenceCommands::Find {
                    source,
                    group,
                    tag,
                    text,
                } => {
                    let items = workspace.evidence.find(&EvidenceQuery {
                        source,
                        group,
                        tag,
                        text,
                    })?;
                    match format {
                        OutputFormat::Json => {
                            println!("{}", serde_json::to_string_pretty(&items)?)
                        }
                        OutputFormat::Text => {
                            for item in &items {
                                println!(
                                    "{} [{}] {}",
                                    item.id.cyan(),
                                    item.source,
                                    item.title.as_deref().unwrap_or("(untitled)")
                                );
                                if let Some(snippet) = &item.snippet {
                                    println!("    {}", snippet.dimmed());
                                }
                            }
                            if items.is_empty() {
                                println!("No evidence found");
                            }
                        }
                    }
                }
                EvidenceCommands::Import { url } => {
                    let fetcher = HttpFetcher::new()?;
                    let id = import_url(&fetcher, &workspace.evidence, &url).await?;
                    match format {
                        OutputFormat::Json => {
                            println!("{}", serde_json::json!({ "id": id, "url": url }))
                        }
                        OutputFormat::Text => {
                            println!("{} imported {} as {}", "✓".green(), url, id.cyan())
                        }
                    }
                }
            }
        }
        Commands::Status { path } => {
            let root = search_root(path.as_deref())?;
            let workspace = workspace_for(&root)?;
            let stats = workspace.store.load_stats()?;

            match format {
                OutputFormat::Json => match stats {
                    Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
                    None => println!("{}", serde_json::json!({ "indexed": false })),
                },
                OutputFormat::Text => match stats {
                    Some(stats) => {
                        println!("Workspace: {}", workspace.root.display());
                        println!(
                            "  files: {}  chunks: {}  embeddings: {}",
                            stats.files, stats.chunks, stats.embeddings
                        );
                        println!(
                            "  storage: {:.1} MB  compression: {}",
                            stats.storage_mb, stats.compression
                        );
                        if let Some(head) = &stats.revision_head {
                            println!("  revision: {}", head);
                        }
                    }
                    None => println!("No index yet. Run 'ctxgrep index' first."),
                },
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "ctxgrep", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Search commands walk up from the given path to the nearest workspace.
fn search_root(path: Option<&str>) -> Result<PathBuf> {
    let start = resolve_root(path.map(Path::new))?;
    Ok(find_workspace_root(&start)
        .map(|w| w.root)
        .unwrap_or(start))
}

fn print_index_outcome(outcome: &IndexOutcome, format: OutputFormat, quiet: bool) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(outcome)?),
        OutputFormat::Text => {
            if let Some(error) = &outcome.error {
                eprintln!("{} {}", "✗".red(), error);
                return Ok(());
            }
            if quiet {
                return Ok(());
            }
            println!(
                "{} Indexed {} files ({} chunks, {} embeddings) in {}ms",
                "✓".green(),
                outcome.changed.len().to_string().cyan(),
                outcome.chunks,
                outcome.embeddings,
                outcome.took_ms
            );
            if !outcome.removed.is_empty() {
                println!("  removed {} files", outcome.removed.len());
            }
            if outcome.partial {
                println!(
                    "  {} {} files deferred to a later run",
                    "…".yellow(),
                    outcome.pending.len()
                );
            }
            if outcome.embed_errors > 0 {
                eprintln!(
                    "  {} {} chunks left unembedded (will retry next run)",
                    "!".yellow(),
                    outcome.embed_errors
                );
            }
        }
    }
    Ok(())
}

fn print_hits(query: &str, hits: &[SearchHit], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(hits)?),
        OutputFormat::Text => {
            if hits.is_empty() {
                println!("{} No results found for: {}", "✗".red(), query.yellow());
                return Ok(());
            }
            println!(
                "\n{} Found {} results for: {}\n",
                "✓".green(),
                hits.len().to_string().cyan(),
                query.yellow()
            );
            for hit in hits {
                println!(
                    "{}:{}  (score: {:.3})",
                    hit.path.cyan(),
                    hit.start_line.to_string().yellow(),
                    hit.score
                );
                for line in hit.snippet.lines().take(3) {
                    println!("    {}", line.dimmed());
                }
                println!();
            }
        }
    }
    Ok(())
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// ctxgrep - Local-first context indexing and hybrid retrieval
///
/// Indexes a workspace incrementally, serves hybrid lexical+semantic
/// search biased by learned behavioral memory, and keeps an evidence log
/// of imported findings.
#[derive(Parser, Debug)]
#[command(name = "ctxgrep")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Blend mode for blended search
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliBlendMode {
    /// Workspace index only
    Local,
    /// Imported evidence only
    Imported,
    /// Alternate local/imported picks
    Interleave,
}

#[derive(Subcommand, Debug)]
pub enum EvidenceCommands {
    /// Append a finding to the evidence log
    Add {
        /// Source tag (e.g. "web", "review", "pipeline")
        source: String,

        /// Finding payload (free text or JSON)
        data: String,

        /// Optional title
        #[arg(long)]
        title: Option<String>,

        /// Optional group key
        #[arg(long)]
        group: Option<String>,

        /// Tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Query the evidence log
    Find {
        /// Filter by source
        #[arg(long)]
        source: Option<String>,

        /// Filter by group
        #[arg(long)]
        group: Option<String>,

        /// Filter by tag
        #[arg(long)]
        tag: Option<String>,

        /// Case-insensitive substring over title/snippet/data
        #[arg(long)]
        text: Option<String>,
    },

    /// Fetch a URL and log its article text as evidence
    Import {
        /// URL to fetch
        url: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build or update the workspace index
    #[command(alias = "i")]
    Index {
        /// Workspace root (defaults to CTXGREP_ROOT, then cwd)
        #[arg(short, long)]
        path: Option<String>,

        /// Reindex everything, ignoring the change set
        #[arg(short, long)]
        force: bool,

        /// Bounded quick run; defers excess files to a later run
        #[arg(short, long)]
        quick: bool,

        /// Index only these paths/prefixes (repeatable)
        #[arg(long = "include")]
        include: Vec<String>,

        /// Suppress summary output
        #[arg(long)]
        quiet: bool,
    },

    /// Hybrid search over the local index
    #[command(alias = "s")]
    Search {
        /// Search query (natural language or keywords)
        query: String,

        /// Path inside the workspace to search from
        #[arg(short, long)]
        path: Option<String>,

        /// Maximum number of results
        #[arg(short = 'm', long = "limit")]
        limit: Option<usize>,

        /// Suppress statistics output
        #[arg(short = 'q', long)]
        quiet: bool,
    },

    /// Search blending the local index with imported evidence
    Blended {
        /// Search query
        query: String,

        /// Path inside the workspace to search from
        #[arg(short, long)]
        path: Option<String>,

        /// Maximum number of results
        #[arg(short = 'm', long = "limit")]
        limit: Option<usize>,

        /// How to merge local and imported results
        #[arg(long, value_enum)]
        mode: Option<CliBlendMode>,
    },

    /// Evidence log operations
    Evidence {
        #[command(subcommand)]
        command: EvidenceCommands,

        /// Workspace root
        #[arg(short, long, global = true)]
        path: Option<String>,
    },

    /// Show index statistics
    Status {
        /// Workspace root
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workspace file enumeration using the ignore crate (same as ripgrep)

use anyhow::Result;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::UNIX_EPOCH;

use crate::utils::{rel_to_root, CompiledGlob, INDEX_DIR};

/// A candidate file with the metadata change detection needs.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Forward-slash path relative to the workspace root
    pub rel_path: String,
    pub mtime_ms: u64,
    pub size: u64,
}

/// Extensions treated as source code.
pub const CODE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "c", "cpp", "h", "hpp", "cs", "rb", "php",
    "swift", "kt", "scala", "lua", "sh",
];

/// Extensions treated as documentation/prose.
pub const DOC_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "rst", "adoc"];

/// Extensions treated as configuration (indexed as code).
pub const CONFIG_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml"];

/// Check whether an extension is indexable at all.
pub fn is_indexable_ext(ext: &str) -> bool {
    let ext = ext.to_lowercase();
    CODE_EXTENSIONS.contains(&ext.as_str())
        || DOC_EXTENSIONS.contains(&ext.as_str())
        || CONFIG_EXTENSIONS.contains(&ext.as_str())
}

/// Detect language from file extension (grammar + regex families)
pub fn detect_language(ext: &str) -> Option<String> {
    match ext.to_lowercase().as_str() {
        "rs" => Some("rust".into()),
        "ts" | "tsx" => Some("typescript".into()),
        "js" | "jsx" => Some("javascript".into()),
        "py" => Some("python".into()),
        "go" => Some("go".into()),
        "java" => Some("java".into()),
        "c" | "h" => Some("c".into()),
        "cpp" | "cc" | "hpp" => Some("cpp".into()),
        "rb" => Some("ruby".into()),
        "kt" | "kts" => Some("kotlin".into()),
        _ => None,
    }
}

/// File scanner that respects .gitignore and configured excludes
pub struct FileScanner {
    root: PathBuf,
    max_file_size: u64,
    excludes: Vec<CompiledGlob>,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_file_size: 1024 * 1024,
            excludes: Vec::new(),
        }
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_excludes(mut self, patterns: &[String]) -> Self {
        self.excludes = patterns
            .iter()
            .filter_map(|p| CompiledGlob::new(p))
            .collect();
        self
    }

    /// Enumerate indexable files with mtime/size metadata.
    pub fn list_files(&self) -> Result<Vec<FileEntry>> {
        let (tx, rx) = mpsc::channel();

        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(true)
            .git_exclude(true)
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| name != INDEX_DIR && name != ".git")
                    .unwrap_or(true)
            })
            .build_parallel();

        let root = self.root.clone();
        let max_size = self.max_file_size;

        walker.run(|| {
            let tx = tx.clone();
            let root = root.clone();

            Box::new(move |entry| {
                if let Ok(entry) = entry {
                    let path = entry.path();
                    if path.is_file() {
                        let indexable = path
                            .extension()
                            .and_then(|e| e.to_str())
                            .map(is_indexable_ext)
                            .unwrap_or(false);
                        if indexable {
                            if let Ok(meta) = entry.metadata() {
                                if meta.len() <= max_size {
                                    let mtime_ms = meta
                                        .modified()
                                        .ok()
                                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                                        .map(|d| d.as_millis() as u64)
                                        .unwrap_or(0);
                                    let rel_path = rel_to_root(&root, path);
                                    let _ = tx.send(FileEntry {
                                        path: path.to_path_buf(),
                                        rel_path,
                                        mtime_ms,
                                        size: meta.len(),
                                    });
                                }
                            }
                        }
                    }
                }
                ignore::WalkState::Continue
            })
        });

        drop(tx);
        let mut files: Vec<FileEntry> = rx
            .into_iter()
            .filter(|f| !self.excludes.iter().any(|g| g.is_match(&f.rel_path)))
            .collect();
        // Enumeration order is nondeterministic; sort so runs are comparable.
        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        Ok(files)
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared utilities: workspace discovery, path normalization, hashing,
//! glob compilation.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// The name of the on-disk workspace directory.
pub const INDEX_DIR: &str = ".ctxgrep";

/// Result of finding a workspace root
#[derive(Debug)]
pub struct WorkspaceRoot {
    /// The directory containing the .ctxgrep folder
    pub root: PathBuf,
    /// The full path to the .ctxgrep folder
    pub index_path: PathBuf,
    /// Whether this is the current directory or a parent
    pub is_parent: bool,
}

/// Find the nearest .ctxgrep directory by walking up from the given path.
/// Returns None if no .ctxgrep directory is found.
pub fn find_workspace_root(start: impl AsRef<Path>) -> Option<WorkspaceRoot> {
    let mut current = start.as_ref().to_path_buf();

    // Canonicalize to handle relative paths
    if let Ok(canonical) = current.canonicalize() {
        current = canonical;
    }

    let original = current.clone();

    loop {
        let index_path = current.join(INDEX_DIR);
        if index_path.exists() && index_path.is_dir() {
            return Some(WorkspaceRoot {
                root: current.clone(),
                index_path,
                is_parent: current != original,
            });
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Get the index path for a directory, walking up to find parent workspaces.
/// Falls back to the given path if no index is found anywhere.
pub fn get_index_path(path: impl AsRef<Path>) -> PathBuf {
    match find_workspace_root(&path) {
        Some(root) => root.index_path,
        None => path.as_ref().join(INDEX_DIR),
    }
}

/// Normalize a relative path to forward slashes, collapsing `.` and `..`.
pub fn normalize_rel_path(input: &str) -> String {
    let path = input.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            if !parts.is_empty() {
                parts.pop();
            }
            continue;
        }
        parts.push(part);
    }

    parts.join("/")
}

/// Relativize an absolute path against a root, normalized to forward slashes.
pub fn rel_to_root(root: &Path, path: &Path) -> String {
    let rel = path
        .strip_prefix(root)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string_lossy().to_string());
    normalize_rel_path(&rel)
}

/// Blake3 content hash of a text span, full hex.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Short stable identifier derived from arbitrary input.
pub fn short_hash(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex()[..16].to_string()
}

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A precompiled glob pattern for repeated matching.
///
/// `**` matches zero or more path segments, `*` matches within a segment.
#[derive(Debug, Clone)]
pub struct CompiledGlob {
    regex: Regex,
}

impl CompiledGlob {
    pub fn new(pattern: &str) -> Option<Self> {
        let regex_pattern = pattern
            .replace('.', "\\.")
            .replace("**/", "{{DOUBLESTARSLASH}}")
            .replace("/**", "{{SLASHDOUBLESTAR}}")
            .replace("**", ".*")
            .replace('*', "[^/]*")
            .replace("{{DOUBLESTARSLASH}}", "(.*/)?")
            .replace("{{SLASHDOUBLESTAR}}", "(/.*)?");

        Regex::new(&format!("(?i){}", regex_pattern))
            .ok()
            .map(|regex| Self { regex })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn find_workspace_root_in_parent() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(INDEX_DIR)).unwrap();
        let subdir = dir.path().join("subdir");
        fs::create_dir(&subdir).unwrap();

        let result = find_workspace_root(&subdir).unwrap();
        assert_eq!(result.root, dir.path().canonicalize().unwrap());
        assert!(result.is_parent);
    }

    #[test]
    fn find_workspace_root_none() {
        let dir = TempDir::new().unwrap();
        assert!(find_workspace_root(dir.path()).is_none());
    }

    #[test]
    fn normalize_handles_windows_and_dots() {
        assert_eq!(normalize_rel_path(".\\src\\lib.rs"), "src/lib.rs");
        assert_eq!(normalize_rel_path("./src/./nested/../lib.rs"), "src/lib.rs");
        assert_eq!(normalize_rel_path("a//b"), "a/b");
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("fn main() {}"), content_hash("fn main() {}"));
        assert_ne!(content_hash("a"), content_hash("b"));
    }

    #[test]
    fn compiled_glob_matches_segments() {
        let glob = CompiledGlob::new("src/**/*.rs").unwrap();
        assert!(glob.is_match("src/main.rs"));
        assert!(glob.is_match("src/query/search.rs"));
        assert!(!glob.is_match("tests/main.rs"));
    }
}

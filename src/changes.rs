// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change detection between indexing runs.
//!
//! Prefers a git diff between the recorded and current revision (plus
//! uncommitted/untracked files); any git failure silently degrades to
//! comparing mtime/size against the file map. Never errors to the caller.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::scanner::FileEntry;
use crate::store::FileMapEntry;
use crate::utils::normalize_rel_path;

/// The added/modified/deleted/untracked file delta since the last run.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub untracked: Vec<String>,
    /// Current VCS head, when known
    pub head: Option<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.untracked.is_empty()
    }

    /// Paths needing (re-)indexing: added + modified + untracked, deduped,
    /// in stable order.
    pub fn paths_to_index(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for path in self
            .added
            .iter()
            .chain(self.modified.iter())
            .chain(self.untracked.iter())
        {
            if seen.insert(path.clone()) {
                out.push(path.clone());
            }
        }
        out
    }

    fn dedup_sorted(mut self) -> Self {
        for list in [
            &mut self.added,
            &mut self.modified,
            &mut self.deleted,
            &mut self.untracked,
        ] {
            list.sort();
            list.dedup();
        }
        self
    }
}

/// Detects the changed-file set for a workspace root.
pub struct ChangeDetector {
    root: PathBuf,
}

impl ChangeDetector {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Compute the change set since `prev_revision`.
    ///
    /// `files` is the current enumeration and `file_map` the state recorded
    /// by the previous run; both feed the fallback path.
    pub fn detect(
        &self,
        prev_revision: Option<&str>,
        files: &[FileEntry],
        file_map: &HashMap<String, FileMapEntry>,
    ) -> ChangeSet {
        if let Some(prev) = prev_revision {
            match self.git_changes(prev) {
                Some(set) => return set.dedup_sorted(),
                None => {
                    tracing::debug!("git change detection unavailable; using mtime/size fallback");
                }
            }
        }

        self.fallback_changes(files, file_map).dedup_sorted()
    }

    /// Current VCS head, when the workspace is a git repo.
    pub fn current_head(&self) -> Option<String> {
        self.run_git(&["rev-parse", "HEAD"])
            .map(|out| out.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn git_changes(&self, prev_revision: &str) -> Option<ChangeSet> {
        which::which("git").ok()?;
        let head = self.current_head()?;

        let mut set = ChangeSet {
            head: Some(head.clone()),
            ..Default::default()
        };

        // Committed delta since the recorded revision
        let diff = self.run_git(&["diff", "--name-status", prev_revision, &head, "--"])?;
        for line in diff.lines() {
            let mut parts = line.split('\t');
            let status = parts.next().unwrap_or("");
            match status.chars().next() {
                Some('A') => push_norm(&mut set.added, parts.next()),
                Some('M') => push_norm(&mut set.modified, parts.next()),
                Some('D') => push_norm(&mut set.deleted, parts.next()),
                Some('R') | Some('C') => {
                    // Rename/copy: old path goes away, new path appears
                    push_norm(&mut set.deleted, parts.next());
                    push_norm(&mut set.added, parts.next());
                }
                _ => {}
            }
        }

        // Uncommitted and untracked work
        let status = self.run_git(&["status", "--porcelain"])?;
        for line in status.lines() {
            if line.len() < 4 {
                continue;
            }
            let (code, path) = line.split_at(3);
            let path = path.trim();
            if code.starts_with("??") {
                push_norm(&mut set.untracked, Some(path));
            } else if code.contains('D') {
                push_norm(&mut set.deleted, Some(path));
            } else {
                push_norm(&mut set.modified, Some(path));
            }
        }

        Some(set)
    }

    /// Compare enumeration against the file map: new paths are added,
    /// mtime/size drift is modified, vanished paths are deleted.
    fn fallback_changes(
        &self,
        files: &[FileEntry],
        file_map: &HashMap<String, FileMapEntry>,
    ) -> ChangeSet {
        let mut set = ChangeSet {
            head: self.current_head(),
            ..Default::default()
        };

        let mut live = HashSet::new();
        for file in files {
            live.insert(file.rel_path.clone());
            match file_map.get(&file.rel_path) {
                None => set.added.push(file.rel_path.clone()),
                Some(entry) => {
                    if entry.mtime_ms != file.mtime_ms || entry.size != file.size {
                        set.modified.push(file.rel_path.clone());
                    }
                }
            }
        }

        for path in file_map.keys() {
            if !live.contains(path) {
                set.deleted.push(path.clone());
            }
        }

        set
    }

    fn run_git(&self, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()
            .ok()?;

        if !output.status.success() {
            tracing::debug!(
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }

        Some(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn push_norm(list: &mut Vec<String>, path: Option<&str>) {
    if let Some(path) = path {
        let normalized = normalize_rel_path(path);
        if !normalized.is_empty() {
            list.push(normalized);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(rel: &str, mtime: u64, size: u64) -> FileEntry {
        FileEntry {
            path: PathBuf::from(rel),
            rel_path: rel.to_string(),
            mtime_ms: mtime,
            size,
        }
    }

    fn map_entry(rel: &str, mtime: u64, size: u64) -> FileMapEntry {
        FileMapEntry {
            path: rel.to_string(),
            mtime_ms: mtime,
            size,
            last_indexed_revision: None,
        }
    }

    #[test]
    fn fallback_detects_added_modified_deleted() {
        let dir = TempDir::new().unwrap();
        let detector = ChangeDetector::new(dir.path());

        let mut file_map = HashMap::new();
        file_map.insert("b.rs".to_string(), map_entry("b.rs", 100, 10));
        file_map.insert("c.rs".to_string(), map_entry("c.rs", 100, 10));

        let files = vec![entry("a.rs", 50, 5), entry("b.rs", 200, 10)];

        let set = detector.detect(None, &files, &file_map);
        assert_eq!(set.added, vec!["a.rs"]);
        assert_eq!(set.modified, vec!["b.rs"]);
        assert_eq!(set.deleted, vec!["c.rs"]);
    }

    #[test]
    fn fallback_no_changes_is_empty_not_error() {
        let dir = TempDir::new().unwrap();
        let detector = ChangeDetector::new(dir.path());

        let mut file_map = HashMap::new();
        file_map.insert("a.rs".to_string(), map_entry("a.rs", 100, 10));
        let files = vec![entry("a.rs", 100, 10)];

        let set = detector.detect(Some("deadbeef"), &files, &file_map);
        assert!(set.is_empty());
    }

    #[test]
    fn git_path_reports_commit_delta() {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .arg("-C")
                .arg(dir.path())
                .args(args)
                .status()
                .expect("run git");
            assert!(status.success(), "git {:?} failed", args);
        };

        run(&["init"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);

        std::fs::write(dir.path().join("keep.rs"), "fn keep() {}\n").unwrap();
        std::fs::write(dir.path().join("gone.rs"), "fn gone() {}\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "one"]);

        let detector = ChangeDetector::new(dir.path());
        let prev = detector.current_head().unwrap();

        std::fs::write(dir.path().join("keep.rs"), "fn keep() { let _ = 1; }\n").unwrap();
        std::fs::write(dir.path().join("new.rs"), "fn new() {}\n").unwrap();
        std::fs::remove_file(dir.path().join("gone.rs")).unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "two"]);

        let set = detector.detect(Some(&prev), &[], &HashMap::new());
        assert_eq!(set.added, vec!["new.rs"]);
        assert_eq!(set.modified, vec!["keep.rs"]);
        assert_eq!(set.deleted, vec!["gone.rs"]);
        assert!(set.head.is_some());
    }

    #[test]
    fn untracked_files_are_reported() {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            Command::new("git")
                .arg("-C")
                .arg(dir.path())
                .args(args)
                .status()
                .expect("run git");
        };

        run(&["init"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "init"]);

        let detector = ChangeDetector::new(dir.path());
        let prev = detector.current_head().unwrap();

        std::fs::write(dir.path().join("scratch.rs"), "fn s() {}\n").unwrap();

        let set = detector.detect(Some(&prev), &[], &HashMap::new());
        assert_eq!(set.untracked, vec!["scratch.rs"]);
    }
}

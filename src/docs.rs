// SPDX-License-Identifier: MIT OR Apache-2.0

//! Documentation metadata extraction.
//!
//! Turns documentation-like files into [`DocRecord`]s: title, document
//! type, status/version/date hints, a summary, checklist tasks, and
//! links. Records are regenerated wholesale whenever the owning file is
//! (re-)indexed; the id is a hash of (file, title).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::store::DocRecord;
use crate::utils::short_hash;

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#\s+(.+)$").expect("heading regex"));
static STATUS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*status\s*[:=]\s*(\S.*)$").expect("status regex"));
static VERSION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*version\s*[:=]\s*(\S+)").expect("version regex"));
static TAGS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*tags\s*[:=]\s*(.+)$").expect("tags regex"));
static DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("date regex"));
static TASK_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[-*]\s*\[( |x|X)\]\s*(.+)$").expect("task regex"));
static MD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]\(([^)]+)\)").expect("link regex"));
static BARE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s)\]]+").expect("url regex"));

const SUMMARY_MAX_CHARS: usize = 300;

/// Document types we classify into; anything else is "other".
const DOC_TYPES: &[&str] = &[
    "plan",
    "design",
    "rfc",
    "decision",
    "completion",
    "postmortem",
    "retro",
    "changelog",
    "spec",
    "readme",
    "status",
];

/// Classify a document from its uri and title.
fn classify(uri: &str, title: &str) -> String {
    let haystack = format!("{} {}", uri.to_lowercase(), title.to_lowercase());
    // "adr" is decision-record shorthand in the wild
    if haystack.contains("adr") {
        return "decision".to_string();
    }
    for t in DOC_TYPES {
        if haystack.contains(t) {
            return (*t).to_string();
        }
    }
    "other".to_string()
}

/// Extract doc records from one documentation file. One record per
/// top-level heading; a file without headings yields a single record
/// titled by its filename stem.
pub fn extract_doc_records(uri: &str, text: &str) -> Vec<DocRecord> {
    let mut sections: Vec<(String, String)> = Vec::new();
    let mut current_title: Option<String> = None;
    let mut current_body = String::new();

    for line in text.lines() {
        if let Some(caps) = HEADING.captures(line) {
            if let Some(title) = current_title.take() {
                sections.push((title, std::mem::take(&mut current_body)));
            } else if !current_body.trim().is_empty() {
                // Preamble before the first heading
                sections.push((stem_of(uri), std::mem::take(&mut current_body)));
            } else {
                current_body.clear();
            }
            current_title = Some(caps[1].trim().to_string());
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    match current_title {
        Some(title) => sections.push((title, current_body)),
        None if !current_body.trim().is_empty() => sections.push((stem_of(uri), current_body)),
        None => {}
    }

    sections
        .into_iter()
        .map(|(title, body)| build_record(uri, &title, &body))
        .collect()
}

fn build_record(uri: &str, title: &str, body: &str) -> DocRecord {
    let mut status = None;
    let mut version = None;
    let mut tags: Vec<String> = Vec::new();
    let mut tasks: Vec<String> = Vec::new();

    for line in body.lines() {
        if status.is_none() {
            if let Some(caps) = STATUS_LINE.captures(line) {
                status = Some(caps[1].trim().to_string());
            }
        }
        if version.is_none() {
            if let Some(caps) = VERSION_LINE.captures(line) {
                version = Some(caps[1].trim().to_string());
            }
        }
        if let Some(caps) = TAGS_LINE.captures(line) {
            tags.extend(
                caps[1]
                    .split(',')
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty()),
            );
        }
        if let Some(caps) = TASK_LINE.captures(line) {
            tasks.push(caps[2].trim().to_string());
        }
    }

    let date = DATE.find(body).map(|m| m.as_str().to_string());

    let mut links: Vec<String> = MD_LINK
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .chain(BARE_URL.find_iter(body).map(|m| m.as_str().to_string()))
        .collect();
    links.sort();
    links.dedup();

    DocRecord {
        id: short_hash(&format!("{}\u{0}{}", uri, title)),
        uri: uri.to_string(),
        title: title.to_string(),
        doc_type: classify(uri, title),
        status,
        version,
        date,
        summary: summarize(body),
        tags,
        tasks,
        links,
    }
}

/// First non-metadata paragraph, truncated.
fn summarize(body: &str) -> String {
    let mut summary = String::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !summary.is_empty() {
                break;
            }
            continue;
        }
        if STATUS_LINE.is_match(line)
            || VERSION_LINE.is_match(line)
            || TAGS_LINE.is_match(line)
            || trimmed.starts_with('#')
        {
            continue;
        }
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(trimmed);
        if summary.len() >= SUMMARY_MAX_CHARS {
            break;
        }
    }
    if summary.len() > SUMMARY_MAX_CHARS {
        summary.truncate(SUMMARY_MAX_CHARS);
    }
    summary
}

fn stem_of(uri: &str) -> String {
    std::path::Path::new(uri)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

/// Whether a file should go through doc extraction.
pub fn is_doc_file(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| crate::scanner::DOC_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_type_and_summary() {
        let text = "# Migration Plan\n\nMove the store to JSON records.\n\nDetails follow.\n";
        let records = extract_doc_records("docs/migration-plan.md", text);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.title, "Migration Plan");
        assert_eq!(r.doc_type, "plan");
        assert!(r.summary.starts_with("Move the store"));
    }

    #[test]
    fn id_is_stable_per_file_and_title() {
        let a = extract_doc_records("docs/x.md", "# One\nbody\n");
        let b = extract_doc_records("docs/x.md", "# One\ndifferent body\n");
        assert_eq!(a[0].id, b[0].id);

        let c = extract_doc_records("docs/y.md", "# One\nbody\n");
        assert_ne!(a[0].id, c[0].id);
    }

    #[test]
    fn parses_status_version_date_tags_tasks_links() {
        let text = "# Rollout Decision\n\nstatus: approved\nversion: 2.1\ntags: infra, rollout\n\nShipped on 2025-03-14 per [tracker](https://example.com/t/9).\n\n- [x] stage one\n- [ ] stage two\n";
        let records = extract_doc_records("docs/rollout.md", text);
        let r = &records[0];
        assert_eq!(r.doc_type, "decision");
        assert_eq!(r.status.as_deref(), Some("approved"));
        assert_eq!(r.version.as_deref(), Some("2.1"));
        assert_eq!(r.date.as_deref(), Some("2025-03-14"));
        assert_eq!(r.tags, vec!["infra", "rollout"]);
        assert_eq!(r.tasks, vec!["stage one", "stage two"]);
        assert_eq!(r.links, vec!["https://example.com/t/9"]);
    }

    #[test]
    fn multiple_headings_yield_multiple_records() {
        let text = "# First\nalpha\n\n# Second\nbeta\n";
        let records = extract_doc_records("notes.md", text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "First");
        assert_eq!(records[1].title, "Second");
    }

    #[test]
    fn headingless_file_uses_stem() {
        let records = extract_doc_records("docs/CHANGELOG.md", "1.0: initial release\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "CHANGELOG");
        assert_eq!(records[0].doc_type, "changelog");
    }

    #[test]
    fn adr_classifies_as_decision() {
        let records = extract_doc_records("docs/adr/0001-storage.md", "# Use JSON records\nbody\n");
        assert_eq!(records[0].doc_type, "decision");
    }
}

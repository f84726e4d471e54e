// SPDX-License-Identifier: MIT OR Apache-2.0

//! Language-aware chunking for embedding generation.
//!
//! Splits a file into non-overlapping, 1-indexed line spans. Source code is
//! chunked by a small state machine per language class (brace-delimited vs
//! indentation-significant) that prefers declaration and blank-line
//! boundaries, so implementations stay whole instead of being fractured by
//! fixed-size windows. Prose splits on paragraphs; unknown content falls
//! back to fixed windows.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::scanner::{CODE_EXTENSIONS, CONFIG_EXTENSIONS, DOC_EXTENSIONS};

/// Language class driving chunk-boundary decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageClass {
    /// Brace-delimited languages (rust, ts, go, java, ...)
    Brace,
    /// Indentation-significant languages (python, ruby, yaml)
    Indent,
    /// Documentation/prose (markdown, txt, rst)
    Prose,
    /// Everything else
    Plain,
}

/// Kind tag recorded on each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Code,
    Doc,
    Text,
}

/// Named boundary thresholds for one language class.
#[derive(Debug, Clone)]
pub struct ChunkThresholds {
    /// Minimum buffered lines before a declaration boundary may flush
    pub min_lines: usize,
    /// Buffered lines after which a blank-line boundary flushes
    pub soft_lines: usize,
    /// Unconditional flush ceiling
    pub hard_lines: usize,
}

impl ChunkThresholds {
    /// Thresholds for brace languages.
    pub fn brace() -> Self {
        Self {
            min_lines: 8,
            soft_lines: 60,
            hard_lines: 160,
        }
    }

    /// Smaller thresholds for indentation languages, which nest deeper in
    /// fewer lines.
    pub fn indent() -> Self {
        Self {
            min_lines: 6,
            soft_lines: 40,
            hard_lines: 120,
        }
    }
}

/// Paragraph length above which prose is sub-split into windows.
pub const MAX_PARAGRAPH_CHARS: usize = 1800;

/// Window size for sub-split paragraphs and plain text.
pub const WINDOW_CHARS: usize = 1200;

/// A contiguous line span produced by the chunker.
#[derive(Debug, Clone)]
pub struct ChunkSpan {
    /// Starting line number (1-indexed)
    pub start_line: u32,
    /// Ending line number (1-indexed, inclusive)
    pub end_line: u32,
    pub text: String,
    pub kind: ChunkKind,
}

/// Classify a file extension into a language class.
pub fn language_class(ext: &str) -> LanguageClass {
    let ext = ext.to_lowercase();
    match ext.as_str() {
        "py" | "rb" | "yaml" | "yml" => LanguageClass::Indent,
        _ if DOC_EXTENSIONS.contains(&ext.as_str()) => LanguageClass::Prose,
        _ if CODE_EXTENSIONS.contains(&ext.as_str()) || CONFIG_EXTENSIONS.contains(&ext.as_str()) => {
            LanguageClass::Brace
        }
        _ => LanguageClass::Plain,
    }
}

/// Chunk a file's text according to its extension.
pub fn chunk_file(path: &str, text: &str) -> Vec<ChunkSpan> {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match language_class(ext) {
        LanguageClass::Brace => CodeChunker::new(ChunkThresholds::brace()).chunk(text),
        LanguageClass::Indent => CodeChunker::new(ChunkThresholds::indent()).chunk(text),
        LanguageClass::Prose => chunk_prose(text),
        LanguageClass::Plain => chunk_windows(text, ChunkKind::Text),
    }
}

static DECL_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(pub\s|fn\s|impl[\s<]|struct\s|enum\s|trait\s|mod\s|export\s|function[\s(]|class\s|interface\s|type\s|def\s|func\s|public\s|private\s|protected\s|static\s|const\s|var\s|let\s|async\s|package\s|module\s)",
    )
    .expect("valid declaration regex")
});

/// State machine that walks lines tracking nesting depth and flushes the
/// buffer at declaration starts, blank lines, or the hard ceiling.
struct CodeChunker {
    thresholds: ChunkThresholds,
    depth: i32,
    buffer: Vec<String>,
    buffer_start: usize,
    chunks: Vec<ChunkSpan>,
}

impl CodeChunker {
    fn new(thresholds: ChunkThresholds) -> Self {
        Self {
            thresholds,
            depth: 0,
            buffer: Vec::new(),
            buffer_start: 1,
            chunks: Vec::new(),
        }
    }

    fn chunk(mut self, text: &str) -> Vec<ChunkSpan> {
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let at_top_level = self.depth <= 0;

            // (a) a new top-level declaration begins and the buffer is big
            // enough to stand alone
            if at_top_level
                && !self.buffer.is_empty()
                && self.buffer.len() >= self.thresholds.min_lines
                && DECL_START.is_match(line.trim_start())
                && leading_depth(line) == 0
            {
                self.flush(line_no);
            }

            // (b) blank-line boundary at sufficient size
            if at_top_level
                && line.trim().is_empty()
                && self.buffer.len() >= self.thresholds.soft_lines
            {
                self.push_line(line, line_no);
                self.flush(line_no + 1);
                continue;
            }

            self.push_line(line, line_no);

            // (c) hard ceiling, boundaries or not
            if self.buffer.len() >= self.thresholds.hard_lines {
                self.flush(line_no + 1);
            }
        }

        let total = text.lines().count();
        self.flush(total + 1);
        self.chunks
    }

    fn push_line(&mut self, line: &str, line_no: usize) {
        if self.buffer.is_empty() {
            self.buffer_start = line_no;
        }
        self.buffer.push(line.to_string());
        self.depth += brace_delta(line);
    }

    fn flush(&mut self, next_line: usize) {
        if self.buffer.is_empty() {
            return;
        }
        let text = self.buffer.join("\n");
        let end_line = next_line.saturating_sub(1);
        if !text.trim().is_empty() {
            self.chunks.push(ChunkSpan {
                start_line: self.buffer_start as u32,
                end_line: end_line as u32,
                text,
                kind: ChunkKind::Code,
            });
        }
        self.buffer.clear();
    }
}

/// Net brace depth change on a line; strings are not tracked, which is
/// acceptable for boundary heuristics.
fn brace_delta(line: &str) -> i32 {
    let mut delta = 0;
    for ch in line.chars() {
        match ch {
            '{' => delta += 1,
            '}' => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// Leading indentation depth in spaces (tabs count as 4).
fn leading_depth(line: &str) -> usize {
    let mut depth = 0;
    for ch in line.chars() {
        match ch {
            ' ' => depth += 1,
            '\t' => depth += 4,
            _ => break,
        }
    }
    depth
}

/// Split prose into blank-line-delimited paragraphs, sub-splitting any
/// paragraph over [`MAX_PARAGRAPH_CHARS`] into fixed windows.
fn chunk_prose(text: &str) -> Vec<ChunkSpan> {
    let mut chunks = Vec::new();
    let mut para: Vec<&str> = Vec::new();
    let mut para_start = 1usize;

    let mut flush = |para: &mut Vec<&str>, start: usize, end: usize, chunks: &mut Vec<ChunkSpan>| {
        if para.is_empty() {
            return;
        }
        let joined = para.join("\n");
        if joined.trim().is_empty() {
            para.clear();
            return;
        }
        if joined.len() > MAX_PARAGRAPH_CHARS {
            for piece in split_chars(&joined, WINDOW_CHARS) {
                chunks.push(ChunkSpan {
                    start_line: start as u32,
                    end_line: end as u32,
                    text: piece,
                    kind: ChunkKind::Doc,
                });
            }
        } else {
            chunks.push(ChunkSpan {
                start_line: start as u32,
                end_line: end as u32,
                text: joined,
                kind: ChunkKind::Doc,
            });
        }
        para.clear();
    };

    let mut last_line = 0usize;
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        last_line = line_no;
        if line.trim().is_empty() {
            flush(&mut para, para_start, line_no.saturating_sub(1), &mut chunks);
        } else {
            if para.is_empty() {
                para_start = line_no;
            }
            para.push(line);
        }
    }
    flush(&mut para, para_start, last_line, &mut chunks);

    chunks
}

/// Single-pass fixed-window split of raw text for unrecognized extensions.
fn chunk_windows(text: &str, kind: ChunkKind) -> Vec<ChunkSpan> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let lines: Vec<&str> = text.lines().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut buf = String::new();

    for (idx, line) in lines.iter().enumerate() {
        if buf.is_empty() {
            start = idx;
        }
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(line);
        if buf.len() >= WINDOW_CHARS {
            chunks.push(ChunkSpan {
                start_line: (start + 1) as u32,
                end_line: (idx + 1) as u32,
                text: std::mem::take(&mut buf),
                kind,
            });
        }
    }
    if !buf.trim().is_empty() {
        chunks.push(ChunkSpan {
            start_line: (start + 1) as u32,
            end_line: lines.len() as u32,
            text: buf,
            kind,
        });
    }

    chunks
}

/// Split a string into windows on char boundaries.
fn split_chars(input: &str, window: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in input.chars() {
        current.push(ch);
        if current.len() >= window {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_function(body_lines: usize) -> String {
        let mut src = String::from("fn big() {\n");
        for i in 0..body_lines {
            src.push_str(&format!("    let x{} = {};\n", i, i));
        }
        src.push_str("}\n");
        src
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        assert!(chunk_file("a.rs", "").is_empty());
        assert!(chunk_file("a.md", "\n\n").is_empty());
    }

    #[test]
    fn spans_are_one_indexed_and_nonempty() {
        let chunks = chunk_file("a.rs", "fn a() {}\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
        assert_eq!(chunks[0].kind, ChunkKind::Code);
    }

    #[test]
    fn long_function_stays_whole_under_hard_ceiling() {
        // 100-line body: over the soft threshold, under the 160-line ceiling
        let src = long_function(100);
        let chunks = chunk_file("a.rs", &src);
        assert_eq!(chunks.len(), 1, "function split across chunks: {:?}", chunks);
    }

    #[test]
    fn hard_ceiling_splits_oversized_function() {
        let src = long_function(300);
        let chunks = chunk_file("a.rs", &src);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            let lines = chunk.text.lines().count();
            assert!(lines <= ChunkThresholds::brace().hard_lines);
        }
    }

    #[test]
    fn declaration_boundary_flushes_buffer() {
        let mut src = String::new();
        for i in 0..12 {
            src.push_str(&format!("fn f{}() {{ let a = {}; }}\n", i, i));
        }
        let chunks = chunk_file("a.rs", &src);
        assert!(chunks.len() >= 2);
        // Adjacent chunks never overlap
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line > pair[0].end_line);
        }
    }

    #[test]
    fn indent_class_uses_smaller_ceiling() {
        let mut src = String::from("def big():\n");
        for i in 0..200 {
            src.push_str(&format!("    x{} = {}\n", i, i));
        }
        let chunks = chunk_file("a.py", &src);
        for chunk in &chunks {
            assert!(chunk.text.lines().count() <= ChunkThresholds::indent().hard_lines);
        }
    }

    #[test]
    fn prose_splits_on_paragraphs() {
        let text = "First paragraph line one.\nline two.\n\nSecond paragraph.\n";
        let chunks = chunk_file("notes.md", text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 2);
        assert_eq!(chunks[1].start_line, 4);
        assert_eq!(chunks[1].kind, ChunkKind::Doc);
    }

    #[test]
    fn oversized_paragraph_is_windowed() {
        let para = "word ".repeat(600); // ~3000 chars, one paragraph
        let chunks = chunk_file("notes.md", &para);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.len() <= MAX_PARAGRAPH_CHARS));
    }

    #[test]
    fn unknown_extension_gets_windowed_split() {
        let text = (0..100)
            .map(|i| format!("data row {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_file("data.csv2", &text);
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].kind, ChunkKind::Text);
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tantivy BM25 index over chunk documents.
//!
//! One tantivy document per chunk. The `path` field is raw (untokenized)
//! so a file's chunks can be deleted exactly before re-adding them.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, Schema, Term, Value, INDEXED, STORED, STRING, TEXT},
    Index, IndexWriter, TantivyDocument,
};

use crate::store::StoredChunk;

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Tantivy field handles
pub struct LexicalFields {
    pub path: Field,
    pub content: Field,
    pub symbols: Field,
    pub start_line: Field,
    pub end_line: Field,
}

/// A BM25 candidate from the chunk index.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub path: String,
    /// Raw BM25 score
    pub score: f32,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
}

/// BM25 chunk index stored under `.ctxgrep/lexical/`.
pub struct LexicalIndex {
    index: Index,
    fields: LexicalFields,
    dir: PathBuf,
}

impl LexicalIndex {
    fn schema() -> (Schema, LexicalFields) {
        let mut builder = Schema::builder();
        let path = builder.add_text_field("path", STRING | STORED);
        let content = builder.add_text_field("content", TEXT | STORED);
        let symbols = builder.add_text_field("symbols", TEXT | STORED);
        let start_line = builder.add_u64_field("start_line", INDEXED | STORED);
        let end_line = builder.add_u64_field("end_line", INDEXED | STORED);
        let schema = builder.build();
        (
            schema,
            LexicalFields {
                path,
                content,
                symbols,
                start_line,
                end_line,
            },
        )
    }

    /// Open an existing chunk index or create a fresh one.
    pub fn open_or_create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;

        let (schema, _) = Self::schema();
        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir).context("Failed to open lexical index")?
        } else {
            Index::create_in_dir(dir, schema).context("Failed to create lexical index")?
        };

        let schema = index.schema();
        let fields = LexicalFields {
            path: schema.get_field("path").context("Missing path field")?,
            content: schema.get_field("content").context("Missing content field")?,
            symbols: schema.get_field("symbols").context("Missing symbols field")?,
            start_line: schema
                .get_field("start_line")
                .context("Missing start_line field")?,
            end_line: schema
                .get_field("end_line")
                .context("Missing end_line field")?,
        };

        Ok(Self {
            index,
            fields,
            dir: dir.to_path_buf(),
        })
    }

    /// Drop the index on disk and recreate it empty (full reindex).
    pub fn recreate(dir: &Path) -> Result<Self> {
        if dir.exists() {
            std::fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to clear index directory: {}", dir.display()))?;
        }
        Self::open_or_create(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn writer(&self) -> Result<IndexWriter> {
        self.index
            .writer(WRITER_HEAP_BYTES)
            .context("Failed to create index writer")
    }

    /// Delete every chunk document for a file.
    pub fn delete_file(&self, writer: &IndexWriter, path: &str) {
        writer.delete_term(Term::from_field_text(self.fields.path, path));
    }

    /// Add one chunk document.
    pub fn add_chunk(&self, writer: &IndexWriter, chunk: &StoredChunk) -> Result<()> {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.fields.path, &chunk.file);
        doc.add_text(self.fields.content, &chunk.text);
        doc.add_text(self.fields.symbols, chunk.symbols.join(" "));
        doc.add_u64(self.fields.start_line, chunk.start_line as u64);
        doc.add_u64(self.fields.end_line, chunk.end_line as u64);
        writer.add_document(doc)?;
        Ok(())
    }

    /// BM25 candidate search over content and symbols.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        let reader = self.index.reader()?;
        let searcher = reader.searcher();

        let parser =
            QueryParser::for_index(&self.index, vec![self.fields.content, self.fields.symbols]);
        // Queries are natural language; tolerate syntax that BM25 query
        // grammar would reject.
        let (parsed, _errors) = parser.parse_query_lenient(query);

        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit.max(1)))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let path = doc
                .get_first(self.fields.path)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let text = doc
                .get_first(self.fields.content)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let start_line = doc
                .get_first(self.fields.start_line)
                .and_then(|v| v.as_u64())
                .unwrap_or(1) as u32;
            let end_line = doc
                .get_first(self.fields.end_line)
                .and_then(|v| v.as_u64())
                .unwrap_or(1) as u32;

            hits.push(LexicalHit {
                path,
                score,
                start_line,
                end_line,
                text,
            });
        }

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkKind;
    use tempfile::TempDir;

    fn chunk(file: &str, start: u32, text: &str, symbols: &[&str]) -> StoredChunk {
        StoredChunk {
            file: file.to_string(),
            start_line: start,
            end_line: start + 3,
            text: text.to_string(),
            content_hash: crate::utils::content_hash(text),
            kind: ChunkKind::Code,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            embedding: None,
        }
    }

    #[test]
    fn add_and_search_chunks() {
        let dir = TempDir::new().unwrap();
        let index = LexicalIndex::open_or_create(dir.path()).unwrap();

        let mut writer = index.writer().unwrap();
        index
            .add_chunk(&writer, &chunk("src/math.ts", 1, "export function add(a, b) { return a + b }", &["add"]))
            .unwrap();
        index
            .add_chunk(&writer, &chunk("README.md", 1, "Math utils. Adds numbers.", &[]))
            .unwrap();
        writer.commit().unwrap();

        let hits = index.search("add numbers", 10).unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().any(|h| h.path == "src/math.ts"));
    }

    #[test]
    fn delete_file_removes_its_chunks() {
        let dir = TempDir::new().unwrap();
        let index = LexicalIndex::open_or_create(dir.path()).unwrap();

        let mut writer = index.writer().unwrap();
        index
            .add_chunk(&writer, &chunk("src/gone.rs", 1, "fn unique_marker_xyz() {}", &["unique_marker_xyz"]))
            .unwrap();
        writer.commit().unwrap();
        drop(writer);

        let mut writer = index.writer().unwrap();
        index.delete_file(&writer, "src/gone.rs");
        writer.commit().unwrap();

        let hits = index.search("unique_marker_xyz", 10).unwrap();
        assert!(hits.iter().all(|h| h.path != "src/gone.rs"));
    }

    #[test]
    fn lenient_parsing_tolerates_query_syntax() {
        let dir = TempDir::new().unwrap();
        let index = LexicalIndex::open_or_create(dir.path()).unwrap();
        let mut writer = index.writer().unwrap();
        index
            .add_chunk(&writer, &chunk("a.rs", 1, "fn handler() {}", &["handler"]))
            .unwrap();
        writer.commit().unwrap();

        // Trailing paren would be a syntax error in strict parsing
        let hits = index.search("handler(", 5).unwrap();
        assert!(!hits.is_empty());
    }
}

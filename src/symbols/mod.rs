// SPDX-License-Identifier: MIT OR Apache-2.0

//! Symbol extraction with a grammar-backed pass and a regex fallback.
//!
//! [`GrammarExtractor`] queries tree-sitter parse trees for declaration
//! nodes; [`RegexExtractor`] matches line-oriented patterns per language
//! family. [`CompositeExtractor`] tries the grammar pass first and falls
//! back when it errors or yields nothing.

mod grammar;
mod regex_fallback;

pub use grammar::GrammarExtractor;
pub use regex_fallback::RegexExtractor;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Symbol kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    Struct,
    Enum,
    Trait,
    Type,
    Constant,
    Variable,
    Module,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolKind::Function => write!(f, "function"),
            SymbolKind::Method => write!(f, "method"),
            SymbolKind::Class => write!(f, "class"),
            SymbolKind::Interface => write!(f, "interface"),
            SymbolKind::Struct => write!(f, "struct"),
            SymbolKind::Enum => write!(f, "enum"),
            SymbolKind::Trait => write!(f, "trait"),
            SymbolKind::Type => write!(f, "type"),
            SymbolKind::Constant => write!(f, "constant"),
            SymbolKind::Variable => write!(f, "variable"),
            SymbolKind::Module => write!(f, "module"),
        }
    }
}

/// Extracted symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub file: String,
    /// Declaration line (1-indexed)
    pub line: usize,
    pub is_public: bool,
    pub is_exported: bool,
}

/// Capability interface for symbol extraction strategies.
pub trait SymbolSource {
    fn extract(&self, file: &str, source: &str, language: &str) -> Result<Vec<Symbol>>;
}

/// Grammar-first extractor with regex fallback.
pub struct CompositeExtractor {
    grammar: GrammarExtractor,
    regex: RegexExtractor,
}

impl Default for CompositeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeExtractor {
    pub fn new() -> Self {
        Self {
            grammar: GrammarExtractor::new(),
            regex: RegexExtractor::new(),
        }
    }

    /// Extract symbols, never propagating parse failures.
    pub fn extract_symbols(&self, file: &str, source: &str, language: &str) -> Vec<Symbol> {
        let primary = match self.grammar.extract(file, source, language) {
            Ok(symbols) if !symbols.is_empty() => symbols,
            Ok(_) => self
                .regex
                .extract(file, source, language)
                .unwrap_or_default(),
            Err(e) => {
                tracing::debug!("grammar extraction failed for {}: {}", file, e);
                self.regex
                    .extract(file, source, language)
                    .unwrap_or_default()
            }
        };

        dedup_symbols(primary)
    }
}

/// Deduplicate by (file, name, line), preserving first occurrence.
fn dedup_symbols(symbols: Vec<Symbol>) -> Vec<Symbol> {
    let mut seen: HashSet<(String, String, usize)> = HashSet::new();
    symbols
        .into_iter()
        .filter(|s| seen.insert((s.file.clone(), s.name.clone(), s.line)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grammar_pass_wins_for_supported_language() {
        let extractor = CompositeExtractor::new();
        let symbols = extractor.extract_symbols(
            "src/lib.rs",
            "pub fn add(a: i32, b: i32) -> i32 { a + b }\nfn private_helper() {}\n",
            "rust",
        );

        let add = symbols.iter().find(|s| s.name == "add").unwrap();
        assert_eq!(add.kind, SymbolKind::Function);
        assert!(add.is_public);

        let helper = symbols.iter().find(|s| s.name == "private_helper").unwrap();
        assert!(!helper.is_public);
    }

    #[test]
    fn unsupported_language_falls_back_to_regex() {
        let extractor = CompositeExtractor::new();
        let symbols = extractor.extract_symbols(
            "lib/widget.rb",
            "class Widget\n  def render\n  end\nend\n",
            "ruby",
        );
        assert!(symbols.iter().any(|s| s.name == "Widget"));
        assert!(symbols.iter().any(|s| s.name == "render"));
    }

    #[test]
    fn dedup_by_file_name_line() {
        let sym = |line| Symbol {
            name: "x".into(),
            kind: SymbolKind::Function,
            file: "a.rs".into(),
            line,
            is_public: false,
            is_exported: false,
        };
        let out = dedup_symbols(vec![sym(1), sym(1), sym(2)]);
        assert_eq!(out.len(), 2);
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Line-oriented regex symbol extraction, used when no grammar binding is
//! available or the grammar pass yields nothing.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Symbol, SymbolKind, SymbolSource};

struct Pattern {
    regex: &'static Lazy<Regex>,
    kind: SymbolKind,
    /// Capture group holding the symbol name
    group: usize,
}

static RUST_FN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(pub(\(\w+\))?\s+)?(async\s+)?fn\s+(\w+)").expect("regex"));
static RUST_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(pub(\(\w+\))?\s+)?(struct|enum|trait|mod|type)\s+(\w+)").expect("regex")
});
static TS_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(export\s+)?(default\s+)?(async\s+)?function\s+(\w+)").expect("regex")
});
static TS_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(export\s+)?(abstract\s+)?(class|interface|enum)\s+(\w+)").expect("regex")
});
static PY_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(async\s+)?def\s+(\w+)").expect("regex"));
static PY_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*class\s+(\w+)").expect("regex"));
static GO_FUNC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^func\s+(\([^)]+\)\s+)?(\w+)").expect("regex"));
static GO_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^type\s+(\w+)").expect("regex"));
static JAVA_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(public\s+|protected\s+|private\s+)?(abstract\s+|final\s+)?(class|interface|enum)\s+(\w+)")
        .expect("regex")
});
static C_FN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w[\w\s\*]*\s\*?(\w+)\s*\([^;]*$").expect("regex"));
static RUBY_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*def\s+(?:self\.)?(\w+[?!]?)").expect("regex"));
static RUBY_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(class|module)\s+(\w+)").expect("regex"));
static KOTLIN_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(public\s+|private\s+|internal\s+)?(fun|class|interface|object)\s+(\w+)")
        .expect("regex")
});

fn patterns_for(language: &str) -> Vec<Pattern> {
    match language {
        "rust" => vec![
            Pattern { regex: &RUST_FN, kind: SymbolKind::Function, group: 4 },
            Pattern { regex: &RUST_TYPE, kind: SymbolKind::Type, group: 4 },
        ],
        "typescript" | "tsx" | "javascript" => vec![
            Pattern { regex: &TS_FN, kind: SymbolKind::Function, group: 4 },
            Pattern { regex: &TS_TYPE, kind: SymbolKind::Class, group: 4 },
        ],
        "python" => vec![
            Pattern { regex: &PY_DEF, kind: SymbolKind::Function, group: 2 },
            Pattern { regex: &PY_CLASS, kind: SymbolKind::Class, group: 1 },
        ],
        "go" => vec![
            Pattern { regex: &GO_FUNC, kind: SymbolKind::Function, group: 2 },
            Pattern { regex: &GO_TYPE, kind: SymbolKind::Type, group: 1 },
        ],
        "java" => vec![Pattern { regex: &JAVA_TYPE, kind: SymbolKind::Class, group: 4 }],
        "c" | "cpp" => vec![Pattern { regex: &C_FN, kind: SymbolKind::Function, group: 1 }],
        "ruby" => vec![
            Pattern { regex: &RUBY_DEF, kind: SymbolKind::Method, group: 1 },
            Pattern { regex: &RUBY_CLASS, kind: SymbolKind::Class, group: 2 },
        ],
        "kotlin" => vec![Pattern { regex: &KOTLIN_DECL, kind: SymbolKind::Function, group: 3 }],
        _ => Vec::new(),
    }
}

/// Regex-based extractor covering language families without a grammar
/// binding.
pub struct RegexExtractor;

impl Default for RegexExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl RegexExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl SymbolSource for RegexExtractor {
    fn extract(&self, file: &str, source: &str, language: &str) -> Result<Vec<Symbol>> {
        let patterns = patterns_for(language);
        if patterns.is_empty() {
            return Ok(Vec::new());
        }

        let mut symbols = Vec::new();
        for (idx, line) in source.lines().enumerate() {
            for pattern in &patterns {
                if let Some(caps) = pattern.regex.captures(line) {
                    if let Some(name) = caps.get(pattern.group) {
                        let name = name.as_str().to_string();
                        let (is_public, is_exported) = line_visibility(language, line, &name);
                        symbols.push(Symbol {
                            name,
                            kind: pattern.kind,
                            file: file.to_string(),
                            line: idx + 1,
                            is_public,
                            is_exported,
                        });
                        break;
                    }
                }
            }
        }

        Ok(symbols)
    }
}

fn line_visibility(language: &str, line: &str, name: &str) -> (bool, bool) {
    match language {
        "rust" => {
            let public = line.trim_start().starts_with("pub");
            (public, public)
        }
        "typescript" | "tsx" | "javascript" => {
            let exported = line.trim_start().starts_with("export");
            (true, exported)
        }
        "go" => {
            let exported = name.chars().next().map(|c| c.is_uppercase()).unwrap_or(false);
            (exported, exported)
        }
        "java" | "kotlin" => {
            let public = line.contains("public") || line.contains("protected")
                || !line.contains("private");
            (public, public)
        }
        "python" | "ruby" => {
            let public = !name.starts_with('_');
            (public, public)
        }
        _ => (true, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_patterns() {
        let source = "pub fn alpha() {}\nfn beta() {}\npub struct Gamma;\n";
        let symbols = RegexExtractor::new().extract("lib.rs", source, "rust").unwrap();

        assert_eq!(symbols.len(), 3);
        assert!(symbols.iter().any(|s| s.name == "alpha" && s.is_public));
        assert!(symbols.iter().any(|s| s.name == "beta" && !s.is_public));
    }

    #[test]
    fn ruby_patterns() {
        let source = "class Widget\n  def self.build\n  end\n  def render!\n  end\nend\n";
        let symbols = RegexExtractor::new()
            .extract("widget.rb", source, "ruby")
            .unwrap();

        assert!(symbols.iter().any(|s| s.name == "Widget"));
        assert!(symbols.iter().any(|s| s.name == "build"));
        assert!(symbols.iter().any(|s| s.name == "render!"));
    }

    #[test]
    fn go_export_convention() {
        let source = "func Public() {}\nfunc internal() {}\ntype Config struct {}\n";
        let symbols = RegexExtractor::new().extract("main.go", source, "go").unwrap();

        assert!(symbols.iter().find(|s| s.name == "Public").unwrap().is_exported);
        assert!(!symbols.iter().find(|s| s.name == "internal").unwrap().is_exported);
        assert!(symbols.iter().any(|s| s.name == "Config"));
    }

    #[test]
    fn unknown_language_yields_empty() {
        let symbols = RegexExtractor::new().extract("x.zig", "fn main() {}", "zig").unwrap();
        assert!(symbols.is_empty());
    }
}

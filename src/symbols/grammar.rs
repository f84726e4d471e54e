// SPDX-License-Identifier: MIT OR Apache-2.0

//! Grammar-backed symbol extraction using tree-sitter node traversal

use anyhow::Result;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tree_sitter::{Language, Node, Parser};

use super::{Symbol, SymbolKind, SymbolSource};

/// Registered tree-sitter grammars keyed by language name.
static LANGUAGES: Lazy<HashMap<&'static str, Language>> = Lazy::new(|| {
    let mut languages: HashMap<&'static str, Language> = HashMap::new();
    languages.insert(
        "typescript",
        tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
    );
    languages.insert("tsx", tree_sitter_typescript::LANGUAGE_TSX.into());
    languages.insert("javascript", tree_sitter_javascript::LANGUAGE.into());
    languages.insert("python", tree_sitter_python::LANGUAGE.into());
    languages.insert("rust", tree_sitter_rust::LANGUAGE.into());
    languages.insert("go", tree_sitter_go::LANGUAGE.into());
    languages.insert("java", tree_sitter_java::LANGUAGE.into());
    languages
});

/// Symbol extractor that walks tree-sitter parse trees.
pub struct GrammarExtractor;

impl Default for GrammarExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl GrammarExtractor {
    pub fn new() -> Self {
        Self
    }

    fn traverse(&self, node: Node, source: &[u8], lang: &str, file: &str, out: &mut Vec<Symbol>) {
        if let Some(symbol) = self.symbol_from_node(node, source, lang, file) {
            out.push(symbol);
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.traverse(child, source, lang, file, out);
        }
    }

    fn symbol_from_node(&self, node: Node, source: &[u8], lang: &str, file: &str) -> Option<Symbol> {
        let kind = node.kind();

        let (symbol_kind, name_field) = match lang {
            "typescript" | "tsx" | "javascript" => match_typescript_node(kind)?,
            "python" => match_python_node(kind)?,
            "rust" => match_rust_node(kind)?,
            "go" => match_go_node(kind)?,
            "java" => match_java_node(kind)?,
            _ => return None,
        };

        let name_node = node.child_by_field_name(name_field)?;
        let name = name_node.utf8_text(source).ok()?.to_string();
        let (is_public, is_exported) = visibility(lang, node, source, &name);

        Some(Symbol {
            name,
            kind: symbol_kind,
            file: file.to_string(),
            line: node.start_position().row + 1,
            is_public,
            is_exported,
        })
    }
}

impl SymbolSource for GrammarExtractor {
    fn extract(&self, file: &str, source: &str, language: &str) -> Result<Vec<Symbol>> {
        let lang = LANGUAGES
            .get(language)
            .ok_or_else(|| anyhow::anyhow!("Unsupported language: {}", language))?;

        let mut parser = Parser::new();
        parser.set_language(lang)?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| anyhow::anyhow!("Failed to parse source"))?;

        let source_bytes = source.as_bytes();
        let mut symbols = Vec::new();
        self.traverse(tree.root_node(), source_bytes, language, file, &mut symbols);

        Ok(symbols)
    }
}

/// Language-specific visibility predicate: (is_public, is_exported).
fn visibility(lang: &str, node: Node, source: &[u8], name: &str) -> (bool, bool) {
    match lang {
        "rust" => {
            let public = node
                .children(&mut node.walk())
                .any(|c| c.kind() == "visibility_modifier");
            (public, public)
        }
        "go" => {
            // Capitalized identifiers are exported
            let exported = name.chars().next().map(|c| c.is_uppercase()).unwrap_or(false);
            (exported, exported)
        }
        "java" => {
            let text = node.utf8_text(source).unwrap_or("");
            let head = text.lines().next().unwrap_or("");
            let public = head.contains("public") || head.contains("protected");
            (public, public)
        }
        "typescript" | "tsx" | "javascript" => {
            let exported = has_export_ancestor(node);
            (true, exported)
        }
        "python" => {
            let public = !name.starts_with('_');
            (public, public)
        }
        _ => (true, false),
    }
}

fn has_export_ancestor(node: Node) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        if parent.kind() == "export_statement" {
            return true;
        }
        current = parent.parent();
    }
    false
}

fn match_typescript_node(kind: &str) -> Option<(SymbolKind, &'static str)> {
    match kind {
        "function_declaration" => Some((SymbolKind::Function, "name")),
        "class_declaration" => Some((SymbolKind::Class, "name")),
        "interface_declaration" => Some((SymbolKind::Interface, "name")),
        "type_alias_declaration" => Some((SymbolKind::Type, "name")),
        "enum_declaration" => Some((SymbolKind::Enum, "name")),
        "method_definition" => Some((SymbolKind::Method, "name")),
        _ => None,
    }
}

fn match_python_node(kind: &str) -> Option<(SymbolKind, &'static str)> {
    match kind {
        "function_definition" => Some((SymbolKind::Function, "name")),
        "class_definition" => Some((SymbolKind::Class, "name")),
        _ => None,
    }
}

fn match_rust_node(kind: &str) -> Option<(SymbolKind, &'static str)> {
    match kind {
        "function_item" => Some((SymbolKind::Function, "name")),
        "struct_item" => Some((SymbolKind::Struct, "name")),
        "enum_item" => Some((SymbolKind::Enum, "name")),
        "trait_item" => Some((SymbolKind::Trait, "name")),
        "type_item" => Some((SymbolKind::Type, "name")),
        "const_item" => Some((SymbolKind::Constant, "name")),
        "mod_item" => Some((SymbolKind::Module, "name")),
        _ => None,
    }
}

fn match_go_node(kind: &str) -> Option<(SymbolKind, &'static str)> {
    match kind {
        "function_declaration" => Some((SymbolKind::Function, "name")),
        "method_declaration" => Some((SymbolKind::Method, "name")),
        "type_spec" => Some((SymbolKind::Type, "name")),
        _ => None,
    }
}

fn match_java_node(kind: &str) -> Option<(SymbolKind, &'static str)> {
    match kind {
        "method_declaration" => Some((SymbolKind::Method, "name")),
        "class_declaration" => Some((SymbolKind::Class, "name")),
        "interface_declaration" => Some((SymbolKind::Interface, "name")),
        "enum_declaration" => Some((SymbolKind::Enum, "name")),
        "constructor_declaration" => Some((SymbolKind::Function, "name")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_rust_visibility() {
        let source = "pub fn visible() {}\nfn hidden() {}\npub struct Thing;\n";
        let symbols = GrammarExtractor::new()
            .extract("src/lib.rs", source, "rust")
            .unwrap();

        let visible = symbols.iter().find(|s| s.name == "visible").unwrap();
        assert!(visible.is_public && visible.is_exported);

        let hidden = symbols.iter().find(|s| s.name == "hidden").unwrap();
        assert!(!hidden.is_public);

        let thing = symbols.iter().find(|s| s.name == "Thing").unwrap();
        assert_eq!(thing.kind, SymbolKind::Struct);
    }

    #[test]
    fn extracts_typescript_export() {
        let source = "export function greet(name: string) { return name; }\nfunction local() {}\n";
        let symbols = GrammarExtractor::new()
            .extract("src/a.ts", source, "typescript")
            .unwrap();

        let greet = symbols.iter().find(|s| s.name == "greet").unwrap();
        assert!(greet.is_exported);

        let local = symbols.iter().find(|s| s.name == "local").unwrap();
        assert!(!local.is_exported);
    }

    #[test]
    fn go_capitalization_convention() {
        let source = "package main\n\nfunc Exported() {}\nfunc private() {}\n";
        let symbols = GrammarExtractor::new()
            .extract("main.go", source, "go")
            .unwrap();

        assert!(symbols.iter().find(|s| s.name == "Exported").unwrap().is_exported);
        assert!(!symbols.iter().find(|s| s.name == "private").unwrap().is_exported);
    }

    #[test]
    fn python_underscore_convention() {
        let source = "def handler():\n    pass\n\ndef _internal():\n    pass\n";
        let symbols = GrammarExtractor::new()
            .extract("app.py", source, "python")
            .unwrap();

        assert!(symbols.iter().find(|s| s.name == "handler").unwrap().is_public);
        assert!(!symbols.iter().find(|s| s.name == "_internal").unwrap().is_public);
    }

    #[test]
    fn unsupported_language_errors() {
        let result = GrammarExtractor::new().extract("x.zig", "fn main() {}", "zig");
        assert!(result.is_err());
    }
}

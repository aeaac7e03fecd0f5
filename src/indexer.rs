//! Tree-sitter language parsers.
//!
//! Provides the [`LanguageParser`] capability and its tree-sitter backed
//! implementations for Python, JavaScript, TypeScript and TSX. Each parser
//! turns file content into a flat list of [`Declaration`]s (classes,
//! functions and imports with their line spans); nesting is reconstructed
//! by the reconciler from the spans.

use thiserror::Error;
use tree_sitter::{Language, Node, Parser};

use crate::types::{DeclKind, Declaration};

// ---------------------------------------------------------------------------
// Parser capability
// ---------------------------------------------------------------------------

/// Why a parser could not produce declarations for a file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("failed to load {0} grammar")]
    Grammar(&'static str),

    #[error("parser produced no syntax tree")]
    NoTree,

    #[error("syntax error near line {line}")]
    Syntax { line: usize },
}

/// Turns source text of one language into declarations.
///
/// Implementations must be cheap to share across extraction threads.
pub trait LanguageParser: Send + Sync {
    /// Language name reported in structural records.
    fn language(&self) -> &'static str;

    /// Lowercase extensions (without dot) this parser handles.
    fn extensions(&self) -> &'static [&'static str];

    fn parse(&self, content: &str) -> Result<Vec<Declaration>, ParseError>;
}

/// Languages with bundled tree-sitter grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    TypeScript,
    Tsx,
    JavaScript,
    Python,
}

impl Lang {
    /// Returns the human-readable name for this language.
    pub fn name(self) -> &'static str {
        match self {
            Lang::TypeScript => "TypeScript",
            Lang::Tsx => "TSX",
            Lang::JavaScript => "JavaScript",
            Lang::Python => "Python",
        }
    }

    fn extensions(self) -> &'static [&'static str] {
        match self {
            Lang::TypeScript => &["ts", "mts", "cts"],
            Lang::Tsx => &["tsx"],
            Lang::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Lang::Python => &["py", "pyi"],
        }
    }

    fn grammar(self) -> Language {
        match self {
            Lang::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Lang::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Lang::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Lang::Python => tree_sitter_python::LANGUAGE.into(),
        }
    }

    pub const ALL: [Lang; 4] = [Lang::Python, Lang::JavaScript, Lang::TypeScript, Lang::Tsx];
}

/// A [`LanguageParser`] backed by a bundled tree-sitter grammar.
///
/// A fresh `tree_sitter::Parser` is built per call since parsers are not
/// `Sync`; grammar loading is cheap.
#[derive(Debug, Clone, Copy)]
pub struct TreeSitterParser {
    lang: Lang,
}

impl TreeSitterParser {
    pub fn new(lang: Lang) -> Self {
        Self { lang }
    }

    fn parser(&self) -> Result<Parser, ParseError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.lang.grammar())
            .map_err(|_| ParseError::Grammar(self.lang.name()))?;
        Ok(parser)
    }
}

impl LanguageParser for TreeSitterParser {
    fn language(&self) -> &'static str {
        self.lang.name()
    }

    fn extensions(&self) -> &'static [&'static str] {
        self.lang.extensions()
    }

    fn parse(&self, content: &str) -> Result<Vec<Declaration>, ParseError> {
        let mut parser = self.parser()?;
        let tree = parser.parse(content, None).ok_or(ParseError::NoTree)?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(ParseError::Syntax {
                line: first_error_line(root).unwrap_or(1),
            });
        }

        let src = content.as_bytes();
        let mut decls = Vec::new();
        walk_node(root, src, self.lang, &mut decls);
        Ok(decls)
    }
}

/// 1-based line of the first error or missing node under `node`.
fn first_error_line(node: Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i as u32)
            && child.has_error()
            && let Some(line) = first_error_line(child)
        {
            return Some(line);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Declaration extraction
// ---------------------------------------------------------------------------

/// Recursively walk a node and its children, collecting declarations.
fn walk_node(node: Node, src: &[u8], lang: Lang, decls: &mut Vec<Declaration>) {
    match lang {
        Lang::Python => extract_python(node, src, decls),
        Lang::JavaScript => extract_js_common(node, src, lang, decls),
        Lang::TypeScript | Lang::Tsx => extract_typescript(node, src, lang, decls),
    }

    for i in 0..node.child_count() {
        if let Some(child) = node.child(i as u32) {
            walk_node(child, src, lang, decls);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Get the text content of a node.
fn node_text<'a>(node: Node, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

/// Find a named child by its field name and return its text.
fn field_text<'a>(node: Node, field: &str, src: &'a [u8]) -> Option<&'a str> {
    node.child_by_field_name(field).map(|n| node_text(n, src))
}

/// Build a `Declaration` spanning `node`.
fn make_decl(kind: DeclKind, name: &str, node: Node) -> Declaration {
    Declaration::new(
        kind,
        name,
        node.start_position().row + 1,
        node.end_position().row + 1,
    )
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches(|c| c == '\'' || c == '"' || c == '`')
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

fn extract_python(node: Node, src: &[u8], decls: &mut Vec<Declaration>) {
    match node.kind() {
        "function_definition" => {
            if let Some(name) = field_text(node, "name", src) {
                decls.push(make_decl(DeclKind::Function, name, node));
            }
        }
        "class_definition" => {
            if let Some(name) = field_text(node, "name", src) {
                let bases = python_bases(node, src);
                decls.push(make_decl(DeclKind::Class, name, node).with_bases(bases));
            }
        }
        "import_statement" => {
            // import a.b, c as d
            for i in 0..node.named_child_count() {
                if let Some(child) = node.named_child(i as u32)
                    && let Some(name) = python_import_name(child, src)
                {
                    decls.push(make_decl(DeclKind::Import, name, node));
                }
            }
        }
        "import_from_statement" => {
            let Some(module) = field_text(node, "module_name", src) else {
                return;
            };
            let mut cursor = node.walk();
            let names: Vec<&str> = node
                .children_by_field_name("name", &mut cursor)
                .filter_map(|n| python_import_name(n, src))
                .collect();

            if names.is_empty() {
                // from a import *
                decls.push(make_decl(DeclKind::Import, module, node));
            }
            for name in names {
                let joined = if module.ends_with('.') {
                    format!("{module}{name}")
                } else {
                    format!("{module}.{name}")
                };
                decls.push(make_decl(DeclKind::Import, &joined, node));
            }
        }
        _ => {}
    }
}

/// `a.b` for a dotted name, the original name for `a.b as c`.
fn python_import_name<'a>(node: Node, src: &'a [u8]) -> Option<&'a str> {
    match node.kind() {
        "dotted_name" => Some(node_text(node, src)),
        "aliased_import" => field_text(node, "name", src),
        _ => None,
    }
}

/// Positional superclass expressions, skipping `metaclass=...` and friends.
fn python_bases(node: Node, src: &[u8]) -> Vec<String> {
    let Some(args) = node.child_by_field_name("superclasses") else {
        return Vec::new();
    };
    let mut bases = Vec::new();
    for i in 0..args.named_child_count() {
        if let Some(arg) = args.named_child(i as u32)
            && matches!(arg.kind(), "identifier" | "attribute")
        {
            bases.push(node_text(arg, src).to_string());
        }
    }
    bases
}

// ---------------------------------------------------------------------------
// JavaScript
// ---------------------------------------------------------------------------

/// Shared extraction logic for JavaScript, TypeScript, and TSX.
fn extract_js_common(node: Node, src: &[u8], lang: Lang, decls: &mut Vec<Declaration>) {
    match node.kind() {
        "function_declaration" | "generator_function_declaration" | "method_definition" => {
            if let Some(name) = field_text(node, "name", src) {
                decls.push(make_decl(DeclKind::Function, name, node));
            }
        }
        "class_declaration" | "abstract_class_declaration" => {
            if let Some(name) = field_text(node, "name", src) {
                let bases = js_bases(node, src, lang);
                decls.push(make_decl(DeclKind::Class, name, node).with_bases(bases));
            }
        }
        "variable_declarator" => extract_js_var_decl(node, src, lang, decls),
        "import_statement" => {
            if let Some(source) = field_text(node, "source", src) {
                decls.push(make_decl(DeclKind::Import, strip_quotes(source), node));
            }
        }
        _ => {}
    }
}

/// `const foo = () => {}` / `let Bar = class extends Base {}`.
fn extract_js_var_decl(node: Node, src: &[u8], lang: Lang, decls: &mut Vec<Declaration>) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    if name_node.kind() != "identifier" {
        return;
    }
    let name = node_text(name_node, src);
    let Some(value) = node.child_by_field_name("value") else {
        return;
    };
    match value.kind() {
        "arrow_function" | "function" | "function_expression" | "generator_function" => {
            decls.push(make_decl(DeclKind::Function, name, node));
        }
        "class" => {
            let bases = js_bases(value, src, lang);
            decls.push(make_decl(DeclKind::Class, name, node).with_bases(bases));
        }
        _ => {}
    }
}

/// The `extends` target of a class, if any.
fn js_bases(node: Node, src: &[u8], lang: Lang) -> Vec<String> {
    let mut bases = Vec::new();
    for i in 0..node.named_child_count() {
        let Some(child) = node.named_child(i as u32) else {
            continue;
        };
        if child.kind() != "class_heritage" {
            continue;
        }
        match lang {
            Lang::JavaScript => {
                if let Some(expr) = child.named_child(0u32) {
                    bases.push(node_text(expr, src).to_string());
                }
            }
            _ => {
                // TypeScript: class_heritage -> extends_clause (value) / implements_clause
                for j in 0..child.named_child_count() {
                    if let Some(clause) = child.named_child(j as u32)
                        && clause.kind() == "extends_clause"
                        && let Some(value) = clause.child_by_field_name("value")
                    {
                        bases.push(node_text(value, src).to_string());
                    }
                }
            }
        }
    }
    bases
}

// ---------------------------------------------------------------------------
// TypeScript / TSX
// ---------------------------------------------------------------------------

fn extract_typescript(node: Node, src: &[u8], lang: Lang, decls: &mut Vec<Declaration>) {
    // TypeScript has all JS constructs plus some extras.
    match node.kind() {
        "function_signature" => {
            if let Some(name) = field_text(node, "name", src) {
                decls.push(make_decl(DeclKind::Function, name, node));
            }
        }
        "interface_declaration" => {
            if let Some(name) = field_text(node, "name", src) {
                decls.push(make_decl(DeclKind::Class, name, node));
            }
        }
        _ => extract_js_common(node, src, lang, decls),
    }
}

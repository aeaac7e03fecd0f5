//! Shared types and data structures.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of a declaration reported by a language parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclKind {
    Class,
    Function,
    Import,
}

impl DeclKind {
    /// Priority used when two declarations share the exact same line range:
    /// the higher value encloses the lower one.
    pub fn nesting_priority(self) -> u8 {
        match self {
            DeclKind::Class => 2,
            DeclKind::Function => 1,
            DeclKind::Import => 0,
        }
    }

    /// Whether a declaration of this kind can enclose other declarations.
    pub fn is_container(self) -> bool {
        matches!(self, DeclKind::Class | DeclKind::Function)
    }
}

impl fmt::Display for DeclKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeclKind::Class => "class",
            DeclKind::Function => "function",
            DeclKind::Import => "import",
        };
        write!(f, "{s}")
    }
}

/// A single declaration extracted from a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: DeclKind,
    /// Declared name. For imports, the imported path exactly as written.
    pub name: String,
    /// 1-based first line.
    pub start_line: usize,
    /// 1-based last line (inclusive).
    pub end_line: usize,
    /// Raw superclass names for class declarations.
    pub bases: Vec<String>,
}

impl Declaration {
    pub fn new(kind: DeclKind, name: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self {
            kind,
            name: name.into(),
            start_line,
            end_line: end_line.max(start_line),
            bases: Vec::new(),
        }
    }

    pub fn with_bases(mut self, bases: Vec<String>) -> Self {
        self.bases = bases;
        self
    }

    /// True when `other`'s line range lies within this declaration's range.
    pub fn encloses(&self, other: &Declaration) -> bool {
        self.start_line <= other.start_line && other.end_line <= self.end_line
    }

    pub fn span(&self) -> usize {
        self.end_line.saturating_sub(self.start_line)
    }
}

/// The language-neutral result of extracting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralRecord {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// Parser language name, or `None` when no parser handles the extension.
    pub language: Option<String>,
    pub declarations: Vec<Declaration>,
    /// Non-fatal problem encountered while extracting (parse failure, bad
    /// encoding, unreadable file).
    pub warning: Option<String>,
}

impl StructuralRecord {
    pub fn empty(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            language: None,
            declarations: Vec::new(),
            warning: None,
        }
    }
}

/// Kinds of graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Class,
    Function,
    Import,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::File => "File",
            NodeKind::Class => "Class",
            NodeKind::Function => "Function",
            NodeKind::Import => "Import",
        }
    }
}

impl From<DeclKind> for NodeKind {
    fn from(kind: DeclKind) -> Self {
        match kind {
            DeclKind::Class => NodeKind::Class,
            DeclKind::Function => NodeKind::Function,
            DeclKind::Import => NodeKind::Import,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(NodeKind::File),
            "class" => Ok(NodeKind::Class),
            "function" => Ok(NodeKind::Function),
            "import" => Ok(NodeKind::Import),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

/// Kinds of graph relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    Contains,
    Imports,
    Calls,
    Extends,
    DependsOn,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Contains => "CONTAINS",
            EdgeKind::Imports => "IMPORTS",
            EdgeKind::Calls => "CALLS",
            EdgeKind::Extends => "EXTENDS",
            EdgeKind::DependsOn => "DEPENDS_ON",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONTAINS" => Ok(EdgeKind::Contains),
            "IMPORTS" => Ok(EdgeKind::Imports),
            "CALLS" => Ok(EdgeKind::Calls),
            "EXTENDS" => Ok(EdgeKind::Extends),
            "DEPENDS_ON" => Ok(EdgeKind::DependsOn),
            other => Err(format!("unknown edge kind: {other}")),
        }
    }
}

/// A node in the code graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    /// Dotted chain of enclosing declaration names, empty for files.
    pub qualified_name: String,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
    pub repo: String,
    /// Raw superclass names (classes only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<String>,
}

/// A directed, typed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    /// File whose reconciliation produced this edge.
    pub owner: String,
}

/// Nodes and links of (part of) one repository's graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subgraph {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphEdge>,
}

/// Restricts a subgraph query.
#[derive(Debug, Clone, Default)]
pub struct GraphFilter {
    /// Only nodes of these kinds (all kinds when empty).
    pub kinds: Vec<NodeKind>,
    /// Only nodes whose file starts with this prefix.
    pub path_prefix: Option<String>,
}

/// Change-detection fingerprint of a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub path: String,
    pub hash: String,
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
    /// When this fingerprint was observed, milliseconds since the Unix epoch.
    pub last_seen: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_of_inverted_range_is_zero() {
        let mut decl = Declaration::new(DeclKind::Function, "f", 5, 9);
        assert_eq!(decl.span(), 4);
        decl.end_line = 2;
        assert_eq!(decl.span(), 0);
    }

    #[test]
    fn edge_kind_round_trips_through_str() {
        for kind in [
            EdgeKind::Contains,
            EdgeKind::Imports,
            EdgeKind::Calls,
            EdgeKind::Extends,
            EdgeKind::DependsOn,
        ] {
            assert_eq!(kind.as_str().parse::<EdgeKind>().unwrap(), kind);
        }
    }

    #[test]
    fn node_kind_parse_is_case_insensitive() {
        assert_eq!("class".parse::<NodeKind>().unwrap(), NodeKind::Class);
        assert_eq!("FILE".parse::<NodeKind>().unwrap(), NodeKind::File);
        assert!("module".parse::<NodeKind>().is_err());
    }

    #[test]
    fn declaration_end_never_precedes_start() {
        let d = Declaration::new(DeclKind::Function, "f", 10, 3);
        assert_eq!(d.end_line, 10);
        assert_eq!(d.span(), 0);
    }

    #[test]
    fn encloses_is_inclusive() {
        let class = Declaration::new(DeclKind::Class, "A", 1, 10);
        let method = Declaration::new(DeclKind::Function, "m", 2, 10);
        assert!(class.encloses(&method));
        assert!(!method.encloses(&class));
    }

    #[test]
    fn edge_kind_serializes_upper_snake() {
        let json = serde_json::to_string(&EdgeKind::DependsOn).unwrap();
        assert_eq!(json, "\"DEPENDS_ON\"");
    }
}

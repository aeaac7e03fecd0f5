//! Graph reconciliation: apply structural records and deletions to a
//! [`GraphStore`].
//!
//! Per-file work ([`reconcile_file`], [`remove_file`]) only touches the
//! nodes of that file and the edges it owns. Cross-file links (IMPORTS,
//! DEPENDS_ON, EXTENDS) are recomputed for the whole repository by
//! [`resolve_links`] once every file unit has been applied.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use crate::db;
use crate::errors::StoreError;
use crate::store::GraphStore;
use crate::types::{Declaration, EdgeKind, GraphEdge, GraphNode, NodeKind, StructuralRecord};

/// Edge kinds produced by [`resolve_links`].
const LINK_KINDS: [EdgeKind; 3] = [EdgeKind::Imports, EdgeKind::DependsOn, EdgeKind::Extends];

/// Nodes and CONTAINS edges derived from one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

// ---------------------------------------------------------------------------
// Per-file derivation
// ---------------------------------------------------------------------------

/// Orders declarations from outermost to innermost: wider span first, then
/// class before function before import, then source order.
fn outer_key(decl: &Declaration, index: usize) -> (usize, u8, Reverse<usize>) {
    (decl.span(), decl.kind.nesting_priority(), Reverse(index))
}

/// Index of each declaration's innermost enclosing container, if any.
fn parents(decls: &[Declaration]) -> Vec<Option<usize>> {
    decls
        .iter()
        .enumerate()
        .map(|(i, decl)| {
            let own = outer_key(decl, i);
            decls
                .iter()
                .enumerate()
                .filter(|(j, cand)| {
                    *j != i
                        && cand.kind.is_container()
                        && cand.encloses(decl)
                        && outer_key(cand, *j) > own
                })
                .min_by_key(|(j, cand)| outer_key(cand, *j))
                .map(|(j, _)| j)
        })
        .collect()
}

/// Dotted names of each declaration, with `#n` suffixes for repeats of the
/// same kind and name within the file.
fn qualified_names(decls: &[Declaration], parents: &[Option<usize>]) -> Vec<String> {
    let mut order: Vec<usize> = (0..decls.len()).collect();
    order.sort_by_key(|&i| Reverse(outer_key(&decls[i], i)));

    let mut chains = vec![String::new(); decls.len()];
    for &i in &order {
        chains[i] = match parents[i] {
            Some(p) => format!("{}.{}", chains[p], decls[i].name),
            None => decls[i].name.clone(),
        };
    }

    // Suffix in source order.
    let mut by_position: Vec<usize> = (0..decls.len()).collect();
    by_position.sort_by_key(|&i| (decls[i].start_line, i));
    let mut seen: HashMap<(NodeKind, String), usize> = HashMap::new();
    let mut names = chains.clone();
    for i in by_position {
        let count = seen
            .entry((decls[i].kind.into(), chains[i].clone()))
            .or_insert(0);
        *count += 1;
        if *count > 1 {
            names[i] = format!("{}#{}", chains[i], count);
        }
    }
    names
}

fn file_node_id(repo: &str, path: &str) -> String {
    db::node_id(repo, path, NodeKind::File.as_str(), "")
}

/// Derive the File node, one node per declaration, and CONTAINS edges from
/// each declaration's parent (or the File node).
pub fn build_file_graph(repo: &str, record: &StructuralRecord) -> FileGraph {
    let path = record.path.as_str();
    let decls = &record.declarations;
    let parent_of = parents(decls);
    let qualified = qualified_names(decls, &parent_of);

    let file_id = file_node_id(repo, path);
    let name = path.rsplit('/').next().unwrap_or(path);
    let last_line = decls.iter().map(|d| d.end_line).max().unwrap_or(1);

    let mut nodes = Vec::with_capacity(decls.len() + 1);
    nodes.push(GraphNode {
        id: file_id.clone(),
        kind: NodeKind::File,
        name: name.to_string(),
        qualified_name: String::new(),
        file: path.to_string(),
        start_line: 1,
        end_line: last_line.max(1),
        repo: repo.to_string(),
        bases: Vec::new(),
    });

    let ids: Vec<String> = decls
        .iter()
        .zip(&qualified)
        .map(|(d, q)| db::node_id(repo, path, NodeKind::from(d.kind).as_str(), q))
        .collect();

    let mut edges = Vec::with_capacity(decls.len());
    for (i, decl) in decls.iter().enumerate() {
        nodes.push(GraphNode {
            id: ids[i].clone(),
            kind: decl.kind.into(),
            name: decl.name.clone(),
            qualified_name: qualified[i].clone(),
            file: path.to_string(),
            start_line: decl.start_line,
            end_line: decl.end_line,
            repo: repo.to_string(),
            bases: decl.bases.clone(),
        });
        let source = match parent_of[i] {
            Some(p) => ids[p].clone(),
            None => file_id.clone(),
        };
        edges.push(GraphEdge {
            source,
            target: ids[i].clone(),
            kind: EdgeKind::Contains,
            owner: path.to_string(),
        });
    }

    FileGraph { nodes, edges }
}

/// Replace everything stored for `record.path` with what the record derives.
/// Returns the number of nodes written.
pub fn reconcile_file<S: GraphStore>(
    store: &S,
    repo: &str,
    record: &StructuralRecord,
) -> Result<usize, StoreError> {
    store.delete_nodes_by_file(repo, &record.path)?;
    let graph = build_file_graph(repo, record);
    for node in &graph.nodes {
        store.upsert_node(node)?;
    }
    for edge in &graph.edges {
        store.upsert_edge(repo, edge)?;
    }
    Ok(graph.nodes.len())
}

/// Remove a deleted file's nodes and owned edges.
pub fn remove_file<S: GraphStore>(store: &S, repo: &str, path: &str) -> Result<usize, StoreError> {
    store.delete_nodes_by_file(repo, path)
}

// ---------------------------------------------------------------------------
// Cross-file links
// ---------------------------------------------------------------------------

/// Counts from one link-resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub imports: usize,
    pub depends_on: usize,
    pub extends: usize,
    pub unresolved: usize,
    pub pruned: usize,
}

/// Recompute IMPORTS, DEPENDS_ON and EXTENDS edges for the whole repository,
/// then prune edges left pointing at removed nodes.
pub fn resolve_links<S: GraphStore>(store: &S, repo: &str) -> Result<LinkStats, StoreError> {
    store.delete_edges_of_kinds(repo, &LINK_KINDS)?;

    let files = store.nodes_of_kind(repo, NodeKind::File)?;
    let classes = store.nodes_of_kind(repo, NodeKind::Class)?;
    let imports = store.nodes_of_kind(repo, NodeKind::Import)?;
    let index = ModuleIndex::new(&files, &classes);

    let mut stats = LinkStats::default();

    for import in &imports {
        let importer_id = file_node_id(repo, &import.file);
        let Some(target) = index.resolve_import(&import.name, &import.file) else {
            stats.unresolved += 1;
            continue;
        };
        if target.id == importer_id {
            continue;
        }
        store.upsert_edge(
            repo,
            &GraphEdge {
                source: importer_id.clone(),
                target: target.id.clone(),
                kind: EdgeKind::Imports,
                owner: import.file.clone(),
            },
        )?;
        stats.imports += 1;

        if target.kind == NodeKind::Class && target.file != import.file {
            store.upsert_edge(
                repo,
                &GraphEdge {
                    source: importer_id,
                    target: file_node_id(repo, &target.file),
                    kind: EdgeKind::DependsOn,
                    owner: import.file.clone(),
                },
            )?;
            stats.depends_on += 1;
        }
    }

    for class in &classes {
        for base in &class.bases {
            let Some(parent) = index.class_for(base, &class.file) else {
                stats.unresolved += 1;
                continue;
            };
            if parent.id == class.id {
                continue;
            }
            store.upsert_edge(
                repo,
                &GraphEdge {
                    source: class.id.clone(),
                    target: parent.id.clone(),
                    kind: EdgeKind::Extends,
                    owner: class.file.clone(),
                },
            )?;
            stats.extends += 1;
        }
    }

    stats.pruned = store.prune_dangling_edges(repo)?;
    Ok(stats)
}

/// Lookup tables for resolving raw import text to nodes.
struct ModuleIndex<'a> {
    /// Module key (path without extension, package dirs for `__init__` /
    /// `index`) to File node. First path in sort order wins.
    modules: BTreeMap<String, &'a GraphNode>,
    /// Class name to Class nodes, sorted by file path.
    classes: HashMap<&'a str, Vec<&'a GraphNode>>,
}

impl<'a> ModuleIndex<'a> {
    fn new(files: &'a [GraphNode], classes: &'a [GraphNode]) -> Self {
        let mut modules = BTreeMap::new();
        let mut sorted_files: Vec<&GraphNode> = files.iter().collect();
        sorted_files.sort_by(|a, b| a.file.cmp(&b.file));
        for file in sorted_files {
            modules.entry(module_key(&file.file)).or_insert(file);
        }

        let mut by_name: HashMap<&str, Vec<&GraphNode>> = HashMap::new();
        for class in classes {
            by_name.entry(class.name.as_str()).or_default().push(class);
        }
        for nodes in by_name.values_mut() {
            nodes.sort_by(|a, b| (&a.file, a.start_line).cmp(&(&b.file, b.start_line)));
        }

        Self {
            modules,
            classes: by_name,
        }
    }

    fn resolve_import(&self, raw: &str, importer: &str) -> Option<&'a GraphNode> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let candidates = candidate_keys(raw, importer);
        for (key, allow_suffix) in &candidates {
            if let Some(file) = self.modules.get(key) {
                return Some(*file);
            }
            if *allow_suffix && let Some(file) = self.unique_suffix(key) {
                return Some(file);
            }
        }
        let last = raw
            .rsplit(['.', '/'])
            .find(|s| !s.is_empty())?;
        self.classes.get(last).and_then(|c| c.first().copied())
    }

    /// The only module whose key ends with `/<key>`.
    fn unique_suffix(&self, key: &str) -> Option<&'a GraphNode> {
        if key.is_empty() {
            return None;
        }
        let suffix = format!("/{key}");
        let mut found = self.modules.iter().filter(|(k, _)| k.ends_with(&suffix));
        let (_, first) = found.next()?;
        if found.next().is_some() {
            return None;
        }
        Some(*first)
    }

    /// Class named by the last segment of `base`, preferring one in `file`.
    fn class_for(&self, base: &str, file: &str) -> Option<&'a GraphNode> {
        let name = base.rsplit('.').next().unwrap_or(base);
        let candidates = self.classes.get(name)?;
        candidates
            .iter()
            .find(|c| c.file == file)
            .or_else(|| candidates.first())
            .copied()
    }
}

const SOURCE_EXTENSIONS: &[&str] = &["py", "pyi", "js", "jsx", "mjs", "cjs", "ts", "tsx", "mts", "cts"];

/// `pkg/mod.py` -> `pkg/mod`, `pkg/__init__.py` -> `pkg`, `web/index.ts` -> `web`.
fn module_key(path: &str) -> String {
    let stem = strip_source_ext(path);
    match stem.rsplit_once('/') {
        Some((dir, "__init__" | "index")) => dir.to_string(),
        None if stem == "__init__" || stem == "index" => String::new(),
        _ => stem.to_string(),
    }
}

fn strip_source_ext(path: &str) -> &str {
    match path.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !stem.ends_with('/')
                && SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) =>
        {
            stem
        }
        _ => path,
    }
}

fn parent_dir(path: &str) -> Vec<&str> {
    let mut segs: Vec<&str> = path.split('/').collect();
    segs.pop();
    segs
}

fn is_python(path: &str) -> bool {
    matches!(path.rsplit_once('.'), Some((_, "py" | "pyi")))
}

/// Module keys to try for `raw`, most specific first. The flag marks keys
/// that may also match by unique path suffix.
fn candidate_keys(raw: &str, importer: &str) -> Vec<(String, bool)> {
    let mut keys = Vec::new();

    if raw.starts_with("./") || raw.starts_with("../") {
        // JS/TS relative path.
        let mut segs = parent_dir(importer);
        for part in strip_source_ext(raw).split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if segs.pop().is_none() {
                        return Vec::new();
                    }
                }
                other => segs.push(other),
            }
        }
        keys.push((segs.join("/"), false));
        return keys;
    }

    if is_python(importer) && raw.starts_with('.') {
        // Python relative import: one dot is the importer's package.
        let dots = raw.chars().take_while(|c| *c == '.').count();
        let mut base = parent_dir(importer);
        for _ in 1..dots {
            if base.pop().is_none() {
                return Vec::new();
            }
        }
        let rest: Vec<&str> = raw[dots..].split('.').filter(|s| !s.is_empty()).collect();
        for k in (0..=rest.len()).rev() {
            let mut segs = base.clone();
            segs.extend_from_slice(&rest[..k]);
            keys.push((segs.join("/"), false));
        }
        return keys;
    }

    let segs: Vec<&str> = if is_python(importer) {
        raw.split('.').filter(|s| !s.is_empty()).collect()
    } else {
        strip_source_ext(raw).split('/').filter(|s| !s.is_empty()).collect()
    };
    for k in (1..=segs.len()).rev() {
        keys.push((segs[..k].join("/"), true));
    }
    keys
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

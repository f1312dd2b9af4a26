//! Document hierarchy of the manual, as declared by its `toctree` directives.
//!
//! The walk starts at `index.rst` and follows toctree entries depth first. An index
//! without a toctree adopts the `index.rst` of its subdirectories, which is how
//! several generated script sections hang off the manual. Only toctree blocks are
//! scanned, so a file the parser would reject still contributes its children.

use crate::convert::discover_sources;
use crate::paths::slash_path;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("root document {0} does not exist")]
    MissingRootIndex(PathBuf),
    #[error("failed to discover documents: {0}")]
    Discover(#[from] crate::convert::ConvertError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    /// Depth below the root index, which is level 0.
    pub level: usize,
    pub docname: String,
    /// Docname of the document that pulled this one in.
    pub parent: Option<String>,
    /// Whether this is a directory's `index` document.
    pub is_index: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocTree {
    /// Documents in walk order.
    pub entries: Vec<TreeEntry>,
    /// Documents under the root that no toctree reaches.
    pub orphans: Vec<String>,
}

fn explicit_title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^.*<([^<>]+)>$").expect("valid regex"))
}

/// Entries of every toctree in `content`, in order, with duplicates removed.
pub fn toctree_entries(content: &str) -> Vec<String> {
    let mut entries: Vec<String> = Vec::new();
    let mut in_tree = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with(".. toctree::") {
            in_tree = true;
            continue;
        }
        if !in_tree {
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with(':') {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            in_tree = false;
            continue;
        }
        let entry = match explicit_title_re().captures(trimmed) {
            Some(caps) => caps[1].trim().to_string(),
            None => trimmed.to_string(),
        };
        if (entry.starts_with("..") && !entry.starts_with("../")) || entry.starts_with('#') {
            continue;
        }
        if !entries.contains(&entry) {
            entries.push(entry);
        }
    }
    entries
}

fn docname_of(root: &Path, path: &Path) -> String {
    slash_path(&path.strip_prefix(root).unwrap_or(path).with_extension(""))
}

fn is_index(docname: &str) -> bool {
    docname == "index" || docname.ends_with("/index")
}

struct Walker<'a> {
    root: &'a Path,
    /// Every discovered docname, sorted.
    known: BTreeSet<String>,
    visited: BTreeSet<String>,
    entries: Vec<TreeEntry>,
}

impl Walker<'_> {
    /// Maps a toctree entry onto known docnames: `x`, then `x/index`.
    /// A trailing `*` matches documents of one directory, not its subdirectories.
    fn resolve(&self, from: &str, entry: &str) -> Vec<String> {
        let target = crate::rst::resolve_docname(from, entry);
        if let Some(prefix) = target.strip_suffix('*') {
            return self
                .known
                .iter()
                .filter(|name| {
                    name.as_str() != from
                        && name
                            .strip_prefix(prefix)
                            .is_some_and(|rest| !rest.contains('/'))
                })
                .cloned()
                .collect();
        }
        let index = format!("{target}/index");
        [target, index]
            .into_iter()
            .find(|name| self.known.contains(name))
            .into_iter()
            .collect()
    }

    fn subdirectory_indexes(&self, docname: &str) -> Vec<String> {
        let dir = docname.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        let prefix = if dir.is_empty() { String::new() } else { format!("{dir}/") };
        self.known
            .iter()
            .filter(|name| {
                name.strip_prefix(prefix.as_str())
                    .and_then(|rest| rest.strip_suffix("/index"))
                    .is_some_and(|sub| !sub.is_empty() && !sub.contains('/'))
            })
            .cloned()
            .collect()
    }

    fn visit(&mut self, docname: String, level: usize, parent: Option<String>) -> Result<(), TreeError> {
        if !self.visited.insert(docname.clone()) {
            return Ok(());
        }
        self.entries.push(TreeEntry {
            level,
            docname: docname.clone(),
            parent,
            is_index: is_index(&docname),
        });

        let path = self.root.join(format!("{docname}.rst"));
        let content = match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(source) => return Err(TreeError::Io { path, source }),
        };

        let entries = toctree_entries(&content);
        let children = if entries.is_empty() {
            if is_index(&docname) {
                self.subdirectory_indexes(&docname)
            } else {
                Vec::new()
            }
        } else {
            let mut children = Vec::new();
            for entry in &entries {
                let resolved = self.resolve(&docname, entry);
                if resolved.is_empty() {
                    warn!(docname = %docname, entry = %entry, "Toctree entry does not resolve to a document");
                }
                children.extend(resolved);
            }
            children
        };
        debug!(docname = %docname, children = children.len(), "Visited document");

        for child in children {
            self.visit(child, level + 1, Some(docname.clone()))?;
        }
        Ok(())
    }
}

/// Walks the toctree hierarchy from `doc_root/index.rst`.
pub fn build_doc_tree(doc_root: &Path, exclude: &[String]) -> Result<DocTree, TreeError> {
    let root_index = doc_root.join("index.rst");
    if !root_index.is_file() {
        return Err(TreeError::MissingRootIndex(root_index));
    }
    let known = discover_sources(doc_root, exclude)?
        .iter()
        .map(|path| docname_of(doc_root, path))
        .collect();

    let mut walker = Walker {
        root: doc_root,
        known,
        visited: BTreeSet::new(),
        entries: Vec::new(),
    };
    walker.visit("index".to_string(), 0, None)?;

    let orphans: Vec<String> = walker.known.difference(&walker.visited).cloned().collect();
    info!(
        documents = walker.entries.len(),
        orphans = orphans.len(),
        "Built document tree"
    );
    Ok(DocTree {
        entries: walker.entries,
        orphans,
    })
}

impl DocTree {
    /// Indented outline, one document per line.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let marker = if entry.is_index { "+" } else { "-" };
            out.push_str(&format!(
                "{}{marker} {}\n",
                "  ".repeat(entry.level),
                entry.docname
            ));
        }
        out
    }
}

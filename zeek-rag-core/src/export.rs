//! Structured JSON export of parsed documents.
//!
//! Each document becomes its nested sections, each holding text, code and note blocks,
//! plus a list of the domain objects it defines with the section path they appear under.
//! Ids are short content hashes so a consumer can diff two exports.
//! Only content inside a section is exported; text before a document's first title has
//! no section to belong to.

use crate::download::{DownloadConfig, SourceAction};
use crate::rst::table::node_text;
use crate::rst::{plain_text, signature_text, Document, Node, Section, Table};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    pub output: PathBuf,
    /// Version label stored in every document; derived from the source when unset.
    pub version: Option<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("./zeek_rag.json"),
            version: None,
        }
    }
}

impl ExportConfig {
    /// `version`, or `Zeek <reference>` for a pinned git source.
    pub fn version_label(&self, download: &DownloadConfig) -> String {
        if let Some(version) = &self.version {
            return version.clone();
        }
        match &download.source {
            SourceAction::Git(git) => format!("Zeek {}", git.reference.as_deref().unwrap_or("HEAD")),
            SourceAction::Local(_) => "Zeek".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialise export: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonDocument {
    pub doc_id: String,
    pub version: String,
    pub title: Option<String>,
    pub sections: Vec<JsonSection>,
    pub symbols: Vec<Symbol>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonSection {
    pub section_id: String,
    pub title: String,
    pub blocks: Vec<Block>,
    pub subsections: Vec<JsonSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    Text { block_id: String, text: String },
    Code {
        block_id: String,
        language: Option<String>,
        code: String,
    },
    Note { block_id: String, text: String },
    Warning { block_id: String, text: String },
    Tip { block_id: String, text: String },
}

/// A documented domain object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Symbol {
    pub symbol_id: String,
    pub symbol_type: String,
    pub text: String,
    pub doc: String,
    /// `/`-joined titles of the enclosing sections.
    pub section: String,
}

/// First 12 hex digits of the SHA-256 of `text`.
pub fn short_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

pub fn export_document(doc: &Document, version: &str) -> JsonDocument {
    let mut exporter = Exporter {
        docname: &doc.docname,
        path: Vec::new(),
        symbols: Vec::new(),
    };
    let sections = doc
        .body
        .iter()
        .filter_map(|node| match node {
            Node::Section(section) => Some(exporter.section(section)),
            _ => None,
        })
        .collect();
    JsonDocument {
        doc_id: doc.docname.clone(),
        version: version.to_string(),
        title: doc.title.clone(),
        sections,
        symbols: exporter.symbols,
    }
}

pub fn export_documents(docs: &[Document], version: &str) -> Vec<JsonDocument> {
    docs.iter().map(|doc| export_document(doc, version)).collect()
}

/// Writes the export as one pretty-printed JSON array.
pub fn write_export(path: &Path, docs: &[JsonDocument]) -> Result<(), ExportError> {
    let json = serde_json::to_string_pretty(docs)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ExportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, json).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), documents = docs.len(), "Wrote JSON export");
    Ok(())
}

struct Exporter<'d> {
    docname: &'d str,
    path: Vec<String>,
    symbols: Vec<Symbol>,
}

fn push_text(blocks: &mut Vec<Block>, text: String) {
    let text = text.trim().to_string();
    if !text.is_empty() {
        blocks.push(Block::Text {
            block_id: short_hash(&text),
            text,
        });
    }
}

fn table_rows(table: &Table) -> Vec<String> {
    let names: Vec<String> = table
        .header
        .iter()
        .flatten()
        .map(|cell| plain_text(cell))
        .collect();
    table
        .rows
        .iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(|cell| plain_text(cell)).collect();
            if names.is_empty() {
                return cells.join(" | ");
            }
            names
                .iter()
                .zip(&cells)
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, value)| format!("{name}: {value}"))
                .collect::<Vec<_>>()
                .join("; ")
        })
        .collect()
}

impl Exporter<'_> {
    fn section(&mut self, section: &Section) -> JsonSection {
        let title = plain_text(&section.title);
        let mut out = JsonSection {
            section_id: short_hash(&format!("{}:{}:{}", self.docname, self.path.join("/"), title)),
            title: title.clone(),
            blocks: Vec::new(),
            subsections: Vec::new(),
        };
        self.path.push(title);
        self.content(&section.children, &mut out);
        self.path.pop();
        out
    }

    fn content(&mut self, nodes: &[Node], out: &mut JsonSection) {
        for node in nodes {
            match node {
                Node::Section(child) => {
                    let child = self.section(child);
                    out.subsections.push(child);
                }
                Node::Paragraph(spans) => push_text(&mut out.blocks, plain_text(spans)),
                Node::LiteralBlock { language, text } => out.blocks.push(Block::Code {
                    block_id: short_hash(text),
                    language: (!language.is_empty()).then(|| language.clone()),
                    code: text.clone(),
                }),
                Node::Admonition { label, children } => {
                    let text = node_text(children);
                    let block_id = short_hash(&text);
                    match label.to_ascii_lowercase().as_str() {
                        "note" => out.blocks.push(Block::Note { block_id, text }),
                        "warning" => out.blocks.push(Block::Warning { block_id, text }),
                        "tip" => out.blocks.push(Block::Tip { block_id, text }),
                        _ => self.content(children, out),
                    }
                }
                Node::Object(object) => {
                    for signature in &object.signatures {
                        let text = signature_text(signature);
                        self.symbols.push(Symbol {
                            symbol_id: short_hash(&text),
                            symbol_type: object.objtype.clone(),
                            text,
                            doc: self.docname.to_string(),
                            section: self.path.join("/"),
                        });
                    }
                    self.content(&object.children, out);
                }
                Node::BlockQuote(children) | Node::Container(children) => self.content(children, out),
                Node::BulletList(items) | Node::EnumeratedList { items, .. } => {
                    for item in items {
                        self.content(item, out);
                    }
                }
                Node::DefinitionList(items) => {
                    for item in items {
                        push_text(
                            &mut out.blocks,
                            format!("{}: {}", plain_text(&item.term), node_text(&item.definition)),
                        );
                    }
                }
                Node::FieldList(fields) => {
                    for field in fields {
                        push_text(&mut out.blocks, format!("{}: {}", field.name, node_text(&field.body)));
                    }
                }
                Node::Table(table) => {
                    for row in table_rows(table) {
                        push_text(&mut out.blocks, row);
                    }
                }
                Node::Unknown { text, .. } => push_text(&mut out.blocks, text.clone()),
                Node::Toctree(_) | Node::Target(_) | Node::Transition => {}
            }
        }
    }
}

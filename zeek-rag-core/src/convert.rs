//! Batch conversion of an RST documentation tree into a mirrored Markdown tree.
//!
//! Conversion runs in two passes. Every source is parsed first, so that the
//! cross-reference index knows every document, label and object before anything is
//! rendered. Rendering then writes one Markdown file per parsed source.
//!
//! A file that cannot be read, parsed or written is recorded in the report and skipped;
//! only problems with the tree as a whole (missing root, overlapping output) abort.

use crate::extensions::ExtensionSet;
use crate::markdown::{render_document, MarkdownOptions, XrefIndex};
use crate::paths::{overlaps, slash_path};
use crate::rst::{parse_document, Document, ParseContext, ParseError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConvertConfig {
    pub output_dir: PathBuf,
    /// Directory names skipped while discovering sources.
    pub exclude: Vec<String>,
    pub markdown: MarkdownOptions,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./zeek_docs_md"),
            exclude: vec!["_build".to_string(), "ext".to_string(), ".git".to_string()],
            markdown: MarkdownOptions::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("documentation root {0} does not exist")]
    MissingRoot(PathBuf),
    #[error("output directory {output} overlaps documentation root {root}")]
    OverlappingOutput { output: PathBuf, root: PathBuf },
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single file was skipped.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("failed to read source: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to parse: {0}")]
    Parse(#[from] ParseError),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedDocument {
    pub docname: String,
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedDocument {
    pub source_path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionReport {
    pub output_dir: PathBuf,
    pub converted: Vec<ConvertedDocument>,
    pub failed: Vec<FailedDocument>,
    /// Non-fatal parser warnings across all files.
    pub warnings: usize,
}

impl ConversionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sorted list of `.rst` files under `root`, skipping excluded directory names.
pub fn discover_sources(root: &Path, exclude: &[String]) -> Result<Vec<PathBuf>, ConvertError> {
    let mut sources = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && exclude.iter().any(|name| entry.file_name() == name.as_str()))
        });
    for entry in walker {
        let entry = entry.map_err(|source| ConvertError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("rst")
        {
            sources.push(entry.into_path());
        }
    }
    Ok(sources)
}

fn docname_of(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    slash_path(&relative.with_extension(""))
}

fn parse_file(root: &Path, path: &Path, extensions: &ExtensionSet) -> Result<Document, FileError> {
    let source = fs::read_to_string(path).map_err(FileError::Read)?;
    let ctx = ParseContext {
        extensions,
        doc_root: Some(root),
        source_dir: path.parent(),
    };
    Ok(parse_document(&docname_of(root, path), path, &source, ctx)?)
}

/// Every source under a documentation root, parsed, plus the files that failed.
#[derive(Debug, Clone, Default)]
pub struct ParsedTree {
    pub documents: Vec<Document>,
    pub failed: Vec<FailedDocument>,
    /// Non-fatal parser warnings across all files.
    pub warnings: usize,
}

/// Parses every RST file under `doc_root`; a file that fails is recorded and skipped.
pub fn parse_tree(
    doc_root: &Path,
    exclude: &[String],
    extensions: &ExtensionSet,
) -> Result<ParsedTree, ConvertError> {
    if !doc_root.is_dir() {
        error!(root = %doc_root.display(), "Documentation root does not exist");
        return Err(ConvertError::MissingRoot(doc_root.to_path_buf()));
    }

    let sources = discover_sources(doc_root, exclude)?;
    info!(files = sources.len(), "Discovered RST sources");

    let mut tree = ParsedTree {
        documents: Vec::with_capacity(sources.len()),
        ..Default::default()
    };
    for path in &sources {
        match parse_file(doc_root, path, extensions) {
            Ok(doc) => {
                for warning in &doc.warnings {
                    warn!(path = %path.display(), warning = %warning, "Parser warning");
                }
                tree.warnings += doc.warnings.len();
                tree.documents.push(doc);
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to convert file");
                tree.failed.push(FailedDocument {
                    source_path: path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(tree)
}

/// Converts every RST file under `doc_root` into `config.output_dir`.
pub fn convert_tree(
    doc_root: &Path,
    config: &ConvertConfig,
    extensions: &ExtensionSet,
) -> Result<ConversionReport, ConvertError> {
    info!(root = %doc_root.display(), output = %config.output_dir.display(), extensions = extensions.name(), "Converting documentation");

    if overlaps(&config.output_dir, doc_root) {
        error!(root = %doc_root.display(), output = %config.output_dir.display(), "Output directory overlaps the documentation root");
        return Err(ConvertError::OverlappingOutput {
            output: config.output_dir.clone(),
            root: doc_root.to_path_buf(),
        });
    }

    let ParsedTree {
        documents,
        failed,
        warnings,
    } = parse_tree(doc_root, &config.exclude, extensions)?;
    let mut report = ConversionReport {
        output_dir: config.output_dir.clone(),
        failed,
        warnings,
        ..Default::default()
    };

    let index = XrefIndex::from_documents(&documents);

    if config.output_dir.exists() {
        fs::remove_dir_all(&config.output_dir).map_err(|source| ConvertError::Io {
            path: config.output_dir.clone(),
            source,
        })?;
    }
    fs::create_dir_all(&config.output_dir).map_err(|source| ConvertError::Io {
        path: config.output_dir.clone(),
        source,
    })?;

    for doc in &documents {
        let output_path = config.output_dir.join(format!("{}.md", doc.docname));
        let markdown = render_document(doc, &index, extensions, &config.markdown);
        match write_output(&output_path, &markdown) {
            Ok(()) => {
                debug!(docname = %doc.docname, output = %output_path.display(), "Converted");
                report.converted.push(ConvertedDocument {
                    docname: doc.docname.clone(),
                    source_path: doc.source_path.clone(),
                    output_path,
                    title: doc.title.clone(),
                });
            }
            Err(e) => {
                error!(path = %doc.source_path.display(), error = %e, "Failed to write Markdown");
                report.failed.push(FailedDocument {
                    source_path: doc.source_path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    report.failed.sort_by(|a, b| a.source_path.cmp(&b.source_path));

    info!(
        converted = report.converted.len(),
        failed = report.failed.len(),
        warnings = report.warnings,
        "Conversion complete"
    );
    Ok(report)
}

fn write_output(path: &Path, markdown: &str) -> Result<(), FileError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| FileError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, markdown).map_err(|source| FileError::Write {
        path: path.to_path_buf(),
        source,
    })
}

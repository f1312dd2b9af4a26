//! Flattening of the nested Markdown tree into one directory.
//!
//! The knowledge base's bulk upload only accepts files from a single directory, so every
//! nested path is encoded into its file name. Naming is a pure function of the relative
//! path ([`flat_name`]); all names are planned and checked for collisions before anything
//! is copied.

use crate::paths::{overlaps, slash_path};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};
use walkdir::WalkDir;

/// Joins the segments of a nested path.
pub const SEPARATOR: &str = "__";
/// Longest file name, in bytes, accepted by the knowledge base's storage.
pub const MAX_FILENAME_LEN: usize = 240;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlattenConfig {
    pub output_dir: PathBuf,
    /// Only files with this extension are flattened.
    pub extension: String,
    /// Where to write the flat-name → nested-path manifest, if anywhere.
    pub manifest: Option<PathBuf>,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./zeek_docs_flattened"),
            extension: "md".to_string(),
            manifest: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FlattenError {
    #[error("source directory {0} does not exist")]
    MissingSource(PathBuf),
    #[error("output directory {output} overlaps source directory {source_dir}")]
    OverlappingOutput { output: PathBuf, source_dir: PathBuf },
    #[error("{first} and {second} both flatten to {flat_name}")]
    Collision {
        flat_name: String,
        first: PathBuf,
        second: PathBuf,
    },
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
    #[error("failed to serialise manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// One planned or copied file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedDocument {
    /// Path relative to the source root.
    pub source: PathBuf,
    pub flat_name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlattenReport {
    pub output_dir: PathBuf,
    pub documents: Vec<FlattenedDocument>,
    pub manifest: Option<PathBuf>,
}

fn hash8(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// Flat file name of a path relative to the tree root.
///
/// `scripts/base/init.md` becomes `scripts__base__init.md`. Names longer than
/// [`MAX_FILENAME_LEN`] bytes keep only the file stem plus a hash of the full path.
pub fn flat_name(relative: &Path) -> String {
    let joined = slash_path(relative);
    let full = joined.replace('/', SEPARATOR);
    if full.len() <= MAX_FILENAME_LEN {
        return full;
    }

    let hash = hash8(&joined);
    let ext = relative
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let short = format!("{stem}_{hash}{ext}");
    if short.len() <= MAX_FILENAME_LEN {
        short
    } else {
        format!("doc_{hash}{ext}")
    }
}

/// Best-effort inverse of [`flat_name`]; hashed names need the manifest instead.
pub fn trace_name(flat: &str) -> PathBuf {
    flat.split(SEPARATOR).collect()
}

/// Plans the flat name of every matching file under `source_dir`, in sorted order.
pub fn plan(source_dir: &Path, extension: &str) -> Result<Vec<FlattenedDocument>, FlattenError> {
    if !source_dir.is_dir() {
        return Err(FlattenError::MissingSource(source_dir.to_path_buf()));
    }

    let mut planned = Vec::new();
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(|source| FlattenError::Walk {
            path: source_dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let relative = path.strip_prefix(source_dir).unwrap_or(path).to_path_buf();
        let name = flat_name(&relative);

        if let Some(first) = seen.insert(name.to_lowercase(), relative.clone()) {
            error!(flat_name = %name, first = %first.display(), second = %relative.display(), "Flat name collision");
            return Err(FlattenError::Collision {
                flat_name: name,
                first,
                second: relative,
            });
        }
        planned.push(FlattenedDocument {
            source: relative,
            flat_name: name,
        });
    }
    Ok(planned)
}

/// Copies every planned file into a freshly recreated `config.output_dir`.
pub fn flatten_tree(source_dir: &Path, config: &FlattenConfig) -> Result<FlattenReport, FlattenError> {
    info!(source = %source_dir.display(), output = %config.output_dir.display(), "Flattening Markdown tree");

    if source_dir.is_dir() && overlaps(&config.output_dir, source_dir) {
        return Err(FlattenError::OverlappingOutput {
            output: config.output_dir.clone(),
            source_dir: source_dir.to_path_buf(),
        });
    }
    let documents = plan(source_dir, &config.extension)?;

    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source| FlattenError::Io { path, source }
    };
    if config.output_dir.exists() {
        fs::remove_dir_all(&config.output_dir).map_err(io(&config.output_dir))?;
    }
    fs::create_dir_all(&config.output_dir).map_err(io(&config.output_dir))?;

    for doc in &documents {
        let from = source_dir.join(&doc.source);
        let to = config.output_dir.join(&doc.flat_name);
        fs::copy(&from, &to).map_err(io(&from))?;
        debug!(from = %doc.source.display(), to = %doc.flat_name, "Copied");
    }

    let manifest = match &config.manifest {
        Some(path) => {
            write_manifest(path, &documents)?;
            Some(path.clone())
        }
        None => None,
    };

    info!(files = documents.len(), "Flattening complete");
    Ok(FlattenReport {
        output_dir: config.output_dir.clone(),
        documents,
        manifest,
    })
}

/// Writes a JSON object mapping each flat name to its `/`-joined nested path.
pub fn write_manifest(path: &Path, documents: &[FlattenedDocument]) -> Result<(), FlattenError> {
    let map: BTreeMap<&str, String> = documents
        .iter()
        .map(|d| (d.flat_name.as_str(), slash_path(&d.source)))
        .collect();
    let json = serde_json::to_string_pretty(&map)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| FlattenError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, json + "\n").map_err(|source| FlattenError::Io {
        path: path.to_path_buf(),
        source,
    })
}

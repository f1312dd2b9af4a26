//! Upload of the flat Markdown directory into a knowledge-base dataset.
//!
//! The transport lives behind [`Uploader`]; this module owns the batch behaviour:
//! bounded concurrency, retries with linear back-off for transient failures, and a
//! deterministic report of what made it in.
//!
//! The target dataset uses hierarchical (parent/child) indexing, which the
//! knowledge base does not accept through its bulk document API. Upload is therefore
//! disabled by default and the flat directory is meant to be uploaded through the UI.

use crate::contract::{DatasetInfo, UploadRequest, UploadedDocument, Uploader};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no dataset id configured")]
    MissingDatasetId,
    #[error("upload directory {0} does not exist")]
    MissingDirectory(PathBuf),
    #[error("no .md files found in {0}")]
    EmptyDirectory(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl UploadError {
    /// Transport failures, rate limiting and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Transport(_) => true,
            UploadError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreProcessingRule {
    pub id: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segmentation {
    pub separator: String,
    pub max_tokens: u32,
    pub chunk_overlap: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentChildIndexing {
    pub enabled: bool,
    pub child_chunk_size: u32,
    pub child_chunk_overlap: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessRules {
    pub pre_processing_rules: Vec<PreProcessingRule>,
    pub segmentation: Segmentation,
    pub parent_child_indexing: ParentChildIndexing,
}

/// Segmentation rule sent with every document. Objects are rendered as `### ` headings,
/// so the separator yields one parent chunk per documented object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessRule {
    pub mode: String,
    pub rules: ProcessRules,
}

impl Default for ProcessRule {
    fn default() -> Self {
        Self {
            mode: "hierarchical".to_string(),
            rules: ProcessRules {
                pre_processing_rules: vec![
                    PreProcessingRule {
                        id: "remove_extra_spaces".to_string(),
                        enabled: true,
                    },
                    PreProcessingRule {
                        id: "remove_urls_emails".to_string(),
                        enabled: false,
                    },
                ],
                segmentation: Segmentation {
                    separator: "\n### ".to_string(),
                    max_tokens: 1500,
                    chunk_overlap: 50,
                },
                parent_child_indexing: ParentChildIndexing {
                    enabled: true,
                    child_chunk_size: 400,
                    child_chunk_overlap: 100,
                },
            },
        }
    }
}

/// Per-document indexing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DocumentSettings {
    pub indexing_technique: String,
    pub doc_form: String,
    pub doc_language: String,
    pub process_rule: ProcessRule,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            indexing_technique: "high_quality".to_string(),
            doc_form: "text_model".to_string(),
            doc_language: "English".to_string(),
            process_rule: ProcessRule::default(),
        }
    }
}

fn default_api_base() -> String {
    "http://localhost:5001/v1".to_string()
}

fn default_max_workers() -> usize {
    8
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadConfig {
    /// Off by default: hierarchical datasets reject programmatic bulk upload.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Back-off unit; attempt `n` waits `n * retry_delay_ms`.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub settings: DocumentSettings,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: default_api_base(),
            dataset_id: None,
            max_workers: default_max_workers(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
            settings: DocumentSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedUpload {
    pub filename: String,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadReport {
    pub uploaded: Vec<UploadedDocument>,
    pub failed: Vec<FailedUpload>,
}

impl UploadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sorted `*.md` files directly inside `dir`.
pub fn list_markdown_files(dir: &Path) -> Result<Vec<PathBuf>, UploadError> {
    if !dir.is_dir() {
        return Err(UploadError::MissingDirectory(dir.to_path_buf()));
    }
    let entries = fs::read_dir(dir).map_err(|source| UploadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| UploadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("md") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn upload_with_retry(
    uploader: &dyn Uploader,
    request: UploadRequest,
    config: &UploadConfig,
) -> Result<UploadedDocument, FailedUpload> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match uploader.upload_document(request.clone()).await {
            Ok(document) => {
                debug!(filename = %request.filename, attempt, "Uploaded document");
                return Ok(document);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = Duration::from_millis(config.retry_delay_ms * u64::from(attempt));
                warn!(filename = %request.filename, attempt, error = %e, ?delay, "Upload failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(filename = %request.filename, attempt, error = %e, "Upload failed");
                return Err(FailedUpload {
                    filename: request.filename,
                    attempts: attempt,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Uploads every Markdown file in `dir` to the configured dataset.
///
/// Per-file failures end up in the report; only configuration and directory problems
/// are returned as errors.
pub async fn upload_directory(
    uploader: &dyn Uploader,
    dir: &Path,
    config: &UploadConfig,
) -> Result<UploadReport, UploadError> {
    let dataset_id = config
        .dataset_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or(UploadError::MissingDatasetId)?;
    let files = list_markdown_files(dir)?;
    if files.is_empty() {
        return Err(UploadError::EmptyDirectory(dir.to_path_buf()));
    }
    info!(files = files.len(), workers = config.max_workers, dataset_id = %dataset_id, "Uploading documents");

    let mut requests = Vec::with_capacity(files.len());
    for path in &files {
        let content = fs::read(path).map_err(|source| UploadError::Io {
            path: path.clone(),
            source,
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        requests.push(UploadRequest {
            dataset_id: dataset_id.clone(),
            filename,
            content,
            settings: config.settings.clone(),
        });
    }

    let results: Vec<Result<UploadedDocument, FailedUpload>> = stream::iter(requests)
        .map(|request| upload_with_retry(uploader, request, config))
        .buffer_unordered(config.max_workers.max(1))
        .collect()
        .await;

    let mut report = UploadReport::default();
    for result in results {
        match result {
            Ok(document) => report.uploaded.push(document),
            Err(failed) => report.failed.push(failed),
        }
    }
    report.uploaded.sort_by(|a, b| a.filename.cmp(&b.filename));
    report.failed.sort_by(|a, b| a.filename.cmp(&b.filename));

    info!(
        uploaded = report.uploaded.len(),
        failed = report.failed.len(),
        "Upload complete"
    );
    Ok(report)
}

/// Finds the configured dataset and warns when its document form differs from ours.
pub async fn find_dataset(
    uploader: &dyn Uploader,
    config: &UploadConfig,
) -> Result<Option<DatasetInfo>, UploadError> {
    let dataset_id = config
        .dataset_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or(UploadError::MissingDatasetId)?;
    let datasets = uploader.list_datasets().await?;
    let found = datasets.into_iter().find(|d| d.id == dataset_id);
    match &found {
        Some(dataset) => {
            info!(id = %dataset.id, name = %dataset.name, doc_form = ?dataset.doc_form, "Found dataset");
            if let Some(form) = &dataset.doc_form {
                if *form != config.settings.doc_form {
                    warn!(
                        dataset_doc_form = %form,
                        configured_doc_form = %config.settings.doc_form,
                        "Dataset document form differs from the configured one"
                    );
                }
            }
        }
        None => warn!(dataset_id, "Dataset not visible to this API key"),
    }
    Ok(found)
}

//! # contract: the pipeline's seams to the outside world
//!
//! Two traits separate the pure conversion pipeline from the things it talks to:
//!
//! - [`Downloader`] obtains the documentation source tree (a git checkout or a
//!   manually downloaded directory).
//! - [`Uploader`] pushes finished Markdown documents into a knowledge-base dataset and
//!   inspects the datasets visible to the configured credentials.
//!
//! Both are annotated for `mockall`, so tests can drive the pipeline without git or a
//! network. Request types are owned so the generated mocks can match on them.

use crate::download::{DownloadError, SourceAction};
use crate::upload::{DocumentSettings, UploadError};
use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Describes the source tree produced by a [`Downloader`].
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedSource {
    /// Human-readable name, e.g. `https://github.com/zeek/zeek.git@v8.1.0`.
    pub logical_name: String,
    /// Root of the checkout or local directory.
    pub local_path: PathBuf,
    /// Directory holding the RST manual inside `local_path`.
    pub doc_root: PathBuf,
    /// The configured source, for audit.
    pub original_source: SourceAction,
}

/// One document to create in a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub dataset_id: String,
    pub filename: String,
    pub content: Vec<u8>,
    pub settings: DocumentSettings,
}

/// What the knowledge base returned for a created document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedDocument {
    pub filename: String,
    pub document_id: Option<String>,
    /// Indexing batch the document was queued in.
    pub batch: Option<String>,
}

/// A dataset visible to the configured API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub doc_form: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub data_source_type: Option<String>,
    #[serde(default)]
    pub document_count: Option<u64>,
}

/// Obtains the documentation source tree.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch (or locate) the configured source and return where its documentation lives.
    async fn download(&self) -> Result<DownloadedSource, DownloadError>;
}

/// Creates documents in, and inspects, knowledge-base datasets.
///
/// Implemented by the HTTP client in the binary crate and by mocks in tests.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Create one document from a file's content.
    async fn upload_document(&self, request: UploadRequest) -> Result<UploadedDocument, UploadError>;

    /// List the datasets the credentials can see.
    async fn list_datasets(&self) -> Result<Vec<DatasetInfo>, UploadError>;
}

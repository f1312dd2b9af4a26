//! Top-level pipeline: download → stage extensions → convert → flatten → upload.
//!
//! Each step consumes the previous step's output directory, so a run leaves every
//! intermediate tree on disk for inspection. Whole-tree problems abort the run with a
//! [`PipelineError`]; per-file problems are carried in the [`PipelineReport`] and make
//! [`PipelineReport::is_complete`] false.
//!
//! Upload only happens when it is enabled in the configuration *and* the caller supplies
//! an [`Uploader`]. Hierarchical datasets reject bulk document creation, so the usual
//! outcome is a flat directory waiting for a manual upload through the knowledge base UI.
//!
//! Used by both the CLI crate and integration tests.

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::contract::{DownloadedSource, Downloader, Uploader};
use crate::convert::{convert_tree, ConversionReport, ConvertError};
use crate::download::DownloadError;
use crate::extensions::{stage_extensions, ExtensionError, ExtensionSet, StagedExtensions};
use crate::flatten::{flatten_tree, FlattenError, FlattenReport};
use crate::upload::{upload_directory, UploadError, UploadReport};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),
    #[error("staging extensions failed: {0}")]
    Extensions(#[from] ExtensionError),
    #[error("conversion failed: {0}")]
    Convert(#[from] ConvertError),
    #[error("flattening failed: {0}")]
    Flatten(#[from] FlattenError),
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),
}

#[derive(Debug)]
pub struct PipelineReport {
    pub source: DownloadedSource,
    pub extensions: StagedExtensions,
    pub conversion: ConversionReport,
    pub flatten: FlattenReport,
    /// `None` when upload was skipped.
    pub upload: Option<UploadReport>,
}

impl PipelineReport {
    /// True when no file failed in any step.
    pub fn is_complete(&self) -> bool {
        self.conversion.is_complete() && self.upload.as_ref().map_or(true, UploadReport::is_complete)
    }
}

/// Runs the whole pipeline for `config`.
pub async fn run_pipeline(
    config: &PipelineConfig,
    downloader: &dyn Downloader,
    uploader: Option<&dyn Uploader>,
) -> Result<PipelineReport, PipelineError> {
    info!("Starting documentation pipeline");

    let source = downloader.download().await.map_err(|e| {
        error!(error = %e, "Download failed");
        e
    })?;
    info!(source = %source.logical_name, doc_root = %source.doc_root.display(), "Download succeeded");

    let extensions = stage_extensions(&source.local_path, &config.extensions.stage_dir)?;

    let extension_set = ExtensionSet::zeek();
    let conversion = convert_tree(&source.doc_root, &config.convert, &extension_set)?;
    if !conversion.is_complete() {
        for failed in &conversion.failed {
            warn!(path = %failed.source_path.display(), reason = %failed.reason, "Document not converted");
        }
    }

    let flatten = flatten_tree(&config.convert.output_dir, &config.flatten)?;

    let upload = match (config.upload.enabled, uploader) {
        (true, Some(uploader)) => Some(upload_directory(uploader, &flatten.output_dir, &config.upload).await?),
        (true, None) => {
            warn!("Upload enabled but no uploader available, skipping");
            None
        }
        (false, _) => {
            info!(
                flat_dir = %flatten.output_dir.display(),
                "Upload disabled; upload the flat directory manually via the knowledge base UI"
            );
            None
        }
    };

    let report = PipelineReport {
        source,
        extensions,
        conversion,
        flatten,
        upload,
    };
    info!(
        converted = report.conversion.converted.len(),
        failed = report.conversion.failed.len(),
        flattened = report.flatten.documents.len(),
        complete = report.is_complete(),
        "Pipeline finished"
    );
    Ok(report)
}

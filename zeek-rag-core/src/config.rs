use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::convert::ConvertConfig;
use crate::download::{DownloadConfig, SourceAction};
use crate::export::ExportConfig;
use crate::extensions::ExtensionsConfig;
use crate::flatten::FlattenConfig;
use crate::upload::UploadConfig;

/// Everything one pipeline run needs. Every section is optional in YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub download: DownloadConfig,
    pub extensions: ExtensionsConfig,
    pub convert: ConvertConfig,
    pub flatten: FlattenConfig,
    pub upload: UploadConfig,
    pub export: ExportConfig,
}

impl PipelineConfig {
    pub fn trace_loaded(&self) {
        let source = match &self.download.source {
            SourceAction::Git(git) => format!(
                "{}@{}",
                git.repo_url,
                git.reference.as_deref().unwrap_or("HEAD")
            ),
            SourceAction::Local(local) => local.path.display().to_string(),
        };
        info!(
            source = %source,
            src_dir = %self.download.output_dir.display(),
            ext_dir = %self.extensions.stage_dir.display(),
            md_dir = %self.convert.output_dir.display(),
            flat_dir = %self.flatten.output_dir.display(),
            upload_enabled = self.upload.enabled,
            export = %self.export.output.display(),
            "Loaded config"
        );
        debug!(?self, "Config loaded (full debug)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn empty_document_yields_defaults() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.convert.output_dir, PathBuf::from("./zeek_docs_md"));
        assert_eq!(config.flatten.output_dir, PathBuf::from("./zeek_docs_flattened"));
        assert!(!config.upload.enabled);
    }

    #[test]
    fn sections_override_individually() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"flatten": {"manifest": "out/manifest.json"}, "upload": {"dataset_id": "abc"}}"#,
        )
        .unwrap();
        assert_eq!(config.flatten.manifest, Some(PathBuf::from("out/manifest.json")));
        assert_eq!(config.flatten.extension, "md");
        assert_eq!(config.upload.dataset_id.as_deref(), Some("abc"));
        assert_eq!(config.upload.max_workers, 8);
        assert_eq!(config.export.output, PathBuf::from("./zeek_rag.json"));
    }
}

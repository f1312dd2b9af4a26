/// `load_config` module: loads the optional YAML config and applies environment overrides.
///
/// This is the only place where user-supplied YAML and environment variables are turned
/// into the strongly-typed [`PipelineConfig`] of the core crate.
///
/// # Responsibilities
/// - Parse the YAML file, when one is given; every section and field is optional
/// - Apply the documented environment overrides on top (see [`apply_env_overrides`])
/// - Fail with a clear message on unreadable files, invalid YAML or invalid values
///
/// The API key of the knowledge base is deliberately absent: it is read from
/// `DIFY_API_KEY` by the client only.
use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use zeek_rag_core::config::PipelineConfig;
use zeek_rag_core::download::{GitSource, LocalSource, SourceAction, DEFAULT_REFERENCE, DEFAULT_REPO_URL};

/// Loads `path` (or the defaults when `None`) and applies environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => {
            info!("No config file given, using defaults");
            PipelineConfig::default()
        }
    };
    apply_env_overrides(&mut config, |key| env::var(key).ok())?;
    config.trace_loaded();
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<PipelineConfig> {
    info!(config_path = ?path, "Loading configuration from file");

    let content = fs::read_to_string(path)
        .map_err(|e| {
            error!(error = ?e, config_path = ?path, "Failed to read config file");
            e
        })
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    // An empty file is a valid, all-defaults config.
    if content.trim().is_empty() {
        return Ok(PipelineConfig::default());
    }

    let config: PipelineConfig = serde_yaml::from_str(&content)
        .map_err(|e| {
            error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
            e
        })
        .with_context(|| format!("Failed to parse config YAML {}", path.display()))?;
    info!(config_path = ?path, "Parsed config YAML successfully");
    Ok(config)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{key} must be a boolean, got {other:?}"),
    }
}

/// Applies overrides looked up through `var`; unset and empty variables are ignored.
///
/// `ZEEK_LOCAL_SRC` switches to a local source tree and wins over the git variables.
pub fn apply_env_overrides<F>(config: &mut PipelineConfig, var: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| var(key).filter(|v| !v.trim().is_empty());

    let repo_url = get("ZEEK_REPO_URL");
    let version = get("ZEEK_VERSION");
    if repo_url.is_some() || version.is_some() {
        let mut git = match &config.download.source {
            SourceAction::Git(git) => git.clone(),
            SourceAction::Local(_) => GitSource {
                repo_url: DEFAULT_REPO_URL.to_string(),
                reference: Some(DEFAULT_REFERENCE.to_string()),
            },
        };
        if let Some(url) = repo_url {
            git.repo_url = url;
        }
        if let Some(version) = version {
            git.reference = Some(version);
        }
        config.download.source = SourceAction::Git(git);
    }
    if let Some(path) = get("ZEEK_LOCAL_SRC") {
        config.download.source = SourceAction::Local(LocalSource {
            path: PathBuf::from(path),
        });
    }
    if let Some(dir) = get("ZEEK_SRC_DIR") {
        config.download.output_dir = PathBuf::from(dir);
    }
    if let Some(dir) = get("EXT_DIR") {
        config.extensions.stage_dir = PathBuf::from(dir);
    }
    if let Some(dir) = get("MD_OUT_DIR") {
        config.convert.output_dir = PathBuf::from(dir);
    }
    if let Some(dir) = get("FLAT_OUT_DIR") {
        config.flatten.output_dir = PathBuf::from(dir);
    }
    if let Some(value) = get("UPLOAD_ENABLED") {
        config.upload.enabled = parse_bool("UPLOAD_ENABLED", &value)?;
    }
    if let Some(base) = get("DIFY_API_BASE") {
        config.upload.api_base = base;
    }
    if let Some(id) = get("DIFY_DATASET_ID") {
        config.upload.dataset_id = Some(id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn version_override_keeps_repository() {
        let mut config = PipelineConfig::default();
        apply_env_overrides(&mut config, vars(&[("ZEEK_VERSION", "v7.0.0")])).unwrap();
        match &config.download.source {
            SourceAction::Git(git) => {
                assert_eq!(git.repo_url, DEFAULT_REPO_URL);
                assert_eq!(git.reference.as_deref(), Some("v7.0.0"));
            }
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn local_source_wins_and_empty_values_are_ignored() {
        let mut config = PipelineConfig::default();
        apply_env_overrides(
            &mut config,
            vars(&[
                ("ZEEK_REPO_URL", "https://example.com/zeek.git"),
                ("ZEEK_LOCAL_SRC", "/srv/zeek-8.1.0"),
                ("MD_OUT_DIR", ""),
                ("UPLOAD_ENABLED", "yes"),
            ]),
        )
        .unwrap();
        assert_eq!(
            config.download.source,
            SourceAction::Local(LocalSource {
                path: PathBuf::from("/srv/zeek-8.1.0")
            })
        );
        assert_eq!(config.convert.output_dir, PathBuf::from("./zeek_docs_md"));
        assert!(config.upload.enabled);
    }

    #[test]
    fn invalid_boolean_is_an_error() {
        let mut config = PipelineConfig::default();
        let err = apply_env_overrides(&mut config, vars(&[("UPLOAD_ENABLED", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("UPLOAD_ENABLED"));
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::contract::{DownloadedSource, Downloader};

pub const DEFAULT_REPO_URL: &str = "https://github.com/zeek/zeek.git";
pub const DEFAULT_REFERENCE: &str = "v8.1.0";

/// Download configuration - which source to fetch and where.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    pub output_dir: PathBuf,
    pub source: SourceAction,
    /// Location of the RST manual inside the source tree.
    pub doc_subdir: PathBuf,
    /// Remove and re-clone an existing checkout instead of reusing it.
    pub refresh: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./zeek_src"),
            source: SourceAction::Git(GitSource {
                repo_url: DEFAULT_REPO_URL.to_string(),
                reference: Some(DEFAULT_REFERENCE.to_string()),
            }),
            doc_subdir: PathBuf::from("doc"),
            refresh: false,
        }
    }
}

impl DownloadConfig {
    /// Where the source tree is (or will be) once downloaded.
    pub fn source_root(&self) -> PathBuf {
        match &self.source {
            SourceAction::Git(git) => self.output_dir.join(checkout_dir_name(git)),
            SourceAction::Local(local) => local.path.clone(),
        }
    }

    /// Where the RST manual is (or will be) once downloaded.
    pub fn doc_root(&self) -> PathBuf {
        self.source_root().join(&self.doc_subdir)
    }
}

/// Selects where the source tree comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceAction {
    Git(GitSource),
    /// An already downloaded tree, e.g. an unpacked release tarball.
    Local(LocalSource),
}

/// Describes a Git repository download source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitSource {
    pub repo_url: String,
    /// Tag, branch or commit. `None` clones the default branch.
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalSource {
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to launch git: {0}")]
    GitLaunch(#[source] std::io::Error),
    #[error("git {action} exited with {status}")]
    GitFailed { action: &'static str, status: ExitStatus },
    #[error("local source {0} does not exist")]
    MissingLocal(PathBuf),
    #[error("documentation root {0} does not exist")]
    MissingDocRoot(PathBuf),
}

/// Deterministic checkout directory name for a git source.
///
/// The full URL is kept so different forks never share a checkout; `/` and `:` become `_`.
pub fn checkout_dir_name(git: &GitSource) -> String {
    let reference = git.reference.as_deref().unwrap_or("HEAD");
    format!("git_{}_{}", git.repo_url, reference)
        .replace('/', "_")
        .replace(':', "_")
}

fn is_commit_sha(reference: &str) -> bool {
    (7..=40).contains(&reference.len()) && reference.chars().all(|c| c.is_ascii_hexdigit())
}

/// DefaultDownloader clones git sources with the `git` binary or checks local paths.
pub struct DefaultDownloader {
    config: DownloadConfig,
}

impl DefaultDownloader {
    pub fn new(config: DownloadConfig) -> Self {
        Self { config }
    }

    fn run_git(action: &'static str, args: &[&std::ffi::OsStr]) -> Result<(), DownloadError> {
        let status = Command::new("git").args(args).status().map_err(|e| {
            error!(error = ?e, "Failed to launch git process");
            DownloadError::GitLaunch(e)
        })?;
        if !status.success() {
            error!(action, status = %status, "Git exited with non-zero code");
            return Err(DownloadError::GitFailed { action, status });
        }
        Ok(())
    }

    fn clone_reference(repo_url: &str, reference: Option<&str>, checkout: &Path) -> Result<(), DownloadError> {
        let url = std::ffi::OsStr::new(repo_url);
        match reference {
            // `--branch` takes tags and branches only; commits need a full clone.
            Some(sha) if is_commit_sha(sha) => {
                Self::run_git("clone", &["clone".as_ref(), url, checkout.as_os_str()])?;
                Self::run_git(
                    "checkout",
                    &["-C".as_ref(), checkout.as_os_str(), "checkout".as_ref(), sha.as_ref()],
                )
            }
            Some(branch) => Self::run_git(
                "clone",
                &[
                    "clone".as_ref(),
                    "--depth".as_ref(),
                    "1".as_ref(),
                    "--branch".as_ref(),
                    branch.as_ref(),
                    url,
                    checkout.as_os_str(),
                ],
            ),
            None => Self::run_git(
                "clone",
                &["clone".as_ref(), "--depth".as_ref(), "1".as_ref(), url, checkout.as_os_str()],
            ),
        }
    }

    fn clone_git(&self, git: &GitSource) -> Result<PathBuf, DownloadError> {
        let checkout = self.config.source_root();

        if checkout.exists() {
            if !self.config.refresh && is_checkout(&checkout) {
                info!(path = %checkout.display(), "Reusing existing checkout");
                return Ok(checkout);
            }
            fs::remove_dir_all(&checkout).map_err(|source| {
                error!(error = ?source, path = %checkout.display(), "Failed to remove existing checkout");
                DownloadError::Io {
                    path: checkout.clone(),
                    source,
                }
            })?;
            debug!(path = %checkout.display(), "Removed existing checkout");
        }
        fs::create_dir_all(&self.config.output_dir).map_err(|source| DownloadError::Io {
            path: self.config.output_dir.clone(),
            source,
        })?;

        let reference = git.reference.as_deref();
        if let Err(e) = Self::clone_reference(&git.repo_url, reference, &checkout) {
            // A half-finished clone would pass `is_checkout` on the next run at the wrong revision.
            if checkout.exists() {
                match fs::remove_dir_all(&checkout) {
                    Ok(()) => debug!(path = %checkout.display(), "Removed incomplete checkout"),
                    Err(cleanup) => {
                        error!(error = ?cleanup, path = %checkout.display(), "Failed to remove incomplete checkout")
                    }
                }
            }
            return Err(e);
        }

        info!(
            repo_url = %git.repo_url,
            reference = reference.unwrap_or("HEAD"),
            path = %checkout.display(),
            "Successfully cloned git repository"
        );
        Ok(checkout)
    }
}

#[async_trait::async_trait]
impl Downloader for DefaultDownloader {
    async fn download(&self) -> Result<DownloadedSource, DownloadError> {
        let (logical_name, local_path) = match &self.config.source {
            SourceAction::Git(git) => {
                let name = match &git.reference {
                    Some(reference) => format!("{}@{}", git.repo_url, reference),
                    None => git.repo_url.clone(),
                };
                (name, self.clone_git(git)?)
            }
            SourceAction::Local(local) => {
                if !local.path.is_dir() {
                    error!(path = %local.path.display(), "Local source does not exist");
                    return Err(DownloadError::MissingLocal(local.path.clone()));
                }
                (local.path.display().to_string(), local.path.clone())
            }
        };

        let doc_root = self.config.doc_root();
        if !doc_root.is_dir() {
            error!(path = %doc_root.display(), "Documentation root missing from source");
            return Err(DownloadError::MissingDocRoot(doc_root));
        }
        info!(source = %logical_name, doc_root = %doc_root.display(), "Source ready");

        Ok(DownloadedSource {
            logical_name,
            local_path,
            doc_root,
            original_source: self.config.source.clone(),
        })
    }
}

/// Whether `path` looks like a usable checkout (has a `.git` entry).
pub fn is_checkout(path: &Path) -> bool {
    path.join(".git").exists()
}

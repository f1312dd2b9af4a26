// Clones a throwaway repository through the `git` binary; skipped when git is unavailable.

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

use zeek_rag_core::contract::Downloader;
use zeek_rag_core::download::{
    checkout_dir_name, is_checkout, DefaultDownloader, DownloadConfig, DownloadError, GitSource,
    SourceAction,
};

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .current_dir(dir)
        .args(["-c", "user.name=zeek-rag", "-c", "user.email=zeek-rag@example.com"])
        .args(args)
        .status()
        .expect("git runs");
    assert!(status.success(), "git {args:?} failed");
}

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

/// A repository with a tagged commit holding `doc/index.rst`.
fn upstream(root: &Path) -> String {
    let repo = root.join("upstream");
    fs::create_dir_all(repo.join("doc")).unwrap();
    fs::write(repo.join("doc/index.rst"), "Zeek\n====\n").unwrap();
    git(&repo, &["init", "--quiet"]);
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "--quiet", "-m", "docs"]);
    git(&repo, &["tag", "v8.1.0"]);
    format!("file://{}", repo.display())
}

struct TestCase {
    name: &'static str,
    reference: Option<&'static str>,
}

#[tokio::test]
async fn clones_tags_and_default_branch() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let tmp = tempdir().unwrap();
    let repo_url = upstream(tmp.path());

    let cases = vec![
        TestCase {
            name: "pinned tag",
            reference: Some("v8.1.0"),
        },
        TestCase {
            name: "default branch",
            reference: None,
        },
    ];

    for case in cases {
        let git_source = GitSource {
            repo_url: repo_url.clone(),
            reference: case.reference.map(str::to_string),
        };
        let output_dir = tmp.path().join("zeek_src");
        let downloader = DefaultDownloader::new(DownloadConfig {
            output_dir: output_dir.clone(),
            source: SourceAction::Git(git_source.clone()),
            ..Default::default()
        });

        let source = downloader.download().await.unwrap_or_else(|e| panic!("{}: {e}", case.name));
        assert_eq!(source.local_path, output_dir.join(checkout_dir_name(&git_source)), "case: {}", case.name);
        assert!(is_checkout(&source.local_path), "case: {}", case.name);
        assert!(source.doc_root.join("index.rst").is_file(), "case: {}", case.name);
    }
}

#[tokio::test]
async fn existing_checkouts_are_reused_unless_refreshed() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let tmp = tempdir().unwrap();
    let repo_url = upstream(tmp.path());
    let mut config = DownloadConfig {
        output_dir: tmp.path().join("zeek_src"),
        source: SourceAction::Git(GitSource {
            repo_url,
            reference: Some("v8.1.0".into()),
        }),
        ..Default::default()
    };

    let first = DefaultDownloader::new(config.clone()).download().await.unwrap();
    let marker = first.local_path.join("local-edit.txt");
    fs::write(&marker, "kept").unwrap();

    DefaultDownloader::new(config.clone()).download().await.unwrap();
    assert!(marker.exists(), "reused checkout keeps local files");

    config.refresh = true;
    DefaultDownloader::new(config).download().await.unwrap();
    assert!(!marker.exists(), "refresh re-clones");
}

#[tokio::test]
async fn unknown_reference_is_a_git_failure() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let tmp = tempdir().unwrap();
    let repo_url = upstream(tmp.path());
    let downloader = DefaultDownloader::new(DownloadConfig {
        output_dir: tmp.path().join("zeek_src"),
        source: SourceAction::Git(GitSource {
            repo_url,
            reference: Some("v0.0.0-missing".into()),
        }),
        ..Default::default()
    });
    assert!(matches!(
        downloader.download().await,
        Err(DownloadError::GitFailed { action: "clone", .. })
    ));
}

#[tokio::test]
async fn failed_commit_checkout_is_not_reused() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let tmp = tempdir().unwrap();
    let repo_url = upstream(tmp.path());
    let config = DownloadConfig {
        output_dir: tmp.path().join("zeek_src"),
        source: SourceAction::Git(GitSource {
            repo_url,
            reference: Some("deadbeef".into()),
        }),
        ..Default::default()
    };

    let first = DefaultDownloader::new(config.clone()).download().await;
    assert!(matches!(first, Err(DownloadError::GitFailed { action: "checkout", .. })));
    assert!(!config.source_root().exists(), "incomplete clone is removed");

    let second = DefaultDownloader::new(config).download().await;
    assert!(
        matches!(second, Err(DownloadError::GitFailed { action: "checkout", .. })),
        "a retry clones again instead of reusing the default branch"
    );
}

///
/// This module implements the CLI interface for zeek-rag: command parsing, argument
/// handling and the user-visible entrypoints.
///
/// All conversion logic (parsing, rendering, flattening, the pipeline) lives in the
/// [`zeek-rag-core`] crate. This module is strictly CLI glue and orchestration.
///
/// ## How To Use
/// - For command-line users: `zeek-rag --help`; `zeek-rag build` runs everything.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// Every command exits non-zero when any document failed, after writing the output it
/// could produce and logging each failure.
///
/// [`zeek-rag-core`]: ../../zeek-rag-core/
use crate::load_config::load_config;
use crate::upload::DifyClient;
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use zeek_rag_core::config::PipelineConfig;
use zeek_rag_core::contract::Downloader;
use zeek_rag_core::convert::{convert_tree, parse_tree, ConversionReport, FailedDocument};
use zeek_rag_core::download::DefaultDownloader;
use zeek_rag_core::export::{export_documents, write_export};
use zeek_rag_core::extensions::{stage_extensions, ExtensionSet};
use zeek_rag_core::flatten::flatten_tree;
use zeek_rag_core::pipeline::run_pipeline;
use zeek_rag_core::toctree::build_doc_tree;
use zeek_rag_core::upload::{find_dataset, upload_directory, UploadReport};

/// CLI for zeek-rag: build RAG-ready Markdown from the Zeek manual.
#[derive(Parser)]
#[clap(
    name = "zeek-rag",
    version,
    about = "Convert the Zeek RST manual into flat Markdown for a RAG knowledge base"
)]
pub struct Cli {
    /// Path to a YAML config file; defaults apply when omitted
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download, convert, flatten and (when enabled) upload
    Build,
    /// Download the source tree and stage its documentation extensions
    Fetch,
    /// Convert an RST tree into a mirrored Markdown tree
    Convert {
        /// RST documentation root; defaults to the configured source's doc directory
        #[clap(long)]
        doc_root: Option<PathBuf>,
    },
    /// Flatten the Markdown tree into a single directory
    Flatten {
        /// Markdown tree; defaults to the configured conversion output
        #[clap(long)]
        input: Option<PathBuf>,
        /// Also write a flat-name → nested-path JSON manifest here
        #[clap(long)]
        manifest: Option<PathBuf>,
    },
    /// Upload the flat directory to the configured dataset
    Upload {
        /// Flat directory; defaults to the configured flatten output
        #[clap(long)]
        dir: Option<PathBuf>,
    },
    /// Print the toctree hierarchy of the manual
    Tree {
        #[clap(long)]
        doc_root: Option<PathBuf>,
        /// Print JSON instead of an indented outline
        #[clap(long)]
        json: bool,
    },
    /// Write the parsed manual as structured JSON: sections, blocks and symbols
    Export {
        #[clap(long)]
        doc_root: Option<PathBuf>,
        /// JSON file to write; defaults to the configured export output
        #[clap(long)]
        output: Option<PathBuf>,
        /// Version label stored in every document, e.g. "Zeek v8.1.0"
        #[clap(long)]
        version_label: Option<String>,
    },
    /// Show the configured dataset as the knowledge base reports it
    DatasetInfo,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Build => "build",
            Commands::Fetch => "fetch",
            Commands::Convert { .. } => "convert",
            Commands::Flatten { .. } => "flatten",
            Commands::Upload { .. } => "upload",
            Commands::Tree { .. } => "tree",
            Commands::Export { .. } => "export",
            Commands::DatasetInfo => "dataset-info",
        }
    }
}

fn fail_on_conversion_errors(report: &ConversionReport) -> Result<()> {
    fail_on_failed_documents(&report.failed, report.converted.len())
}

fn fail_on_failed_documents(failed: &[FailedDocument], succeeded: usize) -> Result<()> {
    if failed.is_empty() {
        return Ok(());
    }
    for document in failed {
        tracing::error!(path = %document.source_path.display(), reason = %document.reason, "Document failed to convert");
    }
    bail!(
        "{} of {} documents failed to convert",
        failed.len(),
        failed.len() + succeeded
    )
}

fn fail_on_upload_errors(report: &UploadReport) -> Result<()> {
    if report.is_complete() {
        return Ok(());
    }
    for failed in &report.failed {
        tracing::error!(filename = %failed.filename, attempts = failed.attempts, reason = %failed.reason, "Document failed to upload");
    }
    bail!("{} documents failed to upload", report.failed.len())
}

async fn build(config: &PipelineConfig) -> Result<()> {
    let downloader = DefaultDownloader::new(config.download.clone());
    let client = if config.upload.enabled {
        Some(DifyClient::new_from_env(&config.upload)?)
    } else {
        None
    };
    let uploader = client.as_ref().map(|c| c as &dyn zeek_rag_core::contract::Uploader);

    let report = run_pipeline(config, &downloader, uploader).await?;
    tracing::info!(
        command = "build",
        converted = report.conversion.converted.len(),
        flattened = report.flatten.documents.len(),
        flat_dir = %report.flatten.output_dir.display(),
        "Build complete"
    );
    fail_on_conversion_errors(&report.conversion)?;
    if let Some(upload) = &report.upload {
        fail_on_upload_errors(upload)?;
    }
    Ok(())
}

async fn fetch(config: &PipelineConfig) -> Result<()> {
    let downloader = DefaultDownloader::new(config.download.clone());
    let source = downloader.download().await?;
    let staged = stage_extensions(&source.local_path, &config.extensions.stage_dir)?;
    tracing::info!(
        command = "fetch",
        doc_root = %source.doc_root.display(),
        staged = staged.staged.len(),
        missing = ?staged.missing,
        "Fetch complete"
    );
    Ok(())
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!(command = cli.command.name(), "command started");

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Build => build(&config).await,
        Commands::Fetch => fetch(&config).await,
        Commands::Convert { doc_root } => {
            let doc_root = doc_root.unwrap_or_else(|| config.download.doc_root());
            let report = convert_tree(&doc_root, &config.convert, &ExtensionSet::zeek())?;
            tracing::info!(
                command = "convert",
                converted = report.converted.len(),
                warnings = report.warnings,
                output = %report.output_dir.display(),
                "Conversion complete"
            );
            fail_on_conversion_errors(&report)
        }
        Commands::Flatten { input, manifest } => {
            let input = input.unwrap_or_else(|| config.convert.output_dir.clone());
            let mut flatten = config.flatten.clone();
            if manifest.is_some() {
                flatten.manifest = manifest;
            }
            let report = flatten_tree(&input, &flatten)?;
            tracing::info!(
                command = "flatten",
                files = report.documents.len(),
                output = %report.output_dir.display(),
                "Flatten complete"
            );
            Ok(())
        }
        Commands::Upload { dir } => {
            let dir = dir.unwrap_or_else(|| config.flatten.output_dir.clone());
            if !config.upload.enabled {
                tracing::warn!("Upload is disabled in the config; uploading because it was requested explicitly");
            }
            let client = DifyClient::new_from_env(&config.upload)?;
            let report = upload_directory(&client, &dir, &config.upload).await?;
            tracing::info!(command = "upload", uploaded = report.uploaded.len(), "Upload complete");
            fail_on_upload_errors(&report)
        }
        Commands::Tree { doc_root, json } => {
            let doc_root = doc_root.unwrap_or_else(|| config.download.doc_root());
            let tree = build_doc_tree(&doc_root, &config.convert.exclude)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                print!("{}", tree.outline());
                for orphan in &tree.orphans {
                    println!("(orphan) {orphan}");
                }
            }
            Ok(())
        }
        Commands::Export { doc_root, output, version_label } => {
            let doc_root = doc_root.unwrap_or_else(|| config.download.doc_root());
            let output = output.unwrap_or_else(|| config.export.output.clone());
            let version = version_label.unwrap_or_else(|| config.export.version_label(&config.download));
            let parsed = parse_tree(&doc_root, &config.convert.exclude, &ExtensionSet::zeek())?;
            let documents = export_documents(&parsed.documents, &version);
            write_export(&output, &documents)?;
            tracing::info!(
                command = "export",
                documents = documents.len(),
                warnings = parsed.warnings,
                output = %output.display(),
                "Export complete"
            );
            fail_on_failed_documents(&parsed.failed, parsed.documents.len())
        }
        Commands::DatasetInfo => {
            let client = DifyClient::new_from_env(&config.upload)?;
            match find_dataset(&client, &config.upload).await? {
                Some(dataset) => {
                    println!("{}", serde_json::to_string_pretty(&dataset)?);
                    Ok(())
                }
                None => bail!("dataset not found among those visible to the API key"),
            }
        }
    }
}

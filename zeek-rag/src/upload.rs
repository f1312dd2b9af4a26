#![doc = "HTTP client for the Dify knowledge-base API, implementing the core `Uploader` trait."]
//
//! # Dify client
//!
//! [`DifyClient`] is the networked implementation of [`Uploader`]: it creates one
//! document per Markdown file and lists the datasets the key can see. Batch behaviour
//! (concurrency, retries, reporting) lives in `zeek_rag_core::upload`.
//!
//! ## Client Usage
//!
//! - Construct with [`DifyClient::new_from_env`]; the key comes from `DIFY_API_KEY`.
//! - The base URL and request timeout come from the `upload` section of the config.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use zeek_rag_core::contract::{DatasetInfo, UploadRequest, UploadedDocument, Uploader};
use zeek_rag_core::upload::{UploadConfig, UploadError};

/// Longest response body kept in an error.
const MAX_ERROR_BODY: usize = 200;

pub struct DifyClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct CreatedDocument {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateByFileResponse {
    document: Option<CreatedDocument>,
    batch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DatasetPage {
    #[serde(default)]
    data: Vec<DatasetInfo>,
}

fn transport(e: reqwest::Error) -> UploadError {
    UploadError::Transport(e.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        body.truncate(cut);
    }
    Err(UploadError::Status {
        status: status.as_u16(),
        body,
    })
}

impl DifyClient {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(DifyClient {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn new_from_env(config: &UploadConfig) -> anyhow::Result<Self> {
        let api_key = env::var("DIFY_API_KEY").map_err(|e| {
            tracing::error!(error = ?e, "DIFY_API_KEY missing in environment");
            anyhow::anyhow!("DIFY_API_KEY must be set to talk to the knowledge base: {e}")
        })?;
        let client = Self::new(&config.api_base, &api_key, Duration::from_secs(config.timeout_secs))?;
        tracing::info!(
            api_base = %client.api_base,
            api_key_set = !api_key.is_empty(),
            "Initialized DifyClient from environment"
        );
        Ok(client)
    }
}

#[async_trait]
impl Uploader for DifyClient {
    async fn upload_document(&self, request: UploadRequest) -> Result<UploadedDocument, UploadError> {
        let url = format!(
            "{}/datasets/{}/document/create_by_file",
            self.api_base, request.dataset_id
        );
        tracing::debug!(filename = %request.filename, url = %url, "Uploading document");

        let process_rule = serde_json::to_string(&request.settings.process_rule)
            .map_err(|e| UploadError::InvalidResponse(format!("cannot encode process rule: {e}")))?;
        let file = Part::bytes(request.content)
            .file_name(request.filename.clone())
            .mime_str("text/markdown")
            .map_err(transport)?;
        let form = Form::new()
            .text("indexing_technique", request.settings.indexing_technique.clone())
            .text("process_rule", process_rule)
            .text("doc_form", request.settings.doc_form.clone())
            .text("doc_language", request.settings.doc_language.clone())
            .part("file", file);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response).await?;
        let created: CreateByFileResponse = response
            .json()
            .await
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;

        tracing::info!(filename = %request.filename, batch = ?created.batch, "Successfully uploaded document");
        Ok(UploadedDocument {
            filename: request.filename,
            document_id: created.document.and_then(|d| d.id),
            batch: created.batch,
        })
    }

    async fn list_datasets(&self) -> Result<Vec<DatasetInfo>, UploadError> {
        let url = format!("{}/datasets", self.api_base);
        let response = self
            .http
            .get(&url)
            .query(&[("page", "1"), ("limit", "100")])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response).await?;
        let page: DatasetPage = response
            .json()
            .await
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;
        tracing::info!(count = page.data.len(), "Fetched datasets");
        Ok(page.data)
    }
}

//! Media attachments: local references must become durable URLs before a
//! send is emitted, since the partner's device cannot resolve local paths.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{SyncError, ValidationError};

/// A media attachment as picked by the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaRef {
    /// Device-local file (`file://`, `content://`, a bare path).
    Local(PathBuf),
    /// Already-uploaded `http(s)` URL.
    Remote(String),
}

impl MediaRef {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if is_durable_url(raw) {
            return Self::Remote(raw.to_owned());
        }
        Self::Local(PathBuf::from(raw.strip_prefix("file://").unwrap_or(raw)))
    }
}

/// Whether `raw` is an absolute `http`/`https` URL with a host.
#[must_use]
pub fn is_durable_url(raw: &str) -> bool {
    reqwest::Url::parse(raw)
        .is_ok_and(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
}

/// Reject any media reference a remote participant could not fetch.
///
/// # Errors
///
/// Returns `Validation(LocalMedia)` naming the first non-durable reference.
pub fn ensure_durable(urls: &[String]) -> Result<(), SyncError> {
    match urls.iter().find(|u| !is_durable_url(u)) {
        Some(local) => Err(ValidationError::LocalMedia(local.clone()).into()),
        None => Ok(()),
    }
}

/// External upload collaborator.
#[async_trait::async_trait]
pub trait MediaUploader: Send + Sync {
    /// Upload a local file and return its durable URL.
    ///
    /// # Errors
    ///
    /// Returns a connectivity or remote error when the upload fails.
    async fn upload(&self, path: &Path) -> Result<String, SyncError>;
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

/// Uploads raw bytes to `{api}/media`.
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUploader {
    #[must_use]
    pub fn new(client: reqwest::Client, api_url: &str) -> Self {
        Self { client, endpoint: format!("{}/media", api_url.trim_end_matches('/')) }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl MediaUploader for HttpUploader {
    async fn upload(&self, path: &Path) -> Result<String, SyncError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ValidationError::LocalMedia(format!("{}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_owned();

        debug!(file = %file_name, size = bytes.len(), "media: uploading");
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header("x-file-name", file_name)
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;
        let body: UploadResponse = response.json().await?;
        info!(url = %body.url, "media: uploaded");
        Ok(body.url)
    }
}

/// Upload every local reference and return durable URLs in the original order.
///
/// # Errors
///
/// Propagates the first upload failure, or `Validation(LocalMedia)` when the
/// uploader hands back something that is still not a durable URL.
pub async fn resolve_media(uploader: &dyn MediaUploader, refs: &[MediaRef]) -> Result<Vec<String>, SyncError> {
    let mut urls = Vec::with_capacity(refs.len());
    for media in refs {
        let url = match media {
            MediaRef::Remote(url) => url.clone(),
            MediaRef::Local(path) => uploader.upload(path).await?,
        };
        if !is_durable_url(&url) {
            return Err(ValidationError::LocalMedia(url).into());
        }
        urls.push(url);
    }
    Ok(urls)
}

#[cfg(test)]
#[path = "media_test.rs"]
mod tests;

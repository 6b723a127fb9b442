//! Object-store transfers.
//!
//! A data-driven scheme table maps URL schemes to clients exposing the
//! same capability set: download (file or directory) and upload (file or
//! directory). Inline `content` inputs never reach this layer, since
//! there is nothing remote about them, and `http`/`https` are
//! download-only schemes.

pub mod file;
pub mod ftp;
pub mod http;
pub mod s3;
pub mod wildcard;

use std::path::Path;

use url::Url;

use crate::config::S3Config;
use crate::errors::{PoiesisError, Result};

pub use file::FileClient;
pub use ftp::FtpClient;
pub use http::HttpClient;
pub use s3::S3Client;

/// A single uploaded file, as recorded in the task's output log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub url: String,
    /// Path relative to the uploaded root; empty for single-file uploads.
    pub relative: String,
    pub size_bytes: i64,
}

/// A transfer client bound to one URL scheme.
#[derive(Debug, Clone)]
pub enum TransferClient {
    S3(S3Client),
    Ftp(FtpClient),
    Http(HttpClient),
    File(FileClient),
}

impl TransferClient {
    pub async fn download_file(&self, url: &Url, dest: &Path) -> Result<()> {
        match self {
            Self::S3(client) => client.download_file(url, dest).await,
            Self::Ftp(client) => client.download_file(url, dest).await,
            Self::Http(client) => client.download_file(url, dest).await,
            Self::File(client) => client.download_file(url, dest).await,
        }
    }

    pub async fn download_directory(&self, url: &Url, dest: &Path) -> Result<()> {
        match self {
            Self::S3(client) => client.download_directory(url, dest).await,
            Self::Ftp(client) => client.download_directory(url, dest).await,
            Self::Http(_) => Err(PoiesisError::Validation(
                "http(s) inputs cannot be directories".into(),
            )),
            Self::File(client) => client.download_directory(url, dest).await,
        }
    }

    /// Upload one file, returning its size in bytes.
    pub async fn upload_file(&self, source: &Path, url: &Url) -> Result<i64> {
        match self {
            Self::S3(client) => client.upload_file(source, url).await,
            Self::Ftp(client) => client.upload_file(source, url).await,
            Self::Http(_) => Err(PoiesisError::Validation(
                "http(s) is a download-only scheme".into(),
            )),
            Self::File(client) => client.upload_file(source, url).await,
        }
    }

    /// Upload a directory tree, returning a log entry per file.
    pub async fn upload_directory(&self, source: &Path, url: &Url) -> Result<Vec<UploadedFile>> {
        let files = walk_files(source)?;
        let mut uploaded = Vec::with_capacity(files.len());
        for path in files {
            let relative = path
                .strip_prefix(source)
                .map_err(|_| PoiesisError::SystemFailure("walk escaped the upload root".into()))?
                .to_string_lossy()
                .to_string();
            let target = join_target(url, &relative)?;
            let size_bytes = self.upload_file(&path, &target).await?;
            uploaded.push(UploadedFile {
                url: target.to_string(),
                relative,
                size_bytes,
            });
        }
        Ok(uploaded)
    }
}

/// The scheme table. Construction is config-driven so tests can run the
/// whole engine against `file://` URLs alone.
#[derive(Debug, Clone, Default)]
pub struct SchemeRegistry {
    s3: Option<S3Config>,
}

impl SchemeRegistry {
    pub fn new(s3: Option<S3Config>) -> Self {
        Self { s3 }
    }

    /// Resolve the client for `url`.
    pub async fn for_url(&self, url: &Url) -> Result<TransferClient> {
        match url.scheme() {
            "s3" => {
                let cfg = self.s3.clone().ok_or_else(|| {
                    PoiesisError::ObjectStoreUnavailable(
                        "s3 is not configured for this deployment".into(),
                    )
                })?;
                Ok(TransferClient::S3(S3Client::new(&cfg).await?))
            }
            "ftp" => Ok(TransferClient::Ftp(FtpClient::new())),
            "http" | "https" => Ok(TransferClient::Http(HttpClient::new()?)),
            "file" => Ok(TransferClient::File(FileClient::new())),
            other => Err(PoiesisError::Validation(format!(
                "unsupported URL scheme: {other}"
            ))),
        }
    }
}

/// Parse a TES url field.
pub fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| PoiesisError::Validation(format!("invalid url {raw}: {e}")))
}

fn join_target(base: &Url, relative: &str) -> Result<Url> {
    let joined = wildcard::join_url(base.as_str(), relative);
    parse_url(&joined)
}

fn walk_files(root: &Path) -> Result<Vec<std::path::PathBuf>> {
    if !root.exists() {
        return Err(PoiesisError::ObjectStoreUnavailable(format!(
            "output path not found: {}",
            root.display()
        )));
    }
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_rejects_unknown_schemes() {
        let registry = SchemeRegistry::default();
        let url = parse_url("gopher://example/x").unwrap();
        assert!(matches!(
            registry.for_url(&url).await,
            Err(PoiesisError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn s3_requires_configuration() {
        let registry = SchemeRegistry::default();
        let url = parse_url("s3://bucket/key").unwrap();
        assert!(matches!(
            registry.for_url(&url).await,
            Err(PoiesisError::ObjectStoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn http_is_download_only() {
        let registry = SchemeRegistry::default();
        let url = parse_url("http://example.com/f").unwrap();
        let client = registry.for_url(&url).await.unwrap();
        let err = client
            .upload_file(Path::new("/tmp/x"), &url)
            .await
            .unwrap_err();
        assert!(matches!(err, PoiesisError::Validation(_)));
    }
}

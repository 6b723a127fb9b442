//! `http://` and `https://` scheme: download-only inputs.

use std::path::Path;

use url::Url;

use crate::errors::{PoiesisError, Result};

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PoiesisError::ObjectStoreUnavailable(e.to_string()))?;
        Ok(Self { client })
    }

    pub(super) async fn download_file(&self, url: &Url, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| PoiesisError::ObjectStoreUnavailable(format!("GET {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(PoiesisError::ObjectStoreUnavailable(format!(
                "GET {url}: status {}",
                response.status()
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| PoiesisError::ObjectStoreUnavailable(format!("GET {url}: {e}")))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &body).await?;
        Ok(())
    }
}

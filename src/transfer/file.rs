//! `file://` scheme: local-path transfers, used in development and by the
//! integration suites to exercise the filers without object storage.

use std::path::{Path, PathBuf};

use url::Url;

use crate::errors::{PoiesisError, Result};

#[derive(Debug, Clone, Default)]
pub struct FileClient;

impl FileClient {
    pub fn new() -> Self {
        Self
    }

    fn local_path(url: &Url) -> Result<PathBuf> {
        url.to_file_path()
            .map_err(|_| PoiesisError::Validation(format!("invalid file url: {url}")))
    }

    pub(super) async fn download_file(&self, url: &Url, dest: &Path) -> Result<()> {
        let source = Self::local_path(url)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, dest).await.map_err(|e| {
            PoiesisError::ObjectStoreUnavailable(format!(
                "copy {} -> {}: {e}",
                source.display(),
                dest.display()
            ))
        })?;
        Ok(())
    }

    pub(super) async fn download_directory(&self, url: &Url, dest: &Path) -> Result<()> {
        let source = Self::local_path(url)?;
        let mut stack = vec![source.clone()];
        while let Some(current) = stack.pop() {
            let relative = current
                .strip_prefix(&source)
                .map_err(|_| PoiesisError::SystemFailure("walk escaped the source root".into()))?;
            let target = dest.join(relative);
            if current.is_dir() {
                tokio::fs::create_dir_all(&target).await?;
                let mut entries = tokio::fs::read_dir(&current).await?;
                while let Some(entry) = entries.next_entry().await? {
                    stack.push(entry.path());
                }
            } else {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(&current, &target).await?;
            }
        }
        Ok(())
    }

    pub(super) async fn upload_file(&self, source: &Path, url: &Url) -> Result<i64> {
        let dest = Self::local_path(url)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::copy(source, &dest).await.map_err(|e| {
            PoiesisError::ObjectStoreUnavailable(format!(
                "copy {} -> {}: {e}",
                source.display(),
                dest.display()
            ))
        })?;
        Ok(bytes as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::parse_url;

    #[tokio::test]
    async fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.txt");
        tokio::fs::write(&source, b"payload").await.unwrap();

        let client = FileClient::new();
        let dest = dir.path().join("nested/copy.txt");
        let url = parse_url(&format!("file://{}", source.display())).unwrap();
        client.download_file(&url, &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"payload");

        let upload_target = dir.path().join("up/out.txt");
        let upload_url = parse_url(&format!("file://{}", upload_target.display())).unwrap();
        let size = client.upload_file(&dest, &upload_url).await.unwrap();
        assert_eq!(size, 7);
        assert_eq!(tokio::fs::read(&upload_target).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn directory_download_preserves_structure() {
        let dir = tempfile::tempdir().unwrap();
        let source_root = dir.path().join("tree");
        tokio::fs::create_dir_all(source_root.join("a/b")).await.unwrap();
        tokio::fs::write(source_root.join("a/b/f1"), b"1").await.unwrap();
        tokio::fs::write(source_root.join("f2"), b"2").await.unwrap();

        let client = FileClient::new();
        let dest = dir.path().join("copy");
        let url = parse_url(&format!("file://{}", source_root.display())).unwrap();
        client.download_directory(&url, &dest).await.unwrap();

        assert_eq!(tokio::fs::read(dest.join("a/b/f1")).await.unwrap(), b"1");
        assert_eq!(tokio::fs::read(dest.join("f2")).await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn missing_source_is_an_object_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = FileClient::new();
        let url = parse_url("file:///does/not/exist").unwrap();
        let err = client
            .download_file(&url, &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, PoiesisError::ObjectStoreUnavailable(_)));
    }
}

//! `s3://` scheme over any S3-compatible endpoint.
//!
//! Credentials come from the workload environment (propagated from the
//! S3 secret); a custom endpoint (`S3_URL`) switches the client to
//! path-style addressing, which is what MinIO-style deployments expect.
//! Uploads above the part threshold go multipart.

use std::path::Path;

use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use tokio::io::AsyncReadExt;
use url::Url;

use crate::config::S3Config;
use crate::errors::{PoiesisError, Result};

/// Objects at or above this size upload in parts of this size.
const MULTIPART_THRESHOLD: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct S3Client {
    client: aws_sdk_s3::Client,
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> PoiesisError {
    PoiesisError::ObjectStoreUnavailable(format!("{context}: {err}"))
}

fn bucket_and_key(url: &Url) -> Result<(String, String)> {
    let bucket = url
        .host_str()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| PoiesisError::Validation(format!("s3 url has no bucket: {url}")))?;
    let key = url.path().trim_start_matches('/').to_string();
    Ok((bucket.to_string(), key))
}

impl S3Client {
    pub async fn new(cfg: &S3Config) -> Result<Self> {
        let (access_key, secret_key) = match (&cfg.access_key, &cfg.secret_key) {
            (Some(a), Some(s)) => (a.clone(), s.clone()),
            _ => {
                return Err(PoiesisError::ObjectStoreUnavailable(
                    "AWS credentials are not set; ask your administrator to configure them".into(),
                ))
            }
        };
        let credentials = Credentials::new(access_key, secret_key, None, None, "poiesis");
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(
                std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            ))
            .credentials_provider(credentials);
        if let Some(endpoint) = &cfg.url {
            let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("http://{endpoint}")
            };
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
        })
    }

    pub(super) async fn download_file(&self, url: &Url, dest: &Path) -> Result<()> {
        let (bucket, key) = bucket_and_key(url)?;
        let object = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| unavailable(&format!("get s3://{bucket}/{key}"), e))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut body = object.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await?;
        tokio::io::copy(&mut body, &mut file).await?;
        Ok(())
    }

    pub(super) async fn download_directory(&self, url: &Url, dest: &Path) -> Result<()> {
        let (bucket, key) = bucket_and_key(url)?;
        let prefix = if key.is_empty() || key.ends_with('/') {
            key
        } else {
            format!("{key}/")
        };

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| unavailable(&format!("list s3://{bucket}/{prefix}"), e))?;
            for object in page.contents() {
                let Some(object_key) = object.key() else { continue };
                if object_key.ends_with('/') {
                    continue;
                }
                let relative = object_key.strip_prefix(&prefix).unwrap_or(object_key);
                let target = dest.join(relative);
                let file_url = format!("s3://{bucket}/{object_key}");
                let file_url = Url::parse(&file_url)
                    .map_err(|e| PoiesisError::SystemFailure(e.to_string()))?;
                self.download_file(&file_url, &target).await?;
            }
        }
        Ok(())
    }

    pub(super) async fn upload_file(&self, source: &Path, url: &Url) -> Result<i64> {
        let (bucket, key) = bucket_and_key(url)?;
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| unavailable(&format!("stat {}", source.display()), e))?
            .len();

        if size < MULTIPART_THRESHOLD {
            let body = ByteStream::from_path(source)
                .await
                .map_err(|e| unavailable(&format!("read {}", source.display()), e))?;
            self.client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .body(body)
                .send()
                .await
                .map_err(|e| unavailable(&format!("put s3://{bucket}/{key}"), e))?;
        } else {
            self.upload_multipart(source, &bucket, &key).await?;
        }
        Ok(size as i64)
    }

    async fn upload_multipart(&self, source: &Path, bucket: &str, key: &str) -> Result<()> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| unavailable(&format!("start multipart s3://{bucket}/{key}"), e))?;
        let upload_id = upload.upload_id().unwrap_or_default().to_string();

        let result = self
            .upload_parts(source, bucket, key, &upload_id)
            .await;
        match result {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder().set_parts(Some(parts)).build(),
                    )
                    .send()
                    .await
                    .map_err(|e| unavailable(&format!("complete multipart s3://{bucket}/{key}"), e))?;
                Ok(())
            }
            Err(err) => {
                // Leave no dangling upload behind; the original error wins.
                let _ = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        source: &Path,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(source).await?;
        let mut parts = Vec::new();
        let mut part_number: i32 = 1;
        loop {
            let mut chunk = vec![0u8; MULTIPART_THRESHOLD as usize];
            let mut read = 0;
            while read < chunk.len() {
                let n = file.read(&mut chunk[read..]).await?;
                if n == 0 {
                    break;
                }
                read += n;
            }
            if read == 0 {
                break;
            }
            chunk.truncate(read);

            let part = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| {
                    unavailable(&format!("upload part {part_number} of s3://{bucket}/{key}"), e)
                })?;
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(part.e_tag().unwrap_or_default())
                    .build(),
            );
            if read < MULTIPART_THRESHOLD as usize {
                break;
            }
            part_number += 1;
        }
        Ok(parts)
    }
}

//! Output collection.
//!
//! Every declared output resolves to one or more uploads; each uploaded
//! file appends an `OutputFileLog` as it lands, so partial progress
//! survives a failure. Wildcard paths expand beneath the workspace and
//! build their URLs by stripping `path_prefix` from each match.

use std::path::Path;

use tracing::info;

use crate::errors::Result;
use crate::models::{IoType, OutputFileLog, Task};
use crate::store::TaskStore;
use crate::transfer::wildcard::{self, has_wildcards};
use crate::transfer::{parse_url, SchemeRegistry};

use super::workspace_path;

/// Upload every declared output; returns the number of uploaded files.
pub async fn collect_outputs(
    task: &Task,
    root: &Path,
    transfers: &SchemeRegistry,
    store: &TaskStore,
) -> Result<usize> {
    let id = task.id();
    let mut uploaded = 0usize;

    for output in &task.outputs {
        if has_wildcards(&output.path) {
            // Validated at creation: wildcard outputs carry a prefix.
            let prefix = output.path_prefix.as_deref().unwrap_or("");
            let matches = wildcard::expand(root, &output.path, prefix)?;
            info!(pattern = %output.path, matches = matches.len(), "expanding wildcard output");
            for matched in matches {
                let target = parse_url(&wildcard::join_url(&output.url, &matched.relative))?;
                let client = transfers.for_url(&target).await?;
                let size_bytes = client.upload_file(&matched.source, &target).await?;
                store
                    .append_output_log(
                        id,
                        OutputFileLog {
                            url: target.to_string(),
                            path: matched.exec_path,
                            size_bytes,
                        },
                    )
                    .await?;
                uploaded += 1;
            }
            continue;
        }

        let source = workspace_path(root, &output.path);
        let url = parse_url(&output.url)?;
        let client = transfers.for_url(&url).await?;
        match output.io_type {
            IoType::File => {
                let size_bytes = client.upload_file(&source, &url).await?;
                store
                    .append_output_log(
                        id,
                        OutputFileLog {
                            url: output.url.clone(),
                            path: output.path.clone(),
                            size_bytes,
                        },
                    )
                    .await?;
                uploaded += 1;
            }
            IoType::Directory => {
                let files = client.upload_directory(&source, &url).await?;
                for file in files {
                    let path = format!(
                        "{}/{}",
                        output.path.trim_end_matches('/'),
                        file.relative
                    );
                    store
                        .append_output_log(
                            id,
                            OutputFileLog {
                                url: file.url,
                                path,
                                size_bytes: file.size_bytes,
                            },
                        )
                        .await?;
                    uploaded += 1;
                }
            }
        }
    }
    Ok(uploaded)
}

//! Input staging.
//!
//! Inputs are materialized in declaration order beneath the workspace
//! root, at their full declared path: `/data/f` lands at
//! `<workspace>/data/f`, which the executor pods see as `/data/f` again
//! through their subpath mounts. Inline `content` is written directly;
//! everything else goes through the scheme registry.

use std::path::Path;

use tracing::{debug, info};

use crate::errors::Result;
use crate::models::{IoType, Task};
use crate::transfer::{parse_url, SchemeRegistry};

use super::workspace_path;

/// Stage every declared input; returns how many were staged.
pub async fn stage_inputs(task: &Task, root: &Path, transfers: &SchemeRegistry) -> Result<usize> {
    for (index, input) in task.inputs.iter().enumerate() {
        let dest = workspace_path(root, &input.path);
        if let Some(content) = &input.content {
            debug!(index, path = %input.path, "writing inline content");
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, content.as_bytes()).await?;
            continue;
        }

        // Validation guarantees a url when there is no content.
        let raw = input.url.as_deref().unwrap_or_default();
        let url = parse_url(raw)?;
        let client = transfers.for_url(&url).await?;
        info!(index, url = %url, path = %input.path, "staging input");
        match input.io_type {
            IoType::File => client.download_file(&url, &dest).await?,
            IoType::Directory => client.download_directory(&url, &dest).await?,
        }
    }

    // Declared scratch volumes exist empty before any executor starts.
    for volume in &task.volumes {
        tokio::fs::create_dir_all(workspace_path(root, volume)).await?;
    }

    Ok(task.inputs.len())
}

//! Filer workloads: input staging (TIF) and output collection (TOF).
//!
//! Both run as one-shot Jobs with the task PVC mounted at the workspace
//! root, load the task document from the store, do their transfers, and
//! end with exactly one bus message. The exit-code policy of the engine
//! holds: a filer that fails persists the cause as a system log *and*
//! publishes an error before exiting non-zero.

pub mod tif;
pub mod tof;

use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::bus::{self, MessageBus, PhaseMessage};
use crate::config::Config;
use crate::errors::{PoiesisError, Result};
use crate::models::TaskState;
use crate::store::TaskStore;
use crate::transfer::SchemeRegistry;

/// Which filer this workload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilerKind {
    Input,
    Output,
}

impl FilerKind {
    fn channel(&self, task_id: &str) -> String {
        match self {
            Self::Input => bus::input_filer_channel(task_id),
            Self::Output => bus::output_filer_channel(task_id),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Input => "input filer",
            Self::Output => "output filer",
        }
    }
}

pub struct Filer {
    store: TaskStore,
    bus: MessageBus,
    transfers: SchemeRegistry,
    workspace_root: PathBuf,
    task_id: String,
}

impl Filer {
    pub fn new(
        store: TaskStore,
        bus: MessageBus,
        transfers: SchemeRegistry,
        config: &Config,
        task_id: String,
    ) -> Self {
        Self {
            store,
            bus,
            transfers,
            workspace_root: config.filer.workspace_root.clone(),
            task_id,
        }
    }

    /// Run one filer phase end to end.
    pub async fn run(&self, kind: FilerKind) -> Result<()> {
        let id = &self.task_id;
        let channel = kind.channel(id);

        let work = self.file(kind).await;
        match work {
            Ok(count) => {
                info!(task_id = %id, files = count, "{} finished", kind.describe());
                let _ = self
                    .store
                    .append_system_log(id, format!("{} staged {count} item(s)", kind.describe()))
                    .await;
                self.bus.publish(&channel, &PhaseMessage::ok()).await?;
                Ok(())
            }
            Err(err) => {
                error!(task_id = %id, error = %err, "{} failed", kind.describe());
                let detail = format!("{} failed: {err}", kind.describe());
                let _ = self.store.append_system_log(id, detail.clone()).await;
                let _ = self.bus.publish(&channel, &PhaseMessage::error(detail)).await;
                Err(err)
            }
        }
    }

    async fn file(&self, kind: FilerKind) -> Result<usize> {
        let id = &self.task_id;
        let doc = self.store.get_document(id).await?;
        if doc.task.state == TaskState::Canceling {
            return Err(PoiesisError::SystemFailure("task is being canceled".into()));
        }
        match kind {
            FilerKind::Input => {
                tif::stage_inputs(&doc.task, &self.workspace_root, &self.transfers).await
            }
            FilerKind::Output => {
                tof::collect_outputs(
                    &doc.task,
                    &self.workspace_root,
                    &self.transfers,
                    &self.store,
                )
                .await
            }
        }
    }
}

/// Map an absolute executor-side path to its workspace location.
pub(crate) fn workspace_path(root: &Path, task_path: &str) -> PathBuf {
    root.join(task_path.trim_start_matches('/'))
}

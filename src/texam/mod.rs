//! TExAM: execution and monitoring.
//!
//! Executors run strictly in order, one pod each, against the shared
//! PVC. Every pod gets the per-step deadline; a pod that outlives it is
//! deleted and recorded as a synthetic failure. The real exit code is
//! always recorded; `ignore_error` only decides whether the loop goes
//! on, and the first non-ignored failure stops the pipeline.

use chrono::Utc;
use tracing::{info, warn};

use crate::bus::{self, MessageBus, PhaseMessage};
use crate::cluster::{manifests, names, ClusterDriver};
use crate::config::Config;
use crate::constants::{MAX_LOG_BYTES, POLL_INTERVAL_SECONDS};
use crate::errors::{PoiesisError, Result};
use crate::models::{Executor, ExecutorLog, Task, TaskState};
use crate::retry::{retry, Backoff};
use crate::store::TaskStore;

/// Exit code recorded for an executor that hit the per-step deadline.
const TIMEOUT_EXIT_CODE: i32 = 124;

pub struct Texam {
    store: TaskStore,
    bus: MessageBus,
    cluster: ClusterDriver,
    config: Config,
    task_id: String,
}

impl Texam {
    pub fn new(
        store: TaskStore,
        bus: MessageBus,
        cluster: ClusterDriver,
        config: Config,
        task_id: String,
    ) -> Self {
        Self {
            store,
            bus,
            cluster,
            config,
            task_id,
        }
    }

    /// Run all executors, then publish the single phase message.
    pub async fn run(&self) -> Result<()> {
        let channel = bus::texam_channel(&self.task_id);
        let task = self.store.get_document(&self.task_id).await?.task;

        match self.execute_all(&task).await {
            Ok(()) => {
                self.bus.publish(&channel, &PhaseMessage::ok()).await?;
                Ok(())
            }
            Err(err) => {
                let _ = self
                    .bus
                    .publish(&channel, &PhaseMessage::error(err.to_string()))
                    .await;
                Err(err)
            }
        }
    }

    async fn execute_all(&self, task: &Task) -> Result<()> {
        let id = &self.task_id;
        for (index, executor) in task.executors.iter().enumerate() {
            // Cancellation is honored between steps, not mid-pod.
            if self.store.current_state(id).await? == TaskState::Canceling {
                let _ = self
                    .store
                    .append_system_log(id, format!("canceled before executor {index}"))
                    .await;
                return Err(PoiesisError::SystemFailure("task canceled".into()));
            }

            let exit_code = self.run_executor(task, index, executor).await?;
            if exit_code != 0 {
                if executor.ignores_errors() {
                    info!(task_id = %id, index, exit_code, "executor failed but ignore_error is set");
                    continue;
                }
                let _ = self
                    .store
                    .append_system_log(id, format!("executor {index} exited with code {exit_code}"))
                    .await;
                return Err(PoiesisError::ExecutorFailed { index, exit_code });
            }
        }
        Ok(())
    }

    /// Launch one executor pod and wait it out. Returns its exit code.
    async fn run_executor(&self, task: &Task, index: usize, executor: &Executor) -> Result<i32> {
        let id = &self.task_id;
        let pod_name = names::executor_pod(id, index);
        let command = shell_command(executor);
        let pod = manifests::executor_pod(&self.config, task, index, executor, &command)?;

        let launched_at = Utc::now();
        match self.cluster.create_pod(&pod).await {
            Ok(_) => {}
            Err(PoiesisError::Conflict(_)) => {
                // A stale pod from an earlier attempt holds the name;
                // replace it so this step keeps its index.
                warn!(task_id = %id, pod = %pod_name, "replacing stale executor pod");
                self.cluster.delete_pod(&pod_name).await?;
                retry(Backoff::default(), "create executor pod", || async {
                    self.cluster.create_pod(&pod).await
                })
                .await?;
            }
            Err(err) => return Err(err),
        }
        info!(task_id = %id, pod = %pod_name, index, "executor started");

        let outcome = self
            .cluster
            .await_pod_terminal(
                &pod_name,
                self.config.monitor_timeout,
                std::time::Duration::from_secs(POLL_INTERVAL_SECONDS.min(2)),
            )
            .await?;

        let Some(outcome) = outcome else {
            // Deadline passed with the pod still running.
            let _ = self.cluster.delete_pod(&pod_name).await;
            self.store
                .append_executor_log(
                    id,
                    ExecutorLog {
                        start_time: Some(launched_at),
                        end_time: Some(Utc::now()),
                        stdout: None,
                        stderr: Some(format!("executor {index} timed out")),
                        exit_code: Some(TIMEOUT_EXIT_CODE),
                    },
                )
                .await?;
            self.store
                .append_system_log(id, format!("executor {index} timed out"))
                .await?;
            return Err(PoiesisError::SystemFailure(format!(
                "executor {index} timed out"
            )));
        };

        let stdout = match self.cluster.pod_logs(&pod_name).await {
            Ok(logs) => Some(truncate_utf8(logs, MAX_LOG_BYTES)),
            Err(err) => {
                warn!(task_id = %id, pod = %pod_name, error = %err, "log retrieval failed");
                None
            }
        };
        let exit_code = outcome
            .exit_code
            .unwrap_or(if outcome.succeeded() { 0 } else { 1 });
        let stderr = outcome
            .reason
            .as_ref()
            .map(|reason| format!("pod failed: {reason}"));
        if let Some(reason) = &outcome.reason {
            if reason == "Preempted" || reason == "Evicted" {
                let _ = self
                    .store
                    .append_system_log(id, format!("executor {index} preempted: {reason}"))
                    .await;
            }
        }

        self.store
            .append_executor_log(
                id,
                ExecutorLog {
                    start_time: outcome.start_time.or(Some(launched_at)),
                    end_time: outcome.end_time.or_else(|| Some(Utc::now())),
                    stdout,
                    stderr,
                    exit_code: Some(exit_code),
                },
            )
            .await?;
        info!(task_id = %id, index, exit_code, "executor finished");
        Ok(exit_code)
    }
}

/// Build the `sh -c` command line: quoted argv plus the declared stdio
/// redirections. Exit-code handling stays with the engine, so the
/// command is never masked with `|| true`.
pub fn shell_command(executor: &Executor) -> String {
    let mut command = executor
        .command
        .iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ");
    if let Some(stdin) = &executor.stdin {
        command = format!("{command} < {}", quote(stdin));
    }
    if let Some(stdout) = &executor.stdout {
        command = format!("{command} > {}", quote(stdout));
    }
    if let Some(stderr) = &executor.stderr {
        command = format!("{command} 2> {}", quote(stderr));
    }
    command
}

/// Single-quote an argument for `sh -c` unless it is plainly safe.
fn quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:@%+".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Truncate to at most `max` bytes on a char boundary.
fn truncate_utf8(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}

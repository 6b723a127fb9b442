//! TOrc: the per-task orchestrator.
//!
//! Runs once per task as its own Job. Claims the task with a CAS on
//! `QUEUED -> INITIALIZING` (a conflict means another attempt owns it),
//! provisions the PVC, then drives the three phase Jobs in order,
//! waiting on the bus with a bounded timeout and falling back to store
//! and cluster inspection whenever the bus stays silent. Cancellation is
//! honored at every phase boundary. All exit paths clean up the child
//! Jobs and the PVC.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::bus::{self, MessageBus, Subscription};
use crate::cluster::manifests::{self, EngineJobKind};
use crate::cluster::{names, ClusterDriver, JobState};
use crate::config::Config;
use crate::constants::POLL_INTERVAL_SECONDS;
use crate::errors::{PoiesisError, Result};
use crate::models::{Task, TaskState};
use crate::retry::{promote, retry, Backoff};
use crate::store::TaskStore;

/// How a phase wait resolved.
#[derive(Debug, Clone, PartialEq)]
enum PhaseOutcome {
    Ok,
    Error(Option<String>),
    TimedOut,
    Canceled,
}

pub struct Torc {
    store: TaskStore,
    bus: MessageBus,
    cluster: ClusterDriver,
    config: Config,
    task_id: String,
}

impl Torc {
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

    /// Drive the task to a terminal state. Returns `Ok` even when the
    /// task failed, since the failure lives in the task document; an
    /// `Err` means this workload could not do its job at all.
    pub async fn run(&self) -> Result<()> {
        let id = &self.task_id;
        match self
            .store
            .transition(id, TaskState::Queued, TaskState::Initializing)
            .await
        {
            Ok(()) => {}
            Err(PoiesisError::Conflict(reason)) => {
                // Someone else owns this task (or it is already past
                // QUEUED); exiting quietly is the correct move.
                info!(task_id = %id, %reason, "task not claimable, exiting");
                return Ok(());
            }
            Err(err) => return Err(promote(err)),
        }
        info!(task_id = %id, "task claimed");

        let task = self.store.get_document(id).await?.task;
        let result = self.execute(&task).await;
        self.cleanup().await;
        result
    }

    async fn execute(&self, task: &Task) -> Result<()> {
        let id = &self.task_id;

        // Workspace first: every later phase mounts it.
        let disk_gb = task.resources.as_ref().and_then(|r| r.disk_gb);
        let pvc = manifests::pvc_manifest(&self.config, id, disk_gb)?;
        if let Err(err) = retry(Backoff::default(), "create pvc", || async {
            self.cluster.create_pvc(&pvc).await
        })
        .await
        {
            return self.fail(TaskState::Initializing, TaskState::SystemError, err.to_string()).await;
        }
        self.store.set_start_time(id, Utc::now()).await?;

        // Input staging.
        if !task.inputs.is_empty() {
            match self.run_phase(EngineJobKind::Tif, &bus::input_filer_channel(id)).await? {
                PhaseOutcome::Ok => {}
                PhaseOutcome::Canceled => return self.finish_cancel().await,
                PhaseOutcome::Error(detail) => {
                    let detail = detail.unwrap_or_else(|| "input filer failed".into());
                    return self.fail(TaskState::Initializing, TaskState::SystemError, detail).await;
                }
                PhaseOutcome::TimedOut => {
                    return self
                        .fail(
                            TaskState::Initializing,
                            TaskState::SystemError,
                            "input filer did not finish in time".into(),
                        )
                        .await;
                }
            }
        }

        match self
            .store
            .transition(id, TaskState::Initializing, TaskState::Running)
            .await
        {
            Ok(()) => {}
            Err(PoiesisError::Conflict(_))
                if self.store.current_state(id).await? == TaskState::Canceling =>
            {
                return self.finish_cancel().await;
            }
            Err(err) => return Err(promote(err)),
        }

        // Execution.
        match self.run_phase(EngineJobKind::Texam, &bus::texam_channel(id)).await? {
            PhaseOutcome::Ok => {}
            PhaseOutcome::Canceled => return self.finish_cancel().await,
            PhaseOutcome::Error(detail) => {
                let to = self.classify_execution_failure().await;
                let detail = detail.unwrap_or_else(|| "execution failed".into());
                return self.fail(TaskState::Running, to, detail).await;
            }
            PhaseOutcome::TimedOut => {
                return self
                    .fail(
                        TaskState::Running,
                        TaskState::SystemError,
                        "execution did not finish in time".into(),
                    )
                    .await;
            }
        }

        // Output collection.
        if !task.outputs.is_empty() {
            match self.run_phase(EngineJobKind::Tof, &bus::output_filer_channel(id)).await? {
                PhaseOutcome::Ok => {}
                PhaseOutcome::Canceled => return self.finish_cancel().await,
                PhaseOutcome::Error(detail) => {
                    let detail = detail.unwrap_or_else(|| "output filer failed".into());
                    return self.fail(TaskState::Running, TaskState::SystemError, detail).await;
                }
                PhaseOutcome::TimedOut => {
                    return self
                        .fail(
                            TaskState::Running,
                            TaskState::SystemError,
                            "output filer did not finish in time".into(),
                        )
                        .await;
                }
            }
        }

        self.store
            .transition(id, TaskState::Running, TaskState::Complete)
            .await
            .map_err(promote)?;
        self.store.set_end_time(id, Utc::now()).await?;
        info!(task_id = %id, "task complete");
        Ok(())
    }

    /// Launch one phase Job and wait for its outcome.
    async fn run_phase(&self, kind: EngineJobKind, channel: &str) -> Result<PhaseOutcome> {
        let id = &self.task_id;
        if self.store.current_state(id).await? == TaskState::Canceling {
            return Ok(PhaseOutcome::Canceled);
        }

        // Subscribe before launching so the completion message cannot
        // slip between launch and wait.
        let mut subscription = self.bus.subscribe(channel).await?;
        let job = manifests::engine_job(&self.config, kind, id)?;
        let job_name = kind.job_name(id);
        if let Err(err) = retry(Backoff::default(), "create phase job", || async {
            self.cluster.create_job(&job).await
        })
        .await
        {
            return Ok(PhaseOutcome::Error(Some(err.to_string())));
        }
        info!(task_id = %id, job = %job_name, "phase launched");

        self.await_phase(&mut subscription, &job_name).await
    }

    /// Wait for the phase message, reconciling against the store and the
    /// cluster whenever the bus stays silent for a poll interval.
    async fn await_phase(
        &self,
        subscription: &mut Subscription,
        job_name: &str,
    ) -> Result<PhaseOutcome> {
        let deadline = self.config.monitor_timeout.map(|t| Instant::now() + t);
        let poll = Duration::from_secs(POLL_INTERVAL_SECONDS);

        loop {
            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(PhaseOutcome::TimedOut);
                    }
                    remaining.min(poll)
                }
                None => poll,
            };

            match subscription.recv(Some(slice)).await? {
                Some(message) if message.is_ok() => return Ok(PhaseOutcome::Ok),
                Some(message) => return Ok(PhaseOutcome::Error(message.detail)),
                None => {
                    // Bus silent: the store and the cluster decide.
                    if self.store.current_state(&self.task_id).await? == TaskState::Canceling {
                        return Ok(PhaseOutcome::Canceled);
                    }
                    match self.cluster.job_state(job_name).await {
                        Ok(JobState::Succeeded) => {
                            info!(job = %job_name, "phase finished while the bus was silent");
                            return Ok(PhaseOutcome::Ok);
                        }
                        Ok(JobState::Failed) => return Ok(PhaseOutcome::Error(None)),
                        Ok(JobState::NotFound) => {
                            return Ok(PhaseOutcome::Error(Some(format!(
                                "phase job {job_name} disappeared"
                            ))))
                        }
                        Ok(JobState::Active) => {}
                        Err(err) => warn!(job = %job_name, error = %err, "job status probe failed"),
                    }
                }
            }
        }
    }

    /// Persisted logs decide whether an execution failure was the
    /// executor's fault; the bus message is only a hint.
    async fn classify_execution_failure(&self) -> TaskState {
        let Ok(doc) = self.store.get_document(&self.task_id).await else {
            return TaskState::SystemError;
        };
        let Some(log) = doc.task.attempt_log() else {
            return TaskState::SystemError;
        };
        if log.system_logs.iter().any(|line| line.contains("preempted")) {
            return TaskState::Preempted;
        }
        if log.system_logs.iter().any(|line| line.contains("timed out")) {
            return TaskState::SystemError;
        }
        let executor_failed = log
            .logs
            .last()
            .and_then(|l| l.exit_code)
            .is_some_and(|code| code != 0);
        if executor_failed {
            TaskState::ExecutorError
        } else {
            TaskState::SystemError
        }
    }

    /// Record a terminal failure. If a cancel snuck in ahead of us, the
    /// cancellation path wins.
    async fn fail(&self, from: TaskState, to: TaskState, detail: String) -> Result<()> {
        let id = &self.task_id;
        warn!(task_id = %id, %to, %detail, "task failed");
        let _ = self.store.append_system_log(id, detail).await;
        match self.store.transition(id, from, to).await {
            Ok(()) => {}
            Err(PoiesisError::Conflict(_))
                if self.store.current_state(id).await? == TaskState::Canceling =>
            {
                return self.finish_cancel().await;
            }
            Err(err) => warn!(task_id = %id, error = %err, "failure transition rejected"),
        }
        let _ = self.store.set_end_time(id, Utc::now()).await;
        Ok(())
    }

    /// Tear down children and complete `CANCELING -> CANCELED`.
    async fn finish_cancel(&self) -> Result<()> {
        let id = &self.task_id;
        info!(task_id = %id, "cancellation observed, tearing down");
        self.cleanup().await;
        let _ = self.store.append_system_log(id, "task canceled").await;
        if let Err(err) = self
            .store
            .transition(id, TaskState::Canceling, TaskState::Canceled)
            .await
        {
            // The API's fallback path may already have finished it.
            warn!(task_id = %id, error = %err, "cancel finalization rejected");
        }
        let _ = self.store.set_end_time(id, Utc::now()).await;
        Ok(())
    }

    /// Delete everything this task owns on the cluster. Deletions are
    /// idempotent, so running this on every exit path is safe.
    async fn cleanup(&self) {
        let id = &self.task_id;
        for job in [names::tif_job(id), names::texam_job(id), names::tof_job(id)] {
            if let Err(err) = self.cluster.delete_job(&job).await {
                warn!(task_id = %id, job = %job, error = %err, "job cleanup failed");
            }
        }
        if let Err(err) = self
            .cluster
            .delete_pods_by_label(&names::executor_selector(id))
            .await
        {
            warn!(task_id = %id, error = %err, "executor pod cleanup failed");
        }
        if let Err(err) = self.cluster.delete_pvc(&names::pvc(id)).await {
            warn!(task_id = %id, error = %err, "pvc cleanup failed");
        }
    }
}

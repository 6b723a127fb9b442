//! Scripted in-memory cluster for the integration suites.
//!
//! Creations and deletions are recorded for assertions; pod completions
//! are scripted per name, defaulting to immediate success. A job hook
//! lets a test harness play the role of the cluster scheduler by running
//! the corresponding workload in-process whenever a Job is created.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use tokio::sync::{mpsc, Mutex};

use crate::errors::{PoiesisError, Result};

use super::{JobState, PodOutcome, PodPhase};

/// Scripted behavior of one pod.
#[derive(Debug, Clone)]
pub struct PodScript {
    pub outcome: PodOutcome,
    /// Wall-clock the pod "runs" before resolving.
    pub delay: Duration,
}

impl PodScript {
    pub fn succeed() -> Self {
        Self {
            outcome: PodOutcome {
                phase: PodPhase::Succeeded,
                exit_code: Some(0),
                start_time: None,
                end_time: None,
                reason: None,
            },
            delay: Duration::ZERO,
        }
    }

    pub fn fail(exit_code: i32) -> Self {
        Self {
            outcome: PodOutcome {
                phase: PodPhase::Failed,
                exit_code: Some(exit_code),
                start_time: None,
                end_time: None,
                reason: None,
            },
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct State {
    pvcs: HashSet<String>,
    jobs: HashMap<String, JobState>,
    pods: HashMap<String, Vec<String>>, // name -> label selector terms
    scripts: HashMap<String, PodScript>,
    logs: HashMap<String, String>,
    created_pods: Vec<String>,
    deleted_pvcs: Vec<String>,
    deleted_jobs: Vec<String>,
    deleted_pods: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
    job_hook: Option<mpsc::UnboundedSender<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive the name of every Job created on this cluster.
    pub fn with_job_hook(mut self, hook: mpsc::UnboundedSender<String>) -> Self {
        self.job_hook = Some(hook);
        self
    }

    pub async fn script_pod(&self, name: &str, script: PodScript) {
        self.state.lock().await.scripts.insert(name.to_string(), script);
    }

    pub async fn set_pod_logs(&self, name: &str, logs: &str) {
        self.state.lock().await.logs.insert(name.to_string(), logs.to_string());
    }

    pub async fn set_job_state(&self, name: &str, state: JobState) {
        self.state.lock().await.jobs.insert(name.to_string(), state);
    }

    pub async fn has_pvc(&self, name: &str) -> bool {
        self.state.lock().await.pvcs.contains(name)
    }

    /// Jobs currently present (created and not deleted).
    pub async fn active_jobs(&self) -> Vec<String> {
        self.state.lock().await.jobs.keys().cloned().collect()
    }

    /// Every pod ever created, in creation order.
    pub async fn created_pods(&self) -> Vec<String> {
        self.state.lock().await.created_pods.clone()
    }

    pub async fn deleted_pvcs(&self) -> Vec<String> {
        self.state.lock().await.deleted_pvcs.clone()
    }

    pub async fn deleted_jobs(&self) -> Vec<String> {
        self.state.lock().await.deleted_jobs.clone()
    }

    pub async fn deleted_pods(&self) -> Vec<String> {
        self.state.lock().await.deleted_pods.clone()
    }

    pub(super) async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<String> {
        let name = metadata_name(&pvc.metadata)?;
        let mut state = self.state.lock().await;
        if !state.pvcs.insert(name.clone()) {
            return Err(PoiesisError::Conflict(format!("pvc {name} already exists")));
        }
        Ok(name)
    }

    pub(super) async fn delete_pvc(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.pvcs.remove(name);
        state.deleted_pvcs.push(name.to_string());
        Ok(())
    }

    pub(super) async fn create_job(&self, job: &Job) -> Result<String> {
        let name = metadata_name(&job.metadata)?;
        {
            let mut state = self.state.lock().await;
            if state.jobs.contains_key(&name) {
                return Err(PoiesisError::Conflict(format!("job {name} already exists")));
            }
            state.jobs.insert(name.clone(), JobState::Active);
        }
        if let Some(hook) = &self.job_hook {
            let _ = hook.send(name.clone());
        }
        Ok(name)
    }

    pub(super) async fn delete_job(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.jobs.remove(name);
        state.deleted_jobs.push(name.to_string());
        Ok(())
    }

    pub(super) async fn job_state(&self, name: &str) -> Result<JobState> {
        Ok(self
            .state
            .lock()
            .await
            .jobs
            .get(name)
            .copied()
            .unwrap_or(JobState::NotFound))
    }

    pub(super) async fn create_pod(&self, pod: &Pod) -> Result<String> {
        let name = metadata_name(&pod.metadata)?;
        let labels: Vec<String> = pod
            .metadata
            .labels
            .iter()
            .flatten()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let mut state = self.state.lock().await;
        if state.pods.contains_key(&name) {
            return Err(PoiesisError::Conflict(format!("pod {name} already exists")));
        }
        state.pods.insert(name.clone(), labels);
        state.created_pods.push(name.clone());
        Ok(name)
    }

    pub(super) async fn delete_pod(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.pods.remove(name);
        state.deleted_pods.push(name.to_string());
        Ok(())
    }

    pub(super) async fn delete_pods_by_label(&self, selector: &str) -> Result<()> {
        let terms: Vec<&str> = selector.split(',').collect();
        let mut state = self.state.lock().await;
        let matched: Vec<String> = state
            .pods
            .iter()
            .filter(|(_, labels)| terms.iter().all(|t| labels.iter().any(|l| l == t)))
            .map(|(name, _)| name.clone())
            .collect();
        for name in matched {
            state.pods.remove(&name);
            state.deleted_pods.push(name);
        }
        Ok(())
    }

    pub(super) async fn await_pod_terminal(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<PodOutcome>> {
        let script = self
            .state
            .lock()
            .await
            .scripts
            .get(name)
            .cloned()
            .unwrap_or_else(PodScript::succeed);

        if let Some(limit) = timeout {
            if script.delay > limit {
                tokio::time::sleep(limit).await;
                return Ok(None);
            }
        }
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        // A pod deleted mid-wait (cancellation) resolves as failed.
        if !self.state.lock().await.pods.contains_key(name) {
            return Ok(Some(PodOutcome {
                phase: PodPhase::Failed,
                exit_code: Some(1),
                start_time: None,
                end_time: None,
                reason: Some("pod deleted".to_string()),
            }));
        }
        Ok(Some(script.outcome))
    }

    pub(super) async fn pod_logs(&self, name: &str) -> Result<String> {
        Ok(self
            .state
            .lock()
            .await
            .logs
            .get(name)
            .cloned()
            .unwrap_or_default())
    }
}

fn metadata_name(
    metadata: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
) -> Result<String> {
    metadata
        .name
        .clone()
        .ok_or_else(|| PoiesisError::SystemFailure("manifest is missing a name".into()))
}

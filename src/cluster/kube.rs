//! Kubernetes driver.
//!
//! Thin adapter over `kube-rs`, scoped to one namespace. 404s on delete
//! are success (the goal state is "absent"); 409s surface as conflicts so
//! the engine can treat duplicate deterministic names as ownership
//! signals. Pod completion is observed by polling: the wait also has to
//! notice hopeless image-pull states and honor an overall deadline, which
//! a plain watch does not express.

use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

use crate::constants::CRITICAL_WAITING_REASONS;
use crate::errors::{PoiesisError, Result};

use super::{JobState, PodOutcome, PodPhase};

#[derive(Clone)]
pub struct KubeDriver {
    jobs: Api<Job>,
    pods: Api<Pod>,
    pvcs: Api<PersistentVolumeClaim>,
    namespace: String,
}

impl std::fmt::Debug for KubeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeDriver")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl KubeDriver {
    /// Connect with in-cluster configuration, falling back to the local
    /// kubeconfig outside the cluster.
    pub async fn connect(namespace: &str) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| PoiesisError::ClusterUnavailable(e.to_string()))?;
        Ok(Self {
            jobs: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client.clone(), namespace),
            pvcs: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(super) async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<String> {
        let created = self.pvcs.create(&PostParams::default(), pvc).await?;
        let name = created.metadata.name.unwrap_or_default();
        info!(pvc = %name, namespace = %self.namespace, "created PVC");
        Ok(name)
    }

    pub(super) async fn delete_pvc(&self, name: &str) -> Result<()> {
        ignore_not_found(self.pvcs.delete(name, &DeleteParams::default()).await)?;
        info!(pvc = %name, "deleted PVC");
        Ok(())
    }

    pub(super) async fn create_job(&self, job: &Job) -> Result<String> {
        let created = self.jobs.create(&PostParams::default(), job).await?;
        let name = created.metadata.name.unwrap_or_default();
        info!(job = %name, namespace = %self.namespace, "created Job");
        Ok(name)
    }

    pub(super) async fn delete_job(&self, name: &str) -> Result<()> {
        ignore_not_found(self.jobs.delete(name, &DeleteParams::background()).await)?;
        info!(job = %name, "deleted Job");
        Ok(())
    }

    pub(super) async fn job_state(&self, name: &str) -> Result<JobState> {
        let job = match self.jobs.get(name).await {
            Ok(job) => job,
            Err(kube::Error::Api(resp)) if resp.code == 404 => return Ok(JobState::NotFound),
            Err(err) => return Err(err.into()),
        };
        let status = job.status.unwrap_or_default();
        if status.succeeded.unwrap_or(0) > 0 {
            Ok(JobState::Succeeded)
        } else if status.failed.unwrap_or(0) > 0 {
            Ok(JobState::Failed)
        } else {
            Ok(JobState::Active)
        }
    }

    pub(super) async fn create_pod(&self, pod: &Pod) -> Result<String> {
        let created = self.pods.create(&PostParams::default(), pod).await?;
        let name = created.metadata.name.unwrap_or_default();
        info!(pod = %name, namespace = %self.namespace, "created pod");
        Ok(name)
    }

    pub(super) async fn delete_pod(&self, name: &str) -> Result<()> {
        ignore_not_found(self.pods.delete(name, &DeleteParams::default()).await)?;
        info!(pod = %name, "deleted pod");
        Ok(())
    }

    pub(super) async fn delete_pods_by_label(&self, selector: &str) -> Result<()> {
        let pods = self
            .pods
            .list(&ListParams::default().labels(selector))
            .await?;
        for pod in pods {
            if let Some(name) = pod.metadata.name {
                self.delete_pod(&name).await?;
            }
        }
        Ok(())
    }

    pub(super) async fn await_pod_terminal(
        &self,
        name: &str,
        timeout: Option<Duration>,
        poll: Duration,
    ) -> Result<Option<PodOutcome>> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let pod = self.pods.get(name).await?;
            let outcome = outcome_of(&pod);
            if outcome.phase.is_terminal() || outcome.reason.is_some() {
                debug!(pod = %name, phase = ?outcome.phase, "pod resolved");
                return Ok(Some(outcome));
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    warn!(pod = %name, "pod did not resolve before the deadline");
                    return Ok(None);
                }
            }
            tokio::time::sleep(poll).await;
        }
    }

    pub(super) async fn pod_logs(&self, name: &str) -> Result<String> {
        Ok(self.pods.logs(name, &LogParams::default()).await?)
    }
}

fn ignore_not_found<T>(result: std::result::Result<T, kube::Error>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Condense a pod object into the snapshot the engine acts on.
fn outcome_of(pod: &Pod) -> PodOutcome {
    let status = pod.status.clone().unwrap_or_default();
    let phase = PodPhase::from(status.phase.as_deref().unwrap_or("Unknown"));

    let mut outcome = PodOutcome {
        phase,
        exit_code: None,
        start_time: None,
        end_time: None,
        reason: None,
    };

    // The scheduler reclaiming the node is its own failure class.
    if let Some(reason) = &status.reason {
        if reason == "Preempted" || reason == "Evicted" {
            outcome.phase = PodPhase::Failed;
            outcome.reason = Some(reason.clone());
        }
    }

    let container_statuses = status
        .init_container_statuses
        .into_iter()
        .flatten()
        .chain(status.container_statuses.into_iter().flatten());

    for cs in container_statuses {
        if let Some(state) = cs.state {
            if let Some(terminated) = state.terminated {
                outcome.exit_code = Some(terminated.exit_code);
                outcome.start_time = terminated.started_at.map(|t| t.0);
                outcome.end_time = terminated.finished_at.map(|t| t.0);
            } else if let Some(waiting) = state.waiting {
                // A pod pending on a broken image never resolves by itself.
                if let Some(reason) = waiting.reason {
                    if CRITICAL_WAITING_REASONS.contains(&reason.as_str()) {
                        outcome.phase = PodPhase::Failed;
                        outcome.reason = Some(reason);
                    }
                }
            }
        }
    }

    if outcome.phase == PodPhase::Failed && outcome.exit_code.is_none() {
        outcome.exit_code = Some(1);
    }
    outcome
}

//! Cluster driver: the Job/Pod/PVC operations the engine needs, scoped to
//! one namespace, independent of which orchestrator actually serves them.

pub mod fake;
pub mod kube;
pub mod manifests;
pub mod names;

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};

use crate::errors::Result;

pub use fake::FakeCluster;
pub use kube::KubeDriver;

/// Pod lifecycle phase as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl From<&str> for PodPhase {
    fn from(raw: &str) -> Self {
        match raw {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// Snapshot of a pod once it (or its wait) resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PodOutcome {
    pub phase: PodPhase,
    pub exit_code: Option<i32>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Failure reason when the container never ran (for example
    /// `ImagePullBackOff`).
    pub reason: Option<String>,
}

impl PodOutcome {
    pub fn succeeded(&self) -> bool {
        self.phase == PodPhase::Succeeded
    }
}

/// Coarse Job status used when reconciling a silent bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Active,
    Succeeded,
    Failed,
    NotFound,
}

/// The cluster driver, dispatching over the configured backend.
#[derive(Debug, Clone)]
pub enum ClusterDriver {
    Kube(KubeDriver),
    Fake(FakeCluster),
}

impl ClusterDriver {
    pub async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<String> {
        match self {
            Self::Kube(driver) => driver.create_pvc(pvc).await,
            Self::Fake(driver) => driver.create_pvc(pvc).await,
        }
    }

    /// Delete a PVC; a missing PVC is success.
    pub async fn delete_pvc(&self, name: &str) -> Result<()> {
        match self {
            Self::Kube(driver) => driver.delete_pvc(name).await,
            Self::Fake(driver) => driver.delete_pvc(name).await,
        }
    }

    pub async fn create_job(&self, job: &Job) -> Result<String> {
        match self {
            Self::Kube(driver) => driver.create_job(job).await,
            Self::Fake(driver) => driver.create_job(job).await,
        }
    }

    /// Delete a Job and its pods; a missing Job is success.
    pub async fn delete_job(&self, name: &str) -> Result<()> {
        match self {
            Self::Kube(driver) => driver.delete_job(name).await,
            Self::Fake(driver) => driver.delete_job(name).await,
        }
    }

    pub async fn job_state(&self, name: &str) -> Result<JobState> {
        match self {
            Self::Kube(driver) => driver.job_state(name).await,
            Self::Fake(driver) => driver.job_state(name).await,
        }
    }

    pub async fn create_pod(&self, pod: &Pod) -> Result<String> {
        match self {
            Self::Kube(driver) => driver.create_pod(pod).await,
            Self::Fake(driver) => driver.create_pod(pod).await,
        }
    }

    /// Delete a pod; a missing pod is success.
    pub async fn delete_pod(&self, name: &str) -> Result<()> {
        match self {
            Self::Kube(driver) => driver.delete_pod(name).await,
            Self::Fake(driver) => driver.delete_pod(name).await,
        }
    }

    pub async fn delete_pods_by_label(&self, selector: &str) -> Result<()> {
        match self {
            Self::Kube(driver) => driver.delete_pods_by_label(selector).await,
            Self::Fake(driver) => driver.delete_pods_by_label(selector).await,
        }
    }

    /// Wait until the pod reaches a terminal phase (or a hopeless waiting
    /// state), probing every `poll`. Returns `None` when `timeout` elapses
    /// first; `timeout = None` waits forever.
    pub async fn await_pod_terminal(
        &self,
        name: &str,
        timeout: Option<Duration>,
        poll: Duration,
    ) -> Result<Option<PodOutcome>> {
        match self {
            Self::Kube(driver) => driver.await_pod_terminal(name, timeout, poll).await,
            Self::Fake(driver) => driver.await_pod_terminal(name, timeout).await,
        }
    }

    /// Fetch a pod's (combined) log stream.
    pub async fn pod_logs(&self, name: &str) -> Result<String> {
        match self {
            Self::Kube(driver) => driver.pod_logs(name).await,
            Self::Fake(driver) => driver.pod_logs(name).await,
        }
    }
}

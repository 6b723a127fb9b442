//! Deterministic resource names and labels.
//!
//! Every resource the engine creates is named `<phase>-<taskid>[-<n>]`;
//! task ids are lowercase UUIDv4 strings, so the results are valid DNS
//! labels well under the 63-character limit. Determinism is what turns a
//! name collision into a meaningful conflict signal.

use std::collections::BTreeMap;

use crate::constants::{
    PVC_PREFIX, TE_PREFIX, TEXAM_PREFIX, TIF_PREFIX, TOF_PREFIX, TORC_PREFIX,
};

pub fn torc_job(task_id: &str) -> String {
    format!("{TORC_PREFIX}-{task_id}")
}

pub fn tif_job(task_id: &str) -> String {
    format!("{TIF_PREFIX}-{task_id}")
}

pub fn texam_job(task_id: &str) -> String {
    format!("{TEXAM_PREFIX}-{task_id}")
}

pub fn tof_job(task_id: &str) -> String {
    format!("{TOF_PREFIX}-{task_id}")
}

pub fn pvc(task_id: &str) -> String {
    format!("{PVC_PREFIX}-{task_id}")
}

pub fn executor_pod(task_id: &str, index: usize) -> String {
    format!("{TE_PREFIX}-{task_id}-{index}")
}

/// Standard labels for an engine-created resource.
pub fn labels(
    component: &str,
    task_id: &str,
    name: &str,
    parent: Option<&str>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        ("app.kubernetes.io/component".to_string(), component.to_string()),
        ("app.kubernetes.io/resource-name".to_string(), name.to_string()),
        ("tes-task-id".to_string(), task_id.to_string()),
    ]);
    if let Some(parent) = parent {
        labels.insert("app.kubernetes.io/part-of".to_string(), parent.to_string());
    }
    labels
}

/// Selector matching every executor pod of a task.
pub fn executor_selector(task_id: &str) -> String {
    format!(
        "app.kubernetes.io/component={TE_PREFIX},app.kubernetes.io/part-of={}",
        texam_job(task_id)
    )
}

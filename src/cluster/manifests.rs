//! Manifest builders for everything the engine creates on the cluster.
//!
//! Manifests are assembled as JSON and deserialized into the typed
//! objects, which keeps optional sections (security contexts, TTLs,
//! service accounts) composable. Keys follow the Kubernetes wire format.

use std::collections::BTreeSet;
use std::path::Path;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use serde_json::{json, Value};

use crate::config::Config;
use crate::constants::{COMMON_PVC_VOLUME_NAME, FILER_PVC_PATH, PVC_DEFAULT_DISK_SIZE};
use crate::errors::{PoiesisError, Result};
use crate::models::{Executor, Task};

use super::names;

/// Which engine workload a Job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineJobKind {
    Torc,
    Tif,
    Texam,
    Tof,
}

impl EngineJobKind {
    pub fn job_name(&self, task_id: &str) -> String {
        match self {
            Self::Torc => names::torc_job(task_id),
            Self::Tif => names::tif_job(task_id),
            Self::Texam => names::texam_job(task_id),
            Self::Tof => names::tof_job(task_id),
        }
    }

    fn subcommand(&self) -> &'static str {
        match self {
            Self::Torc => "torc",
            Self::Tif => "tif",
            Self::Texam => "texam",
            Self::Tof => "tof",
        }
    }

    fn component(&self) -> &'static str {
        match self {
            Self::Torc => crate::constants::TORC_PREFIX,
            Self::Tif => crate::constants::TIF_PREFIX,
            Self::Texam => crate::constants::TEXAM_PREFIX,
            Self::Tof => crate::constants::TOF_PREFIX,
        }
    }

    /// The filers move bytes in and out of the task workspace.
    fn mounts_pvc(&self) -> bool {
        matches!(self, Self::Tif | Self::Tof)
    }

    /// Workloads that create further cluster resources.
    fn needs_service_account(&self) -> bool {
        matches!(self, Self::Torc | Self::Texam)
    }

    fn parent(&self, task_id: &str) -> Option<String> {
        match self {
            Self::Torc => Some("poiesis-api".to_string()),
            _ => Some(names::torc_job(task_id)),
        }
    }
}

/// The per-task scratch volume claim.
pub fn pvc_manifest(cfg: &Config, task_id: &str, disk_gb: Option<f64>) -> Result<PersistentVolumeClaim> {
    let name = names::pvc(task_id);
    let storage = match disk_gb {
        Some(gb) => format!("{gb}Gi"),
        None => PVC_DEFAULT_DISK_SIZE.to_string(),
    };
    let mut spec = json!({
        "accessModes": [cfg.kubernetes.pvc_access_mode.as_deref().unwrap_or("ReadWriteOnce")],
        "resources": { "requests": { "storage": storage } },
    });
    if let Some(class) = &cfg.kubernetes.pvc_storage_class {
        spec["storageClassName"] = json!(class);
    }
    let manifest = json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {
            "name": name,
            "labels": names::labels("pvc", task_id, &name, Some(&names::torc_job(task_id))),
        },
        "spec": spec,
    });
    Ok(serde_json::from_value(manifest)?)
}

/// A Job running one engine workload for one task.
pub fn engine_job(cfg: &Config, kind: EngineJobKind, task_id: &str) -> Result<Job> {
    let name = kind.job_name(task_id);
    let mut container = json!({
        "name": name,
        "image": cfg.kubernetes.image,
        "imagePullPolicy": cfg.kubernetes.image_pull_policy,
        "command": ["poiesis", kind.subcommand()],
        "args": ["--task-id", task_id],
        "env": workload_env(cfg),
    });

    let mut mounts: Vec<Value> = Vec::new();
    let mut volumes: Vec<Value> = Vec::new();
    if kind.mounts_pvc() {
        mounts.push(json!({
            "name": COMMON_PVC_VOLUME_NAME,
            "mountPath": FILER_PVC_PATH,
        }));
        volumes.push(json!({
            "name": COMMON_PVC_VOLUME_NAME,
            "persistentVolumeClaim": { "claimName": names::pvc(task_id) },
        }));
    }
    if let Some((volume, mount)) = security_context_volume(cfg)? {
        volumes.push(volume);
        mounts.push(mount);
    }
    if !mounts.is_empty() {
        container["volumeMounts"] = Value::Array(mounts);
    }
    if let Some(sc) = infrastructure_container_security_context(cfg)? {
        container["securityContext"] = sc;
    }

    let mut pod_spec = json!({
        "restartPolicy": cfg.kubernetes.restart_policy,
        "containers": [container],
    });
    if !volumes.is_empty() {
        pod_spec["volumes"] = Value::Array(volumes);
    }
    if kind.needs_service_account() {
        if let Some(account) = &cfg.kubernetes.service_account {
            pod_spec["serviceAccountName"] = json!(account);
        }
    }
    if let Some(sc) = infrastructure_pod_security_context(cfg)? {
        pod_spec["securityContext"] = sc;
    }

    let mut spec = json!({
        "backoffLimit": 0,
        "template": { "spec": pod_spec },
    });
    if let Some(ttl) = cfg.kubernetes.job_ttl_seconds {
        spec["ttlSecondsAfterFinished"] = json!(ttl);
    }

    let manifest = json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": name,
            "labels": names::labels(
                kind.component(),
                task_id,
                &name,
                kind.parent(task_id).as_deref(),
            ),
        },
        "spec": spec,
    });
    Ok(serde_json::from_value(manifest)?)
}

/// A pod running one task executor against the shared PVC.
pub fn executor_pod(
    cfg: &Config,
    task: &Task,
    index: usize,
    executor: &Executor,
    shell_command: &str,
) -> Result<Pod> {
    let task_id = task.id();
    let name = names::executor_pod(task_id, index);
    let parent = names::texam_job(task_id);

    let mut container = json!({
        "name": name,
        "image": executor.image,
        "command": ["/bin/sh", "-c"],
        "args": [shell_command],
        "volumeMounts": executor_mounts(task),
    });
    if let Some(workdir) = &executor.workdir {
        container["workingDir"] = json!(workdir);
    }
    if let Some(env) = &executor.env {
        let mut pairs: Vec<(&String, &String)> = env.iter().collect();
        pairs.sort();
        container["env"] = Value::Array(
            pairs
                .into_iter()
                .map(|(k, v)| json!({ "name": k, "value": v }))
                .collect(),
        );
    }
    if let Some(resources) = executor_resources(task) {
        container["resources"] = resources;
    }
    if let Some(sc) = executor_container_security_context(cfg)? {
        container["securityContext"] = sc;
    }

    let mut pod_spec = json!({
        "restartPolicy": "Never",
        "containers": [container],
        "volumes": [{
            "name": COMMON_PVC_VOLUME_NAME,
            "persistentVolumeClaim": { "claimName": names::pvc(task_id) },
        }],
    });
    if let Some(sc) = executor_pod_security_context(cfg)? {
        pod_spec["securityContext"] = sc;
    }

    let manifest = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "labels": names::labels(crate::constants::TE_PREFIX, task_id, &name, Some(&parent)),
        },
        "spec": pod_spec,
    });
    Ok(serde_json::from_value(manifest)?)
}

/// First path components of everything the executors read or write; each
/// becomes a subpath mount of the task PVC so executor pods see the same
/// absolute paths the filers materialized under the PVC root.
fn mount_roots(task: &Task) -> BTreeSet<String> {
    let mut roots = BTreeSet::new();
    let paths = task
        .inputs
        .iter()
        .map(|i| i.path.as_str())
        .chain(task.outputs.iter().map(|o| o.path.as_str()))
        .chain(task.volumes.iter().map(String::as_str));
    for path in paths {
        if let Some(root) = first_component(path) {
            roots.insert(root);
        }
    }
    roots
}

fn first_component(path: &str) -> Option<String> {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string())
}

fn executor_mounts(task: &Task) -> Vec<Value> {
    mount_roots(task)
        .into_iter()
        .map(|root| {
            json!({
                "name": COMMON_PVC_VOLUME_NAME,
                "mountPath": format!("/{root}"),
                "subPath": root,
            })
        })
        .collect()
}

fn executor_resources(task: &Task) -> Option<Value> {
    let resources = task.resources.as_ref()?;
    let mut requests = serde_json::Map::new();
    if let Some(cpu) = resources.cpu_cores {
        requests.insert("cpu".to_string(), json!(cpu.to_string()));
    }
    if let Some(ram) = resources.ram_gb {
        requests.insert("memory".to_string(), json!(format!("{ram}Gi")));
    }
    if requests.is_empty() {
        return None;
    }
    let requests = Value::Object(requests);
    Some(json!({ "requests": requests, "limits": requests }))
}

/// Environment handed to every engine workload Job. With a core ConfigMap
/// configured the values are references resolved by the cluster; without
/// one (local development) the launcher's own configuration is inlined.
fn workload_env(cfg: &Config) -> Vec<Value> {
    let mut env = Vec::new();
    match &cfg.kubernetes.core_configmap {
        Some(cm) => {
            for key in [
                "LOG_LEVEL",
                "POIESIS_ENV",
                "POIESIS_K8S_NAMESPACE",
                "POIESIS_SERVICE_ACCOUNT_NAME",
                "POIESIS_IMAGE",
                "POIESIS_RESTART_POLICY",
                "POIESIS_IMAGE_PULL_POLICY",
                "POIESIS_JOB_TTL",
                "POIESIS_PVC_ACCESS_MODE",
                "POIESIS_PVC_STORAGE_CLASS",
                "MONITOR_TIMEOUT_SECONDS",
                "MESSAGE_BROKER_HOST",
                "MESSAGE_BROKER_PORT",
                "MONGODB_HOST",
                "MONGODB_PORT",
                "MONGODB_DATABASE",
                "MONGODB_MAX_POOL_SIZE",
                "S3_URL",
            ] {
                env.push(env_from_configmap(cm, key, true));
            }
            env.push(env_literal("POIESIS_CORE_CONFIGMAP_NAME", cm));
            if let Some(secret) = &cfg.kubernetes.mongo_secret {
                env.push(env_literal("POIESIS_MONGO_SECRET_NAME", secret));
                env.push(env_from_secret("MONGODB_USER", secret, true));
                env.push(env_from_secret("MONGODB_PASSWORD", secret, true));
            }
            if let Some(secret) = &cfg.kubernetes.redis_secret {
                env.push(env_literal("POIESIS_REDIS_SECRET_NAME", secret));
                env.push(env_from_secret("MESSAGE_BROKER_PASSWORD", secret, true));
            }
            if let Some(secret) = &cfg.kubernetes.s3_secret {
                env.push(env_literal("POIESIS_S3_SECRET_NAME", secret));
                env.push(env_from_secret("AWS_ACCESS_KEY_ID", secret, true));
                env.push(env_from_secret("AWS_SECRET_ACCESS_KEY", secret, true));
            }
        }
        None => {
            env.push(env_literal("LOG_LEVEL", &cfg.log_level));
            env.push(env_literal("POIESIS_ENV", &cfg.environment));
            env.push(env_literal("POIESIS_K8S_NAMESPACE", &cfg.kubernetes.namespace));
            env.push(env_literal("POIESIS_IMAGE", &cfg.kubernetes.image));
            env.push(env_literal(
                "MONITOR_TIMEOUT_SECONDS",
                &cfg.monitor_timeout
                    .map(|t| t.as_secs())
                    .unwrap_or(0)
                    .to_string(),
            ));
            if let Some(account) = &cfg.kubernetes.service_account {
                env.push(env_literal("POIESIS_SERVICE_ACCOUNT_NAME", account));
            }
            env.push(env_literal("MESSAGE_BROKER_HOST", &cfg.bus.host));
            env.push(env_literal("MESSAGE_BROKER_PORT", &cfg.bus.port.to_string()));
            env.push(env_literal("MONGODB_HOST", &cfg.mongo.host));
            env.push(env_literal("MONGODB_PORT", &cfg.mongo.port.to_string()));
            env.push(env_literal("MONGODB_DATABASE", &cfg.mongo.database));
            if let Some(url) = &cfg.s3.url {
                env.push(env_literal("S3_URL", url));
            }
        }
    }

    let sc = &cfg.security_context;
    env.push(env_literal(
        "POIESIS_INFRASTRUCTURE_SECURITY_CONTEXT_ENABLED",
        &sc.infrastructure_enabled.to_string(),
    ));
    env.push(env_literal(
        "POIESIS_EXECUTOR_SECURITY_CONTEXT_ENABLED",
        &sc.executor_enabled.to_string(),
    ));
    if let Some(path) = &sc.path {
        env.push(env_literal(
            "POIESIS_SECURITY_CONTEXT_PATH",
            &path.display().to_string(),
        ));
    }
    if let Some(cm) = &sc.configmap {
        env.push(env_literal("POIESIS_SECURITY_CONTEXT_CONFIGMAP_NAME", cm));
    }
    env
}

fn env_literal(name: &str, value: &str) -> Value {
    json!({ "name": name, "value": value })
}

fn env_from_configmap(configmap: &str, key: &str, optional: bool) -> Value {
    json!({
        "name": key,
        "valueFrom": {
            "configMapKeyRef": { "name": configmap, "key": key, "optional": optional }
        }
    })
}

fn env_from_secret(key: &str, secret: &str, optional: bool) -> Value {
    json!({
        "name": key,
        "valueFrom": {
            "secretKeyRef": { "name": secret, "key": key, "optional": optional }
        }
    })
}

fn security_context_volume(cfg: &Config) -> Result<Option<(Value, Value)>> {
    let sc = &cfg.security_context;
    if !sc.infrastructure_enabled && !sc.executor_enabled {
        return Ok(None);
    }
    let configmap = sc.configmap.as_ref().ok_or_else(|| {
        PoiesisError::SystemFailure("security context configmap name is not set".into())
    })?;
    let path = sc.path.as_ref().ok_or_else(|| {
        PoiesisError::SystemFailure("security context path is not set".into())
    })?;
    let volume = json!({
        "name": configmap,
        "configMap": { "name": configmap },
    });
    let mount = json!({
        "name": configmap,
        "mountPath": path.display().to_string(),
        "readOnly": true,
    });
    Ok(Some((volume, mount)))
}

fn read_security_context(cfg: &Config, filename: &str) -> Result<Value> {
    let path = cfg.security_context.path.as_ref().ok_or_else(|| {
        PoiesisError::SystemFailure("security context path is not set".into())
    })?;
    let file = Path::new(path).join(filename);
    let raw = std::fs::read_to_string(&file).map_err(|e| {
        PoiesisError::SystemFailure(format!(
            "failed to read security context {}: {e}",
            file.display()
        ))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        PoiesisError::SystemFailure(format!(
            "invalid security context {}: {e}",
            file.display()
        ))
    })
}

pub fn infrastructure_pod_security_context(cfg: &Config) -> Result<Option<Value>> {
    if !cfg.security_context.infrastructure_enabled {
        return Ok(None);
    }
    read_security_context(cfg, "infrastructure_pod_security_context.json").map(Some)
}

pub fn infrastructure_container_security_context(cfg: &Config) -> Result<Option<Value>> {
    if !cfg.security_context.infrastructure_enabled {
        return Ok(None);
    }
    read_security_context(cfg, "infrastructure_container_security_context.json").map(Some)
}

pub fn executor_pod_security_context(cfg: &Config) -> Result<Option<Value>> {
    if !cfg.security_context.executor_enabled {
        return Ok(None);
    }
    read_security_context(cfg, "executor_pod_security_context.json").map(Some)
}

pub fn executor_container_security_context(cfg: &Config) -> Result<Option<Value>> {
    if !cfg.security_context.executor_enabled {
        return Ok(None);
    }
    read_security_context(cfg, "executor_container_security_context.json").map(Some)
}

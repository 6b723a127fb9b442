//! End-to-end lifecycle scenarios: the real orchestrator, filers and
//! executor monitor wired to the in-memory store/bus and the fake
//! cluster. A dispatcher task plays the cluster scheduler: whenever a
//! phase Job is created it runs the matching workload in-process.

use std::time::Duration;

use tokio::sync::mpsc;

use poiesis::bus::{MemoryBus, MessageBus};
use poiesis::cluster::fake::PodScript;
use poiesis::cluster::{names, ClusterDriver, FakeCluster, JobState};
use poiesis::config::Config;
use poiesis::filer::{Filer, FilerKind};
use poiesis::models::{Executor, Input, IoType, Task, TaskDocument, TaskState};
use poiesis::orchestrator::Torc;
use poiesis::store::{MemoryStore, TaskStore};
use poiesis::texam::Texam;
use poiesis::transfer::SchemeRegistry;

/// How the dispatcher treats the input filer Job.
#[derive(Clone, Copy, PartialEq)]
enum TifMode {
    Run,
    /// Mark the Job succeeded but never publish: exercises the
    /// store/cluster reconcile path of a silent bus.
    SilentSuccess,
    /// Mark the Job failed and stay silent.
    SilentFail,
}

struct Harness {
    store: TaskStore,
    bus: MessageBus,
    cluster: ClusterDriver,
    fake: FakeCluster,
    torc_config: Config,
    _workspace: tempfile::TempDir,
}

impl Harness {
    fn new(tif_mode: TifMode, torc_config: Config, phase_config: Config) -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let mut torc_config = torc_config;
        let mut phase_config = phase_config;
        torc_config.filer.workspace_root = workspace.path().to_path_buf();
        phase_config.filer.workspace_root = workspace.path().to_path_buf();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let fake = FakeCluster::new().with_job_hook(tx);
        let cluster = ClusterDriver::Fake(fake.clone());
        let store = TaskStore::Memory(MemoryStore::new());
        let bus = MessageBus::Memory(MemoryBus::new());

        // The scheduler: run each phase Job in-process as it appears.
        {
            let store = store.clone();
            let bus = bus.clone();
            let cluster = cluster.clone();
            let fake = fake.clone();
            let config = phase_config;
            tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    let Some((kind, task_id)) = job.split_once('-') else { continue };
                    let task_id = task_id.to_string();
                    match (kind, tif_mode) {
                        ("tif", TifMode::SilentSuccess) => {
                            fake.set_job_state(&job, JobState::Succeeded).await;
                        }
                        ("tif", TifMode::SilentFail) => {
                            fake.set_job_state(&job, JobState::Failed).await;
                        }
                        ("tif", TifMode::Run) => {
                            let filer = Filer::new(
                                store.clone(),
                                bus.clone(),
                                SchemeRegistry::default(),
                                &config,
                                task_id,
                            );
                            tokio::spawn(async move {
                                let _ = filer.run(FilerKind::Input).await;
                            });
                        }
                        ("tof", _) => {
                            let filer = Filer::new(
                                store.clone(),
                                bus.clone(),
                                SchemeRegistry::default(),
                                &config,
                                task_id,
                            );
                            tokio::spawn(async move {
                                let _ = filer.run(FilerKind::Output).await;
                            });
                        }
                        ("texam", _) => {
                            let texam = Texam::new(
                                store.clone(),
                                bus.clone(),
                                cluster.clone(),
                                config.clone(),
                                task_id,
                            );
                            tokio::spawn(async move {
                                let _ = texam.run().await;
                            });
                        }
                        _ => {}
                    }
                }
            });
        }

        Self {
            store,
            bus,
            cluster,
            fake,
            torc_config,
            _workspace: workspace,
        }
    }

    fn standard() -> Self {
        Self::new(TifMode::Run, Config::local(), Config::local())
    }

    async fn submit(&self, task: Task) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        let task = Task {
            id: Some(id.clone()),
            state: TaskState::Queued,
            creation_time: Some(now),
            ..task
        };
        self.store
            .create(TaskDocument {
                user_id: "alice".into(),
                created_at_ms: now.timestamp_millis(),
                task,
            })
            .await
            .unwrap();
        id
    }

    async fn run_torc(&self, id: &str) {
        let torc = Torc::new(
            self.store.clone(),
            self.bus.clone(),
            self.cluster.clone(),
            self.torc_config.clone(),
            id.to_string(),
        );
        torc.run().await.unwrap();
    }

    async fn task(&self, id: &str) -> Task {
        self.store.get(id, "alice").await.unwrap()
    }

    async fn assert_cluster_clean(&self, id: &str) {
        assert!(!self.fake.has_pvc(&names::pvc(id)).await, "pvc survived");
        assert!(
            self.fake.active_jobs().await.is_empty(),
            "jobs survived: {:?}",
            self.fake.active_jobs().await
        );
    }
}

fn executor(command: &[&str]) -> Executor {
    Executor {
        image: "busybox".into(),
        command: command.iter().map(|s| s.to_string()).collect(),
        workdir: None,
        stdin: None,
        stdout: None,
        stderr: None,
        env: None,
        ignore_error: None,
    }
}

fn content_input(content: &str, path: &str) -> Input {
    Input {
        name: None,
        description: None,
        url: None,
        path: path.into(),
        io_type: IoType::File,
        content: Some(content.into()),
        streamable: None,
    }
}

// S1: inline content in, one executor, straight to COMPLETE.
#[tokio::test]
async fn simple_echo_completes() {
    let h = Harness::standard();
    let id = h
        .submit(Task {
            inputs: vec![content_input("hi", "/data/f")],
            executors: vec![executor(&["/bin/cat", "/data/f"])],
            ..Task::default()
        })
        .await;
    h.fake.set_pod_logs(&names::executor_pod(&id, 0), "hi").await;

    h.run_torc(&id).await;

    let task = h.task(&id).await;
    assert_eq!(task.state, TaskState::Complete);
    let log = task.attempt_log().unwrap();
    assert!(log.start_time.is_some() && log.end_time.is_some());
    assert_eq!(log.logs.len(), 1);
    assert_eq!(log.logs[0].exit_code, Some(0));
    assert!(log.logs[0].stdout.as_deref().unwrap().contains("hi"));

    // The input filer materialized the content in the workspace.
    let staged = h.torc_config.filer.workspace_root.join("data/f");
    assert_eq!(std::fs::read_to_string(staged).unwrap(), "hi");

    h.assert_cluster_clean(&id).await;
}

// S3: a failing executor stops the pipeline.
#[tokio::test]
async fn executor_failure_stops_pipeline() {
    let h = Harness::standard();
    let id = h
        .submit(Task {
            executors: vec![executor(&["/bin/false"]), executor(&["/bin/true"])],
            ..Task::default()
        })
        .await;
    h.fake
        .script_pod(&names::executor_pod(&id, 0), PodScript::fail(1))
        .await;

    h.run_torc(&id).await;

    let task = h.task(&id).await;
    assert_eq!(task.state, TaskState::ExecutorError);
    let log = task.attempt_log().unwrap();
    assert_eq!(log.logs.len(), 1, "only the failing executor is logged");
    assert_eq!(log.logs[0].exit_code, Some(1));

    // The second executor never launched.
    let pods = h.fake.created_pods().await;
    assert_eq!(pods, vec![names::executor_pod(&id, 0)]);

    h.assert_cluster_clean(&id).await;
}

// S4: ignore_error lets the pipeline continue.
#[tokio::test]
async fn ignore_error_continues_pipeline() {
    let h = Harness::standard();
    let mut failing = executor(&["/bin/false"]);
    failing.ignore_error = Some(true);
    let id = h
        .submit(Task {
            executors: vec![failing, executor(&["/bin/true"])],
            ..Task::default()
        })
        .await;
    h.fake
        .script_pod(&names::executor_pod(&id, 0), PodScript::fail(1))
        .await;

    h.run_torc(&id).await;

    let task = h.task(&id).await;
    assert_eq!(task.state, TaskState::Complete);
    let log = task.attempt_log().unwrap();
    assert_eq!(log.logs.len(), 2);
    assert_eq!(log.logs[0].exit_code, Some(1));
    assert_eq!(log.logs[1].exit_code, Some(0));

    h.assert_cluster_clean(&id).await;
}

// S5: cancel mid-run resolves to CANCELED with nothing left behind.
#[tokio::test]
async fn cancel_during_run_tears_down() {
    let h = Harness::standard();
    let id = h
        .submit(Task {
            executors: vec![executor(&["/bin/sleep", "60"]), executor(&["/bin/true"])],
            ..Task::default()
        })
        .await;
    h.fake
        .script_pod(
            &names::executor_pod(&id, 0),
            PodScript::succeed().with_delay(Duration::from_millis(300)),
        )
        .await;

    let torc_task = {
        let h_store = h.store.clone();
        let torc = Torc::new(
            h_store,
            h.bus.clone(),
            h.cluster.clone(),
            h.torc_config.clone(),
            id.clone(),
        );
        tokio::spawn(async move { torc.run().await })
    };

    // Let the first executor start, then cancel.
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.store.request_cancel(&id, "alice").await.unwrap();

    torc_task.await.unwrap().unwrap();

    let task = h.task(&id).await;
    assert_eq!(task.state, TaskState::Canceled);
    let log = task.attempt_log().unwrap();
    assert!(log.logs.len() <= 1, "at most one partial executor log");

    h.assert_cluster_clean(&id).await;
}

// S2 with the file:// scheme standing in for live object storage:
// staged input, wildcard output collection, per-file output logs.
#[tokio::test]
async fn file_scheme_round_trip_records_output_logs() {
    let h = Harness::standard();
    let source_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let source = source_dir.path().join("f");
    std::fs::write(&source, b"X").unwrap();

    let id = h
        .submit(Task {
            inputs: vec![Input {
                name: None,
                description: None,
                url: Some(format!("file://{}", source.display())),
                path: "/data/f".into(),
                io_type: IoType::File,
                content: None,
                streamable: None,
            }],
            outputs: vec![poiesis::models::Output {
                name: None,
                description: None,
                url: format!("file://{}", out_dir.path().display()),
                path: "/data/*".into(),
                path_prefix: Some("/data".into()),
                io_type: IoType::File,
            }],
            executors: vec![executor(&["/bin/cat", "/data/f"])],
            ..Task::default()
        })
        .await;

    h.run_torc(&id).await;

    let task = h.task(&id).await;
    assert_eq!(task.state, TaskState::Complete);
    assert_eq!(std::fs::read(out_dir.path().join("f")).unwrap(), b"X");

    let outputs = &task.attempt_log().unwrap().outputs;
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].path, "/data/f");
    assert_eq!(outputs[0].size_bytes, 1);
    assert!(outputs[0].url.ends_with("/f"));

    h.assert_cluster_clean(&id).await;
}

// A per-step deadline turns a stuck executor into SYSTEM_ERROR.
#[tokio::test]
async fn executor_timeout_is_a_system_error() {
    let mut phase_config = Config::local();
    phase_config.monitor_timeout = Some(Duration::from_millis(200));
    let h = Harness::new(TifMode::Run, Config::local(), phase_config);

    let id = h
        .submit(Task {
            executors: vec![executor(&["/bin/sleep", "3600"])],
            ..Task::default()
        })
        .await;
    h.fake
        .script_pod(
            &names::executor_pod(&id, 0),
            PodScript::succeed().with_delay(Duration::from_secs(30)),
        )
        .await;

    h.run_torc(&id).await;

    let task = h.task(&id).await;
    assert_eq!(task.state, TaskState::SystemError);
    let log = task.attempt_log().unwrap();
    assert_eq!(log.logs.len(), 1);
    assert_ne!(log.logs[0].exit_code, Some(0));
    assert!(log
        .system_logs
        .iter()
        .any(|line| line.contains("timed out")));

    h.assert_cluster_clean(&id).await;
}

// A silent bus is reconciled against the cluster: a succeeded Job counts
// as phase success even when no message ever arrives.
#[tokio::test]
async fn silent_bus_reconciles_from_job_status() {
    let mut torc_config = Config::local();
    torc_config.monitor_timeout = Some(Duration::from_secs(1));
    let h = Harness::new(TifMode::SilentSuccess, torc_config, Config::local());

    let id = h
        .submit(Task {
            inputs: vec![content_input("ignored", "/data/f")],
            executors: vec![executor(&["/bin/true"])],
            ..Task::default()
        })
        .await;

    h.run_torc(&id).await;
    assert_eq!(h.task(&id).await.state, TaskState::Complete);
}

// ...and a failed Job with no message fails the phase.
#[tokio::test]
async fn silent_failed_job_is_a_system_error() {
    let mut torc_config = Config::local();
    torc_config.monitor_timeout = Some(Duration::from_secs(1));
    let h = Harness::new(TifMode::SilentFail, torc_config, Config::local());

    let id = h
        .submit(Task {
            inputs: vec![content_input("ignored", "/data/f")],
            executors: vec![executor(&["/bin/true"])],
            ..Task::default()
        })
        .await;

    h.run_torc(&id).await;

    let task = h.task(&id).await;
    assert_eq!(task.state, TaskState::SystemError);
    h.assert_cluster_clean(&id).await;
}

// At-most-once claim: a task already past QUEUED is not re-run.
#[tokio::test]
async fn claimed_tasks_are_not_rerun() {
    let h = Harness::standard();
    let id = h
        .submit(Task {
            executors: vec![executor(&["/bin/true"])],
            ..Task::default()
        })
        .await;
    h.store
        .transition(&id, TaskState::Queued, TaskState::Initializing)
        .await
        .unwrap();

    h.run_torc(&id).await;

    // The second orchestrator backed off: no PVC, no phase jobs.
    assert!(!h.fake.has_pvc(&names::pvc(&id)).await);
    assert!(h.fake.created_pods().await.is_empty());
    assert_eq!(
        h.task(&id).await.state,
        TaskState::Initializing,
        "state untouched by the losing attempt"
    );
}

// Tasks with no inputs and no outputs skip the filer phases entirely.
#[tokio::test]
async fn filer_phases_are_skipped_without_declarations() {
    let h = Harness::standard();
    let id = h
        .submit(Task {
            executors: vec![executor(&["/bin/true"])],
            ..Task::default()
        })
        .await;

    h.run_torc(&id).await;

    assert_eq!(h.task(&id).await.state, TaskState::Complete);
    assert_eq!(
        h.fake.created_pods().await,
        vec![names::executor_pod(&id, 0)]
    );
    h.assert_cluster_clean(&id).await;
}

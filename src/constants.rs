//! Fixed names shared by every workload.
//!
//! Resource names derived from these prefixes must stay within the 63
//! character limit Kubernetes puts on object names; task ids are UUIDv4
//! strings (36 chars), which leaves room for every prefix below.

/// Job name prefix for the per-task orchestrator.
pub const TORC_PREFIX: &str = "torc";
/// Job name prefix for the input filer.
pub const TIF_PREFIX: &str = "tif";
/// Job name prefix for the executor monitor.
pub const TEXAM_PREFIX: &str = "texam";
/// Job name prefix for the output filer.
pub const TOF_PREFIX: &str = "tof";
/// Pod name prefix for a single task executor.
pub const TE_PREFIX: &str = "te";
/// Name prefix for the per-task scratch volume claim.
pub const PVC_PREFIX: &str = "pvc";

/// Volume name under which the task PVC is mounted into pods.
pub const COMMON_PVC_VOLUME_NAME: &str = "task-pvc-volume";

/// Where the filers mount the task PVC. Declared task paths are
/// materialized verbatim beneath this root, so `/data/f` lives at
/// `/transfer/data/f` inside a filer pod.
pub const FILER_PVC_PATH: &str = "/transfer";

/// PVC size used when the task requests no `disk_gb`.
pub const PVC_DEFAULT_DISK_SIZE: &str = "1Gi";

/// Upper bound on persisted executor stdout/stderr, per stream.
/// Published through `service-info.storage`.
pub const MAX_LOG_BYTES: usize = 128 * 1024;

/// Document-store collection holding task documents.
pub const TASK_COLLECTION: &str = "tasks";

/// Largest accepted `page_size` for task listings; larger values clamp.
pub const MAX_PAGE_SIZE: i64 = 2048;
/// `page_size` applied when the client sends none.
pub const DEFAULT_PAGE_SIZE: i64 = 256;

/// Interval between store/cluster reconciliation probes while waiting on
/// the bus or on a pod to reach a terminal phase.
pub const POLL_INTERVAL_SECONDS: u64 = 10;

/// Container waiting reasons that will never resolve on their own; a pod
/// stuck on one of these is treated as failed.
pub const CRITICAL_WAITING_REASONS: [&str; 5] = [
    "ImagePullBackOff",
    "ErrImagePull",
    "CrashLoopBackOff",
    "InvalidImageName",
    "ImageInspectError",
];

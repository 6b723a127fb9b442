//! Error types for the Poiesis engine.
//!
//! One tagged enum covers the whole engine; recovery policy lives at the
//! workload boundary. Driver-level failures (`*Unavailable`) are transient
//! and retried with capped backoff before being promoted to a terminal
//! `SYSTEM_ERROR` on the task.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoiesisError {
    /// Request payload failed TES validation. Maps to 400.
    #[error("validation error: {0}")]
    Validation(String),

    /// Bearer token missing or rejected. Maps to 401.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Unknown task id, or a task owned by another subject. Maps to 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Illegal state transition or duplicate resource name.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Document store driver failure.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Message bus driver failure.
    #[error("bus unavailable: {0}")]
    BusUnavailable(String),

    /// Cluster API failure.
    #[error("cluster unavailable: {0}")]
    ClusterUnavailable(String),

    /// Object store transfer failure.
    #[error("object store unavailable: {0}")]
    ObjectStoreUnavailable(String),

    /// An executor exited non-zero and did not set `ignore_error`.
    #[error("executor {index} exited with code {exit_code}")]
    ExecutorFailed { index: usize, exit_code: i32 },

    /// Everything else: timeouts, missing pods, malformed internal state.
    #[error("system failure: {0}")]
    SystemFailure(String),
}

impl PoiesisError {
    /// Whether the operation that produced this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_)
                | Self::BusUnavailable(_)
                | Self::ClusterUnavailable(_)
                | Self::ObjectStoreUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PoiesisError>;

impl From<mongodb::error::Error> for PoiesisError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<redis::RedisError> for PoiesisError {
    fn from(err: redis::RedisError) -> Self {
        Self::BusUnavailable(err.to_string())
    }
}

impl From<kube::Error> for PoiesisError {
    fn from(err: kube::Error) -> Self {
        // 409s carry ownership information the engine acts on.
        if let kube::Error::Api(ref resp) = err {
            if resp.code == 409 {
                return Self::Conflict(resp.message.clone());
            }
        }
        Self::ClusterUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for PoiesisError {
    fn from(err: serde_json::Error) -> Self {
        Self::SystemFailure(format!("serialization error: {err}"))
    }
}

impl From<std::io::Error> for PoiesisError {
    fn from(err: std::io::Error) -> Self {
        Self::SystemFailure(format!("io error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(PoiesisError::StorageUnavailable("down".into()).is_transient());
        assert!(PoiesisError::BusUnavailable("down".into()).is_transient());
        assert!(PoiesisError::ClusterUnavailable("down".into()).is_transient());
        assert!(!PoiesisError::Validation("bad".into()).is_transient());
        assert!(!PoiesisError::Conflict("state".into()).is_transient());
        assert!(!PoiesisError::ExecutorFailed { index: 0, exit_code: 1 }.is_transient());
    }
}

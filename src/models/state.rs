//! Task states and the legal-transition graph.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// TES v1.1.0 task state.
///
/// The engine only moves a task along the edges checked by
/// [`TaskState::can_transition_to`]; the store enforces this atomically
/// with a compare-and-set on `(id, expected_state)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Unknown,
    Queued,
    Initializing,
    Running,
    Paused,
    Complete,
    ExecutorError,
    SystemError,
    Canceled,
    Canceling,
    Preempted,
}

impl TaskState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete | Self::ExecutorError | Self::SystemError | Self::Canceled | Self::Preempted
        )
    }

    /// The phase-progression states a healthy task walks through.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Initializing | Self::Running)
    }

    /// Whether the graph admits `self -> to`.
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        // Cancellation may begin from any non-terminal state.
        if to == Self::Canceling {
            return *self != Self::Canceling;
        }
        match (self, to) {
            (Self::Queued, Self::Initializing) => true,
            (Self::Initializing, Self::Running) => true,
            (Self::Running, Self::Complete) => true,
            (s, Self::ExecutorError | Self::SystemError | Self::Preempted) => s.is_active(),
            (Self::Canceling, Self::Canceled) => true,
            _ => false,
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Queued => "QUEUED",
            Self::Initializing => "INITIALIZING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Complete => "COMPLETE",
            Self::ExecutorError => "EXECUTOR_ERROR",
            Self::SystemError => "SYSTEM_ERROR",
            Self::Canceled => "CANCELED",
            Self::Canceling => "CANCELING",
            Self::Preempted => "PREEMPTED",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNKNOWN" => Ok(Self::Unknown),
            "QUEUED" => Ok(Self::Queued),
            "INITIALIZING" => Ok(Self::Initializing),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETE" => Ok(Self::Complete),
            "EXECUTOR_ERROR" => Ok(Self::ExecutorError),
            "SYSTEM_ERROR" => Ok(Self::SystemError),
            "CANCELED" => Ok(Self::Canceled),
            "CANCELING" => Ok(Self::Canceling),
            "PREEMPTED" => Ok(Self::Preempted),
            _ => Err(format!("invalid task state: {s}")),
        }
    }
}

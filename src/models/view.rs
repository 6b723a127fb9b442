//! Field projections applied when returning tasks.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::task::Task;

/// How much of a task a read returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum View {
    /// `id` and `state` only.
    #[default]
    Minimal,
    /// Everything except executor stdout/stderr, inline input content and
    /// system logs.
    Basic,
    /// The complete document.
    Full,
}

impl std::str::FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MINIMAL" => Ok(Self::Minimal),
            "BASIC" => Ok(Self::Basic),
            "FULL" => Ok(Self::Full),
            other => Err(format!("invalid view: {other}")),
        }
    }
}

impl View {
    /// Apply this projection to an owned task.
    pub fn project(self, task: Task) -> Task {
        match self {
            Self::Full => task,
            Self::Minimal => Task {
                id: task.id,
                state: task.state,
                ..Task::default()
            },
            Self::Basic => {
                let mut task = task;
                for input in &mut task.inputs {
                    input.content = None;
                }
                for log in &mut task.logs {
                    log.system_logs.clear();
                    for exec_log in &mut log.logs {
                        exec_log.stdout = None;
                        exec_log.stderr = None;
                    }
                }
                task
            }
        }
    }
}

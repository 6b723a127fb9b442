//! Persisted task documents.
//!
//! The facade owns the domain rules (state-graph legality, per-subject
//! scoping, pagination contract, the single attempt log) while the
//! drivers underneath are deliberately dumb: insert, find, one atomic
//! compare-and-set on `(id, expected_state)`, targeted log appends, and a
//! filtered page scan. Enum dispatch keeps the drivers swappable without
//! trait objects.

pub mod memory;
pub mod mongo;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::{PoiesisError, Result};
use crate::models::{
    ExecutorLog, OutputFileLog, Task, TaskDocument, TaskLog, TaskState,
};

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Filter and paging parameters for `ListTasks`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub name_prefix: Option<String>,
    pub state: Option<TaskState>,
    /// Zipped `(tag_key, tag_value)` pairs; an empty value matches any
    /// value but not an absent key.
    pub tags: Vec<(String, String)>,
    pub page_size: i64,
    pub page_token: Option<String>,
}

/// One page of task documents plus the continuation token.
#[derive(Debug, Clone)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub next_page_token: Option<String>,
}

/// Pagination cursor: the `(created_at_ms, id)` of the last returned row.
/// Opaque to clients; malformed tokens are a validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken {
    pub created_at_ms: i64,
    pub id: String,
}

impl PageToken {
    pub fn encode(created_at_ms: i64, id: &str) -> String {
        format!("{created_at_ms}|{id}")
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let (ms, id) = raw
            .split_once('|')
            .ok_or_else(|| PoiesisError::Validation("invalid page_token".into()))?;
        let created_at_ms = ms
            .parse::<i64>()
            .map_err(|_| PoiesisError::Validation("invalid page_token".into()))?;
        if id.is_empty() {
            return Err(PoiesisError::Validation("invalid page_token".into()));
        }
        Ok(Self {
            created_at_ms,
            id: id.to_string(),
        })
    }
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task entered `CANCELING` because of this request.
    Started,
    /// Another request already moved it to `CANCELING`.
    AlreadyCanceling,
    /// The task was already terminal; cancellation is a no-op.
    NoOp,
}

/// The store, dispatching over the configured driver.
#[derive(Debug, Clone)]
pub enum TaskStore {
    Memory(MemoryStore),
    Mongo(MongoStore),
}

impl TaskStore {
    /// Persist a new task document. The caller assigns the id and sets
    /// `state = QUEUED` and `creation_time`.
    pub async fn create(&self, doc: TaskDocument) -> Result<String> {
        let id = doc.task.id().to_string();
        match self {
            Self::Memory(driver) => driver.insert(doc).await?,
            Self::Mongo(driver) => driver.insert(doc).await?,
        }
        debug!(task_id = %id, "task document created");
        Ok(id)
    }

    /// Fetch a task scoped to a subject. A task owned by someone else is
    /// indistinguishable from a missing one.
    pub async fn get(&self, id: &str, user_id: &str) -> Result<Task> {
        let doc = self.get_document(id).await?;
        if doc.user_id != user_id {
            return Err(PoiesisError::NotFound(format!("task {id} not found")));
        }
        Ok(doc.task)
    }

    /// Fetch the raw document without subject scoping. Engine-side only;
    /// never reachable from the HTTP surface.
    pub async fn get_document(&self, id: &str) -> Result<TaskDocument> {
        let found = match self {
            Self::Memory(driver) => driver.find(id).await?,
            Self::Mongo(driver) => driver.find(id).await?,
        };
        found.ok_or_else(|| PoiesisError::NotFound(format!("task {id} not found")))
    }

    /// The task's current state.
    pub async fn current_state(&self, id: &str) -> Result<TaskState> {
        Ok(self.get_document(id).await?.task.state)
    }

    /// List a subject's tasks, newest first.
    pub async fn list(&self, user_id: &str, filter: &ListFilter) -> Result<TaskPage> {
        let after = match &filter.page_token {
            Some(token) => Some(PageToken::decode(token)?),
            None => None,
        };
        let page_size = filter.page_size.clamp(1, crate::constants::MAX_PAGE_SIZE);
        let docs = match self {
            Self::Memory(driver) => {
                driver.scan(user_id, filter, after.clone(), page_size + 1).await?
            }
            Self::Mongo(driver) => {
                driver.scan(user_id, filter, after.clone(), page_size + 1).await?
            }
        };

        let mut docs = docs;
        let next_page_token = if docs.len() as i64 > page_size {
            docs.truncate(page_size as usize);
            docs.last()
                .map(|d| PageToken::encode(d.created_at_ms, d.task.id()))
        } else {
            None
        };

        Ok(TaskPage {
            tasks: docs.into_iter().map(|d| d.task).collect(),
            next_page_token,
        })
    }

    /// Atomically move `id` from `from` to `to`. Illegal edges are
    /// rejected before touching the driver; a CAS miss is a `Conflict`
    /// carrying the state observed afterwards.
    pub async fn transition(&self, id: &str, from: TaskState, to: TaskState) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(PoiesisError::Conflict(format!(
                "illegal transition {from} -> {to} for task {id}"
            )));
        }
        let swapped = match self {
            Self::Memory(driver) => driver.cas_state(id, from, to).await?,
            Self::Mongo(driver) => driver.cas_state(id, from, to).await?,
        };
        if swapped {
            debug!(task_id = %id, %from, %to, "state transition");
            return Ok(());
        }
        let current = self.current_state(id).await?;
        Err(PoiesisError::Conflict(format!(
            "task {id} is {current}, expected {from}"
        )))
    }

    /// Move a task into `CANCELING` from whatever non-terminal state it
    /// holds. Terminal tasks are a no-op (cancel is idempotent).
    pub async fn request_cancel(&self, id: &str, user_id: &str) -> Result<CancelOutcome> {
        // Scope check first so foreign tasks surface as NotFound.
        self.get(id, user_id).await?;
        loop {
            let state = self.current_state(id).await?;
            if state.is_terminal() {
                return Ok(CancelOutcome::NoOp);
            }
            if state == TaskState::Canceling {
                return Ok(CancelOutcome::AlreadyCanceling);
            }
            match self.transition(id, state, TaskState::Canceling).await {
                Ok(()) => return Ok(CancelOutcome::Started),
                // Lost the race; re-read and decide again.
                Err(PoiesisError::Conflict(_)) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Open the attempt log (if needed) and stamp its start time.
    pub async fn set_start_time(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let doc = self.get_document(id).await?;
        if doc.task.logs.is_empty() {
            let log = TaskLog {
                start_time: Some(at),
                ..TaskLog::default()
            };
            match self {
                Self::Memory(driver) => driver.push_attempt_log(id, log).await,
                Self::Mongo(driver) => driver.push_attempt_log(id, log).await,
            }
        } else {
            match self {
                Self::Memory(driver) => driver.set_attempt_start(id, at).await,
                Self::Mongo(driver) => driver.set_attempt_start(id, at).await,
            }
        }
    }

    /// Stamp the attempt log's end time.
    pub async fn set_end_time(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        match self {
            Self::Memory(driver) => driver.set_attempt_end(id, at).await,
            Self::Mongo(driver) => driver.set_attempt_end(id, at).await,
        }
    }

    /// Append one executor's log to the attempt. Monotonic; never rewrites.
    pub async fn append_executor_log(&self, id: &str, log: ExecutorLog) -> Result<()> {
        match self {
            Self::Memory(driver) => driver.push_executor_log(id, log).await,
            Self::Mongo(driver) => driver.push_executor_log(id, log).await,
        }
    }

    /// Append one uploaded file's log to the attempt.
    pub async fn append_output_log(&self, id: &str, log: OutputFileLog) -> Result<()> {
        match self {
            Self::Memory(driver) => driver.push_output_log(id, log).await,
            Self::Mongo(driver) => driver.push_output_log(id, log).await,
        }
    }

    /// Append a free-form system log line to the attempt.
    pub async fn append_system_log(&self, id: &str, line: impl Into<String>) -> Result<()> {
        let line = line.into();
        match self {
            Self::Memory(driver) => driver.push_system_log(id, line).await,
            Self::Mongo(driver) => driver.push_system_log(id, line).await,
        }
    }
}

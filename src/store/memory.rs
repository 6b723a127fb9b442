//! In-memory store driver, used by the test suites and for local runs
//! without a document store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::errors::{PoiesisError, Result};
use crate::models::{ExecutorLog, OutputFileLog, TaskDocument, TaskLog, TaskState};

use super::{ListFilter, PageToken};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tasks: Arc<RwLock<HashMap<String, TaskDocument>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) async fn insert(&self, doc: TaskDocument) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let id = doc.task.id().to_string();
        if tasks.contains_key(&id) {
            return Err(PoiesisError::Conflict(format!("task {id} already exists")));
        }
        tasks.insert(id, doc);
        Ok(())
    }

    pub(super) async fn find(&self, id: &str) -> Result<Option<TaskDocument>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    pub(super) async fn cas_state(&self, id: &str, from: TaskState, to: TaskState) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(id) {
            Some(doc) if doc.task.state == from => {
                doc.task.state = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(super) async fn scan(
        &self,
        user_id: &str,
        filter: &ListFilter,
        after: Option<PageToken>,
        limit: i64,
    ) -> Result<Vec<TaskDocument>> {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<TaskDocument> = tasks
            .values()
            .filter(|doc| doc.user_id == user_id)
            .filter(|doc| matches_filter(doc, filter))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then_with(|| a.task.id().cmp(b.task.id()))
        });

        if let Some(token) = after {
            matched.retain(|doc| {
                doc.created_at_ms < token.created_at_ms
                    || (doc.created_at_ms == token.created_at_ms
                        && doc.task.id() > token.id.as_str())
            });
        }

        matched.truncate(limit.max(0) as usize);
        Ok(matched)
    }

    async fn with_attempt_log<F>(&self, id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut TaskLog),
    {
        let mut tasks = self.tasks.write().await;
        let doc = tasks
            .get_mut(id)
            .ok_or_else(|| PoiesisError::NotFound(format!("task {id} not found")))?;
        let log = doc
            .task
            .logs
            .last_mut()
            .ok_or_else(|| PoiesisError::SystemFailure(format!("task {id} has no attempt log")))?;
        mutate(log);
        Ok(())
    }

    pub(super) async fn push_attempt_log(&self, id: &str, log: TaskLog) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let doc = tasks
            .get_mut(id)
            .ok_or_else(|| PoiesisError::NotFound(format!("task {id} not found")))?;
        doc.task.logs.push(log);
        Ok(())
    }

    pub(super) async fn set_attempt_start(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_attempt_log(id, |log| log.start_time = Some(at)).await
    }

    pub(super) async fn set_attempt_end(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_attempt_log(id, |log| log.end_time = Some(at)).await
    }

    pub(super) async fn push_executor_log(&self, id: &str, entry: ExecutorLog) -> Result<()> {
        self.with_attempt_log(id, |log| log.logs.push(entry)).await
    }

    pub(super) async fn push_output_log(&self, id: &str, entry: OutputFileLog) -> Result<()> {
        self.with_attempt_log(id, |log| log.outputs.push(entry)).await
    }

    pub(super) async fn push_system_log(&self, id: &str, line: String) -> Result<()> {
        self.with_attempt_log(id, |log| log.system_logs.push(line)).await
    }
}

fn matches_filter(doc: &TaskDocument, filter: &ListFilter) -> bool {
    if let Some(prefix) = &filter.name_prefix {
        match &doc.task.name {
            Some(name) if name.starts_with(prefix.as_str()) => {}
            _ => return false,
        }
    }
    if let Some(state) = filter.state {
        if doc.task.state != state {
            return false;
        }
    }
    for (key, value) in &filter.tags {
        let Some(tags) = &doc.task.tags else { return false };
        match tags.get(key) {
            Some(actual) if value.is_empty() || actual == value => {}
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;
    use crate::store::{CancelOutcome, TaskStore};
    use std::collections::HashMap;

    fn doc(id: &str, user: &str, ms: i64) -> TaskDocument {
        TaskDocument {
            user_id: user.into(),
            created_at_ms: ms,
            task: Task {
                id: Some(id.into()),
                state: TaskState::Queued,
                name: Some(format!("task-{id}")),
                ..Task::default()
            },
        }
    }

    fn store() -> TaskStore {
        TaskStore::Memory(MemoryStore::new())
    }

    #[tokio::test]
    async fn cas_transition_enforces_expected_state() {
        let store = store();
        store.create(doc("a", "u1", 1)).await.unwrap();

        store
            .transition("a", TaskState::Queued, TaskState::Initializing)
            .await
            .unwrap();
        // Second identical CAS must conflict: the state moved on.
        let err = store
            .transition("a", TaskState::Queued, TaskState::Initializing)
            .await
            .unwrap_err();
        assert!(matches!(err, PoiesisError::Conflict(_)));
    }

    #[tokio::test]
    async fn illegal_edges_rejected_without_driver_write() {
        let store = store();
        store.create(doc("a", "u1", 1)).await.unwrap();
        let err = store
            .transition("a", TaskState::Queued, TaskState::Complete)
            .await
            .unwrap_err();
        assert!(matches!(err, PoiesisError::Conflict(_)));
        assert_eq!(store.current_state("a").await.unwrap(), TaskState::Queued);
    }

    #[tokio::test]
    async fn get_scopes_to_subject() {
        let store = store();
        store.create(doc("a", "u1", 1)).await.unwrap();
        assert!(store.get("a", "u1").await.is_ok());
        assert!(matches!(
            store.get("a", "u2").await,
            Err(PoiesisError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_noop_on_terminal() {
        let store = store();
        store.create(doc("a", "u1", 1)).await.unwrap();
        assert_eq!(
            store.request_cancel("a", "u1").await.unwrap(),
            CancelOutcome::Started
        );
        assert_eq!(
            store.request_cancel("a", "u1").await.unwrap(),
            CancelOutcome::AlreadyCanceling
        );
        store
            .transition("a", TaskState::Canceling, TaskState::Canceled)
            .await
            .unwrap();
        assert_eq!(
            store.request_cancel("a", "u1").await.unwrap(),
            CancelOutcome::NoOp
        );
        assert_eq!(store.current_state("a").await.unwrap(), TaskState::Canceled);
    }

    #[tokio::test]
    async fn list_orders_newest_first_then_id() {
        let store = store();
        store.create(doc("b", "u1", 100)).await.unwrap();
        store.create(doc("a", "u1", 100)).await.unwrap();
        store.create(doc("c", "u1", 200)).await.unwrap();

        let page = store
            .list(
                "u1",
                &ListFilter {
                    page_size: 10,
                    ..ListFilter::default()
                },
            )
            .await
            .unwrap();
        let ids: Vec<_> = page.tasks.iter().map(|t| t.id().to_string()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn pagination_resumes_after_token() {
        let store = store();
        for (id, ms) in [("a", 300), ("b", 200), ("c", 100)] {
            store.create(doc(id, "u1", ms)).await.unwrap();
        }
        let first = store
            .list(
                "u1",
                &ListFilter {
                    page_size: 2,
                    ..ListFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.tasks.len(), 2);
        let token = first.next_page_token.expect("continuation token");

        let second = store
            .list(
                "u1",
                &ListFilter {
                    page_size: 2,
                    page_token: Some(token),
                    ..ListFilter::default()
                },
            )
            .await
            .unwrap();
        let ids: Vec<_> = second.tasks.iter().map(|t| t.id().to_string()).collect();
        assert_eq!(ids, vec!["c"]);
        assert!(second.next_page_token.is_none());
    }

    #[tokio::test]
    async fn tag_filter_semantics() {
        let store = store();
        let mut tagged = doc("a", "u1", 1);
        tagged.task.tags = Some(HashMap::from([
            ("team".to_string(), "x".to_string()),
            ("env".to_string(), "prod".to_string()),
        ]));
        store.create(tagged).await.unwrap();
        store.create(doc("b", "u1", 2)).await.unwrap();

        let filter = |tags: Vec<(&str, &str)>| ListFilter {
            tags: tags
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            page_size: 10,
            ..ListFilter::default()
        };

        // Exact match.
        let page = store.list("u1", &filter(vec![("team", "x")])).await.unwrap();
        assert_eq!(page.tasks.len(), 1);
        // Empty value matches any value of the key.
        let page = store.list("u1", &filter(vec![("team", "")])).await.unwrap();
        assert_eq!(page.tasks.len(), 1);
        // But not an absent key.
        let page = store.list("u1", &filter(vec![("missing", "")])).await.unwrap();
        assert!(page.tasks.is_empty());
        // Every pair must match.
        let page = store
            .list("u1", &filter(vec![("team", "x"), ("env", "staging")]))
            .await
            .unwrap();
        assert!(page.tasks.is_empty());
    }

    #[tokio::test]
    async fn log_appends_are_monotonic() {
        let store = store();
        store.create(doc("a", "u1", 1)).await.unwrap();
        let now = Utc::now();
        store.set_start_time("a", now).await.unwrap();
        store
            .append_executor_log(
                "a",
                ExecutorLog {
                    exit_code: Some(0),
                    ..ExecutorLog::default()
                },
            )
            .await
            .unwrap();
        store.append_system_log("a", "one").await.unwrap();
        store.append_system_log("a", "two").await.unwrap();
        store.set_end_time("a", now).await.unwrap();

        let task = store.get("a", "u1").await.unwrap();
        let log = task.attempt_log().unwrap();
        assert_eq!(log.start_time, Some(now));
        assert_eq!(log.end_time, Some(now));
        assert_eq!(log.logs.len(), 1);
        assert_eq!(log.system_logs, vec!["one", "two"]);
    }
}

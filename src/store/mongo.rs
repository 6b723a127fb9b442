//! Document-store driver.
//!
//! Tasks live in one collection (`tasks`), one document per task, shaped
//! exactly like [`TaskDocument`]. All state changes go through a single
//! `update_one` filtered on `(task.id, task.state)`, which is what makes
//! the engine's compare-and-set atomic; log writes are `$push`/`$set`
//! updates addressed at the single attempt log.

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, IndexModel};

use crate::config::MongoConfig;
use crate::constants::TASK_COLLECTION;
use crate::errors::{PoiesisError, Result};
use crate::models::{ExecutorLog, OutputFileLog, TaskDocument, TaskLog, TaskState};

use super::{ListFilter, PageToken};

#[derive(Clone)]
pub struct MongoStore {
    tasks: Collection<TaskDocument>,
}

impl std::fmt::Debug for MongoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoStore")
            .field("collection", &self.tasks.name())
            .finish_non_exhaustive()
    }
}

impl MongoStore {
    /// Connect and make sure the collection indexes exist.
    pub async fn connect(cfg: &MongoConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(cfg.uri()).await?;
        options.max_pool_size = Some(cfg.max_pool_size);
        options.app_name = Some("poiesis".to_string());
        let client = Client::with_options(options)?;
        let tasks = client
            .database(&cfg.database)
            .collection::<TaskDocument>(TASK_COLLECTION);

        let store = Self { tasks };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> Result<()> {
        let unique_id = IndexModel::builder()
            .keys(doc! { "task.id": 1 })
            .options(
                mongodb::options::IndexOptions::builder()
                    .unique(true)
                    .build(),
            )
            .build();
        let by_user = IndexModel::builder().keys(doc! { "user_id": 1 }).build();
        let by_user_name = IndexModel::builder()
            .keys(doc! { "user_id": 1, "task.name": 1 })
            .build();
        let by_user_state = IndexModel::builder()
            .keys(doc! { "user_id": 1, "task.state": 1 })
            .build();
        let by_creation = IndexModel::builder()
            .keys(doc! { "created_at_ms": -1, "task.id": 1 })
            .build();

        self.tasks
            .create_indexes(vec![unique_id, by_user, by_user_name, by_user_state, by_creation])
            .await?;
        Ok(())
    }

    pub(super) async fn insert(&self, document: TaskDocument) -> Result<()> {
        match self.tasks.insert_one(document).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => {
                Err(PoiesisError::Conflict("task id already exists".into()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub(super) async fn find(&self, id: &str) -> Result<Option<TaskDocument>> {
        Ok(self.tasks.find_one(doc! { "task.id": id }).await?)
    }

    pub(super) async fn cas_state(&self, id: &str, from: TaskState, to: TaskState) -> Result<bool> {
        let result = self
            .tasks
            .update_one(
                doc! { "task.id": id, "task.state": from.to_string() },
                doc! { "$set": { "task.state": to.to_string() } },
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    pub(super) async fn scan(
        &self,
        user_id: &str,
        filter: &ListFilter,
        after: Option<PageToken>,
        limit: i64,
    ) -> Result<Vec<TaskDocument>> {
        let query = build_query(user_id, filter, after);
        let cursor = self
            .tasks
            .find(query)
            .sort(doc! { "created_at_ms": -1, "task.id": 1 })
            .limit(limit)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_attempt(&self, id: &str, update: Document) -> Result<()> {
        let result = self.tasks.update_one(doc! { "task.id": id }, update).await?;
        if result.matched_count == 0 {
            return Err(PoiesisError::NotFound(format!("task {id} not found")));
        }
        Ok(())
    }

    pub(super) async fn push_attempt_log(&self, id: &str, log: TaskLog) -> Result<()> {
        let log = to_bson(&log).map_err(|e| PoiesisError::StorageUnavailable(e.to_string()))?;
        self.update_attempt(id, doc! { "$push": { "task.logs": log } })
            .await
    }

    pub(super) async fn set_attempt_start(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let at = to_bson(&at).map_err(|e| PoiesisError::StorageUnavailable(e.to_string()))?;
        self.update_attempt(id, doc! { "$set": { "task.logs.0.start_time": at } })
            .await
    }

    pub(super) async fn set_attempt_end(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let at = to_bson(&at).map_err(|e| PoiesisError::StorageUnavailable(e.to_string()))?;
        self.update_attempt(id, doc! { "$set": { "task.logs.0.end_time": at } })
            .await
    }

    pub(super) async fn push_executor_log(&self, id: &str, entry: ExecutorLog) -> Result<()> {
        let entry = to_bson(&entry).map_err(|e| PoiesisError::StorageUnavailable(e.to_string()))?;
        self.update_attempt(id, doc! { "$push": { "task.logs.0.logs": entry } })
            .await
    }

    pub(super) async fn push_output_log(&self, id: &str, entry: OutputFileLog) -> Result<()> {
        let entry = to_bson(&entry).map_err(|e| PoiesisError::StorageUnavailable(e.to_string()))?;
        self.update_attempt(id, doc! { "$push": { "task.logs.0.outputs": entry } })
            .await
    }

    pub(super) async fn push_system_log(&self, id: &str, line: String) -> Result<()> {
        self.update_attempt(id, doc! { "$push": { "task.logs.0.system_logs": line } })
            .await
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref we)) if we.code == 11000
    )
}

fn build_query(user_id: &str, filter: &ListFilter, after: Option<PageToken>) -> Document {
    let mut query = doc! { "user_id": user_id };

    if let Some(prefix) = &filter.name_prefix {
        query.insert(
            "task.name",
            doc! { "$regex": format!("^{}", escape_regex(prefix)) },
        );
    }
    if let Some(state) = filter.state {
        query.insert("task.state", state.to_string());
    }

    let mut clauses: Vec<Document> = Vec::new();
    for (key, value) in &filter.tags {
        let field = format!("task.tags.{key}");
        if value.is_empty() {
            clauses.push(doc! { field: { "$exists": true } });
        } else {
            clauses.push(doc! { field: value });
        }
    }
    if let Some(token) = after {
        clauses.push(doc! {
            "$or": [
                { "created_at_ms": { "$lt": token.created_at_ms } },
                { "created_at_ms": token.created_at_ms, "task.id": { "$gt": token.id } },
            ]
        });
    }
    if !clauses.is_empty() {
        query.insert("$and", Bson::Array(clauses.into_iter().map(Bson::Document).collect()));
    }

    query
}

fn escape_regex(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ".^$*+?()[]{}|\\".contains(ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_escaping() {
        assert_eq!(escape_regex("plain"), "plain");
        assert_eq!(escape_regex("a.b*c"), "a\\.b\\*c");
        assert_eq!(escape_regex("x[1]"), "x\\[1\\]");
    }

    #[test]
    fn query_includes_scope_and_filters() {
        let filter = ListFilter {
            name_prefix: Some("run.".into()),
            state: Some(TaskState::Running),
            tags: vec![("team".into(), "x".into()), ("env".into(), String::new())],
            page_size: 10,
            page_token: None,
        };
        let query = build_query("u1", &filter, None);
        assert_eq!(query.get_str("user_id").unwrap(), "u1");
        assert_eq!(query.get_str("task.state").unwrap(), "RUNNING");
        let name = query.get_document("task.name").unwrap();
        assert_eq!(name.get_str("$regex").unwrap(), "^run\\.");
        assert_eq!(query.get_array("$and").unwrap().len(), 2);
    }

    #[test]
    fn query_paginates_with_token() {
        let token = PageToken {
            created_at_ms: 42,
            id: "abc".into(),
        };
        let query = build_query("u1", &ListFilter::default(), Some(token));
        let and = query.get_array("$and").unwrap();
        assert_eq!(and.len(), 1);
    }
}

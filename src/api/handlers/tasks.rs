//! Task endpoints: create, get, list, cancel.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use axum_extra::extract::Query as ExtraQuery;
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::Subject;
use crate::cluster::manifests::{self, EngineJobKind};
use crate::cluster::names;
use crate::constants::DEFAULT_PAGE_SIZE;
use crate::errors::PoiesisError;
use crate::models::validation::validate_create;
use crate::models::{
    CancelTaskResponse, CreateTaskResponse, ListTasksResponse, Task, TaskDocument, TaskState, View,
};
use crate::retry::{retry, Backoff};
use crate::store::{CancelOutcome, ListFilter};

#[derive(Debug, Deserialize)]
pub struct GetTaskQuery {
    pub view: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub name_prefix: Option<String>,
    pub state: Option<String>,
    #[serde(default)]
    pub tag_key: Vec<String>,
    #[serde(default)]
    pub tag_value: Vec<String>,
    pub page_size: Option<i64>,
    pub page_token: Option<String>,
    pub view: Option<String>,
}

fn parse_view(raw: Option<&str>) -> ApiResult<View> {
    match raw {
        None => Ok(View::Minimal),
        Some(raw) => raw
            .parse()
            .map_err(|e: String| ApiError(PoiesisError::Validation(e))),
    }
}

#[utoipa::path(
    post,
    path = "/ga4gh/tes/v1/tasks",
    request_body = Task,
    responses(
        (status = 200, description = "Task accepted", body = CreateTaskResponse),
        (status = 400, description = "Invalid task"),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearerAuth" = [])),
    tag = "TaskService"
)]
pub async fn create_task(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Json(submitted): Json<Task>,
) -> ApiResult<Json<CreateTaskResponse>> {
    validate_create(&submitted)?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let task = Task {
        id: Some(id.clone()),
        state: TaskState::Queued,
        creation_time: Some(now),
        logs: Vec::new(),
        ..submitted
    };
    state
        .store
        .create(TaskDocument {
            user_id: subject.user_id.clone(),
            created_at_ms: now.timestamp_millis(),
            task,
        })
        .await?;
    info!(task_id = %id, user_id = %subject.user_id, "task created");

    // The response does not wait for the cluster; a launch failure is
    // persisted as SYSTEM_ERROR on the task instead.
    let launch_state = state.clone();
    let launch_id = id.clone();
    tokio::spawn(async move {
        launch_orchestrator(launch_state, launch_id).await;
    });

    Ok(Json(CreateTaskResponse { id }))
}

async fn launch_orchestrator(state: AppState, task_id: String) {
    let job = match manifests::engine_job(&state.config, EngineJobKind::Torc, &task_id) {
        Ok(job) => job,
        Err(err) => {
            error!(task_id = %task_id, error = %err, "failed to template orchestrator job");
            fail_queued(&state, &task_id, &err.to_string()).await;
            return;
        }
    };
    let created = retry(Backoff::default(), "create orchestrator job", || async {
        state.cluster.create_job(&job).await
    })
    .await;
    match created {
        Ok(name) => info!(task_id = %task_id, job = %name, "orchestrator launched"),
        Err(err) => {
            error!(task_id = %task_id, error = %err, "failed to launch orchestrator");
            fail_queued(&state, &task_id, &err.to_string()).await;
        }
    }
}

async fn fail_queued(state: &AppState, task_id: &str, reason: &str) {
    let _ = state.store.set_start_time(task_id, Utc::now()).await;
    let _ = state
        .store
        .append_system_log(task_id, format!("failed to launch orchestrator: {reason}"))
        .await;
    if let Err(err) = state
        .store
        .transition(task_id, TaskState::Queued, TaskState::SystemError)
        .await
    {
        warn!(task_id = %task_id, error = %err, "could not mark task as failed");
    }
}

#[utoipa::path(
    get,
    path = "/ga4gh/tes/v1/tasks/{id}",
    params(
        ("id" = String, Path, description = "Task id"),
        ("view" = Option<String>, Query, description = "MINIMAL, BASIC or FULL")
    ),
    responses(
        (status = 200, description = "The task", body = Task),
        (status = 404, description = "Unknown task")
    ),
    security(("bearerAuth" = [])),
    tag = "TaskService"
)]
pub async fn get_task(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(id): Path<String>,
    ExtraQuery(query): ExtraQuery<GetTaskQuery>,
) -> ApiResult<Json<Task>> {
    let view = parse_view(query.view.as_deref())?;
    let task = state.store.get(&id, &subject.user_id).await?;
    Ok(Json(view.project(task)))
}

#[utoipa::path(
    get,
    path = "/ga4gh/tes/v1/tasks",
    responses((status = 200, description = "Task page", body = ListTasksResponse)),
    security(("bearerAuth" = [])),
    tag = "TaskService"
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    ExtraQuery(query): ExtraQuery<ListTasksQuery>,
) -> ApiResult<Json<ListTasksResponse>> {
    let view = parse_view(query.view.as_deref())?;
    let state_filter = match query.state.as_deref() {
        None => None,
        Some(raw) => Some(
            raw.parse::<TaskState>()
                .map_err(PoiesisError::Validation)?,
        ),
    };
    let tags = query
        .tag_key
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let value = query.tag_value.get(i).cloned().unwrap_or_default();
            (key.clone(), value)
        })
        .collect();

    let filter = ListFilter {
        name_prefix: query.name_prefix,
        state: state_filter,
        tags,
        page_size: query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        page_token: query.page_token,
    };
    let page = state.store.list(&subject.user_id, &filter).await?;
    Ok(Json(ListTasksResponse {
        tasks: page.tasks.into_iter().map(|t| view.project(t)).collect(),
        next_page_token: page.next_page_token,
    }))
}

#[utoipa::path(
    post,
    path = "/ga4gh/tes/v1/tasks/{id}:cancel",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Cancellation accepted", body = CancelTaskResponse),
        (status = 404, description = "Unknown task")
    ),
    security(("bearerAuth" = [])),
    tag = "TaskService"
)]
pub async fn cancel_task(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
    Path(raw): Path<String>,
) -> ApiResult<Json<CancelTaskResponse>> {
    // The cancel action shares the `/tasks/{x}` segment with GetTask;
    // only the `:cancel` suffix selects this operation.
    let Some(id) = raw.strip_suffix(":cancel") else {
        return Err(ApiError(PoiesisError::NotFound(format!(
            "no such operation on task {raw}"
        ))));
    };

    match state.store.request_cancel(id, &subject.user_id).await? {
        CancelOutcome::NoOp | CancelOutcome::AlreadyCanceling => {
            return Ok(Json(CancelTaskResponse::default()))
        }
        CancelOutcome::Started => {}
    }
    info!(task_id = %id, "cancellation requested");

    // Best-effort teardown; the orchestrator's own cancellation path is
    // the authoritative cleanup.
    for job in [names::tif_job(id), names::texam_job(id), names::tof_job(id)] {
        if let Err(err) = state.cluster.delete_job(&job).await {
            warn!(task_id = %id, job = %job, error = %err, "cancel cleanup failed");
        }
    }
    if let Err(err) = state
        .cluster
        .delete_pods_by_label(&names::executor_selector(id))
        .await
    {
        warn!(task_id = %id, error = %err, "executor pod cleanup failed");
    }

    // With no orchestrator left to finish the job, complete the
    // transition here so the cancel cannot wedge.
    match state.cluster.job_state(&names::torc_job(id)).await {
        Ok(crate::cluster::JobState::NotFound) => {
            let _ = state.cluster.delete_pvc(&names::pvc(id)).await;
            if let Err(err) = state
                .store
                .transition(id, TaskState::Canceling, TaskState::Canceled)
                .await
            {
                warn!(task_id = %id, error = %err, "could not finalize cancellation");
            } else {
                let _ = state
                    .store
                    .append_system_log(id, "task canceled by user request")
                    .await;
            }
        }
        Ok(_) => {}
        Err(err) => warn!(task_id = %id, error = %err, "orchestrator lookup failed"),
    }

    Ok(Json(CancelTaskResponse::default()))
}

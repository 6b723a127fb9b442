//! TES v1.1.0 HTTP surface.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod state;

use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;

use crate::errors::{PoiesisError, Result};

pub use error::{ApiError, ApiResult};
pub use state::AppState;

/// Build the full router. Task routes require a bearer token;
/// `/service-info` and the OpenAPI document do not.
pub fn router(state: AppState) -> Router {
    let tasks = Router::new()
        .route(
            "/tasks",
            post(handlers::tasks::create_task).get(handlers::tasks::list_tasks),
        )
        // `POST /tasks/{id}:cancel` shares this segment; the handler
        // requires the suffix.
        .route(
            "/tasks/:id",
            get(handlers::tasks::get_task).post(handlers::tasks::cancel_task),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authenticate,
        ));

    let v1 = Router::new()
        .route("/service-info", get(handlers::service_info::service_info))
        .route(
            "/openapi.json",
            get(|| async { Json(openapi::ApiDoc::openapi()) }),
        )
        .merge(tasks);

    Router::new()
        .nest("/ga4gh/tes/v1", v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState) -> Result<()> {
    let port = state.config.api.port;
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| PoiesisError::SystemFailure(format!("cannot bind port {port}: {e}")))?;
    info!(port, "TES API listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| PoiesisError::SystemFailure(e.to_string()))
}

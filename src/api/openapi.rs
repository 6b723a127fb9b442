//! OpenAPI document for the TES surface.
//!
//! Descriptive only; request validation is done by the handlers. Served
//! at `/ga4gh/tes/v1/openapi.json`.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::api::handlers;
use crate::models;

pub struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Poiesis",
        description = "GA4GH Task Execution Service v1.1.0 on Kubernetes"
    ),
    paths(
        handlers::service_info::service_info,
        handlers::tasks::create_task,
        handlers::tasks::get_task,
        handlers::tasks::list_tasks,
        handlers::tasks::cancel_task,
    ),
    components(schemas(
        models::Task,
        models::TaskState,
        models::Input,
        models::Output,
        models::IoType,
        models::Executor,
        models::Resources,
        models::TaskLog,
        models::ExecutorLog,
        models::OutputFileLog,
        models::View,
        models::CreateTaskResponse,
        models::ListTasksResponse,
        models::CancelTaskResponse,
        handlers::service_info::ServiceInfo,
        handlers::service_info::ServiceType,
        handlers::service_info::Organization,
    )),
    modifiers(&BearerAuth),
    tags((name = "TaskService", description = "TES task lifecycle operations"))
)]
pub struct ApiDoc;

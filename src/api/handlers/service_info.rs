//! `GET /service-info`, the only unauthenticated endpoint.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::state::AppState;
use crate::constants::MAX_LOG_BYTES;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceType {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Organization {
    pub name: String,
    pub url: String,
}

/// GA4GH service-info document with the TES extensions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub description: String,
    pub organization: Organization,
    pub environment: String,
    pub version: String,
    /// Storage backends plus operational limits clients should know.
    pub storage: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/ga4gh/tes/v1/service-info",
    responses((status = 200, description = "Service description", body = ServiceInfo)),
    tag = "TaskService"
)]
pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        id: "org.poiesis.tes".to_string(),
        name: "Poiesis".to_string(),
        service_type: ServiceType {
            group: "org.ga4gh".to_string(),
            artifact: "tes".to_string(),
            version: "1.1.0".to_string(),
        },
        description: "Task Execution Service backed by a Kubernetes cluster".to_string(),
        organization: Organization {
            name: "ELIXIR Cloud & AAI".to_string(),
            url: "https://elixir-cloud.dcc.sib.swiss".to_string(),
        },
        environment: state.config.environment.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: vec![
            "s3".to_string(),
            "ftp".to_string(),
            "http".to_string(),
            "file".to_string(),
            format!("executor stdout/stderr persisted up to {MAX_LOG_BYTES} bytes per stream"),
        ],
    })
}

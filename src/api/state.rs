//! Shared state for the API process.

use std::sync::Arc;

use crate::auth::Authenticator;
use crate::cluster::ClusterDriver;
use crate::config::Config;
use crate::store::TaskStore;

/// Everything a request handler needs, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TaskStore>,
    pub cluster: Arc<ClusterDriver>,
    pub auth: Arc<Authenticator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        store: TaskStore,
        cluster: ClusterDriver,
        auth: Authenticator,
        config: Config,
    ) -> Self {
        Self {
            store: Arc::new(store),
            cluster: Arc::new(cluster),
            auth: Arc::new(auth),
            config: Arc::new(config),
        }
    }
}

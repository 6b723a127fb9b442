//! Process configuration.
//!
//! Every knob the engine honors is an environment variable, read exactly
//! once at process start into an immutable [`Config`] that is passed down
//! the call graph explicitly. Workloads launched on the cluster receive
//! their environment from the launcher (ConfigMap and Secret references),
//! so the same loader serves the API process and every child Job.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{PoiesisError, Result};

/// Which bearer-token validator the API runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// Accept any non-empty token; the token string is the subject.
    Dummy,
    /// Verify against an OIDC issuer; `sub` is the subject.
    Oidc,
}

#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
}

/// Cluster-facing settings used both to talk to the API server and to
/// template the child Jobs the engine launches.
#[derive(Debug, Clone)]
pub struct KubernetesConfig {
    pub namespace: String,
    pub service_account: Option<String>,
    pub image: String,
    pub restart_policy: String,
    pub image_pull_policy: String,
    pub job_ttl_seconds: Option<i64>,
    pub pvc_access_mode: Option<String>,
    pub pvc_storage_class: Option<String>,
    pub core_configmap: Option<String>,
    pub mongo_secret: Option<String>,
    pub redis_secret: Option<String>,
    pub s3_secret: Option<String>,
}

/// Pod/container security contexts, read from JSON files mounted from a
/// ConfigMap. Disabled contexts leave the manifests untouched.
#[derive(Debug, Clone)]
pub struct SecurityContextConfig {
    pub infrastructure_enabled: bool,
    pub executor_enabled: bool,
    pub path: Option<PathBuf>,
    pub configmap: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: String,
    pub max_pool_size: u32,
}

impl MongoConfig {
    /// Connection URI; credentials are embedded only when both are set.
    pub fn uri(&self) -> String {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => {
                format!("mongodb://{user}:{password}@{}:{}", self.host, self.port)
            }
            _ => format!("mongodb://{}:{}", self.host, self.port),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl BusConfig {
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{password}@{}:{}", self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint (MinIO and friends). When unset, bucket-virtual
    /// AWS addressing applies.
    pub url: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FilerConfig {
    /// Where the filer pods have the task PVC mounted.
    pub workspace_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub log_level: String,
    pub auth_kind: AuthKind,
    pub oidc: Option<OidcConfig>,
    pub api: ApiConfig,
    pub kubernetes: KubernetesConfig,
    pub security_context: SecurityContextConfig,
    /// Bound on every phase wait. `None` means wait forever
    /// (`MONITOR_TIMEOUT_SECONDS=0`).
    pub monitor_timeout: Option<Duration>,
    pub mongo: MongoConfig,
    pub bus: BusConfig,
    pub s3: S3Config,
    pub filer: FilerConfig,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_opt(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| PoiesisError::Validation(format!("{key} has an invalid value: {raw}"))),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_opt(key) {
        None => default,
        Some(raw) => raw.eq_ignore_ascii_case("true") || raw == "1",
    }
}

impl Config {
    /// A development profile with in-process defaults: dummy auth, local
    /// backing services, no core ConfigMap. The test suites start from
    /// this and override what they need.
    pub fn local() -> Self {
        Self {
            environment: "development".into(),
            log_level: "info".into(),
            auth_kind: AuthKind::Dummy,
            oidc: None,
            api: ApiConfig { port: 8000 },
            kubernetes: KubernetesConfig {
                namespace: "poiesis".into(),
                service_account: None,
                image: "docker.io/elixircloud/poiesis:latest".into(),
                restart_policy: "Never".into(),
                image_pull_policy: "IfNotPresent".into(),
                job_ttl_seconds: None,
                pvc_access_mode: None,
                pvc_storage_class: None,
                core_configmap: None,
                mongo_secret: None,
                redis_secret: None,
                s3_secret: None,
            },
            security_context: SecurityContextConfig {
                infrastructure_enabled: false,
                executor_enabled: false,
                path: None,
                configmap: None,
            },
            monitor_timeout: None,
            mongo: MongoConfig {
                host: "localhost".into(),
                port: 27017,
                user: None,
                password: None,
                database: "poiesis".into(),
                max_pool_size: 10,
            },
            bus: BusConfig {
                host: "localhost".into(),
                port: 6379,
                password: None,
            },
            s3: S3Config {
                url: None,
                access_key: None,
                secret_key: None,
            },
            filer: FilerConfig {
                workspace_root: PathBuf::from(crate::constants::FILER_PVC_PATH),
            },
        }
    }

    /// Read the full configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let auth_kind = match env_or("AUTH_TYPE", "dummy").to_lowercase().as_str() {
            "dummy" => AuthKind::Dummy,
            "oidc" => AuthKind::Oidc,
            other => {
                return Err(PoiesisError::Validation(format!(
                    "AUTH_TYPE must be 'dummy' or 'oidc', got '{other}'"
                )))
            }
        };

        let oidc = match auth_kind {
            AuthKind::Dummy => None,
            AuthKind::Oidc => Some(OidcConfig {
                issuer: env_opt("OIDC_ISSUER")
                    .ok_or_else(|| PoiesisError::Validation("OIDC_ISSUER is required".into()))?,
                client_id: env_opt("OIDC_CLIENT_ID")
                    .ok_or_else(|| PoiesisError::Validation("OIDC_CLIENT_ID is required".into()))?,
                client_secret: env_opt("OIDC_CLIENT_SECRET"),
            }),
        };

        let monitor_timeout = match env_parse::<u64>("MONITOR_TIMEOUT_SECONDS", 0)? {
            0 => None,
            seconds => Some(Duration::from_secs(seconds)),
        };

        Ok(Self {
            environment: env_or("POIESIS_ENV", "development"),
            log_level: env_or("LOG_LEVEL", "info"),
            auth_kind,
            oidc,
            api: ApiConfig {
                port: env_parse("POIESIS_API_SERVER_PORT", 8000)?,
            },
            kubernetes: KubernetesConfig {
                namespace: env_or("POIESIS_K8S_NAMESPACE", "poiesis"),
                service_account: env_opt("POIESIS_SERVICE_ACCOUNT_NAME"),
                image: env_or("POIESIS_IMAGE", "docker.io/elixircloud/poiesis:latest"),
                restart_policy: env_or("POIESIS_RESTART_POLICY", "Never"),
                image_pull_policy: env_or("POIESIS_IMAGE_PULL_POLICY", "IfNotPresent"),
                job_ttl_seconds: env_opt("POIESIS_JOB_TTL")
                    .map(|raw| {
                        raw.parse().map_err(|_| {
                            PoiesisError::Validation(format!("POIESIS_JOB_TTL is not a number: {raw}"))
                        })
                    })
                    .transpose()?,
                pvc_access_mode: env_opt("POIESIS_PVC_ACCESS_MODE"),
                pvc_storage_class: env_opt("POIESIS_PVC_STORAGE_CLASS"),
                core_configmap: env_opt("POIESIS_CORE_CONFIGMAP_NAME"),
                mongo_secret: env_opt("POIESIS_MONGO_SECRET_NAME"),
                redis_secret: env_opt("POIESIS_REDIS_SECRET_NAME"),
                s3_secret: env_opt("POIESIS_S3_SECRET_NAME"),
            },
            security_context: SecurityContextConfig {
                infrastructure_enabled: env_bool(
                    "POIESIS_INFRASTRUCTURE_SECURITY_CONTEXT_ENABLED",
                    false,
                ),
                executor_enabled: env_bool("POIESIS_EXECUTOR_SECURITY_CONTEXT_ENABLED", false),
                path: env_opt("POIESIS_SECURITY_CONTEXT_PATH").map(PathBuf::from),
                configmap: env_opt("POIESIS_SECURITY_CONTEXT_CONFIGMAP_NAME"),
            },
            monitor_timeout,
            mongo: MongoConfig {
                host: env_or("MONGODB_HOST", "localhost"),
                port: env_parse("MONGODB_PORT", 27017)?,
                user: env_opt("MONGODB_USER"),
                password: env_opt("MONGODB_PASSWORD"),
                database: env_or("MONGODB_DATABASE", "poiesis"),
                max_pool_size: env_parse("MONGODB_MAX_POOL_SIZE", 10)?,
            },
            bus: BusConfig {
                host: env_or("MESSAGE_BROKER_HOST", "localhost"),
                port: env_parse("MESSAGE_BROKER_PORT", 6379)?,
                password: env_opt("MESSAGE_BROKER_PASSWORD"),
            },
            s3: S3Config {
                url: env_opt("S3_URL"),
                access_key: env_opt("AWS_ACCESS_KEY_ID"),
                secret_key: env_opt("AWS_SECRET_ACCESS_KEY"),
            },
            filer: FilerConfig {
                workspace_root: PathBuf::from(crate::constants::FILER_PVC_PATH),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mongo_uri_embeds_credentials_only_when_complete() {
        let mut cfg = MongoConfig {
            host: "db".into(),
            port: 27017,
            user: None,
            password: None,
            database: "poiesis".into(),
            max_pool_size: 10,
        };
        assert_eq!(cfg.uri(), "mongodb://db:27017");

        cfg.user = Some("alice".into());
        assert_eq!(cfg.uri(), "mongodb://db:27017");

        cfg.password = Some("s3cret".into());
        assert_eq!(cfg.uri(), "mongodb://alice:s3cret@db:27017");
    }

    #[test]
    fn bus_url_with_and_without_password() {
        let mut cfg = BusConfig {
            host: "redis".into(),
            port: 6379,
            password: None,
        };
        assert_eq!(cfg.url(), "redis://redis:6379");
        cfg.password = Some("p".into());
        assert_eq!(cfg.url(), "redis://:p@redis:6379");
    }
}

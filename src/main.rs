//! One image, five entrypoints: the subcommand decides which engine
//! workload this process is.

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use poiesis::api::{self, AppState};
use poiesis::auth::Authenticator;
use poiesis::bus::{MessageBus, RedisBus};
use poiesis::cluster::{ClusterDriver, KubeDriver};
use poiesis::config::Config;
use poiesis::filer::{Filer, FilerKind};
use poiesis::logging;
use poiesis::orchestrator::Torc;
use poiesis::store::{MongoStore, TaskStore};
use poiesis::texam::Texam;
use poiesis::transfer::SchemeRegistry;

#[derive(Parser)]
#[command(name = "poiesis", version, about = "GA4GH TES engine on Kubernetes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the TES HTTP API.
    Api,
    /// Orchestrate one task's lifecycle.
    Torc {
        #[arg(long)]
        task_id: String,
    },
    /// Stage one task's inputs into the shared workspace.
    Tif {
        #[arg(long)]
        task_id: String,
    },
    /// Run and monitor one task's executors.
    Texam {
        #[arg(long)]
        task_id: String,
    },
    /// Collect one task's outputs from the shared workspace.
    Tof {
        #[arg(long)]
        task_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;
    logging::init_tracing(&config.log_level);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "poiesis starting"
    );

    let outcome = match cli.command {
        Command::Api => run_api(config).await,
        Command::Torc { task_id } => run_torc(config, task_id).await,
        Command::Tif { task_id } => run_filer(config, task_id, FilerKind::Input).await,
        Command::Texam { task_id } => run_texam(config, task_id).await,
        Command::Tof { task_id } => run_filer(config, task_id, FilerKind::Output).await,
    };

    if let Err(err) = outcome {
        error!(error = %err, "workload failed");
        std::process::exit(1);
    }
    Ok(())
}

async fn store(config: &Config) -> anyhow::Result<TaskStore> {
    Ok(TaskStore::Mongo(
        MongoStore::connect(&config.mongo)
            .await
            .context("cannot reach the document store")?,
    ))
}

async fn bus(config: &Config) -> anyhow::Result<MessageBus> {
    Ok(MessageBus::Redis(
        RedisBus::connect(&config.bus)
            .await
            .context("cannot reach the message broker")?,
    ))
}

async fn cluster(config: &Config) -> anyhow::Result<ClusterDriver> {
    Ok(ClusterDriver::Kube(
        KubeDriver::connect(&config.kubernetes.namespace)
            .await
            .context("cannot reach the cluster")?,
    ))
}

async fn run_api(config: Config) -> anyhow::Result<()> {
    let auth = Authenticator::from_config(&config).await?;
    let state = AppState::new(
        store(&config).await?,
        cluster(&config).await?,
        auth,
        config,
    );
    api::serve(state).await?;
    Ok(())
}

async fn run_torc(config: Config, task_id: String) -> anyhow::Result<()> {
    let torc = Torc::new(
        store(&config).await?,
        bus(&config).await?,
        cluster(&config).await?,
        config.clone(),
        task_id,
    );
    torc.run().await?;
    Ok(())
}

async fn run_texam(config: Config, task_id: String) -> anyhow::Result<()> {
    let texam = Texam::new(
        store(&config).await?,
        bus(&config).await?,
        cluster(&config).await?,
        config.clone(),
        task_id,
    );
    texam.run().await?;
    Ok(())
}

async fn run_filer(config: Config, task_id: String, kind: FilerKind) -> anyhow::Result<()> {
    let filer = Filer::new(
        store(&config).await?,
        bus(&config).await?,
        SchemeRegistry::new(Some(config.s3.clone())),
        &config,
        task_id,
    );
    filer.run(kind).await?;
    Ok(())
}

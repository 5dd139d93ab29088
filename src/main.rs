//! Kubexpose controller - exposes Kubernetes services through ngrok deployments

use std::sync::Arc;

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::watcher;
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kubexpose::config::ControllerConfig;
use kubexpose::controller::{run_workers, Context};
use kubexpose::crd::{crd_yaml, Kubexpose, CRD_NAME};
use kubexpose::dependent::KubeDependentClient;
use kubexpose::informer::{watch_stream, Informer};
use kubexpose::queue::WorkQueue;
use kubexpose::store::ResourceCache;
use kubexpose::telemetry::{init_telemetry, TelemetryConfig};
use kubexpose::translator::EventTranslator;
use kubexpose::FIELD_MANAGER;

/// Kubexpose - expose Kubernetes services through ngrok tunnels
#[derive(Parser, Debug)]
#[command(name = "kubexpose", version, about, long_about = None)]
struct Cli {
    /// Print the Kubexpose CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller (default mode)
    Controller(ControllerConfig),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_yaml()?);
        return Ok(());
    }

    let config = match cli.command {
        Some(Commands::Controller(config)) => config,
        None => env_config(),
    };
    run_controller(config).await
}

/// Controller settings when no subcommand is given: defaults plus environment
fn env_config() -> ControllerConfig {
    #[derive(Parser)]
    struct EnvOnly {
        #[command(flatten)]
        config: ControllerConfig,
    }
    EnvOnly::parse_from(["kubexpose"]).config
}

/// Install or update the Kubexpose CRD with server-side apply
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    info!("Installing Kubexpose CRD...");
    crds.patch(
        CRD_NAME,
        &params,
        &Patch::Apply(&Kubexpose::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Kubexpose CRD: {}", e))?;
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
    token.cancel();
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig {
        log_format: config.log_format,
        ..Default::default()
    })?;
    config.validate()?;

    info!(
        namespace = config.namespace.as_deref().unwrap_or("<all>"),
        workers = config.workers,
        max_attempts = config.max_attempts,
        "Kubexpose controller starting..."
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if config.install_crd {
        ensure_crd_installed(&client).await?;
    }

    let api: Api<Kubexpose> = match &config.namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let cache = Arc::new(ResourceCache::<Kubexpose>::new());
    let queue = WorkQueue::new(config.backoff());
    let ctx = Arc::new(
        Context::builder(
            cache.clone(),
            Arc::new(KubeDependentClient::new(client)),
            queue.clone(),
        )
        .max_attempts(config.max_attempts)
        .build(),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let stream = watch_stream(
        api,
        watcher::Config::default().timeout(config.watch_timeout_secs),
    );
    let informer = tokio::spawn(Informer::new(cache).run(
        stream,
        Arc::new(EventTranslator::new(queue)),
        shutdown.clone(),
    ));

    run_workers(ctx, config.workers, shutdown.clone()).await;

    // Workers only return on shutdown; make sure the informer stops too
    shutdown.cancel();
    if let Err(e) = informer.await {
        warn!(error = %e, "Informer task failed");
    }

    info!("Kubexpose controller stopped");
    Ok(())
}

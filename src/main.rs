//! CLI entry point and operator HTTP surface (spec.md §4.10, §4.11).

use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use clap::{Parser, Subcommand};
use cicd_pilot::config::{AppConfig, ManifestSourceConfig};
use cicd_pilot::control::ControlApi;
use cicd_pilot::engine::PipelineEngine;
use cicd_pilot::executors::ConfirmationRegistry;
use cicd_pilot::logger::StructuredLogger;
use cicd_pilot::manifest_source::{GitManifestSource, LocalManifestSource, ManifestSource};
use cicd_pilot::notifier::NotifierAdapter;
use cicd_pilot::registry::sidecar::SidecarStore;
use cicd_pilot::registry::RunRegistry;
use cicd_pilot::runner::docker::DockerRuntime;
use cicd_pilot::runner::ContainerRunner;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod noop_transport;

#[derive(Parser)]
#[command(name = "cicd-pilot", about = "Chat-driven CI/CD pipeline orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the operator HTTP surface and hold the process open.
    Serve,
    /// Discover, start one pipeline run synchronously, print the final status.
    Run { manifest: String },
    /// Run manifest discovery once and print the resulting table.
    Discover,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let control = bootstrap(&config).await?;

    match cli.command {
        Command::Serve => serve(control, &config).await,
        Command::Run { manifest } => run_once(control, &manifest).await,
        Command::Discover => discover(control).await,
    }
}

async fn bootstrap(config: &AppConfig) -> anyhow::Result<Arc<ControlApi>> {
    let registry = Arc::new(RunRegistry::new());
    let logger = Arc::new(StructuredLogger::open(config.logging.log_path.as_str())?);
    let docker = Arc::new(DockerRuntime::new(config.docker.base_url.clone()));
    let runner = Arc::new(ContainerRunner::with_pool_size(
        docker,
        config.docker.limits(),
        config.docker.pool_size,
    ));
    let confirmations = Arc::new(ConfirmationRegistry::new());
    let transport = Arc::new(noop_transport::LoggingTransport::default());
    let notifier = Arc::new(NotifierAdapter::new(transport, confirmations.clone()));
    let sidecar = Arc::new(SidecarStore::new(&config.sidecar.directory));

    let source: Arc<dyn ManifestSource> = match &config.manifest_source {
        ManifestSourceConfig::Git { repo_url, pipelines_path, branch, token } => {
            Arc::new(GitManifestSource::from_repo_url(
                repo_url,
                pipelines_path.clone(),
                branch.clone(),
                token.clone(),
            )?)
        }
        ManifestSourceConfig::Local { directory } => Arc::new(LocalManifestSource::new(directory.clone())),
    };

    let engine = PipelineEngine::new(registry, logger, runner, notifier, confirmations, source, sidecar.clone());
    Ok(Arc::new(ControlApi::new(engine, sidecar)))
}

async fn serve(control: Arc<ControlApi>, config: &AppConfig) -> anyhow::Result<()> {
    let router = build_router(control);
    let listener = tokio::net::TcpListener::bind(config.server.bind_addr.as_str()).await?;
    tracing::info!(addr = %config.server.bind_addr, "operator HTTP surface listening");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn run_once(control: Arc<ControlApi>, manifest: &str) -> anyhow::Result<()> {
    control.discover().await?;
    let run_id = control.start(manifest, "cli", None).await?;

    loop {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        let Some(run) = control.status(run_id).await else {
            anyhow::bail!("run {run_id} disappeared from the registry");
        };
        if run.status.is_terminal() {
            println!("{}", run.status_line(0));
            std::process::exit(if run.status.log_str() == "success" { 0 } else { 1 });
        }
    }
}

async fn discover(control: Arc<ControlApi>) -> anyhow::Result<()> {
    let names = control.discover().await?;
    for name in names {
        println!("{name}");
    }
    Ok(())
}

fn build_router(control: Arc<ControlApi>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/pipelines", get(list_pipelines))
        .route("/pipelines/:name/runs", post(start_run))
        .route("/runs/:id", get(run_status))
        .route("/runs/:id/logs", get(run_logs))
        .with_state(control)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn list_pipelines(State(control): State<Arc<ControlApi>>) -> impl IntoResponse {
    Json(control.list_pipelines())
}

#[derive(Serialize)]
struct StartRunResponse {
    run_id: u64,
}

async fn start_run(
    State(control): State<Arc<ControlApi>>,
    AxumPath(name): AxumPath<String>,
) -> Result<Json<StartRunResponse>, (StatusCode, String)> {
    let run_id = control
        .start(&name, "operator-http", None)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(StartRunResponse { run_id }))
}

async fn run_status(
    State(control): State<Arc<ControlApi>>,
    AxumPath(id): AxumPath<u64>,
) -> Result<impl IntoResponse, StatusCode> {
    match control.status(id).await {
        Some(run) => Ok(Json(run)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn run_logs(
    State(control): State<Arc<ControlApi>>,
    AxumPath(id): AxumPath<u64>,
) -> Result<String, (StatusCode, String)> {
    control
        .logs(id)
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))
}

//! `comfybot-worker` -- runs ComfyUI workflows and saves their outputs.
//!
//! Connects to the backend's event stream, submits every workflow file
//! given on the command line as a concurrent job, logs throttled
//! progress, and writes each output to `<out>/<stem>_<node>_<index>.<ext>`.
//! Environment variables are documented on [`config::WorkerConfig::from_env`].

mod config;
mod output;
mod sinks;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comfybot_comfyui::api::checkpoint_names;
use comfybot_comfyui::{ComfyUIApi, ComfyUIClient, Transport};
use comfybot_core::progress::OutputSurface;
use comfybot_core::types::Artifacts;
use comfybot_jobs::{Dispatcher, JobError, JobTracker};

use config::{LogFormat, WorkerConfig};
use sinks::{LogProgress, LogSurface};

const SHUTDOWN_NOTICE: &str = "Worker is shutting down; unfinished jobs will not be collected.";

#[derive(Debug, Parser)]
#[command(name = "comfybot-worker", version, about = "Run ComfyUI workflows and save their outputs")]
struct Args {
    /// Workflow files in the backend's API (prompt) format.
    #[arg(required = true)]
    workflows: Vec<PathBuf>,

    /// Directory the outputs are written to.
    #[arg(long, default_value = "outputs")]
    out: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = WorkerConfig::from_env();
    init_tracing(config.as_ref().map(|c| c.log_format).unwrap_or_default());
    let config = config.context("Invalid configuration")?;

    tracing::info!(
        host = %config.comfy_host,
        client_id = %config.client_id,
        workflows = args.workflows.len(),
        "Starting comfybot-worker",
    );

    let api = ComfyUIApi::new(config.api_url());
    log_capabilities(&api).await;

    // --- Event stream ---
    let client = ComfyUIClient::new(config.ws_url(), config.client_id.clone())
        .with_keep_alive(config.keep_alive.clone());
    let transport = Arc::new(Transport::new(Arc::new(client), config.reconnect.clone()));
    let transport_handle = transport.start();

    if !transport.wait_connected(config.connect_wait).await {
        tracing::warn!(
            wait_secs = config.connect_wait.as_secs(),
            "Event stream not connected; jobs submitted now will be refused",
        );
    }

    tokio::fs::create_dir_all(&args.out)
        .await
        .with_context(|| format!("Failed to create output directory {}", args.out.display()))?;

    // --- Jobs ---
    let dispatcher = Dispatcher::new(
        api,
        Arc::clone(&transport),
        Arc::new(JobTracker::new()),
        config.job.clone(),
    );
    let surface: Arc<dyn OutputSurface> = Arc::new(LogSurface::new("console"));

    let total = args.workflows.len();
    let mut jobs = JoinSet::new();
    for path in args.workflows {
        let payload = load_workflow(&path).await?;
        let sink = Arc::new(LogProgress::new(stem(&path), Arc::clone(&surface)));
        let dispatcher = dispatcher.clone();
        jobs.spawn(async move {
            let result = dispatcher.run(payload, Some(sink)).await;
            (path, result)
        });
    }

    let mut failed = 0usize;
    let interrupted = tokio::select! {
        () = collect_outputs(&mut jobs, &args.out, &mut failed) => false,
        () = shutdown_signal() => true,
    };

    if interrupted {
        let notified = dispatcher.notify_all(SHUTDOWN_NOTICE).await;
        tracing::info!(
            notified,
            active = dispatcher.active_job_count(),
            "Shutdown notice sent",
        );
        failed += jobs.len();
    }

    // Dropping the remaining job futures releases their registrations.
    jobs.shutdown().await;

    transport.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(5), transport_handle).await;
    tracing::info!("Worker stopped");

    if failed > 0 {
        anyhow::bail!("{failed} of {total} workflows did not complete");
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "comfybot_worker=info,comfybot_jobs=info,comfybot_comfyui=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Log what the backend can run. Failure is not fatal: the event stream
/// may still come up later.
async fn log_capabilities(api: &ComfyUIApi) {
    match api.system_info().await {
        Ok(info) => {
            let node_classes = info.as_object().map_or(0, |nodes| nodes.len());
            let checkpoints = checkpoint_names(&info);
            tracing::info!(
                node_classes,
                checkpoints = checkpoints.len(),
                "Backend capabilities loaded",
            );
            for name in checkpoints {
                tracing::debug!(checkpoint = %name, "Available checkpoint");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to query backend capabilities");
        }
    }
}

async fn load_workflow(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read workflow {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("Workflow {} is not valid JSON", path.display()))
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workflow".to_string())
}

/// Wait for every job and save its outputs, counting failures.
async fn collect_outputs(
    jobs: &mut JoinSet<(PathBuf, Result<Artifacts, JobError>)>,
    out: &Path,
    failed: &mut usize,
) {
    while let Some(joined) = jobs.join_next().await {
        let (path, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                tracing::error!(error = %e, "Job task panicked");
                *failed += 1;
                continue;
            }
        };

        let artifacts = match result {
            Ok(artifacts) => artifacts,
            Err(e) => {
                tracing::error!(workflow = %path.display(), error = %e, "Workflow failed");
                *failed += 1;
                continue;
            }
        };

        match output::write_artifacts(out, &stem(&path), &artifacts).await {
            Ok(written) => {
                for file in &written {
                    tracing::info!(workflow = %path.display(), file = %file.display(), "Saved output");
                }
                if written.is_empty() {
                    tracing::warn!(workflow = %path.display(), "Workflow produced no files");
                }
            }
            Err(e) => {
                tracing::error!(workflow = %path.display(), error = %e, "Failed to save outputs");
                *failed += 1;
            }
        }
    }
}

/// Wait for a shutdown signal (Ctrl-C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

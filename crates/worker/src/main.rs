mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use headshot_core::config::{env_or, env_secs};
use headshot_core::job::JobStatus;
use headshot_core::style::Style;
use headshot_core::types::JobId;
use headshot_events::{EventLog, JobEvent};
use headshot_pipeline::{JobService, Pipeline, PipelineConfig};
use headshot_provider::{HttpTransformProvider, ProviderConfig};
use headshot_store::artifact_store::DEFAULT_MAX_TOTAL_BYTES;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, SubmitArgs};

/// How long shutdown waits for in-flight provider calls by default.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    match cli::parse(std::env::args().skip(1))? {
        Command::Styles => {
            for style in Style::ALL {
                println!("{:<24}{}", style.name(), style.label());
            }
            Ok(())
        }
        Command::Submit(args) => submit(args).await,
    }
}

/// Run one photo through a local pipeline and write the headshot to disk.
async fn submit(args: SubmitArgs) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let provider_config = ProviderConfig::from_env().context("Invalid provider configuration")?;
    let artifact_budget = env_or("ARTIFACT_MAX_BYTES", DEFAULT_MAX_TOTAL_BYTES)?;
    let shutdown_timeout = env_secs("SHUTDOWN_TIMEOUT_SECS", DEFAULT_SHUTDOWN_TIMEOUT)?;

    tracing::info!(
        provider = %provider_config.base_url,
        max_concurrency = config.max_concurrency,
        max_attempts = config.retry.max_attempts,
        "Headshot worker starting",
    );

    let provider = HttpTransformProvider::new(provider_config)
        .context("Failed to build provider HTTP client")?;
    let pipeline = Pipeline::in_memory_with_budget(config, Arc::new(provider), artifact_budget)
        .context("Invalid pipeline configuration")?;

    // --- Event log ---
    let event_log = tokio::spawn(EventLog::run(pipeline.events().subscribe()));

    // --- Background loops ---
    let handle = pipeline.start(CancellationToken::new());
    let service = pipeline.service();
    let mut events = service.subscribe();

    let outcome = tokio::select! {
        result = run_job(&service, &mut events, &args) => result,
        () = shutdown_signal() => Err(anyhow::anyhow!("Interrupted before the job finished")),
    };

    // --- Shutdown ---
    if tokio::time::timeout(shutdown_timeout, handle.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Timed out waiting for in-flight provider calls"
        );
    }

    // Dropping the last bus sender closes the event log.
    drop(events);
    drop(service);
    drop(pipeline);
    let _ = tokio::time::timeout(Duration::from_secs(5), event_log).await;
    tracing::info!("Headshot worker stopped");
    outcome
}

async fn run_job(
    service: &JobService,
    events: &mut broadcast::Receiver<JobEvent>,
    args: &SubmitArgs,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("Failed to read {}", args.image.display()))?;
    let source = service.upload_source(bytes).await?;
    let id = service
        .submit_job(args.client.clone(), source, args.style)
        .await?;
    tracing::info!(job_id = %id, style = args.style.label(), "Job submitted");

    let status = wait_for_terminal(service, events, id).await?;
    if status != JobStatus::Completed {
        tracing::warn!(job_id = %id, status = status.as_str(), "Job did not complete");
    }

    let result = service.fetch_result(id).await?;
    let out = args
        .out
        .clone()
        .unwrap_or_else(|| cli::default_output(&args.image, &result.mime_type));
    tokio::fs::write(&out, &result.bytes)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;
    tracing::info!(job_id = %id, path = %out.display(), bytes = result.bytes.len(), "Headshot written");
    Ok(())
}

/// Wait for `id` to reach a terminal status.
async fn wait_for_terminal(
    service: &JobService,
    events: &mut broadcast::Receiver<JobEvent>,
    id: JobId,
) -> anyhow::Result<JobStatus> {
    loop {
        match events.recv().await {
            Ok(event) if event.job_id == id && event.status.is_terminal() => return Ok(event.status),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event stream lagged, polling job status");
                let snapshot = service.get_job_status(id).await?;
                if snapshot.status.is_terminal() {
                    return Ok(snapshot.status);
                }
            }
            Err(RecvError::Closed) => bail!("Event bus closed before job {id} finished"),
        }
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "headshot_worker=debug,headshot_pipeline=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

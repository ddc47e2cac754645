use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use camlink::api::{ApiServer, AppState};
use camlink::capture::{self, JpegEncoder, PatternSourceFactory};
use camlink::channel::Channel;
use camlink::config::Args;
use camlink::logging::{self, DEFAULT_LOG_FILTER};
use camlink::scheduler::{Scheduler, SchedulerConfig};
use camlink::supervisor::{HttpBackend, Supervisor, SystemProbe};

/// Pause between device detection passes.
const DETECT_PASS_DELAY: Duration = Duration::from_secs(1);

/// How long each task gets to wind down after cancellation.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {:#}", e);
            eprintln!("camlink: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Args::parse()
        .into_config()
        .context("invalid configuration")?;
    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir, DEFAULT_LOG_FILTER)
        .context("failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.backend.base_url(),
        mode = %config.mode,
        listen = %config.listen_addr,
        "camlink starting"
    );

    let root = CancellationToken::new();
    let retention_task = logging_config.start_retention_cleanup(root.child_token());

    // Capture hardware is abstracted behind the factory; the test pattern
    // keeps the agent runnable on hosts without cameras.
    let factory = Arc::new(PatternSourceFactory::new(
        config.capture.width,
        config.capture.height,
    ));
    let candidates = capture::candidate_devices(&config.known_devices, Path::new("/dev"))
        .context("failed to enumerate video devices")?;
    let detected = capture::detect_channels(
        factory,
        &candidates,
        config.detect_attempts,
        DETECT_PASS_DELAY,
    )
    .await
    .context("device detection failed")?;

    let encoder = Arc::new(JpegEncoder::new());
    let channels: Vec<Channel> = detected
        .into_iter()
        .map(|d| Channel::new(d.device, d.source, encoder.clone(), config.capture))
        .collect();
    let channel_count = channels.len();

    let (scheduler, scheduler_task) = Scheduler::new(
        channels,
        SchedulerConfig::from_agent(&config),
        root.child_token(),
    )
    .spawn();

    let backend = Arc::new(HttpBackend::new(&config.backend).context("failed to build HTTP client")?);
    let (supervisor, supervisor_task) = Supervisor::new(
        &config,
        backend,
        Arc::new(SystemProbe::new()),
        scheduler.clone(),
        channel_count,
        root.clone(),
    )
    .spawn();

    let api_server = ApiServer::new(
        config.listen_addr,
        AppState::new(supervisor).with_logging_config(logging_config),
        root.child_token(),
    );
    let api_task: JoinHandle<camlink::Result<()>> =
        tokio::spawn(async move { api_server.run().await });

    let mut supervisor_task = Some(supervisor_task);
    let mut outcome = Ok(());

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = root.cancelled() => info!("Shutdown requested through the API"),
        joined = async {
            match supervisor_task.as_mut() {
                Some(task) => task.await,
                None => std::future::pending().await,
            }
        } => {
            supervisor_task = None;
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => outcome = Err(anyhow::Error::new(e)),
                Err(e) => outcome = Err(anyhow::anyhow!("supervisor task failed: {}", e)),
            }
        }
    }

    info!("Shutting down");
    root.cancel();

    if let Some(task) = supervisor_task {
        match join_with_timeout("supervisor", task).await {
            Some(Ok(Err(e))) if e.is_fatal() => outcome = Err(anyhow::Error::new(e)),
            Some(Ok(Err(e))) => warn!(error = %e, "Supervisor ended with an error"),
            _ => {}
        }
    }
    join_with_timeout("scheduler", scheduler_task).await;
    if let Some(Ok(Err(e))) = join_with_timeout("api server", api_task).await {
        warn!(error = %e, "API server ended with an error");
    }
    join_with_timeout("log retention", retention_task).await;

    info!("camlink stopped");
    outcome
}

/// Await `task`, aborting it after [`SHUTDOWN_TIMEOUT`].
async fn join_with_timeout<T>(
    name: &str,
    mut task: JoinHandle<T>,
) -> Option<Result<T, tokio::task::JoinError>> {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await {
        Ok(joined) => Some(joined),
        Err(_) => {
            warn!(task = name, "Task did not stop in time, aborting");
            task.abort();
            None
        }
    }
}

/// Wait for SIGTERM or Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

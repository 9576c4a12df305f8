use clap::Parser;
use pingwatch::capture::{run_capture, NflogCapture};
use pingwatch::cli::{Args, Command};
use pingwatch::handlers::handle_connection;
use pingwatch::persistence::StateFile;
use pingwatch::ping_log::PingLog;
use pingwatch::server_loop::serve_stream;
use pingwatch::shutdown::Shutdown;
use pingwatch::types::GenericBoxedStream;
use pingwatch::unix_accept_stream::{bind_socket, unix_accept_stream};
use pingwatch::{install, sd_notify, workers};
use std::fs;
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    match &args.command {
        Some(Command::Install { overwrite }) => {
            install::install(*overwrite, args.nflog_group, args.max_entries)?;
            return Ok(());
        }
        Some(Command::Uninstall { purge }) => {
            install::uninstall(*purge)?;
            return Ok(());
        }
        None => {}
    }

    // Hydrate before anything else touches the log
    let log = Arc::new(PingLog::new(args.max_entries));
    let state = StateFile::in_dir(args.state_dir());
    match state.load(&log) {
        Ok(true) => info!(
            "Loaded {} pings from {} addresses out of {}",
            log.snapshot().observation_count(),
            log.len(),
            state.path().display()
        ),
        Ok(false) => info!("No saved state at {}, starting empty", state.path().display()),
        Err(e) => {
            error!("cannot load state from {}: {}", state.path().display(), e);
            return Err(e.into());
        }
    }

    let capture = NflogCapture::open(args.nflog_group)?;
    info!("Subscribed to nflog group {}", capture.group());

    let socket_path = args.socket_path();
    let listener = bind_socket(&socket_path)?;
    info!("Listening on unix:{}", socket_path.display());

    let shutdown = Shutdown::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = terminate.recv() => {}
                    }
                }
                Err(e) => {
                    error!("Failed to listen for SIGTERM: {}", e);
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                }
            }
            info!("Shutdown signal received");
            shutdown.trigger();
        }
    });

    let (tx, rx) = mpsc::channel(args.queue_depth());
    let capture_handle = task::spawn_blocking({
        let shutdown = shutdown.clone();
        move || {
            let result = run_capture(capture, tx, shutdown.clone());
            // A dead capture leaves nothing to record; let the supervisor restart us
            shutdown.trigger();
            result
        }
    });
    let ingest_handle = tokio::spawn(workers::run_ingest(rx, log.clone()));

    let server_handle = tokio::spawn({
        let log = log.clone();
        let timeout = args.connection_timeout();
        let stream: GenericBoxedStream<UnixStream> = Box::pin(unix_accept_stream(listener));
        serve_stream(stream, shutdown.clone(), move |stream| {
            task::spawn(handle_connection(stream, log.clone(), timeout))
        })
    });

    let persistence_handle = tokio::spawn(workers::run_persistence(
        log.clone(),
        state.clone(),
        args.save_interval(),
        shutdown.clone(),
    ));

    match sd_notify::ready() {
        Ok(true) => info!("Notified service manager of readiness"),
        Ok(false) => {}
        Err(e) => warn!("Failed to notify service manager: {}", e),
    }

    shutdown.wait().await;
    if let Err(e) = sd_notify::stopping() {
        warn!("Failed to notify service manager: {}", e);
    }

    let capture_result = capture_handle.await;
    let _ = tokio::try_join!(ingest_handle, server_handle, persistence_handle);

    if workers::store_log(log.clone(), state).await {
        info!("Final state stored");
    }
    if let Err(e) = fs::remove_file(&socket_path) {
        warn!("Failed to remove {}: {}", socket_path.display(), e);
    }

    match capture_result {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(e.into()),
    }
}

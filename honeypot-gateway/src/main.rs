//! Process entry point: load configuration, start the [`Supervisor`], wait for a termination
//! signal, then shut down gracefully. Runs as a plain foreground/daemon process rather than an
//! installable service — a honeypot has no Windows-service registration concept to speak of.

use honeypot_gateway::config::Config;
use honeypot_gateway::supervisor::{StartError, Supervisor};
use honeypot_gateway::{EXIT_BIND_FAILURE, EXIT_CONFIG_ERROR, EXIT_OK, EXIT_STORAGE_INIT_FAILURE};
use tracing::{error, info, warn};

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start the async runtime: {error:#}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let exit_code = runtime.block_on(run());
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            return EXIT_CONFIG_ERROR;
        }
    };

    let _logger_guard = match honeypot_gateway::log::init(&config.log_path) {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("failed to initialize logging: {error:#}");
            return EXIT_CONFIG_ERROR;
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "starting honeypot-gateway");

    let (supervisor, _state) = match Supervisor::start(config).await {
        Ok(started) => started,
        Err(StartError::Storage(error)) => {
            error!(%error, "storage initialization failed");
            return EXIT_STORAGE_INIT_FAILURE;
        }
        Err(StartError::Bind(error)) => {
            error!(%error, "failed to bind a listener");
            return EXIT_BIND_FAILURE;
        }
    };

    info!("honeypot-gateway is running");

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping");

    supervisor.shutdown().await;
    info!("shutdown complete");

    EXIT_OK
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%error, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%error, "failed to install SIGINT handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    let mut quit = match signal(SignalKind::quit()) {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%error, "failed to install SIGQUIT handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = terminate.recv() => {}
        _ = interrupt.recv() => {}
        _ = quit.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

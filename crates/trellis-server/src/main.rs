#![doc = include_str!("../README.md")]

mod server;

use anyhow::bail;
use clap::Parser;
use server::config::{AppConfig, CliArgs};
use server::service::OrdersModule;
use server::telemetry::init_telemetry;
use tokio::signal;
use trellis::{Assembly, Components, HealthChecker, ProbeKind, ServerComposer};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = AppConfig::try_from(args)?;

    let providers = init_telemetry()?;
    let result = run(config).await;
    providers.shutdown();
    result
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let mut assembly = Assembly::new();
    assembly.install(&OrdersModule::new(config.orders))?;
    let Components { server, probes } = assembly.build();

    let health = HealthChecker::compose(probes)?;
    let startup = health.check(ProbeKind::Startup);
    if !startup.success {
        for (probe, status) in startup.failures() {
            tracing::error!(probe, message = %status.message, "startup probe failed");
        }
        bail!("startup probes failed");
    }

    log_startup_info(&config);
    let running = ServerComposer::new(config.server, server)
        .assemble()?
        .start()
        .await;
    if !running.is_serving() {
        tracing::warn!("order service is running without a listener until shutdown");
    }

    running.run_until(shutdown_signal()).await?;
    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &AppConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting order service on {} with full config: {:#?}",
            config.server.address,
            config
        );
    } else {
        tracing::info!(
            "Starting order service on {} (tracing: {}, metrics: {})",
            config.server.address,
            config.server.tracing.enabled,
            config.server.metrics.enabled
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}

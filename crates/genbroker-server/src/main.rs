use clap::Parser;
use core::time::Duration;
use genbroker_server::server::{
    broker::{Broker, BrokerOptions},
    bus,
    config::{CliArgs, ServerConfig},
    service::router::{HttpLimits, build_router},
    telemetry::init_telemetry,
    worker::{EchoGenerator, spawn_worker},
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(config.log_format)?;

    let bus = bus::connect(&config.bus).await?;
    let broker = Broker::new(Arc::clone(&bus), BrokerOptions::from(&config));

    if config.embedded_worker {
        spawn_worker(
            Arc::clone(&bus),
            &config.job_topic,
            Arc::new(EchoGenerator),
            broker.shutdown_token(),
        )
        .await?;
        tracing::info!(topic = %config.job_topic, "Embedded echo worker started");
    }

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config);

    let app = build_router(broker.clone(), HttpLimits::from(&config));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(broker, config.shutdown_timeout))
        .await?;

    tracing::info!("Service shut down successfully");
    providers.shutdown();
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting generation broker on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting generation broker on {} (capacity {}, bus {:?})",
            config.server_addr,
            config.capacity,
            config.bus
        );
    }
}

/// Resolves once a termination signal arrives, after starting the broker's
/// drain in the background. Axum then stops accepting connections and waits
/// for the open ones, which the drain bounds by `drain_timeout`.
async fn shutdown_signal(broker: Broker, drain_timeout: Duration) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
    tokio::spawn(async move { broker.shutdown(drain_timeout).await });
}

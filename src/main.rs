use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskpool::api;
use taskpool::config::Config;
use taskpool::pool::SimulatedHandler;
use taskpool::scheduler::Scheduler;
use taskpool::server::Server;
use taskpool::store::InMemoryTaskStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    config.validate()?;

    let handler =
        SimulatedHandler::new(config.failure_rate).with_duration(config.work_duration());
    let scheduler = Arc::new(Scheduler::new(
        config.pool_config(),
        Arc::new(InMemoryTaskStore::new()),
        handler,
    )?);
    scheduler.start();

    let router = Arc::new(api::routes(Arc::clone(&scheduler)));
    let server = Server::bind(config.bind_addr())
        .await?
        .with_shutdown_grace(config.shutdown_timeout());

    server
        .run_until(
            move |request| {
                let router = Arc::clone(&router);
                async move { router.route(request).await }
            },
            shutdown_signal(),
        )
        .await?;

    tracing::info!("stopping worker pool");
    scheduler.shutdown().await;

    for (status, count) in scheduler.status_counts() {
        tracing::info!(status, count, "final task tally");
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

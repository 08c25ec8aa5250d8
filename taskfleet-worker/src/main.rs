//! Fleet worker binary: consume task ids from the partitions this worker
//! owns under the fleet's consistent-hash assignment.

use envconfig::Envconfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use taskfleet_common::metrics::{serve, setup_metrics_recorder, setup_metrics_router};
use taskfleet_worker::config::Config;
use taskfleet_worker::error::WorkerError;
use taskfleet_worker::worker::Worker;

async fn shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("shutting down gracefully...");
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    let config = Config::init_from_env().expect("Invalid configuration");

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let recorder = setup_metrics_recorder();
    let bind = config.bind();
    tokio::spawn(async move {
        let router = setup_metrics_router(recorder);
        tracing::info!(bind = %bind, "metrics endpoint listening");
        if let Err(e) = serve(router, &bind).await {
            tracing::error!(error = %e, "metrics server failed");
        }
    });

    let worker = Worker::new(config);
    tracing::info!(worker_id = %worker.worker_id(), "worker starting");

    let cancel = CancellationToken::new();
    let signal_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
    };

    let result = worker.run(cancel).await;
    signal_task.abort();

    match &result {
        Ok(()) => tracing::info!("worker shutdown complete"),
        Err(e) => tracing::error!(error = %e, "worker exited with error"),
    }
    result
}

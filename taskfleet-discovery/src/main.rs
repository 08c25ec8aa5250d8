//! Discovery sidecar binary: keep the scrape targets file in sync with the
//! live worker fleet.

use envconfig::Envconfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use taskfleet_common::store::CoordStore;

mod config;
mod sidecar;

use config::Config;
use sidecar::DiscoverySidecar;

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
async fn main() -> taskfleet_common::Result<()> {
    let config = Config::init_from_env().expect("Invalid configuration");

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    tracing::info!(
        targets_path = %config.targets_path,
        job = %config.job_label,
        "discovery sidecar starting"
    );

    let store = CoordStore::connect(&config.etcd_endpoint_list()).await?;
    let mut sidecar =
        DiscoverySidecar::new(store, config.targets_path.clone(), config.job_label.clone());

    let cancel = CancellationToken::new();
    let signal_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
    };

    let result = sidecar.run(cancel).await;
    signal_task.abort();
    result
}

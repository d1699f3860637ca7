//! Cosmo Tech Kubernetes Operator
//!
//! Main entry point for the operator. Reads the settings, sets up the
//! Kubernetes client and the backend adapter, and runs the watch loop for
//! the configured resource kind.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cosmotech_operator::{
    config::Settings,
    controllers::{KubeResourceStore, KubeWatchSource, WatchLoop},
    metrics,
    reconcilers::Reconciler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    let settings = Settings::parse();
    settings.validate()?;
    info!(
        kind = %settings.kind,
        namespace = %settings.namespace,
        "Starting Cosmo Tech operator"
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let http = reqwest::Client::builder()
        .user_agent(concat!("cosmotech-operator/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let adapter = settings.adapter(http)?;

    let cancel = CancellationToken::new();
    let store = Arc::new(KubeResourceStore::new(client.clone(), &settings.namespace));
    let source = Arc::new(KubeWatchSource::new(&client, &settings.namespace, settings.kind));
    let reconciler = Reconciler::new(settings.kind, store, adapter, cancel.clone());
    let mut watch_loop = WatchLoop::new(source, reconciler, settings.watch_config(), cancel.clone());

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(settings.metrics_port));
    info!("Metrics server starting on port {}", settings.metrics_port);

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Received shutdown signal, stopping operator");
            cancel.cancel();
        }
    };
    tokio::spawn(shutdown);

    let result = tokio::select! {
        result = watch_loop.run() => result.map_err(anyhow::Error::from),
        served = metrics_handle => {
            error!("Metrics server exited unexpectedly");
            match served {
                Ok(Ok(())) => Err(anyhow::anyhow!("metrics server stopped")),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(e.into()),
            }
        }
    };

    info!("Cosmo Tech operator stopped");
    result
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

use anyhow::{Context, Result};
use replay_relay::config::Config;
use replay_relay::decoder::{ScrepDecoder, DECODER_VERSION};
use replay_relay::pipeline::{PipelineSettings, UploadPipeline};
use replay_relay::staging::StagingArea;
use replay_relay::{start_api_server, store, AppState};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        decoder_version = DECODER_VERSION,
        "Starting replay relay service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = store::from_config(&config.store)
        .await
        .context("Failed to initialize artifact store")?;

    let staging = StagingArea::new(&config.staging.dir)
        .await
        .context("Failed to initialize staging area")?;

    info!(
        store = store.backend(),
        staging_dir = %staging.dir().display(),
        relay_mode = ?config.upload.relay_mode,
        max_upload_bytes = config.upload.max_upload_bytes,
        "Pipeline components initialized"
    );

    let pipeline = UploadPipeline::new(
        staging,
        store,
        Arc::new(ScrepDecoder::new()),
        PipelineSettings::from_config(&config),
    );

    let api_state = AppState {
        pipeline,
        upload: config.upload.clone(),
    };

    // Serve until a shutdown signal; in-flight uploads are allowed to finish
    if let Err(e) = start_api_server(api_state, &config.api, shutdown_signal()).await {
        error!(error = %e, "API server error");
        return Err(e);
    }

    info!("Replay relay service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Shutting down replay relay service");
}

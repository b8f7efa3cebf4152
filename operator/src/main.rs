use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use kube::CustomResourceExt;
use log::{error, info};
use nopea_defs::{Config, GitRepository};
use nopea_events::{Emitter, EmitterConfig, HttpSink};
use nopea_gitops::{CliGit, DynamicKube};
use nopea_store::Cache;
use nopea_utils::{setup_logging, UlidGen};

mod controller;
mod fleet;
mod heal;
mod metrics;
mod status;
#[cfg(test)]
mod testutil;
mod webhook;
mod worker;

use controller::Controller;
use fleet::Fleet;
use metrics::Metrics;
use webhook::AppState;
use worker::WorkerDeps;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging().expect("Failed to initialize logging.");

    if std::env::args().any(|arg| arg == "--print-crd") {
        println!("{}", serde_yaml::to_string(&GitRepository::crd())?);
        return Ok(());
    }

    let config = Config::from_env()?;
    info!(
        "starting nopea (namespace: {:?}, repo base: {})",
        config.watch_namespace, config.repo_base
    );

    let client = kube::Client::try_default().await?;
    let metrics = Arc::new(Metrics::new());
    let cache = Arc::new(Cache::new());
    let ids = Arc::new(UlidGen::new());

    let emitter = match &config.events_endpoint {
        Some(endpoint) => {
            info!("emitting CDEvents to {}", endpoint);
            Emitter::spawn(
                Arc::new(HttpSink::new(endpoint)),
                EmitterConfig {
                    retry_delay_ms: config.events_retry_delay_ms,
                    max_retries: config.events_max_retries,
                },
            )
        }
        None => Emitter::disabled(),
    };

    let fleet = Fleet::new(WorkerDeps {
        git: Arc::new(CliGit),
        kube: Arc::new(DynamicKube::new(client.clone())),
        cache: cache.clone(),
        emitter,
        metrics: metrics.clone(),
        ids: ids.clone(),
        repo_base: PathBuf::from(&config.repo_base),
    });
    let ready = Arc::new(AtomicBool::new(false));

    let state = Arc::new(AppState {
        fleet: fleet.clone(),
        cache,
        ids,
        metrics: metrics.clone(),
        webhook_secret: config.webhook_secret.clone(),
        controller_ready: ready.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&config.webhook_addr).await?;
    info!("webhook server listening on {}", config.webhook_addr);
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, webhook::router(state)).await {
            error!("webhook server failed: {}", e);
        }
    });

    let controller = Controller::new(client, fleet.clone(), config, metrics, ready);

    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = controller.run() => {}
        _ = server => {}
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = sigterm.recv() => info!("termination signal received"),
    }

    info!("shutting down; stopping all workers");
    fleet.stop_all().await;
    Ok(())
}

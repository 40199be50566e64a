use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use config::{AppConfig, Args, Command, SamplerSettings, ServeArgs};
use services::{
    blob_store::azure::AzureBlobStore, captioner::AzureOpenAiCaptioner, sampler::ModelSampler,
    stats::ProcessStats, worker::CaptionWorker,
};

mod config;
mod errors;
mod handlers;
mod logging;
mod models;
mod routes;
mod services;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // --- Logging setup ---
    logging::init(args.verbose, args.json_logs);

    match args.command {
        Some(Command::Sample(sample)) => sample_models(sample.into()).await,
        Some(Command::Serve(serve)) => serve_worker(serve).await,
        None => serve_worker(ServeArgs::default()).await,
    }
}

async fn serve_worker(args: ServeArgs) -> Result<()> {
    let cfg = AppConfig::from_env_and_args(args)?;

    tracing::info!("Starting caption-worker with config: {:?}", cfg);

    // --- Initialize clients ---
    let store = AzureBlobStore::new(&cfg.storage).context("configuring blob storage client")?;
    let captioner =
        AzureOpenAiCaptioner::new(&cfg.openai).context("configuring captioning client")?;
    let stats = Arc::new(ProcessStats::new());

    // --- Start polling loop ---
    let worker = CaptionWorker::new(
        Arc::new(store),
        Arc::new(captioner),
        stats.clone(),
        cfg.worker.clone(),
    );
    let worker_task = tokio::spawn(worker.run());

    // --- Build router ---
    let app: Router = routes::routes::routes()
        .layer(TraceLayer::new_for_http())
        .with_state(stats);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    let served = axum::serve(listener, app).await;
    worker_task.abort();
    served?;

    Ok(())
}

async fn sample_models(settings: SamplerSettings) -> Result<()> {
    tracing::debug!("Sampling {} with {} requests", settings.url, settings.count);

    let sampler = ModelSampler::new(settings).context("building HTTP client")?;
    let mut stdout = std::io::stdout().lock();
    sampler.run(&mut stdout).await?;

    Ok(())
}

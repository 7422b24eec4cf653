use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;
mod capabilities;
mod config;
mod db;
mod dispatch;
mod error;
mod extensions;
mod files;
mod service;
mod tasks;
#[cfg(test)]
mod testing;

use crate::capabilities::{Capabilities, HttpCapabilityClient};
use crate::config::AppConfig;
use crate::db::Database;
use crate::extensions::{Extensions, TASK_QUEUE_EXTENSION};
use crate::files::LocalFileStore;
use crate::service::DispatchService;
use crate::tasks::{AppContext, ProcessDocumentTask, TaskQueue};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!(
        "Starting document dispatch service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Arc::new(AppConfig::load()?);
    info!(
        host = %config.server.host,
        port = config.server.port,
        queue = %config.task_queue.name,
        workers = config.task_queue.concurrency,
        "Configuration loaded"
    );

    std::fs::create_dir_all(&config.storage.data_dir)?;

    let db_path = config.storage.database_path();
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    let interrupted = db.fail_interrupted_tasks()?;
    if interrupted > 0 {
        warn!(count = interrupted, "Marked tasks interrupted by previous shutdown as failed");
    }

    let metrics = PrometheusBuilder::new().install_recorder()?;

    let files = Arc::new(LocalFileStore::new(
        config.storage.documents_dir(),
        config.server.public_base_url.clone(),
    )?);
    let downstream = Arc::new(HttpCapabilityClient::new(config.downstream.clone())?);
    for (capability, url) in [
        ("embeddings", &config.downstream.embeddings_url),
        ("spreadsheets", &config.downstream.spreadsheets_url),
        ("audio", &config.downstream.audio_url),
    ] {
        match url {
            Some(url) => info!(capability, url = %url, "Downstream endpoint configured"),
            None => warn!(capability, "Downstream endpoint not configured"),
        }
    }

    let capabilities = Capabilities {
        documents: db.clone(),
        files: files.clone(),
        download_urls: files.clone(),
        embeddings: downstream.clone(),
        spreadsheets: downstream.clone(),
        audio: downstream,
    };
    let context = Arc::new(AppContext::new(config.clone(), capabilities));

    let mut queue = TaskQueue::new(config.task_queue.clone(), db.clone());
    queue.register(Arc::new(ProcessDocumentTask));
    let queue = Arc::new(queue);

    let extensions = Arc::new(Extensions::new());
    extensions.register(TASK_QUEUE_EXTENSION, queue.clone())?;

    let shutdown = CancellationToken::new();
    let workers = queue.start_workers(context.clone(), shutdown.clone());

    let service = Arc::new(DispatchService::new(
        config.clone(),
        db,
        files,
        context,
        extensions,
    ));
    let app = api::router(service, metrics);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    futures::future::join_all(workers).await;
    info!("Task workers stopped");

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docdispatch_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}

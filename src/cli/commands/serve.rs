use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::MemoryKv;
use crate::cli::config::{Config, LogFormat};
use crate::cli::ServeArgs;
use crate::ingest::{self, mqtt::run_mqtt, run_dispatch};
use crate::native::{build_router, init_tracing};
use crate::pipeline::Pipeline;
use crate::store::{DurableStore, MemoryStore, SqliteStore};

pub async fn execute_serve(args: ServeArgs) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    config.apply_overrides(&args);
    config.validate()?;

    init_tracing(config.log_format == LogFormat::Json);

    let store: Arc<dyn DurableStore> = match &config.database {
        Some(path) => Arc::new(
            SqliteStore::open(path)
                .with_context(|| format!("Failed to open database {}", path.display()))?,
        ),
        None => {
            warn!("no database configured, flushed readings are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(MemoryKv::new()),
        store,
        config.pipeline_options(),
    ));

    let (ingest_tx, ingest_rx) = ingest::channel(config.ingest_capacity);
    let dispatcher = tokio::spawn(run_dispatch(ingest_rx, pipeline.clone()));
    let scheduler = pipeline.scheduler().spawn();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mqtt = config
        .mqtt
        .clone()
        .map(|settings| tokio::spawn(run_mqtt(settings, ingest_tx.clone(), shutdown_rx)));

    let app = build_router(pipeline.clone(), ingest_tx);
    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!(
        addr = %config.listen,
        flush_interval_secs = config.flush_interval_secs,
        "sensorpipe listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = mqtt {
        handle.await.context("MQTT adapter panicked")?;
    }
    // Every sender is gone now, so the dispatcher drains and exits.
    dispatcher.await.context("ingest dispatcher panicked")?;
    scheduler.stop().await;

    info!("sensorpipe stopped");
    Ok(())
}

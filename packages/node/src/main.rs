use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::retry::spawn_cleanup_task;
use common::storage::FilesystemBlockstore;
use dispatcher::Dispatcher;
use node::config::NodeAppConfig;
use node::database::init_db;
use node::jobs::run_auto_retry;
use node::market::HttpDealClient;
use node::reactor::TransferReactor;
use node::recovery::sweep_interrupted;
use node::state::{AppState, ProcessorContext};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Buffered transfer events before webhook callers are made to wait.
const EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = NodeAppConfig::load().context("Failed to load config")?;

    let db = init_db(&config.database)
        .await
        .context("Failed to initialize database")?;

    // Must run before any job can pick content up.
    let recovered = sweep_interrupted(&db)
        .await
        .context("Failed to recover interrupted content")?;
    info!(count = recovered.len(), "Restart recovery done");

    let blockstore = FilesystemBlockstore::new(
        config.blockstore.path.clone().into(),
        config.blockstore.max_size,
    )
    .await
    .context("Failed to open blockstore")?;
    let market =
        HttpDealClient::new(&config.market).context("Failed to build deal protocol client")?;

    let dispatcher = Dispatcher::new(&config.dispatcher);
    let ctx = Arc::new(ProcessorContext::new(
        db,
        dispatcher.clone(),
        Arc::new(market),
        Arc::new(blockstore),
        config.clone(),
    ));
    dispatcher.start(config.dispatcher.workers);

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let reactor = tokio::spawn(TransferReactor::new(ctx.clone()).run(events_rx));

    let shutdown = CancellationToken::new();
    let auto_retry = if config.retry.enabled {
        Some(tokio::spawn(run_auto_retry(ctx.clone(), shutdown.clone())))
    } else {
        None
    };
    let restart_window = Duration::from_millis(config.transfer.restart_max_delay_ms);
    let _cleanup_handle = spawn_cleanup_task(
        ctx.restarts.clone(),
        restart_window,
        restart_window * 10,
    );

    let state = AppState {
        ctx: ctx.clone(),
        events: events_tx,
    };
    let app = node::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server running at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Some(handle) = auto_retry {
        let _ = handle.await;
    }
    // The router owned the last event sender, so the reactor drains and exits.
    let _ = reactor.await;
    dispatcher.shutdown().await;
    info!("Node stopped");

    Ok(())
}

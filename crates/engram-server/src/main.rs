//! Engram worker binary
//!
//! Long-running memory service: HTTP API + SSE on the worker port, the
//! consolidation scheduler, the session-log indexer, and the
//! pending-embedding sweep. With `--stdio` the tool surface is also served
//! over stdin/stdout for hosts that speak the line protocol directly.

use clap::Parser;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use engram_core::{
    identity, provider_from_config, Config, Consolidator, Scheduler, SearchManager,
    SessionIndexer, Store,
};

use engram_server::api;
use engram_server::ingest::IngestHub;
use engram_server::protocol::{self, StdioTransport};
use engram_server::state::AppState;

/// Cadence of the pending-embedding retry sweep
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(
    name = "engram-server",
    version,
    about = "Project-scoped long-term memory worker for coding assistants"
)]
struct Args {
    /// Additionally serve the tool surface on stdin/stdout
    #[arg(long)]
    stdio: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Logs to stderr; stdout may carry the stdio tool protocol
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("engram-server v{} starting", engram_core::VERSION);

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let store = match Store::open_with_config(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to open store at {:?}: {e}", config.database_path);
            std::process::exit(1);
        }
    };
    info!(path = ?config.database_path, "store ready");

    let embedder = match provider_from_config(&config.embedding) {
        Ok(embedder) => embedder,
        Err(e) => {
            error!("embedding provider configuration: {e}");
            std::process::exit(1);
        }
    };
    info!(
        model = embedder.model_name(),
        dimensions = embedder.dimensions(),
        "embedding provider selected"
    );

    let search = Arc::new(SearchManager::new(
        Arc::clone(&store),
        Arc::clone(&embedder),
        config.search.clone(),
        config.rerank.clone(),
    ));

    // The cross-encoder download must never block startup
    #[cfg(feature = "embeddings")]
    {
        let search = Arc::clone(&search);
        tokio::task::spawn_blocking(move || search.init_reranker());
    }

    let (event_tx, _) = broadcast::channel(1024);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let workstation = identity::workstation_id(config.workstation_id.as_deref());
    info!(workstation, "workstation identity resolved");

    let ingest = IngestHub::new(
        Arc::clone(&store),
        Arc::clone(&embedder),
        event_tx.clone(),
        workstation.clone(),
        config.ingest_queue_depth,
        config.embed_workers,
    );
    tokio::spawn(Arc::clone(&ingest).run_pending_sweep(SWEEP_INTERVAL, shutdown_rx.clone()));

    // Row-store / vector-index parity audit; divergence is repaired by
    // re-indexing from rows and logged, never surfaced
    #[cfg(feature = "vector-search")]
    {
        let store = Arc::clone(&store);
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(3600));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let store = Arc::clone(&store);
                match tokio::task::spawn_blocking(move || store.audit_vector_index()).await {
                    Ok(Ok(true)) => info!("vector index repaired from rows"),
                    Ok(Ok(false)) => {}
                    Ok(Err(e)) => warn!("index audit failed: {e}"),
                    Err(e) => warn!("index audit task panicked: {e}"),
                }
            }
        });
    }

    let consolidator = Arc::new(Consolidator::new(
        Arc::clone(&store),
        config.consolidation.clone(),
    ));
    let mut scheduler = Scheduler::new(Arc::clone(&consolidator), shutdown_rx.clone());
    scheduler.spawn();

    if let Some(sessions_dir) = config.sessions_dir.clone() {
        let indexer = Arc::new(SessionIndexer::new(
            Arc::clone(&store),
            sessions_dir.clone(),
            workstation.clone(),
        ));
        info!(dir = ?sessions_dir, "session indexer watching");
        tokio::spawn(indexer.run(config.sessions_scan_interval, shutdown_rx.clone()));
    }

    let state = AppState {
        config: Arc::clone(&config),
        store,
        search,
        consolidator,
        ingest,
        events: event_tx,
        workstation,
        started_at: Instant::now(),
    };

    let app = api::build_router(state.clone()).merge(protocol::http::router(state.clone()));

    let addr = format!("{}:{}", config.worker_host, config.worker_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!("listening on http://{addr}");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    if args.stdio {
        info!("tool surface also available on stdio");
        let stdio = StdioTransport::new().run(state);
        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!("server error: {e}");
                }
            }
            result = stdio => {
                if let Err(e) = result {
                    warn!("stdio transport ended: {e}");
                } else {
                    info!("stdin closed, shutting down");
                }
            }
        }
    } else if let Err(e) = server.await {
        error!("server error: {e}");
    }

    // Stop cycles at their next page boundary, then drain the scheduler
    let _ = shutdown_tx.send(true);
    scheduler.join().await;
    info!("engram-server shut down");
}

/// Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl+c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

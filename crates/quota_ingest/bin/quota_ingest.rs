//! Process surface of the quota ingestion service.
//!
//! Reads `connection.json` and `area_branch.json` from the working
//! directory, connects to the document store, loads the existing snapshot,
//! and serves the feed until SIGINT/SIGTERM. Any positional argument enables
//! the search-index bootstrap. Exits 0 on graceful shutdown, 1 on a fatal
//! init error.

use quota_ingest::area::AreaMap;
use quota_ingest::config::ServiceConfig;
use quota_ingest::error::FeedError;
use quota_ingest::handler::Dispatcher;
use quota_ingest::server::IngestServer;
use quota_ingest::store::{DocumentStore, RedisJsonStore, SummaryStore};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "connection.json";
const AREA_FILE: &str = "area_branch.json";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "service failed");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), FeedError> {
    info!("quota ingestion service starting");
    let bootstrap_index = std::env::args().nth(1).is_some();
    if bootstrap_index {
        info!("search index bootstrap requested");
    }

    let cfg = ServiceConfig::load(CONFIG_FILE)?;
    let areas = Arc::new(AreaMap::load(AREA_FILE)?);
    info!(
        areas = areas.len(),
        branches = areas.all_branches().len(),
        "area mapping loaded"
    );

    let store: Arc<dyn DocumentStore> = Arc::new(RedisJsonStore::new(&cfg)?);
    let summaries = Arc::new(SummaryStore::new(store, Arc::clone(&areas)));
    summaries.init(bootstrap_index)?;
    info!(cached = summaries.len(), "summary store ready");

    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&summaries), areas));
    let mut server = IngestServer::bind(&cfg, dispatcher)?;
    server.start()?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::Release);
    })
    .map_err(|e| FeedError::Unexpected(format!("installing signal handler: {e}")))?;

    info!("running; SIGINT or SIGTERM stops the service");
    while running.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(200));
    }

    info!("shutdown signal received");
    server.stop();
    info!("shutdown complete");
    Ok(())
}

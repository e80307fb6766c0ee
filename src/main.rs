mod api;
mod config;
mod error;
mod feed;
mod ledger;
mod matcher;
mod metrics;
mod reconcile;
mod settlement;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, LedgerBackend};
use crate::error::{AppError, Result};
use crate::feed::HttpResultFeed;
use crate::ledger::{JsonFileLedger, LedgerStore, SqliteLedger};
use crate::metrics::compute_metrics;
use crate::reconcile::ReconciliationJob;

const USAGE: &str = "usage: settler [serve|reconcile|metrics]";

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    let action = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    if let Err(e) = run(cfg, &action).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config, action: &str) -> Result<()> {
    let store = open_store(&cfg).await?;
    let latency = Arc::new(LatencyStats::new());
    let feed = HttpResultFeed::new(&cfg)?.with_latency(Arc::clone(&latency));
    let job = ReconciliationJob::new(Arc::clone(&store), Arc::new(feed))
        .with_concurrency(cfg.feed_concurrency);
    let timeout = Duration::from_secs(cfg.match_timeout_secs);

    match action {
        "serve" => serve(cfg, store, job, latency).await,
        "reconcile" => {
            let stats = job.run(cfg.max_matches, timeout).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        "metrics" => {
            let metrics = compute_metrics(store.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
            Ok(())
        }
        other => Err(AppError::Config(format!("unknown action '{other}'; {USAGE}"))),
    }
}

async fn open_store(cfg: &Config) -> Result<Arc<dyn LedgerStore>> {
    let store: Arc<dyn LedgerStore> = match cfg.ledger_backend {
        LedgerBackend::Json => {
            info!("Ledger: JSON file at {}", cfg.ledger_path);
            Arc::new(JsonFileLedger::new(&cfg.ledger_path))
        }
        LedgerBackend::Sqlite => Arc::new(SqliteLedger::connect(&cfg.db_path).await?),
    };
    Ok(store)
}

async fn serve(
    cfg: Config,
    store: Arc<dyn LedgerStore>,
    job: ReconciliationJob,
    latency: Arc<LatencyStats>,
) -> Result<()> {
    if cfg.feed_api_key.is_empty() {
        warn!("FEED_API_KEY not set, feed lookups will be rejected upstream");
    }

    let api_state = ApiState {
        store,
        job: Arc::new(job),
        write_lock: Arc::new(tokio::sync::Mutex::new(())),
        health: Arc::new(HealthState::new()),
        latency,
        default_max_matches: cfg.max_matches,
        default_timeout: Duration::from_secs(cfg.match_timeout_secs),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        "HTTP API listening on {bind_addr} (max_matches={}, match_timeout={}s, feed_concurrency={})",
        cfg.max_matches, cfg.match_timeout_secs, cfg.feed_concurrency
    );

    axum::serve(listener, app).await?;

    Ok(())
}
